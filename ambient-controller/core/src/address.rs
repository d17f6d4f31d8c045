use crate::{ServiceInfo, WorkloadInfo};
use std::{fmt, net::IpAddr};

/// The unit of address-based indexing: an IP qualified by the network it
/// lives on. Multiple workloads may transiently claim the same address; the
/// lookup path deduplicates them.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NetworkAddress {
    pub network: String,
    pub ip: IpAddr,
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.ip)
    }
}

/// Identifies a waypoint's published address. Used only as an index key.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NamespaceHostname {
    pub namespace: String,
    pub hostname: String,
}

impl fmt::Display for NamespaceHostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.hostname)
    }
}

/// A waypoint's namespace and the hostnames it publishes, as presented by a
/// data-plane query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaypointKey {
    pub namespace: String,
    pub hostnames: Vec<String>,
}

/// A lookup result: either a workload or a service projection.
#[derive(Clone, Debug, PartialEq)]
pub enum AddressInfo {
    Workload(WorkloadInfo),
    Service(ServiceInfo),
}

impl AddressInfo {
    /// An opaque stable identifier, usable for diffing across snapshots.
    pub fn resource_name(&self) -> String {
        match self {
            AddressInfo::Workload(w) => w.resource_name(),
            AddressInfo::Service(s) => s.resource_name(),
        }
    }
}
