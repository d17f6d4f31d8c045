use crate::{NamespaceHostname, NetworkAddress, SourceRef};
use ambient_controller_api::Labels;
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, net::IpAddr};

/// How a workload attaches to the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NetworkMode {
    #[default]
    Standard,
    /// Shares its host's addresses; exempt from address-uniqueness dedup.
    HostNetwork,
}

/// One service-port binding on a member workload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortBinding {
    pub service_port: u16,
    pub target_port: u16,
}

pub type PortList = Vec<PortBinding>;

/// The externally-visible form of a workload. This is the trigger-extractor
/// projection: a recomputation that leaves this value unchanged produces no
/// downstream push.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    /// Unique across the workload collection, source-kind-qualified:
    /// `{cluster}//Pod/{ns}/{name}` or `{cluster}//WorkloadEntry/{ns}/{name}`.
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub network: String,
    pub addresses: Vec<IpAddr>,
    pub network_mode: NetworkMode,
    pub node: Option<String>,
    /// `region/zone` from the hosting node.
    pub locality: Option<String>,
    /// Service membership, keyed by `namespace/hostname`.
    pub services: BTreeMap<String, PortList>,
    pub waypoint: Option<NamespaceHostname>,
}

/// A workload plus the bookkeeping the index needs but the data plane never
/// sees.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadInfo {
    pub workload: Workload,
    /// Used for selector matching; label-only changes do not push.
    pub labels: Labels,
    pub created_at: DateTime<Utc>,
    pub source: SourceRef,
}

impl WorkloadInfo {
    pub fn resource_name(&self) -> String {
        self.workload.uid.clone()
    }

    pub fn network_addresses(&self) -> Vec<NetworkAddress> {
        self.workload
            .addresses
            .iter()
            .map(|ip| NetworkAddress {
                network: self.workload.network.clone(),
                ip: *ip,
            })
            .collect()
    }
}
