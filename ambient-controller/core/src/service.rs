use crate::{NamespaceHostname, NetworkAddress, SourceRef};
use ambient_controller_api::{labels::Selector, Labels, ServicePort};
use chrono::{DateTime, Utc};

/// The externally-visible form of a service. Like [`crate::Workload`], this
/// is the projection downstream pushes are filtered on.
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub addresses: Vec<NetworkAddress>,
    pub ports: Vec<ServicePort>,
    pub waypoint: Option<NamespaceHostname>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServiceInfo {
    pub service: Service,
    pub labels: Labels,
    /// Selects member workloads. `None` for selector-less services whose
    /// membership comes from endpoint slices.
    pub selector: Option<Selector>,
    pub created_at: DateTime<Utc>,
    pub source: SourceRef,
}

impl ServiceInfo {
    pub fn resource_name(&self) -> String {
        format!("{}/{}", self.service.namespace, self.service.hostname)
    }
}
