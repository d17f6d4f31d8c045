use crate::{labels::Selector, Meta, ServicePort};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// An externally-registered service, addressed by hostname.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    #[serde(flatten)]
    pub meta: Meta,

    /// Hostnames the entry publishes. Each produces one service entity.
    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub addresses: Vec<IpAddr>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    /// Selects member workloads (pods and workload entries) by label.
    #[serde(default)]
    pub workload_selector: Option<Selector>,
}

/// An externally-registered workload (e.g. a VM joined to the mesh).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadEntry {
    #[serde(flatten)]
    pub meta: Meta,

    pub address: IpAddr,

    /// Overrides the controller's network lookup when set.
    #[serde(default)]
    pub network: Option<String>,
}
