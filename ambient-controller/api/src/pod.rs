use crate::Meta;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A scheduled unit of compute.
///
/// Pods without any assigned addresses have not been scheduled yet and produce
/// no workload entity.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(flatten)]
    pub meta: Meta,

    /// Addresses assigned to the pod. Empty until scheduled.
    #[serde(default)]
    pub addresses: Vec<IpAddr>,

    /// The node hosting this pod, once scheduled.
    #[serde(default)]
    pub node_name: Option<String>,

    /// Shares the node's network namespace; the pod's addresses are the
    /// node's and may legitimately collide with other pods.
    #[serde(default)]
    pub host_network: bool,

    /// Named container ports, used to resolve service target ports.
    #[serde(default)]
    pub ports: Vec<NamedPort>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedPort {
    pub name: String,
    pub port: u16,
}

impl Pod {
    pub fn port_by_name(&self, name: &str) -> Option<u16> {
        self.ports.iter().find(|p| p.name == name).map(|p| p.port)
    }
}
