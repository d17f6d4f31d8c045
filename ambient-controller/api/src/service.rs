use crate::{labels::Selector, Meta};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A native cluster service.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(flatten)]
    pub meta: Meta,

    /// Virtual addresses assigned to the service.
    #[serde(default)]
    pub cluster_ips: Vec<IpAddr>,

    /// Selects member workloads by label. Services without a selector get
    /// their membership from endpoint slices instead.
    #[serde(default)]
    pub selector: Option<Selector>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub port: u16,
    /// Either a literal port or the name of a container port on the member.
    #[serde(default)]
    pub target_port: Option<TargetPort>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

/// Membership records for a service without a selector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSlice {
    #[serde(flatten)]
    pub meta: Meta,

    /// The service this slice belongs to.
    pub service_name: String,

    /// Member addresses.
    #[serde(default)]
    pub endpoints: Vec<IpAddr>,
}
