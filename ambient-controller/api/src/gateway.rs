use crate::Meta;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A gateway instance. Gateways whose class is managed by the mesh controller
/// become waypoint proxies.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gateway {
    #[serde(flatten)]
    pub meta: Meta,

    pub class_name: String,

    /// Addresses published in the gateway's status.
    #[serde(default)]
    pub addresses: Vec<IpAddr>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClass {
    #[serde(flatten)]
    pub meta: Meta,

    /// The controller responsible for gateways of this class.
    pub controller_name: String,
}
