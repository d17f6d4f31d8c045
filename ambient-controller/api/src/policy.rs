use crate::{labels::Selector, Meta};
use serde::{Deserialize, Serialize};

/// Scopes traffic authorization to a set of workloads.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    #[serde(flatten)]
    pub meta: Meta,

    /// Applies to all workloads in the namespace when unset.
    #[serde(default)]
    pub selector: Option<Selector>,

    #[serde(default)]
    pub action: PolicyAction,

    /// Source identities permitted (or denied) by this policy.
    #[serde(default)]
    pub from_identities: Vec<String>,

    /// Destination ports the policy applies to; empty means all ports.
    #[serde(default)]
    pub to_ports: Vec<u16>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum PolicyAction {
    #[default]
    Allow,
    Deny,
}

/// Workload-scoped transport-security requirements.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAuthentication {
    #[serde(flatten)]
    pub meta: Meta,

    #[serde(default)]
    pub selector: Option<Selector>,

    #[serde(default)]
    pub mtls_mode: TlsMode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TlsMode {
    #[default]
    Permissive,
    Strict,
    Disable,
}
