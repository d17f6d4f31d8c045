use ahash::AHashSet as HashSet;
use ambient_controller_api::Labels;
use std::{fmt, net::IpAddr, sync::Arc};

/// The kinds of configuration identities carried by a push.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Address,
    AuthorizationPolicy,
}

/// Identifies one changed configuration to the data-plane sync layer.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ConfigKey {
    pub kind: Kind,
    pub name: String,
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.kind, self.name)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PushReason {
    AmbientUpdate,
}

/// One downstream push. The index only ever issues incremental pushes
/// (`full == false`).
#[derive(Clone, Debug, PartialEq)]
pub struct PushRequest {
    pub full: bool,
    pub configs_updated: HashSet<ConfigKey>,
    pub reason: PushReason,
}

/// The downstream synchronization channel.
pub trait Updater: Send + Sync {
    fn config_update(&self, req: PushRequest);
}

/// A gateway bridging two networks, as known to the network topology layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkGateway {
    pub network: String,
    pub address: IpAddr,
    pub port: u16,
}

/// Resolves the network a workload address lives on. Supplied by the
/// embedding process; the index recomputes all workloads when told the
/// topology changed (`sync_all`).
pub type LookupNetwork = Arc<dyn Fn(IpAddr, &Labels) -> String + Send + Sync>;

/// Enumerates the known cross-network gateways.
pub type LookupNetworkGateways = Arc<dyn Fn() -> Vec<NetworkGateway> + Send + Sync>;
