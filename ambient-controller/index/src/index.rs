//! The index façade: owns the derived collections and secondary indexes and
//! answers the data-plane queries over them.

use crate::{
    collection::{Collection, Index as Lookup, Ready, RecomputeTrigger},
    dispatch::{push_on_change, DispatchMetrics},
    mesh, policy, service,
    status::{StatusQueue, StatusUpdate},
    waypoint, workload, ClusterInfo, Sources, StatusPatchers, Waypoint, WorkloadAuthorization,
};
use ahash::AHashSet as HashSet;
use ambient_controller_core::{
    AddressInfo, ConfigKey, Kind, LookupNetwork, LookupNetworkGateways, NamespaceHostname,
    NetworkAddress, NetworkGateway, NetworkMode, ServiceInfo, SourceKind, Updater, WaypointKey,
    WorkloadInfo,
};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::{net::IpAddr, sync::Arc};

pub struct Options {
    pub cluster_info: ClusterInfo,
    /// The downstream synchronization channel receiving incremental pushes.
    pub updater: Arc<dyn Updater>,
    pub lookup_network: LookupNetwork,
    pub lookup_network_gateways: LookupNetworkGateways,
    /// Write clients for status acknowledgment, if enabled.
    pub status: Option<StatusPatchers>,
}

/// The ambient index. Collections recompute incrementally as source events
/// arrive; queries read consistent snapshots without blocking writers beyond
/// individual lock hold times.
pub struct Index {
    workloads: Collection<WorkloadInfo>,
    workloads_by_address: Lookup<NetworkAddress, WorkloadInfo>,
    workloads_by_service: Lookup<String, WorkloadInfo>,
    workloads_by_waypoint: Lookup<NamespaceHostname, WorkloadInfo>,

    services: Collection<ServiceInfo>,
    services_by_address: Lookup<NetworkAddress, ServiceInfo>,
    services_by_waypoint: Lookup<NamespaceHostname, ServiceInfo>,

    waypoints: Collection<Waypoint>,
    policies: Collection<WorkloadAuthorization>,

    network_trigger: Arc<RecomputeTrigger>,
    lookup_network_gateways: LookupNetworkGateways,
    status_queue: Mutex<Option<StatusQueue>>,
}

impl Index {
    pub fn new(options: Options, sources: &Sources, registry: &mut Registry) -> Self {
        let Options {
            cluster_info,
            updater,
            lookup_network,
            lookup_network_gateways,
            status,
        } = options;
        let cluster = Arc::new(cluster_info);
        let network_trigger = RecomputeTrigger::new(false);

        let waypoints = waypoint::waypoints(cluster.clone(), sources);
        let services =
            service::workload_services(cluster.clone(), sources, &waypoints, lookup_network.clone());
        let mesh = mesh::mesh_config(cluster.clone(), sources);
        let policies = policy::policies(sources, &mesh);
        let workloads = workload::workloads(
            cluster,
            sources,
            &services,
            &waypoints,
            &network_trigger,
            lookup_network,
        );
        // The network lookup feeds workload computation, so its convergence
        // gates workload readiness.
        workloads.add_parent(network_trigger.clone());

        let workloads_by_address = workloads.index(|wl: &WorkloadInfo| wl.network_addresses());
        let workloads_by_service =
            workloads.index(|wl: &WorkloadInfo| wl.workload.services.keys().cloned().collect());
        let workloads_by_waypoint =
            workloads.index(|wl: &WorkloadInfo| wl.workload.waypoint.iter().cloned().collect());
        let services_by_address = services.index(|si: &ServiceInfo| si.service.addresses.clone());
        let services_by_waypoint =
            services.index(|si: &ServiceInfo| si.service.waypoint.iter().cloned().collect());

        let metrics = DispatchMetrics::register(registry);
        push_on_change(
            &workloads,
            |wl: &WorkloadInfo| wl.workload.clone(),
            |wl| {
                Some(ConfigKey {
                    kind: Kind::Address,
                    name: wl.resource_name(),
                })
            },
            updater.clone(),
            metrics.clone(),
        );
        push_on_change(
            &services,
            |si: &ServiceInfo| si.service.clone(),
            |si| {
                Some(ConfigKey {
                    kind: Kind::Address,
                    name: si.resource_name(),
                })
            },
            updater.clone(),
            metrics.clone(),
        );
        push_on_change(
            &policies,
            |wa: &WorkloadAuthorization| wa.authorization.clone(),
            |wa| {
                wa.authorization.as_ref().map(|_| ConfigKey {
                    kind: Kind::AuthorizationPolicy,
                    name: format!("{}/{}", wa.namespace, wa.name),
                })
            },
            updater,
            metrics,
        );

        let status_queue = status.map(|patchers| {
            let queue = StatusQueue::new();
            {
                let patchers = patchers.clone();
                queue.register(&services, "services", move |si: &ServiceInfo| {
                    let patcher = match si.source.kind {
                        SourceKind::Service => patchers.services.clone(),
                        SourceKind::ServiceEntry => patchers.service_entries.clone(),
                        kind => unreachable!("service entities are never derived from {kind}"),
                    };
                    Some((
                        patcher,
                        StatusUpdate {
                            id: si.source.id.clone(),
                            patch: reconciled_patch(),
                        },
                    ))
                });
            }
            queue.register(&policies, "policies", move |wa: &WorkloadAuthorization| {
                // Converted peer authentications have no status of their own.
                if wa.source.kind != SourceKind::AuthorizationPolicy {
                    return None;
                }
                Some((
                    patchers.authorization_policies.clone(),
                    StatusUpdate {
                        id: wa.source.id.clone(),
                        patch: accepted_patch(wa.authorization.is_some()),
                    },
                ))
            });
            queue
        });

        Self {
            workloads,
            workloads_by_address,
            workloads_by_service,
            workloads_by_waypoint,
            services,
            services_by_address,
            services_by_waypoint,
            waypoints,
            policies,
            network_trigger,
            lookup_network_gateways,
            status_queue: Mutex::new(status_queue),
        }
    }

    /// Resolves one lookup key: a workload uid, a `network/ip` address, or a
    /// `namespace/hostname` service key, in that order; services are tried by
    /// resource id before their addresses, so a hostname that happens to be
    /// an IP literal still resolves. Service results carry the member
    /// workloads behind them. Unknown keys resolve to nothing.
    pub fn lookup(&self, key: &str) -> Vec<AddressInfo> {
        if let Some(wl) = self.workloads.get(key) {
            return vec![AddressInfo::Workload(wl)];
        }

        let Some((first, second)) = key.split_once('/') else {
            tracing::warn!(%key, "lookup key is missing its separator");
            return Vec::new();
        };
        let addr = second.parse::<IpAddr>().ok().map(|ip| NetworkAddress {
            network: first.to_string(),
            ip,
        });

        if let Some(addr) = &addr {
            let workloads = self.workloads_by_address.lookup(addr);
            if !workloads.is_empty() {
                return dedupe_workloads(workloads)
                    .into_iter()
                    .map(AddressInfo::Workload)
                    .collect();
            }
        }

        if let Some(svc) = self.services.get(key) {
            return self.service_with_members(svc);
        }

        if let Some(addr) = &addr {
            if let Some(svc) = self.services_by_address.lookup(addr).into_iter().next() {
                return self.service_with_members(svc);
            }
        }

        Vec::new()
    }

    /// Every workload and service currently indexed, with address collisions
    /// deduplicated the same way lookups are.
    pub fn all(&self) -> Vec<AddressInfo> {
        let mut res = dedupe_workloads(self.workloads.list())
            .into_iter()
            .map(AddressInfo::Workload)
            .collect::<Vec<_>>();
        res.extend(self.services.list().into_iter().map(AddressInfo::Service));
        res
    }

    /// Resolves a set of lookup keys into current state plus the keys that no
    /// longer resolve. An empty request means "everything". Results are
    /// deduplicated across keys, so a service key and a member-workload key in
    /// the same request yield the workload once.
    pub fn address_information(
        &self,
        addresses: &HashSet<String>,
    ) -> (Vec<AddressInfo>, HashSet<String>) {
        if addresses.is_empty() {
            return (self.all(), HashSet::new());
        }
        let mut removed = HashSet::new();
        let mut seen = HashSet::new();
        let mut res = Vec::new();
        for addr in addresses {
            let infos = self.lookup(addr);
            if infos.is_empty() {
                removed.insert(addr.clone());
                continue;
            }
            for info in infos {
                if seen.insert(info.resource_name()) {
                    res.push(info);
                }
            }
        }
        (res, removed)
    }

    /// The workloads fronted by a waypoint, ordered by creation time (uid
    /// breaks ties) so the proxy observes a stable enumeration.
    pub fn workloads_for_waypoint(&self, key: &WaypointKey) -> Vec<WorkloadInfo> {
        let mut seen = HashSet::new();
        let mut res = Vec::new();
        for hostname in &key.hostnames {
            let k = NamespaceHostname {
                namespace: key.namespace.clone(),
                hostname: hostname.clone(),
            };
            for wl in self.workloads_by_waypoint.lookup(&k) {
                if seen.insert(wl.workload.uid.clone()) {
                    res.push(wl);
                }
            }
        }
        res.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workload.uid.cmp(&b.workload.uid))
        });
        res
    }

    /// The services fronted by a waypoint.
    pub fn services_for_waypoint(&self, key: &WaypointKey) -> Vec<ServiceInfo> {
        let mut seen = HashSet::new();
        let mut res = Vec::new();
        for hostname in &key.hostnames {
            let k = NamespaceHostname {
                namespace: key.namespace.clone(),
                hostname: hostname.clone(),
            };
            for si in self.services_by_waypoint.lookup(&k) {
                if seen.insert(si.resource_name()) {
                    res.push(si);
                }
            }
        }
        res
    }

    /// Extra subscriptions a proxy should receive beyond what it asked for:
    /// members of services it is subscribed to (a member added under a
    /// watched service must reach the watcher), and all endpoints on the
    /// proxy's own node.
    pub fn additional_pod_subscriptions(
        &self,
        proxy_node: Option<&str>,
        addresses: &HashSet<String>,
        current_subs: &HashSet<String>,
    ) -> HashSet<String> {
        let mut subscribe = HashSet::new();
        for addr in addresses {
            for info in self.lookup(addr) {
                let AddressInfo::Workload(wl) = info else {
                    continue;
                };
                if wl
                    .workload
                    .services
                    .keys()
                    .any(|svc| current_subs.contains(svc))
                {
                    subscribe.insert(wl.resource_name());
                }
            }
        }

        if let Some(node) = proxy_node {
            for wl in self.workloads.list() {
                if wl.workload.node.as_deref() == Some(node) {
                    let name = wl.resource_name();
                    if !current_subs.contains(&name) {
                        subscribe.insert(name);
                    }
                }
            }
        }
        subscribe
    }

    /// Recomputes every workload against the current network topology. Called
    /// by the embedding process after its network view changes.
    pub fn sync_all(&self) {
        self.network_trigger.trigger_recomputation();
    }

    /// Marks the network topology converged; until then the index does not
    /// report synced.
    pub fn networks_synced(&self) {
        self.network_trigger.mark_synced();
    }

    pub fn network_gateways(&self) -> Vec<NetworkGateway> {
        (self.lookup_network_gateways)()
    }

    pub fn has_synced(&self) -> bool {
        self.workloads.has_synced()
            && self.services.has_synced()
            && self.waypoints.has_synced()
            && self.policies.has_synced()
    }

    pub fn workloads(&self) -> &Collection<WorkloadInfo> {
        &self.workloads
    }

    pub fn services(&self) -> &Collection<ServiceInfo> {
        &self.services
    }

    pub fn policies(&self) -> &Collection<WorkloadAuthorization> {
        &self.policies
    }

    /// Drives background work (the status queue) until shutdown. Queries stay
    /// available throughout.
    pub async fn run(&self, shutdown: drain::Watch) {
        let queue = self.status_queue.lock().take();
        match queue {
            Some(queue) => queue.run(shutdown).await,
            None => {
                let _ = shutdown.signaled().await;
            }
        }
    }

    fn service_with_members(&self, svc: ServiceInfo) -> Vec<AddressInfo> {
        let name = svc.resource_name();
        let mut res = vec![AddressInfo::Service(svc)];
        res.extend(
            dedupe_workloads(self.workloads_by_service.lookup(&name))
                .into_iter()
                .map(AddressInfo::Workload),
        );
        res
    }
}

/// Drops workloads that transiently claim an address an earlier workload in
/// enumeration order already claims. Host-network workloads legitimately
/// share their node's addresses and are exempt.
fn dedupe_workloads(workloads: Vec<WorkloadInfo>) -> Vec<WorkloadInfo> {
    let mut seen = HashSet::new();
    let mut res = Vec::with_capacity(workloads.len());
    for wl in workloads {
        if wl.workload.network_mode == NetworkMode::HostNetwork {
            res.push(wl);
            continue;
        }
        if wl.workload.addresses.iter().any(|ip| seen.contains(ip)) {
            continue;
        }
        seen.extend(wl.workload.addresses.iter().copied());
        res.push(wl);
    }
    res
}

fn reconciled_patch() -> serde_json::Value {
    serde_json::json!({
        "status": {
            "conditions": [{
                "type": "Reconciled",
                "status": "True",
                "reason": "Indexed",
                "lastTransitionTime": chrono::Utc::now().to_rfc3339(),
            }]
        }
    })
}

fn accepted_patch(accepted: bool) -> serde_json::Value {
    let (status, reason) = if accepted {
        ("True", "Accepted")
    } else {
        ("False", "NoEnforceableRules")
    };
    serde_json::json!({
        "status": {
            "conditions": [{
                "type": "Accepted",
                "status": status,
                "reason": reason,
                "lastTransitionTime": chrono::Utc::now().to_rfc3339(),
            }]
        }
    })
}
