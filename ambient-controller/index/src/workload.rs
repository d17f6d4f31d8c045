//! The Workload view: normalized workload entities combined from pods and
//! externally-registered workload entries, joined with node locality, service
//! membership, waypoint assignment, and network identity.

use crate::{
    collection::{
        collection, register_derived, register_trigger, Collection, Event, Keyed, RecomputeTrigger,
    },
    waypoint::{resolve_waypoint, Waypoint},
    ClusterInfo, Sources,
};
use ambient_controller_api::{self as api, TargetPort};
use ambient_controller_core::{
    LookupNetwork, NetworkMode, PortBinding, PortList, ServiceInfo, SourceKind, SourceRef,
    Workload, WorkloadInfo,
};
use std::{collections::BTreeMap, net::IpAddr, sync::Arc};

impl Keyed for WorkloadInfo {
    fn key(&self) -> String {
        self.workload.uid.clone()
    }
}

struct Ctx {
    cluster: Arc<ClusterInfo>,
    pods: Collection<api::Pod>,
    nodes: Collection<api::Node>,
    namespaces: Collection<api::Namespace>,
    workload_entries: Collection<api::WorkloadEntry>,
    endpoint_slices: Collection<api::EndpointSlice>,
    services: Collection<ServiceInfo>,
    waypoints: Collection<Waypoint>,
    lookup_network: LookupNetwork,
}

/// Builds the workload collection. Uids are source-kind-qualified
/// (`{cluster}//Pod/{ns}/{name}`), which both guarantees uniqueness across
/// kinds and makes native pods enumerate ahead of workload entries.
pub(crate) fn workloads(
    cluster: Arc<ClusterInfo>,
    sources: &Sources,
    services: &Collection<ServiceInfo>,
    waypoints: &Collection<Waypoint>,
    network_trigger: &RecomputeTrigger,
    lookup_network: LookupNetwork,
) -> Collection<WorkloadInfo> {
    let (tx, out) = collection::<WorkloadInfo>("workloads", true);
    for parent in [
        Arc::new(sources.pods.clone()) as Arc<dyn crate::collection::Ready>,
        Arc::new(sources.nodes.clone()),
        Arc::new(sources.namespaces.clone()),
        Arc::new(sources.workload_entries.clone()),
        Arc::new(sources.endpoint_slices.clone()),
        Arc::new(services.clone()),
        Arc::new(waypoints.clone()),
    ] {
        out.add_parent(parent);
    }

    let ctx = Arc::new(Ctx {
        cluster,
        pods: sources.pods.clone(),
        nodes: sources.nodes.clone(),
        namespaces: sources.namespaces.clone(),
        workload_entries: sources.workload_entries.clone(),
        endpoint_slices: sources.endpoint_slices.clone(),
        services: services.clone(),
        waypoints: waypoints.clone(),
        lookup_network,
    });

    let compute: Arc<dyn Fn(&str) -> Option<WorkloadInfo> + Send + Sync> = {
        let ctx = ctx.clone();
        Arc::new(move |id: &str| ctx.compute(id))
    };

    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.pods,
            tx.clone(),
            move |ev: &Event<api::Pod>| {
                let pod = ev.item();
                vec![ctx.pod_uid(&pod.meta.namespace, &pod.meta.name)]
            },
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.workload_entries,
            tx.clone(),
            move |ev: &Event<api::WorkloadEntry>| {
                let we = ev.item();
                vec![ctx.entry_uid(&we.meta.namespace, &we.meta.name)]
            },
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.nodes,
            tx.clone(),
            move |ev: &Event<api::Node>| {
                let node = &ev.item().meta.name;
                ctx.pods
                    .list()
                    .into_iter()
                    .filter(|pod| pod.node_name.as_deref() == Some(node))
                    .map(|pod| ctx.pod_uid(&pod.meta.namespace, &pod.meta.name))
                    .collect()
            },
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.endpoint_slices,
            tx.clone(),
            move |ev: &Event<api::EndpointSlice>| match ev {
                Event::Add(slice) | Event::Delete(slice) => ctx.uids_with_addresses(
                    &slice.meta.namespace,
                    slice.endpoints.iter().copied().collect::<Vec<_>>(),
                ),
                Event::Update { new, old } => {
                    let mut ips = old.endpoints.clone();
                    ips.extend(new.endpoints.iter().copied());
                    ctx.uids_with_addresses(&new.meta.namespace, ips)
                }
            },
            move |id| compute(id),
        );
    }
    {
        // A service change re-evaluates the workloads its old or new selector
        // could cover; selector-less services fall back to every workload in
        // the namespace.
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            services,
            tx.clone(),
            move |ev: &Event<ServiceInfo>| match ev {
                Event::Add(si) | Event::Delete(si) => ctx.uids_selected(si, None),
                Event::Update { new, old } => ctx.uids_selected(new, Some(old)),
            },
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            waypoints,
            tx.clone(),
            move |ev: &Event<Waypoint>| ctx.uids_in_namespace(&ev.item().namespace),
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.namespaces,
            tx.clone(),
            move |ev: &Event<api::Namespace>| ctx.uids_in_namespace(&ev.item().meta.name),
            move |id| compute(id),
        );
    }

    // Network convergence is not a resource event; the trigger re-evaluates
    // every known workload against the injected network lookup.
    register_trigger(network_trigger, tx, move |id| compute(id));

    out
}

impl Ctx {
    fn pod_uid(&self, namespace: &str, name: &str) -> String {
        format!("{}//Pod/{}/{}", self.cluster.cluster_id, namespace, name)
    }

    fn entry_uid(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}//WorkloadEntry/{}/{}",
            self.cluster.cluster_id, namespace, name
        )
    }

    fn uids_in_namespace(&self, namespace: &str) -> Vec<String> {
        let mut uids = self
            .pods
            .list()
            .into_iter()
            .filter(|pod| pod.meta.namespace == namespace)
            .map(|pod| self.pod_uid(&pod.meta.namespace, &pod.meta.name))
            .collect::<Vec<_>>();
        uids.extend(
            self.workload_entries
                .list()
                .into_iter()
                .filter(|we| we.meta.namespace == namespace)
                .map(|we| self.entry_uid(&we.meta.namespace, &we.meta.name)),
        );
        uids
    }

    fn uids_with_addresses(&self, namespace: &str, ips: Vec<IpAddr>) -> Vec<String> {
        let mut uids = self
            .pods
            .list()
            .into_iter()
            .filter(|pod| {
                pod.meta.namespace == namespace && pod.addresses.iter().any(|ip| ips.contains(ip))
            })
            .map(|pod| self.pod_uid(&pod.meta.namespace, &pod.meta.name))
            .collect::<Vec<_>>();
        uids.extend(
            self.workload_entries
                .list()
                .into_iter()
                .filter(|we| we.meta.namespace == namespace && ips.contains(&we.address))
                .map(|we| self.entry_uid(&we.meta.namespace, &we.meta.name)),
        );
        uids
    }

    fn uids_selected(&self, si: &ServiceInfo, old: Option<&ServiceInfo>) -> Vec<String> {
        let namespace = si.service.namespace.clone();
        let matches = |labels: &api::Labels| {
            let hit = |s: &ServiceInfo| match &s.selector {
                Some(sel) => sel.matches(labels),
                None => true,
            };
            hit(si) || old.map(hit).unwrap_or(false)
        };

        let mut uids = self
            .pods
            .list()
            .into_iter()
            .filter(|pod| pod.meta.namespace == namespace && matches(&pod.meta.labels))
            .map(|pod| self.pod_uid(&pod.meta.namespace, &pod.meta.name))
            .collect::<Vec<_>>();
        uids.extend(
            self.workload_entries
                .list()
                .into_iter()
                .filter(|we| we.meta.namespace == namespace && matches(&we.meta.labels))
                .map(|we| self.entry_uid(&we.meta.namespace, &we.meta.name)),
        );
        uids
    }

    fn compute(&self, uid: &str) -> Option<WorkloadInfo> {
        let qualified = uid.strip_prefix(&format!("{}//", self.cluster.cluster_id))?;
        let mut parts = qualified.splitn(3, '/');
        let (kind, namespace, name) = (parts.next()?, parts.next()?, parts.next()?);
        match kind {
            "Pod" => self
                .pods
                .get(&format!("{namespace}/{name}"))
                .and_then(|pod| self.from_pod(uid, pod)),
            "WorkloadEntry" => self
                .workload_entries
                .get(&format!("{namespace}/{name}"))
                .map(|we| self.from_entry(uid, we)),
            // Uids are only ever minted above; anything else is a bug, not a
            // runtime condition.
            kind => unreachable!("unrecognized workload uid kind {kind}"),
        }
    }

    fn from_pod(&self, uid: &str, pod: api::Pod) -> Option<WorkloadInfo> {
        if pod.addresses.is_empty() {
            tracing::debug!(pod = %pod.key(), "no addresses assigned, skipping");
            return None;
        }
        let network = (self.lookup_network)(pod.addresses[0], &pod.meta.labels);
        let locality = pod
            .node_name
            .as_deref()
            .and_then(|n| self.nodes.get(n))
            .and_then(|n| n.locality);
        Some(WorkloadInfo {
            workload: Workload {
                uid: uid.to_string(),
                name: pod.meta.name.clone(),
                namespace: pod.meta.namespace.clone(),
                network,
                addresses: pod.addresses.clone(),
                network_mode: if pod.host_network {
                    NetworkMode::HostNetwork
                } else {
                    NetworkMode::Standard
                },
                node: pod.node_name.clone(),
                locality,
                services: self.membership(
                    &pod.meta.namespace,
                    &pod.meta.labels,
                    &pod.addresses,
                    Some(&pod),
                ),
                waypoint: resolve_waypoint(
                    &pod.meta.labels,
                    &pod.meta.namespace,
                    &self.namespaces,
                    &self.waypoints,
                ),
            },
            labels: pod.meta.labels.clone(),
            created_at: pod.meta.created_at,
            source: SourceRef::new(SourceKind::Pod, &pod.meta.namespace, &pod.meta.name),
        })
    }

    fn from_entry(&self, uid: &str, we: api::WorkloadEntry) -> WorkloadInfo {
        let network = we
            .network
            .clone()
            .unwrap_or_else(|| (self.lookup_network)(we.address, &we.meta.labels));
        WorkloadInfo {
            workload: Workload {
                uid: uid.to_string(),
                name: we.meta.name.clone(),
                namespace: we.meta.namespace.clone(),
                network,
                addresses: vec![we.address],
                network_mode: NetworkMode::Standard,
                node: None,
                locality: None,
                services: self.membership(&we.meta.namespace, &we.meta.labels, &[we.address], None),
                waypoint: resolve_waypoint(
                    &we.meta.labels,
                    &we.meta.namespace,
                    &self.namespaces,
                    &self.waypoints,
                ),
            },
            labels: we.meta.labels.clone(),
            created_at: we.meta.created_at,
            source: SourceRef::new(SourceKind::WorkloadEntry, &we.meta.namespace, &we.meta.name),
        }
    }

    /// Service membership for one workload: label-selector services match on
    /// labels, selector-less services match when an endpoint slice lists one
    /// of the workload's addresses.
    fn membership(
        &self,
        namespace: &str,
        labels: &api::Labels,
        addresses: &[IpAddr],
        pod: Option<&api::Pod>,
    ) -> BTreeMap<String, PortList> {
        let mut services = BTreeMap::new();
        for si in self.services.list() {
            if si.service.namespace != namespace {
                continue;
            }
            let member = match &si.selector {
                Some(selector) => selector.matches(labels),
                None => self.in_slices(&si, addresses),
            };
            if !member {
                continue;
            }

            let ports = si
                .service
                .ports
                .iter()
                .filter_map(|p| {
                    let target_port = match &p.target_port {
                        Some(TargetPort::Number(n)) => *n,
                        Some(TargetPort::Name(name)) => pod?.port_by_name(name)?,
                        None => p.port,
                    };
                    Some(PortBinding {
                        service_port: p.port,
                        target_port,
                    })
                })
                .collect();
            services.insert(si.resource_name(), ports);
        }
        services
    }

    fn in_slices(&self, si: &ServiceInfo, addresses: &[IpAddr]) -> bool {
        self.endpoint_slices.list().iter().any(|slice| {
            slice.meta.namespace == si.service.namespace
                && slice.service_name == si.service.name
                && slice.endpoints.iter().any(|ip| addresses.contains(ip))
        })
    }
}
