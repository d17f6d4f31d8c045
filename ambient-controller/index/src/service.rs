//! The Service view: normalized service entities combined from native
//! services and externally-registered service entries.

use crate::{
    collection::{collection, register_derived, Collection, Event, Keyed},
    waypoint::{resolve_waypoint, Waypoint},
    ClusterInfo, Sources,
};
use ambient_controller_api as api;
use ambient_controller_core::{
    LookupNetwork, NetworkAddress, Service, ServiceInfo, SourceKind, SourceRef,
};
use std::sync::Arc;

impl Keyed for ServiceInfo {
    fn key(&self) -> String {
        self.resource_name()
    }
}

struct Ctx {
    cluster: Arc<ClusterInfo>,
    services: Collection<api::Service>,
    service_entries: Collection<api::ServiceEntry>,
    namespaces: Collection<api::Namespace>,
    waypoints: Collection<Waypoint>,
    lookup_network: LookupNetwork,
}

/// Builds the service collection. Entities are keyed `namespace/hostname`;
/// one `ServiceEntry` may publish several hostnames and produces one entity
/// per host.
pub(crate) fn workload_services(
    cluster: Arc<ClusterInfo>,
    sources: &Sources,
    waypoints: &Collection<Waypoint>,
    lookup_network: LookupNetwork,
) -> Collection<ServiceInfo> {
    let (tx, out) = collection::<ServiceInfo>("services", true);
    out.add_parent(Arc::new(sources.services.clone()));
    out.add_parent(Arc::new(sources.service_entries.clone()));
    out.add_parent(Arc::new(sources.namespaces.clone()));
    out.add_parent(Arc::new(waypoints.clone()));

    let ctx = Arc::new(Ctx {
        cluster,
        services: sources.services.clone(),
        service_entries: sources.service_entries.clone(),
        namespaces: sources.namespaces.clone(),
        waypoints: waypoints.clone(),
        lookup_network,
    });

    let compute: Arc<dyn Fn(&str) -> Option<ServiceInfo> + Send + Sync> = {
        let ctx = ctx.clone();
        Arc::new(move |id: &str| ctx.compute(id))
    };

    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.services,
            tx.clone(),
            move |ev: &Event<api::Service>| {
                let svc = ev.item();
                vec![ctx.native_id(&svc.meta.namespace, &svc.meta.name)]
            },
            move |id| compute(id),
        );
    }
    {
        let compute = compute.clone();
        register_derived(
            &sources.service_entries,
            tx.clone(),
            |ev: &Event<api::ServiceEntry>| match ev {
                Event::Add(se) | Event::Delete(se) => entry_ids(se),
                Event::Update { new, old } => {
                    let mut ids = entry_ids(old);
                    ids.extend(entry_ids(new));
                    ids
                }
            },
            move |id| compute(id),
        );
    }
    {
        // Waypoint and namespace changes re-resolve every service in the
        // affected namespace.
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            waypoints,
            tx.clone(),
            move |ev: &Event<Waypoint>| ctx.ids_in_namespace(&ev.item().namespace),
            move |id| compute(id),
        );
    }
    {
        let ctx = ctx.clone();
        let compute = compute.clone();
        register_derived(
            &sources.namespaces,
            tx,
            move |ev: &Event<api::Namespace>| ctx.ids_in_namespace(&ev.item().meta.name),
            move |id| compute(id),
        );
    }

    out
}

fn entry_ids(se: &api::ServiceEntry) -> Vec<String> {
    se.hosts
        .iter()
        .map(|host| format!("{}/{}", se.meta.namespace, host))
        .collect()
}

impl Ctx {
    fn native_id(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/{}",
            namespace,
            self.cluster.service_hostname(namespace, name)
        )
    }

    fn ids_in_namespace(&self, namespace: &str) -> Vec<String> {
        let mut ids = self
            .services
            .list()
            .into_iter()
            .filter(|svc| svc.meta.namespace == namespace)
            .map(|svc| self.native_id(&svc.meta.namespace, &svc.meta.name))
            .collect::<Vec<_>>();
        ids.extend(
            self.service_entries
                .list()
                .iter()
                .filter(|se| se.meta.namespace == namespace)
                .flat_map(|se| entry_ids(se)),
        );
        ids
    }

    fn compute(&self, id: &str) -> Option<ServiceInfo> {
        let (namespace, hostname) = id.split_once('/')?;

        // Native services own the `{name}.{ns}.svc.{suffix}` namespace.
        let native_suffix = format!(".{}.svc.{}", namespace, self.cluster.domain_suffix);
        if let Some(name) = hostname.strip_suffix(&native_suffix) {
            if let Some(svc) = self.services.get(&format!("{namespace}/{name}")) {
                return Some(self.from_service(svc, hostname));
            }
        }

        self.service_entries
            .list()
            .into_iter()
            .find(|se| se.meta.namespace == namespace && se.hosts.iter().any(|h| h == hostname))
            .map(|se| self.from_entry(se, hostname))
    }

    fn from_service(&self, svc: api::Service, hostname: &str) -> ServiceInfo {
        let addresses = svc
            .cluster_ips
            .iter()
            .map(|ip| NetworkAddress {
                network: (self.lookup_network)(*ip, &svc.meta.labels),
                ip: *ip,
            })
            .collect();
        ServiceInfo {
            service: Service {
                name: svc.meta.name.clone(),
                namespace: svc.meta.namespace.clone(),
                hostname: hostname.to_string(),
                addresses,
                ports: svc.ports.clone(),
                waypoint: resolve_waypoint(
                    &svc.meta.labels,
                    &svc.meta.namespace,
                    &self.namespaces,
                    &self.waypoints,
                ),
            },
            labels: svc.meta.labels.clone(),
            selector: svc.selector,
            created_at: svc.meta.created_at,
            source: SourceRef::new(SourceKind::Service, &svc.meta.namespace, &svc.meta.name),
        }
    }

    fn from_entry(&self, se: api::ServiceEntry, hostname: &str) -> ServiceInfo {
        let addresses = se
            .addresses
            .iter()
            .map(|ip| NetworkAddress {
                network: (self.lookup_network)(*ip, &se.meta.labels),
                ip: *ip,
            })
            .collect();
        ServiceInfo {
            service: Service {
                name: se.meta.name.clone(),
                namespace: se.meta.namespace.clone(),
                hostname: hostname.to_string(),
                addresses,
                ports: se.ports.clone(),
                waypoint: resolve_waypoint(
                    &se.meta.labels,
                    &se.meta.namespace,
                    &self.namespaces,
                    &self.waypoints,
                ),
            },
            labels: se.meta.labels.clone(),
            selector: se.workload_selector,
            created_at: se.meta.created_at,
            source: SourceRef::new(SourceKind::ServiceEntry, &se.meta.namespace, &se.meta.name),
        }
    }
}
