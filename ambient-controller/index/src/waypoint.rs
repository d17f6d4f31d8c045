//! Waypoint proxies, derived from gateways whose class is managed by this
//! controller.

use crate::{
    collection::{collection, register_derived, Collection, Event, Keyed},
    ClusterInfo, Sources, MANAGED_GATEWAY_LABEL, MANAGED_GATEWAY_WAYPOINT, USE_WAYPOINT_LABEL,
};
use ambient_controller_api as api;
use ambient_controller_core::{NamespaceHostname, CONTROLLER_NAME};
use chrono::{DateTime, Utc};
use std::{net::IpAddr, sync::Arc};

#[derive(Clone, Debug, PartialEq)]
pub struct Waypoint {
    pub name: String,
    pub namespace: String,
    /// The hostname workloads and services are indexed under.
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Waypoint {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl Waypoint {
    pub fn namespace_hostname(&self) -> NamespaceHostname {
        NamespaceHostname {
            namespace: self.namespace.clone(),
            hostname: self.hostname.clone(),
        }
    }
}

/// Builds the waypoint collection from gateways and gateway classes.
pub(crate) fn waypoints(cluster: Arc<ClusterInfo>, sources: &Sources) -> Collection<Waypoint> {
    let (tx, out) = collection::<Waypoint>("waypoints", true);
    out.add_parent(Arc::new(sources.gateways.clone()));
    out.add_parent(Arc::new(sources.gateway_classes.clone()));

    let compute: Arc<dyn Fn(&str) -> Option<Waypoint> + Send + Sync> = {
        let gateways = sources.gateways.clone();
        let classes = sources.gateway_classes.clone();
        Arc::new(move |id: &str| {
            let gw = gateways.get(id)?;
            let class = classes.get(&gw.class_name)?;
            if class.controller_name != CONTROLLER_NAME {
                return None;
            }
            Some(Waypoint {
                hostname: cluster.waypoint_hostname(&gw.meta.namespace, &gw.meta.name),
                name: gw.meta.name,
                namespace: gw.meta.namespace,
                addresses: gw.addresses,
                created_at: gw.meta.created_at,
            })
        })
    };

    {
        let compute = compute.clone();
        register_derived(
            &sources.gateways,
            tx.clone(),
            |ev: &Event<api::Gateway>| vec![ev.item().key()],
            move |id| compute(id),
        );
    }
    {
        // A class change re-evaluates every gateway of that class.
        let gateways = sources.gateways.clone();
        register_derived(
            &sources.gateway_classes,
            tx,
            move |ev: &Event<api::GatewayClass>| {
                let class = &ev.item().meta.name;
                gateways
                    .list()
                    .into_iter()
                    .filter(|gw| gw.class_name == *class)
                    .map(|gw| gw.key())
                    .collect()
            },
            move |id| compute(id),
        );
    }

    out
}

/// Resolves the effective waypoint for an entity: an explicit
/// `use-waypoint` label wins, then the namespace default. Entities that are
/// themselves mesh-managed waypoint proxies never get one, so a waypoint
/// cannot index itself.
pub(crate) fn resolve_waypoint(
    labels: &api::Labels,
    namespace: &str,
    namespaces: &Collection<api::Namespace>,
    waypoints: &Collection<Waypoint>,
) -> Option<NamespaceHostname> {
    if labels.contains(MANAGED_GATEWAY_LABEL, MANAGED_GATEWAY_WAYPOINT) {
        return None;
    }

    let name = labels.get(USE_WAYPOINT_LABEL).map(str::to_string).or_else(|| {
        namespaces
            .get(namespace)?
            .meta
            .labels
            .get(USE_WAYPOINT_LABEL)
            .map(str::to_string)
    })?;

    let waypoint = waypoints.get(&format!("{namespace}/{name}"))?;
    Some(waypoint.namespace_hostname())
}
