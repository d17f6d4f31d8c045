//! The source-stream boundary: one externally-fed collection per resource
//! kind. The embedding process owns the [`SourceWriters`] and feeds each
//! stream add/update/delete events, calling `mark_synced` once the initial
//! snapshot for that kind has been delivered.

use crate::collection::{collection, Collection, Keyed, Writer};
use ambient_controller_api as api;

macro_rules! keyed_by_meta {
    ($($ty:ty),* $(,)?) => {$(
        impl Keyed for $ty {
            fn key(&self) -> String {
                format!("{}/{}", self.meta.namespace, self.meta.name)
            }
        }
    )*};
}

keyed_by_meta! {
    api::Pod,
    api::Service,
    api::EndpointSlice,
    api::ServiceEntry,
    api::WorkloadEntry,
    api::AuthorizationPolicy,
    api::PeerAuthentication,
    api::Gateway,
    api::ConfigMap,
}

// Cluster-scoped kinds key by bare name.
impl Keyed for api::Node {
    fn key(&self) -> String {
        self.meta.name.clone()
    }
}

impl Keyed for api::Namespace {
    fn key(&self) -> String {
        self.meta.name.clone()
    }
}

impl Keyed for api::GatewayClass {
    fn key(&self) -> String {
        self.meta.name.clone()
    }
}

pub struct Sources {
    pub pods: Collection<api::Pod>,
    pub nodes: Collection<api::Node>,
    pub namespaces: Collection<api::Namespace>,
    pub services: Collection<api::Service>,
    pub endpoint_slices: Collection<api::EndpointSlice>,
    pub service_entries: Collection<api::ServiceEntry>,
    pub workload_entries: Collection<api::WorkloadEntry>,
    pub authorization_policies: Collection<api::AuthorizationPolicy>,
    pub peer_authentications: Collection<api::PeerAuthentication>,
    pub gateways: Collection<api::Gateway>,
    pub gateway_classes: Collection<api::GatewayClass>,
    pub config_maps: Collection<api::ConfigMap>,
}

pub struct SourceWriters {
    pub pods: Writer<api::Pod>,
    pub nodes: Writer<api::Node>,
    pub namespaces: Writer<api::Namespace>,
    pub services: Writer<api::Service>,
    pub endpoint_slices: Writer<api::EndpointSlice>,
    pub service_entries: Writer<api::ServiceEntry>,
    pub workload_entries: Writer<api::WorkloadEntry>,
    pub authorization_policies: Writer<api::AuthorizationPolicy>,
    pub peer_authentications: Writer<api::PeerAuthentication>,
    pub gateways: Writer<api::Gateway>,
    pub gateway_classes: Writer<api::GatewayClass>,
    pub config_maps: Writer<api::ConfigMap>,
}

impl SourceWriters {
    /// Marks every source stream's initial snapshot complete.
    pub fn mark_all_synced(&self) {
        self.pods.mark_synced();
        self.nodes.mark_synced();
        self.namespaces.mark_synced();
        self.services.mark_synced();
        self.endpoint_slices.mark_synced();
        self.service_entries.mark_synced();
        self.workload_entries.mark_synced();
        self.authorization_policies.mark_synced();
        self.peer_authentications.mark_synced();
        self.gateways.mark_synced();
        self.gateway_classes.mark_synced();
        self.config_maps.mark_synced();
    }
}

/// Creates the full set of source streams.
pub fn sources() -> (SourceWriters, Sources) {
    let (pods_tx, pods) = collection("pods", false);
    let (nodes_tx, nodes) = collection("nodes", false);
    let (namespaces_tx, namespaces) = collection("namespaces", false);
    let (services_tx, services) = collection("services", false);
    let (endpoint_slices_tx, endpoint_slices) = collection("endpointslices", false);
    let (service_entries_tx, service_entries) = collection("serviceentries", false);
    let (workload_entries_tx, workload_entries) = collection("workloadentries", false);
    let (authorization_policies_tx, authorization_policies) =
        collection("authorizationpolicies", false);
    let (peer_authentications_tx, peer_authentications) = collection("peerauthentications", false);
    let (gateways_tx, gateways) = collection("gateways", false);
    let (gateway_classes_tx, gateway_classes) = collection("gatewayclasses", false);
    let (config_maps_tx, config_maps) = collection("configmaps", false);

    (
        SourceWriters {
            pods: pods_tx,
            nodes: nodes_tx,
            namespaces: namespaces_tx,
            services: services_tx,
            endpoint_slices: endpoint_slices_tx,
            service_entries: service_entries_tx,
            workload_entries: workload_entries_tx,
            authorization_policies: authorization_policies_tx,
            peer_authentications: peer_authentications_tx,
            gateways: gateways_tx,
            gateway_classes: gateway_classes_tx,
            config_maps: config_maps_tx,
        },
        Sources {
            pods,
            nodes,
            namespaces,
            services,
            endpoint_slices,
            service_entries,
            workload_entries,
            authorization_policies,
            peer_authentications,
            gateways,
            gateway_classes,
            config_maps,
        },
    )
}
