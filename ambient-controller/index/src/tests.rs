use crate::{
    sources, ClusterInfo, Index, Options, SourceWriters, MANAGED_GATEWAY_LABEL,
    MANAGED_GATEWAY_WAYPOINT, USE_WAYPOINT_LABEL,
};
use ahash::AHashSet as HashSet;
use ambient_controller_api::{self as api, labels::Selector, PolicyAction, TargetPort, TlsMode};
use ambient_controller_core::{
    AddressInfo, ConfigKey, Kind, LookupNetwork, LookupNetworkGateways, PortBinding, PushRequest,
    Updater, WaypointKey, CONTROLLER_NAME,
};
use chrono::{TimeZone, Utc};
use maplit::btreemap;
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::sync::Arc;

const NETWORK: &str = "testnetwork";

#[derive(Default)]
struct RecordingUpdater(Mutex<Vec<PushRequest>>);

impl Updater for RecordingUpdater {
    fn config_update(&self, req: PushRequest) {
        self.0.lock().push(req);
    }
}

impl RecordingUpdater {
    fn pushes(&self) -> Vec<PushRequest> {
        self.0.lock().clone()
    }

    fn pushed_configs(&self) -> HashSet<ConfigKey> {
        self.0
            .lock()
            .iter()
            .flat_map(|p| p.configs_updated.iter().cloned())
            .collect()
    }
}

struct Harness {
    writers: SourceWriters,
    index: Index,
    updater: Arc<RecordingUpdater>,
    network: Arc<Mutex<String>>,
    _trace: tracing::subscriber::DefaultGuard,
}

fn trace_init() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .finish(),
    )
}

fn harness() -> Harness {
    let _trace = trace_init();
    let (writers, sources) = sources();
    let updater = Arc::new(RecordingUpdater::default());
    let network = Arc::new(Mutex::new(NETWORK.to_string()));
    let lookup_network: LookupNetwork = {
        let network = network.clone();
        Arc::new(move |_, _| network.lock().clone())
    };
    let lookup_network_gateways: LookupNetworkGateways = Arc::new(Vec::new);
    let mut registry = Registry::default();
    let index = Index::new(
        Options {
            cluster_info: ClusterInfo {
                cluster_id: "Kubernetes".to_string(),
                domain_suffix: "cluster.local".to_string(),
                system_namespace: "ambient-system".to_string(),
            },
            updater: updater.clone(),
            lookup_network,
            lookup_network_gateways,
            status: None,
        },
        &sources,
        &mut registry,
    );
    Harness {
        writers,
        index,
        updater,
        network,
        _trace,
    }
}

fn meta(ns: &str, name: &str, labels: Vec<(&str, &str)>) -> api::Meta {
    api::Meta {
        name: name.to_string(),
        namespace: ns.to_string(),
        labels: labels
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        annotations: Default::default(),
        created_at: Utc::now(),
    }
}

fn mk_pod(name: &str, ip: &str) -> api::Pod {
    api::Pod {
        meta: meta("ns1", name, vec![("app", name)]),
        addresses: vec![ip.parse().unwrap()],
        node_name: Some("node-1".to_string()),
        host_network: false,
        ports: vec![],
    }
}

fn mk_workload_entry(name: &str, ip: &str) -> api::WorkloadEntry {
    api::WorkloadEntry {
        meta: meta("ns1", name, vec![("app", name)]),
        address: ip.parse().unwrap(),
        network: None,
    }
}

fn mk_service(name: &str, vip: &str, app: &str) -> api::Service {
    api::Service {
        meta: meta("ns1", name, vec![]),
        cluster_ips: vec![vip.parse().unwrap()],
        selector: Some(Selector::from_map(
            btreemap! {"app".to_string() => app.to_string()},
        )),
        ports: vec![api::ServicePort {
            port: 80,
            target_port: Some(TargetPort::Number(8080)),
        }],
    }
}

fn pod_uid(name: &str) -> String {
    format!("Kubernetes//Pod/ns1/{name}")
}

fn svc_key(name: &str) -> String {
    format!("ns1/{name}.ns1.svc.cluster.local")
}

#[test]
fn lookup_resolves_workloads_by_uid_and_address() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));

    let uid = pod_uid("a");
    match &h.index.lookup(&uid)[..] {
        [AddressInfo::Workload(wl)] => {
            assert_eq!(wl.workload.uid, uid);
            assert_eq!(wl.workload.network, NETWORK);
            assert_eq!(wl.workload.node.as_deref(), Some("node-1"));
        }
        other => panic!("unexpected lookup result: {other:?}"),
    }

    assert_eq!(h.index.lookup("testnetwork/10.0.0.1"), h.index.lookup(&uid));
    assert!(h.index.lookup("testnetwork/10.9.9.9").is_empty());
    assert!(h.index.lookup("no-separator").is_empty());
}

#[test]
fn service_lookup_carries_member_workloads() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers
        .services
        .apply(mk_service("svc1", "172.16.0.1", "a"));

    let key = svc_key("svc1");
    let res = h.index.lookup(&key);
    let [AddressInfo::Service(svc), AddressInfo::Workload(wl)] = &res[..] else {
        panic!("unexpected lookup result: {res:?}");
    };
    assert_eq!(svc.service.hostname, "svc1.ns1.svc.cluster.local");
    assert_eq!(wl.workload.uid, pod_uid("a"));
    assert_eq!(
        wl.workload.services.get(&key),
        Some(&vec![PortBinding {
            service_port: 80,
            target_port: 8080,
        }])
    );

    // The VIP resolves to the same view.
    assert_eq!(h.index.lookup("testnetwork/172.16.0.1"), res);

    h.writers.pods.delete("ns1/a");
    let res = h.index.lookup(&key);
    assert!(matches!(&res[..], [AddressInfo::Service(_)]));
    assert!(h
        .updater
        .pushed_configs()
        .contains(&ConfigKey {
            kind: Kind::Address,
            name: pod_uid("a"),
        }));
}

#[test]
fn duplicate_addresses_resolve_to_one_workload() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers
        .workload_entries
        .apply(mk_workload_entry("vm", "10.0.0.1"));

    // Both are indexed, but lookup keeps only the first in enumeration
    // order, which puts the pod ahead of the workload entry.
    assert_eq!(h.index.workloads().len(), 2);
    let res = h.index.lookup("testnetwork/10.0.0.1");
    match &res[..] {
        [AddressInfo::Workload(wl)] => assert_eq!(wl.workload.uid, pod_uid("a")),
        other => panic!("unexpected lookup result: {other:?}"),
    }

    // Host-network workloads legitimately share their node's address.
    let mut hb = mk_pod("hb", "10.0.0.9");
    hb.host_network = true;
    let mut hc = mk_pod("hc", "10.0.0.9");
    hc.host_network = true;
    h.writers.pods.apply(hb);
    h.writers.pods.apply(hc);
    assert_eq!(h.index.lookup("testnetwork/10.0.0.9").len(), 2);

    // Enumeration dedupes the same way: the workload entry is suppressed,
    // the host-network pair is not.
    assert_eq!(h.index.all().len(), 3);
}

#[test]
fn address_information_resolves_and_reports_removed() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers
        .services
        .apply(mk_service("svc1", "172.16.0.1", "a"));

    // An empty request means everything.
    let (all, removed) = h.index.address_information(&HashSet::new());
    assert_eq!(all, h.index.all());
    assert!(removed.is_empty());

    // Everything enumerable resolves under its own resource name.
    for info in h.index.all() {
        assert!(h.index.lookup(&info.resource_name()).contains(&info));
    }

    let req = [pod_uid("a"), "testnetwork/10.9.9.9".to_string()]
        .into_iter()
        .collect();
    let (infos, removed) = h.index.address_information(&req);
    assert_eq!(infos.len(), 1);
    assert_eq!(
        removed,
        ["testnetwork/10.9.9.9".to_string()].into_iter().collect()
    );

    // The same entity reached through two keys appears once.
    let req = [pod_uid("a"), "testnetwork/10.0.0.1".to_string()]
        .into_iter()
        .collect();
    let (infos, removed) = h.index.address_information(&req);
    assert_eq!(infos.len(), 1);
    assert!(removed.is_empty());
}

#[test]
fn redundant_source_updates_do_not_push() {
    let h = harness();
    let pod = mk_pod("a", "10.0.0.1");
    h.writers.pods.apply(pod.clone());
    let n = h.updater.pushes().len();

    // Identical delivery is a no-op.
    h.writers.pods.apply(pod.clone());
    assert_eq!(h.updater.pushes().len(), n);

    // Annotations never reach the derived entity.
    let mut annotated = pod.clone();
    annotated
        .meta
        .annotations
        .insert("note".to_string(), "x".to_string());
    h.writers.pods.apply(annotated);
    assert_eq!(h.updater.pushes().len(), n);

    // A label change is recorded for selector matching but is not part of
    // the wire form, so it does not push either.
    let mut relabeled = pod;
    relabeled.meta.labels = [("app", "a"), ("extra", "1")].into_iter().collect();
    h.writers.pods.apply(relabeled);
    assert_eq!(h.updater.pushes().len(), n);
    let wl = h.index.workloads().get(&pod_uid("a")).unwrap();
    assert_eq!(wl.labels.get("extra"), Some("1"));
}

#[test]
fn batched_recomputations_coalesce_into_one_push() {
    let h = harness();
    let mut a = mk_pod("a", "10.0.0.1");
    a.meta.labels = [("app", "store")].into_iter().collect();
    let mut b = mk_pod("b", "10.0.0.2");
    b.meta.labels = [("app", "store")].into_iter().collect();
    h.writers.pods.apply(a);
    h.writers.pods.apply(b);

    let n = h.updater.pushes().len();
    h.writers
        .services
        .apply(mk_service("svc1", "172.16.0.1", "store"));

    // One service event recomputes both members in a single batch: one push
    // for the workloads, one for the service itself.
    let pushes = h.updater.pushes()[n..].to_vec();
    assert_eq!(pushes.len(), 2);
    let members: HashSet<ConfigKey> = [pod_uid("a"), pod_uid("b")]
        .into_iter()
        .map(|name| ConfigKey {
            kind: Kind::Address,
            name,
        })
        .collect();
    assert!(pushes.iter().any(|p| p.configs_updated == members));
    assert!(pushes.iter().any(|p| {
        p.configs_updated
            == [ConfigKey {
                kind: Kind::Address,
                name: svc_key("svc1"),
            }]
            .into_iter()
            .collect()
    }));
}

#[test]
fn readiness_waits_for_sources_and_network() {
    let h = harness();
    assert!(!h.index.has_synced());
    h.writers.mark_all_synced();
    assert!(!h.index.has_synced());
    h.index.networks_synced();
    assert!(h.index.has_synced());
}

#[test]
fn network_change_recomputes_workloads() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    assert_eq!(h.index.lookup("testnetwork/10.0.0.1").len(), 1);

    // Nothing moves until the topology change is announced.
    *h.network.lock() = "remote".to_string();
    assert!(h.index.lookup("remote/10.0.0.1").is_empty());

    h.index.sync_all();
    assert!(h.index.lookup("testnetwork/10.0.0.1").is_empty());
    match &h.index.lookup("remote/10.0.0.1")[..] {
        [AddressInfo::Workload(wl)] => assert_eq!(wl.workload.network, "remote"),
        other => panic!("unexpected lookup result: {other:?}"),
    }
}

#[test]
fn waypoint_attachment_and_enumeration_order() {
    let h = harness();
    h.writers.gateway_classes.apply(api::GatewayClass {
        meta: meta("", "ambient", vec![]),
        controller_name: CONTROLLER_NAME.to_string(),
    });
    h.writers.gateways.apply(api::Gateway {
        meta: meta("ns1", "wp", vec![]),
        class_name: "ambient".to_string(),
        addresses: vec!["10.0.0.100".parse().unwrap()],
    });

    // "a" sorts first by uid but was created later; creation time wins.
    let mut a = mk_pod("a", "10.0.0.1");
    a.meta.created_at = Utc.timestamp_opt(200, 0).unwrap();
    let mut b = mk_pod("b", "10.0.0.2");
    b.meta.created_at = Utc.timestamp_opt(100, 0).unwrap();
    h.writers.pods.apply(a);
    h.writers.pods.apply(b);

    // The waypoint proxy itself never gets a waypoint.
    let mut proxy = mk_pod("wp-proxy", "10.0.0.3");
    proxy.meta.labels = [(MANAGED_GATEWAY_LABEL, MANAGED_GATEWAY_WAYPOINT)]
        .into_iter()
        .collect();
    h.writers.pods.apply(proxy);

    // The namespace default arrives last and re-resolves existing workloads.
    h.writers.namespaces.apply(api::Namespace {
        meta: meta("", "ns1", vec![(USE_WAYPOINT_LABEL, "wp")]),
    });

    let key = WaypointKey {
        namespace: "ns1".to_string(),
        hostnames: vec!["wp.ns1.cluster.local".to_string()],
    };
    let uids = h
        .index
        .workloads_for_waypoint(&key)
        .into_iter()
        .map(|wl| wl.workload.uid)
        .collect::<Vec<_>>();
    assert_eq!(uids, vec![pod_uid("b"), pod_uid("a")]);
    assert!(h
        .index
        .workloads()
        .get(&pod_uid("wp-proxy"))
        .unwrap()
        .workload
        .waypoint
        .is_none());

    h.writers
        .services
        .apply(mk_service("svc1", "172.16.0.1", "a"));
    let svcs = h.index.services_for_waypoint(&key);
    assert_eq!(svcs.len(), 1);
    assert_eq!(svcs[0].service.hostname, "svc1.ns1.svc.cluster.local");
}

#[test]
fn additional_subscriptions_cover_service_members_and_node_locals() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers
        .services
        .apply(mk_service("svc1", "172.16.0.1", "a"));

    // A proxy subscribed to the service must learn about the member even
    // though it only saw the member's address change.
    let subs: HashSet<String> = [svc_key("svc1")].into_iter().collect();
    let addrs: HashSet<String> = [pod_uid("a")].into_iter().collect();
    let extra = h.index.additional_pod_subscriptions(None, &addrs, &subs);
    assert_eq!(extra, [pod_uid("a")].into_iter().collect());

    // Node-local endpoints are pushed eagerly.
    let extra = h
        .index
        .additional_pod_subscriptions(Some("node-1"), &HashSet::new(), &HashSet::new());
    assert_eq!(extra, [pod_uid("a")].into_iter().collect());

    // But not when the proxy already has them.
    let subs: HashSet<String> = [pod_uid("a")].into_iter().collect();
    let extra = h
        .index
        .additional_pod_subscriptions(Some("node-1"), &HashSet::new(), &subs);
    assert!(extra.is_empty());
}

#[test]
fn peer_authentication_converts_to_deny_plaintext() {
    let h = harness();
    h.writers.peer_authentications.apply(api::PeerAuthentication {
        meta: meta("ns1", "pa", vec![]),
        selector: None,
        mtls_mode: TlsMode::Strict,
    });
    let converted = h
        .index
        .policies()
        .get("ns1/converted-peer-authentication-pa")
        .unwrap();
    let authz = converted.authorization.unwrap();
    assert_eq!(authz.action, PolicyAction::Deny);

    // Permissive defers to the mesh default, which starts permissive.
    h.writers.peer_authentications.apply(api::PeerAuthentication {
        meta: meta("ns1", "pb", vec![]),
        selector: None,
        mtls_mode: TlsMode::Permissive,
    });
    assert!(h
        .index
        .policies()
        .get("ns1/converted-peer-authentication-pb")
        .is_none());

    // Flipping the mesh default to strict converts it after the fact.
    let mut cm = api::ConfigMap {
        meta: meta("ambient-system", "ambient-mesh", vec![]),
        ..Default::default()
    };
    cm.data
        .insert("mesh".to_string(), r#"{"defaultMtlsMode":"STRICT"}"#.to_string());
    h.writers.config_maps.apply(cm);
    assert!(h
        .index
        .policies()
        .get("ns1/converted-peer-authentication-pb")
        .is_some());
}

#[test]
fn rule_less_policies_are_recorded_but_not_pushed() {
    let h = harness();
    h.writers
        .authorization_policies
        .apply(api::AuthorizationPolicy {
            meta: meta("ns1", "noop", vec![]),
            ..Default::default()
        });

    let key = ConfigKey {
        kind: Kind::AuthorizationPolicy,
        name: "ns1/noop".to_string(),
    };
    assert!(h.index.policies().get("ns1/noop").unwrap().authorization.is_none());
    assert!(!h.updater.pushed_configs().contains(&key));

    h.writers
        .authorization_policies
        .apply(api::AuthorizationPolicy {
            meta: meta("ns1", "noop", vec![]),
            from_identities: vec!["spiffe://cluster.local/ns/ns1/sa/default".to_string()],
            ..Default::default()
        });
    assert!(h.index.policies().get("ns1/noop").unwrap().authorization.is_some());
    assert!(h.updater.pushed_configs().contains(&key));
}

#[test]
fn removing_policy_rules_pushes_the_removal() {
    let h = harness();
    h.writers
        .authorization_policies
        .apply(api::AuthorizationPolicy {
            meta: meta("ns1", "p", vec![]),
            from_identities: vec!["spiffe://cluster.local/ns/ns1/sa/default".to_string()],
            ..Default::default()
        });

    let key = ConfigKey {
        kind: Kind::AuthorizationPolicy,
        name: "ns1/p".to_string(),
    };
    assert!(h.updater.pushed_configs().contains(&key));
    let n = h.updater.pushes().len();

    // Editing the rules away empties the authorization; the data plane must
    // still hear that this policy no longer enforces anything.
    h.writers
        .authorization_policies
        .apply(api::AuthorizationPolicy {
            meta: meta("ns1", "p", vec![]),
            ..Default::default()
        });
    assert!(h.index.policies().get("ns1/p").unwrap().authorization.is_none());
    assert!(h.updater.pushes()[n..]
        .iter()
        .any(|p| p.configs_updated.contains(&key)));

    // Deleting it outright announces the removal too.
    let n = h.updater.pushes().len();
    h.writers
        .authorization_policies
        .apply(api::AuthorizationPolicy {
            meta: meta("ns1", "p", vec![]),
            from_identities: vec!["spiffe://cluster.local/ns/ns1/sa/default".to_string()],
            ..Default::default()
        });
    h.writers.authorization_policies.delete("ns1/p");
    assert!(h.updater.pushes()[n..]
        .iter()
        .any(|p| p.configs_updated.contains(&key)));
}

#[test]
fn service_entries_publish_hostnames_with_members() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers.service_entries.apply(api::ServiceEntry {
        meta: meta("ns1", "ext", vec![]),
        hosts: vec!["example.com".to_string()],
        addresses: vec!["240.0.0.1".parse().unwrap()],
        ports: vec![api::ServicePort {
            port: 443,
            target_port: None,
        }],
        workload_selector: Some([("app", "a")].into_iter().collect()),
    });

    let res = h.index.lookup("ns1/example.com");
    let [AddressInfo::Service(svc), AddressInfo::Workload(wl)] = &res[..] else {
        panic!("unexpected lookup result: {res:?}");
    };
    assert_eq!(svc.service.hostname, "example.com");
    // An unspecified target defaults to the service port.
    assert_eq!(
        wl.workload.services.get("ns1/example.com"),
        Some(&vec![PortBinding {
            service_port: 443,
            target_port: 443,
        }])
    );
}

#[test]
fn ip_literal_hostnames_resolve_by_resource_id() {
    let h = harness();
    h.writers.service_entries.apply(api::ServiceEntry {
        meta: meta("ns1", "ext", vec![]),
        hosts: vec!["240.9.9.9".to_string()],
        addresses: vec![],
        ports: vec![api::ServicePort {
            port: 443,
            target_port: None,
        }],
        workload_selector: None,
    });

    // The host happens to parse as an address, but the entry published no
    // addresses; the `namespace/hostname` key still resolves it.
    let res = h.index.lookup("ns1/240.9.9.9");
    let [AddressInfo::Service(svc)] = &res[..] else {
        panic!("unexpected lookup result: {res:?}");
    };
    assert_eq!(svc.service.hostname, "240.9.9.9");
}

#[test]
fn selector_less_services_resolve_members_through_slices() {
    let h = harness();
    h.writers.pods.apply(mk_pod("a", "10.0.0.1"));
    h.writers.services.apply(api::Service {
        meta: meta("ns1", "manual", vec![]),
        cluster_ips: vec!["172.16.0.9".parse().unwrap()],
        selector: None,
        ports: vec![api::ServicePort {
            port: 80,
            target_port: Some(TargetPort::Number(8080)),
        }],
    });
    assert_eq!(h.index.lookup(&svc_key("manual")).len(), 1);

    h.writers.endpoint_slices.apply(api::EndpointSlice {
        meta: meta("ns1", "manual-1", vec![]),
        service_name: "manual".to_string(),
        endpoints: vec!["10.0.0.1".parse().unwrap()],
    });
    assert_eq!(h.index.lookup(&svc_key("manual")).len(), 2);

    h.writers.endpoint_slices.delete("ns1/manual-1");
    assert_eq!(h.index.lookup(&svc_key("manual")).len(), 1);
}

#[test]
fn named_target_ports_resolve_against_the_member_pod() {
    let h = harness();
    let mut pod = mk_pod("a", "10.0.0.1");
    pod.ports = vec![api::NamedPort {
        name: "http".to_string(),
        port: 8080,
    }];
    h.writers.pods.apply(pod);
    h.writers.services.apply(api::Service {
        meta: meta("ns1", "svc1", vec![]),
        cluster_ips: vec!["172.16.0.1".parse().unwrap()],
        selector: Some(Selector::from_map(
            btreemap! {"app".to_string() => "a".to_string()},
        )),
        ports: vec![
            api::ServicePort {
                port: 80,
                target_port: Some(TargetPort::Name("http".to_string())),
            },
            // Unresolvable names drop the binding rather than guessing.
            api::ServicePort {
                port: 81,
                target_port: Some(TargetPort::Name("missing".to_string())),
            },
        ],
    });

    let wl = h.index.workloads().get(&pod_uid("a")).unwrap();
    assert_eq!(
        wl.workload.services.get(&svc_key("svc1")),
        Some(&vec![PortBinding {
            service_port: 80,
            target_port: 8080,
        }])
    );
}
