//! Workload authorizations, combined from authorization policies and
//! strict-mTLS peer-authentication conversions.

use crate::{
    collection::{collection, register_derived, Collection, Event, Keyed},
    mesh::MeshConfig,
    Sources,
};
use ambient_controller_api::{self as api, labels::Selector, PolicyAction, TlsMode};
use ambient_controller_core::{SourceKind, SourceRef};
use std::sync::Arc;

const PEER_AUTH_PREFIX: &str = "converted-peer-authentication-";

/// The externally-visible authorization payload. Entries whose source record
/// was incomplete keep a record here (for status reporting) but carry no
/// payload, and such changes are dropped by the push filter.
#[derive(Clone, Debug, PartialEq)]
pub struct Authorization {
    pub action: PolicyAction,
    pub from_identities: Vec<String>,
    pub to_ports: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadAuthorization {
    pub name: String,
    pub namespace: String,
    /// Applies namespace-wide when unset.
    pub scope: Option<Selector>,
    pub authorization: Option<Authorization>,
    pub source: SourceRef,
}

impl Keyed for WorkloadAuthorization {
    fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

pub(crate) fn policies(
    sources: &Sources,
    mesh: &Collection<MeshConfig>,
) -> Collection<WorkloadAuthorization> {
    let (tx, out) = collection::<WorkloadAuthorization>("workloadauthorizations", true);
    out.add_parent(Arc::new(sources.authorization_policies.clone()));
    out.add_parent(Arc::new(sources.peer_authentications.clone()));
    out.add_parent(Arc::new(mesh.clone()));

    let compute: Arc<dyn Fn(&str) -> Option<WorkloadAuthorization> + Send + Sync> = {
        let authz = sources.authorization_policies.clone();
        let peer = sources.peer_authentications.clone();
        let mesh = mesh.clone();
        Arc::new(move |id: &str| {
            let (namespace, name) = id.split_once('/')?;
            if let Some(pa_name) = name.strip_prefix(PEER_AUTH_PREFIX) {
                let pa = peer.get(&format!("{namespace}/{pa_name}"))?;
                let mesh = mesh.get("mesh").unwrap_or_default();
                return convert_peer_authentication(pa, &mesh);
            }
            authz.get(id).map(from_authorization_policy)
        })
    };

    {
        let compute = compute.clone();
        register_derived(
            &sources.authorization_policies,
            tx.clone(),
            |ev: &Event<api::AuthorizationPolicy>| vec![ev.item().key()],
            move |id| compute(id),
        );
    }
    {
        let compute = compute.clone();
        register_derived(
            &sources.peer_authentications,
            tx.clone(),
            |ev: &Event<api::PeerAuthentication>| {
                let pa = ev.item();
                vec![format!(
                    "{}/{}{}",
                    pa.meta.namespace, PEER_AUTH_PREFIX, pa.meta.name
                )]
            },
            move |id| compute(id),
        );
    }
    {
        // A mesh-config change can flip every converted peer authentication.
        let peer = sources.peer_authentications.clone();
        register_derived(
            mesh,
            tx,
            move |_: &Event<MeshConfig>| {
                peer.list()
                    .into_iter()
                    .map(|pa| {
                        format!("{}/{}{}", pa.meta.namespace, PEER_AUTH_PREFIX, pa.meta.name)
                    })
                    .collect()
            },
            move |id| compute(id),
        );
    }

    out
}

fn from_authorization_policy(ap: api::AuthorizationPolicy) -> WorkloadAuthorization {
    // A policy with no rules at all selects nothing enforceable; keep the
    // record but carry no payload.
    let authorization = if ap.from_identities.is_empty() && ap.to_ports.is_empty() {
        tracing::debug!(policy = %ap.key(), "authorization policy has no rules");
        None
    } else {
        Some(Authorization {
            action: ap.action,
            from_identities: ap.from_identities.clone(),
            to_ports: ap.to_ports.clone(),
        })
    };
    WorkloadAuthorization {
        name: ap.meta.name.clone(),
        namespace: ap.meta.namespace.clone(),
        scope: ap.selector,
        authorization,
        source: SourceRef::new(
            SourceKind::AuthorizationPolicy,
            &ap.meta.namespace,
            &ap.meta.name,
        ),
    }
}

/// Strict peer authentication becomes a deny-plaintext authorization.
/// Permissive mode defers to the mesh-wide default; disabled mode converts to
/// nothing.
fn convert_peer_authentication(
    pa: api::PeerAuthentication,
    mesh: &MeshConfig,
) -> Option<WorkloadAuthorization> {
    let effective = match pa.mtls_mode {
        TlsMode::Permissive => mesh.default_mtls_mode,
        mode => mode,
    };
    if effective != TlsMode::Strict {
        return None;
    }
    Some(WorkloadAuthorization {
        name: format!("{}{}", PEER_AUTH_PREFIX, pa.meta.name),
        namespace: pa.meta.namespace.clone(),
        scope: pa.selector,
        authorization: Some(Authorization {
            action: PolicyAction::Deny,
            from_identities: Vec::new(),
            to_ports: Vec::new(),
        }),
        source: SourceRef::new(
            SourceKind::PeerAuthentication,
            &pa.meta.namespace,
            &pa.meta.name,
        ),
    })
}
