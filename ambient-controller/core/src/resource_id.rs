use std::fmt;

/// Uniquely identifies a namespaced resource.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: String, name: String) -> Self {
        Self { namespace, name }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The kinds of source records that produce derived entities.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub enum SourceKind {
    Pod,
    WorkloadEntry,
    Service,
    ServiceEntry,
    AuthorizationPolicy,
    PeerAuthentication,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::Pod => "Pod",
            SourceKind::WorkloadEntry => "WorkloadEntry",
            SourceKind::Service => "Service",
            SourceKind::ServiceEntry => "ServiceEntry",
            SourceKind::AuthorizationPolicy => "AuthorizationPolicy",
            SourceKind::PeerAuthentication => "PeerAuthentication",
        };
        s.fmt(f)
    }
}

/// Provenance of a derived entity: the source record it was computed from.
/// Used only for status write-back, never for lookups.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: ResourceId,
}

impl SourceRef {
    pub fn new(kind: SourceKind, namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            kind,
            id: ResourceId::new(namespace.to_string(), name.to_string()),
        }
    }
}
