//! Mesh-wide configuration, derived from the controller's ConfigMap in the
//! system namespace. Always yields a value: a missing or malformed map falls
//! back to defaults (logged, never surfaced).

use crate::{
    collection::{collection, register_derived, Collection, Event, Keyed},
    ClusterInfo, Sources,
};
use ambient_controller_api::{self as api, TlsMode};
use serde::Deserialize;
use std::sync::Arc;

pub(crate) const MESH_CONFIG_MAP: &str = "ambient-mesh";
const MESH_CONFIG_KEY: &str = "mesh";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeshConfig {
    /// Applied when a `PeerAuthentication` leaves its mode permissive.
    pub default_mtls_mode: TlsMode,
}

impl Keyed for MeshConfig {
    fn key(&self) -> String {
        MESH_CONFIG_KEY.to_string()
    }
}

pub(crate) fn mesh_config(cluster: Arc<ClusterInfo>, sources: &Sources) -> Collection<MeshConfig> {
    let (tx, out) = collection::<MeshConfig>("meshconfig", true);
    out.add_parent(Arc::new(sources.config_maps.clone()));

    let config_maps = sources.config_maps.clone();
    let id = format!("{}/{}", cluster.system_namespace, MESH_CONFIG_MAP);
    register_derived(
        &sources.config_maps,
        tx,
        {
            let id = id.clone();
            move |ev: &Event<api::ConfigMap>| {
                if ev.item().key() == id {
                    vec![MESH_CONFIG_KEY.to_string()]
                } else {
                    Vec::new()
                }
            }
        },
        move |_| Some(parse(config_maps.get(&id))),
    );

    out
}

fn parse(cm: Option<api::ConfigMap>) -> MeshConfig {
    let Some(raw) = cm.and_then(|cm| cm.data.get(MESH_CONFIG_KEY).cloned()) else {
        return MeshConfig::default();
    };
    match serde_json::from_str(&raw) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, "invalid mesh config, using defaults");
            MeshConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_to_defaults() {
        assert_eq!(parse(None), MeshConfig::default());

        let mut cm = api::ConfigMap {
            meta: api::Meta::new("ambient-system", MESH_CONFIG_MAP),
            ..Default::default()
        };
        cm.data
            .insert(MESH_CONFIG_KEY.to_string(), "not json".to_string());
        assert_eq!(parse(Some(cm.clone())), MeshConfig::default());

        cm.data.insert(
            MESH_CONFIG_KEY.to_string(),
            r#"{"defaultMtlsMode":"STRICT"}"#.to_string(),
        );
        assert_eq!(
            parse(Some(cm)),
            MeshConfig {
                default_mtls_mode: TlsMode::Strict,
            }
        );
    }
}
