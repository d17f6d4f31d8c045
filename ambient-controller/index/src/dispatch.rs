//! The change dispatcher: turns batched collection events into downstream
//! push requests, carrying only the externally-visible identity delta.

use crate::collection::{Collection, Event, Keyed};
use ahash::AHashSet as HashSet;
use ambient_controller_core::{ConfigKey, PushReason, PushRequest, Updater};
use prometheus_client::{
    metrics::counter::Counter,
    registry::{Registry, Unit},
};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct DispatchMetrics {
    pushes: Counter,
    configs_pushed: Counter,
}

impl DispatchMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register_with_unit(
            "dispatch_pushes",
            "Push requests issued to the synchronization channel",
            Unit::Other("requests".to_string()),
            metrics.pushes.clone(),
        );
        registry.register_with_unit(
            "dispatch_configs_pushed",
            "Configuration keys carried by push requests",
            Unit::Other("configs".to_string()),
            metrics.configs_pushed.clone(),
        );
        metrics
    }
}

/// Registers a push dispatcher on a collection.
///
/// `project` extracts the externally-visible form: recomputations that leave
/// it unchanged never reach the dispatcher. `key_of` maps an entity to its
/// config identity; `None` marks the entity invisible downstream. Updates
/// contribute the keys of both their old and new states, so an entity whose
/// payload disappears still announces the identity it vacated. Keys repeated
/// within one batch coalesce, each batch issues at most one incremental push,
/// and a batch that yields no keys pushes nothing.
pub(crate) fn push_on_change<T, P, E, F>(
    collection: &Collection<T>,
    project: E,
    key_of: F,
    updater: Arc<dyn Updater>,
    metrics: DispatchMetrics,
) where
    T: Keyed,
    P: PartialEq,
    E: Fn(&T) -> P + Send + Sync + 'static,
    F: Fn(&T) -> Option<ConfigKey> + Send + Sync + 'static,
{
    collection.register_batch_filtered(project, move |events| {
        let configs_updated = events
            .iter()
            .flat_map(|ev| match ev {
                Event::Update { new, old } => {
                    key_of(new).into_iter().chain(key_of(old)).collect::<Vec<_>>()
                }
                Event::Add(t) | Event::Delete(t) => key_of(t).into_iter().collect(),
            })
            .collect::<HashSet<_>>();
        if configs_updated.is_empty() {
            return;
        }
        metrics.pushes.inc();
        metrics.configs_pushed.inc_by(configs_updated.len() as u64);
        updater.config_update(PushRequest {
            full: false,
            configs_updated,
            reason: PushReason::AmbientUpdate,
        });
    });
}
