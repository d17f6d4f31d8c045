//! The status write-back queue: asynchronously patches acknowledgment status
//! onto the source objects behind derived entities. Failures are retried with
//! backoff, independently of the index; nothing here is on the lookup path.

use crate::collection::{Collection, Event, Keyed};
use ambient_controller_core::ResourceId;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

const BASE_BACKOFF: Duration = Duration::from_millis(100);
const MAX_ATTEMPTS: u32 = 5;

/// Applies a status patch to one source object. Resolved per source kind at
/// registration time.
#[async_trait::async_trait]
pub trait Patcher: Send + Sync {
    async fn patch(&self, id: &ResourceId, patch: serde_json::Value) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct StatusUpdate {
    pub id: ResourceId,
    pub patch: serde_json::Value,
}

/// The write clients for each source kind that receives status.
#[derive(Clone)]
pub struct StatusPatchers {
    pub services: Arc<dyn Patcher>,
    pub service_entries: Arc<dyn Patcher>,
    pub authorization_policies: Arc<dyn Patcher>,
}

#[derive(Debug, thiserror::Error)]
#[error("status patch for {id} failed after {attempts} attempts: {error}")]
struct RetriesExhausted {
    id: ResourceId,
    attempts: u32,
    error: anyhow::Error,
}

struct Item {
    patcher: Arc<dyn Patcher>,
    update: StatusUpdate,
}

pub struct StatusQueue {
    tx: UnboundedSender<Item>,
    rx: UnboundedReceiver<Item>,
}

impl StatusQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self { tx, rx }
    }

    /// Subscribes the queue to a collection: every add or update enqueues a
    /// patch for the entity's source object. `f` resolves the patcher and
    /// builds the patch; returning `None` skips the entity.
    pub fn register<T, F>(&self, collection: &Collection<T>, name: &'static str, f: F)
    where
        T: Keyed,
        F: Fn(&T) -> Option<(Arc<dyn Patcher>, StatusUpdate)> + Send + Sync + 'static,
    {
        let tx = self.tx.clone();
        collection.register_batch(move |events| {
            for ev in events {
                let item = match ev {
                    Event::Add(t) | Event::Update { new: t, .. } => t,
                    Event::Delete(_) => continue,
                };
                if let Some((patcher, update)) = f(item) {
                    if tx.send(Item { patcher, update }).is_err() {
                        tracing::debug!(queue = name, "status queue closed, dropping update");
                    }
                }
            }
        });
    }

    /// Processes patches until the queue drains and the shutdown signal
    /// fires. Retries are bounded; an exhausted update is logged and dropped
    /// so one unpatchable object cannot wedge the queue.
    pub async fn run(mut self, shutdown: drain::Watch) {
        drop(self.tx);
        tokio::select! {
            _ = shutdown.signaled() => {
                tracing::debug!("status queue shutting down");
            }
            _ = async {
                while let Some(item) = self.rx.recv().await {
                    process(item).await;
                }
            } => {}
        }
    }
}

impl Default for StatusQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn process(item: Item) {
    let Item { patcher, update } = item;
    let mut backoff = BASE_BACKOFF;
    for attempt in 1..=MAX_ATTEMPTS {
        match patcher.patch(&update.id, update.patch.clone()).await {
            Ok(()) => return,
            Err(error) if attempt < MAX_ATTEMPTS => {
                tracing::debug!(id = %update.id, %error, attempt, "status patch failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(error) => {
                let error = RetriesExhausted {
                    id: update.id.clone(),
                    attempts: MAX_ATTEMPTS,
                    error,
                };
                tracing::error!(%error, "dropping status update");
            }
        }
    }
}
