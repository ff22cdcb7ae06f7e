use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::models::{ChangeEvent, OldTask, Task, TaskId};
use crate::remote::{Notification, RecordStore, Scope, Subscription};

const CHANNEL_CAPACITY: usize = 256;

/// Change feed for stores without a push channel.
/// Takes periodic snapshots and emits the difference as change events.
pub struct ChangePoller {
    store: Arc<dyn RecordStore>,
    scope: Scope,
    interval: Duration,
}

impl ChangePoller {
    pub fn new(store: Arc<dyn RecordStore>, scope: Scope, interval: Duration) -> Self {
        Self { store, scope, interval }
    }

    /// Takes the baseline snapshot and starts polling in the background.
    pub async fn spawn(self) -> Result<Subscription, AppError> {
        let baseline = self.store.select_all(&self.scope).await?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(self.run(baseline, tx));
        Ok(Subscription::new(rx, task))
    }

    async fn run(self, mut previous: Vec<Task>, tx: mpsc::Sender<Notification>) {
        info!("Starting change poller (interval: {:?})", self.interval);

        loop {
            tokio::time::sleep(self.interval).await;

            let current = match self.store.select_all(&self.scope).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("Change poll failed: {:?}", e);
                    continue;
                }
            };

            let events = diff_snapshots(&previous, &current);
            if !events.is_empty() {
                debug!(count = events.len(), "poll produced change events");
            }
            for event in events {
                if tx.send(Notification::Change(event)).await.is_err() {
                    debug!("change poller receiver dropped, stopping");
                    return;
                }
            }
            previous = current;
        }
    }
}

/// Events that turn `previous` into `current`, keyed by id.
/// Inserts come out oldest first so that prepending keeps newest-first order.
pub fn diff_snapshots(previous: &[Task], current: &[Task]) -> Vec<ChangeEvent> {
    let before: HashMap<TaskId, &Task> = previous.iter().map(|t| (t.id, t)).collect();
    let after: HashMap<TaskId, &Task> = current.iter().map(|t| (t.id, t)).collect();

    let mut events = Vec::new();

    for task in previous {
        if !after.contains_key(&task.id) {
            events.push(ChangeEvent::Delete {
                old: OldTask {
                    id: task.id,
                    user_id: task.user_id.clone(),
                },
            });
        }
    }

    for task in current {
        if before.get(&task.id).is_some_and(|old| *old != task) {
            events.push(ChangeEvent::Update { new: task.clone() });
        }
    }

    let mut inserted: Vec<&Task> = current
        .iter()
        .filter(|t| !before.contains_key(&t.id))
        .collect();
    inserted.sort_by_key(|t| t.id);
    events.extend(inserted.into_iter().map(|t| ChangeEvent::Insert { new: t.clone() }));

    events
}
