// Realtime feed of newly appended snapshots, one broadcast channel per
// project.
//
// Delivery is at-least-once with no ordering promise beyond eventual
// delivery; consumers must tolerate duplicates and stale versions.

pub mod poller;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, warn};
use vibegraph_common::sync::SnapshotEvent;
use vibegraph_common::types::ProjectId;

pub use poller::SnapshotPoller;

const FEED_BUFFER_SIZE: usize = 64;

/// Subscribe side of the realtime feed API.
pub trait SnapshotFeed: Send + Sync + 'static {
    fn subscribe(&self, project_id: ProjectId) -> Subscription;
}

/// In-process fan-out hub. Storage backends publish every append here.
#[derive(Debug, Clone)]
pub struct FeedHub {
    channels: Arc<Mutex<HashMap<ProjectId, broadcast::Sender<SnapshotEvent>>>>,
    capacity: usize,
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::with_capacity(FEED_BUFFER_SIZE)
    }
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { channels: Arc::new(Mutex::new(HashMap::new())), capacity: capacity.max(1) }
    }

    /// Deliver an event to every subscriber of its project. Returns the
    /// number of subscribers reached.
    pub fn publish(&self, event: SnapshotEvent) -> usize {
        let sender = {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            match channels.get(&event.project_id) {
                Some(sender) if sender.receiver_count() == 0 => {
                    channels.remove(&event.project_id);
                    None
                }
                sender => sender.cloned(),
            }
        };
        let Some(sender) = sender else {
            return 0;
        };

        let project_id = event.project_id;
        let version = event.version;
        match sender.send(event) {
            Ok(receivers) => {
                debug!(%project_id, version, receivers, "published snapshot event");
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self, project_id: ProjectId) -> usize {
        let channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.get(&project_id).map_or(0, broadcast::Sender::receiver_count)
    }

    /// Projects that currently have at least one live subscriber. Channels
    /// whose subscribers are all gone are dropped here.
    pub fn active_projects(&self) -> Vec<ProjectId> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels.keys().copied().collect()
    }

    /// Number of per-project channels currently held.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl SnapshotFeed for FeedHub {
    fn subscribe(&self, project_id: ProjectId) -> Subscription {
        // Subscribe under the lock so pruning never sees a fresh channel
        // with zero receivers.
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = channels
            .entry(project_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription { project_id, receiver }
    }
}

/// Live subscription to one project's events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    project_id: ProjectId,
    receiver: broadcast::Receiver<SnapshotEvent>,
}

impl Subscription {
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Wait for the next event for this project. Returns `None` once the
    /// hub is gone.
    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.project_id == self.project_id => return Some(event),
                Ok(_) => continue,
                // Missed events are superseded by later ones; the listener
                // only ever applies the newest state.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(project_id = %self.project_id, skipped, "realtime subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of `recv`.
    pub fn try_recv(&mut self) -> Option<SnapshotEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.project_id == self.project_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        debug!(project_id = %self.project_id, "realtime subscription closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vibegraph_common::graph::GraphDocument;

    fn event(project_id: ProjectId, version: i64) -> SnapshotEvent {
        SnapshotEvent { project_id, version, graph_data: GraphDocument::new(), created_at: Utc::now() }
    }

    #[tokio::test]
    async fn delivers_only_to_subscribers_of_the_project() {
        let hub = FeedHub::new();
        let project_a = ProjectId::new();
        let project_b = ProjectId::new();
        let mut sub_a = hub.subscribe(project_a);
        let mut sub_b = hub.subscribe(project_b);

        assert_eq!(hub.publish(event(project_a, 1)), 1);

        assert_eq!(sub_a.recv().await.map(|e| e.version), Some(1));
        assert!(sub_b.try_recv().is_none());
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let hub = FeedHub::new();
        assert_eq!(hub.publish(event(ProjectId::new(), 1)), 0);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let hub = FeedHub::new();
        let project = ProjectId::new();
        let first = hub.subscribe(project);
        let second = hub.subscribe(project);
        assert_eq!(hub.subscriber_count(project), 2);

        first.unsubscribe();
        drop(second);

        assert_eq!(hub.subscriber_count(project), 0);
        assert_eq!(hub.publish(event(project, 1)), 0);
    }

    #[test]
    fn channels_of_abandoned_projects_are_pruned() {
        let hub = FeedHub::new();
        let kept = ProjectId::new();
        let _live = hub.subscribe(kept);
        for _ in 0..10 {
            let switched_away = hub.subscribe(ProjectId::new());
            switched_away.unsubscribe();
        }
        assert_eq!(hub.channel_count(), 11);

        assert_eq!(hub.active_projects(), vec![kept]);
        assert_eq!(hub.channel_count(), 1);

        let gone = ProjectId::new();
        drop(hub.subscribe(gone));
        assert_eq!(hub.publish(event(gone, 1)), 0);
        assert_eq!(hub.channel_count(), 1);

        // A later subscriber to a pruned project still gets events.
        let mut again = hub.subscribe(gone);
        assert_eq!(hub.publish(event(gone, 2)), 1);
        assert_eq!(again.try_recv().map(|e| e.version), Some(2));
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_to_newer_events() {
        let hub = FeedHub::with_capacity(2);
        let project = ProjectId::new();
        let mut sub = hub.subscribe(project);

        for version in 1..=5 {
            hub.publish(event(project, version));
        }

        let first = sub.recv().await.expect("an event should survive the lag");
        assert!(first.version >= 4);
    }
}
