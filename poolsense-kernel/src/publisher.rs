//! Subscriber notification capability used by the refresh coordinator.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::coordinator::CacheSnapshot;

/// Told about every snapshot a cycle produces, successful or failed.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>);
}

/// Forwards each snapshot to several publishers, in registration order.
#[derive(Default, Clone)]
pub struct FanoutPublisher {
    targets: Vec<Arc<dyn Publisher>>,
}

impl FanoutPublisher {
    pub fn new(targets: Vec<Arc<dyn Publisher>>) -> Self {
        Self { targets }
    }

    pub fn push(&mut self, target: Arc<dyn Publisher>) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Publisher for FanoutPublisher {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        for target in &self.targets {
            target.publish(Arc::clone(&snapshot)).await;
        }
    }
}

/// In-process subscribers: every receiver sees the latest published snapshot.
#[derive(Clone)]
pub struct SnapshotSubscribers {
    tx: Arc<watch::Sender<Arc<CacheSnapshot>>>,
}

impl SnapshotSubscribers {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(CacheSnapshot::default()));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheSnapshot>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SnapshotSubscribers {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for SnapshotSubscribers {
    async fn publish(&self, snapshot: Arc<CacheSnapshot>) {
        self.tx.send_replace(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_latest_snapshot() {
        let subscribers = SnapshotSubscribers::new();
        let mut rx = subscribers.subscribe();
        assert!(rx.borrow().data.is_none());

        let snapshot = Arc::new(CacheSnapshot {
            last_update_success: true,
            ..CacheSnapshot::default()
        });
        let mut fanout = FanoutPublisher::default();
        fanout.push(Arc::new(subscribers.clone()));
        fanout.publish(snapshot.clone()).await;

        rx.changed().await.unwrap();
        assert!(Arc::ptr_eq(&rx.borrow_and_update(), &snapshot));
        assert_eq!(subscribers.subscriber_count(), 1);
    }
}
