//! Action stream registry
//!
//! Maps action ids to live broadcast channels. A dispatch publishes into the
//! channel while `/ws/actionLogs` viewers subscribe to it; either side may
//! arrive first. Late subscribers get no replay. Once a channel reports
//! `done` it is dropped after the grace period, which closes every receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::action::ActionId;
use crate::domain::types::ActionEvent;

/// Buffered events per channel before slow viewers start lagging
const CHANNEL_CAPACITY: usize = 1024;

/// One action's event channel
pub struct ActionChannel {
    id: ActionId,
    sender: broadcast::Sender<ActionEvent>,
    producer_attached: AtomicBool,
    done: AtomicBool,
}

impl ActionChannel {
    fn new(id: ActionId) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            id,
            sender,
            producer_attached: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Process-wide table of action channels, shared through application state
#[derive(Clone)]
pub struct StreamRegistry {
    channels: Arc<DashMap<ActionId, Arc<ActionChannel>>>,
    grace_period: Duration,
}

impl StreamRegistry {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            grace_period,
        }
    }

    /// Look up a channel, creating it on first use
    pub fn get_or_create(&self, id: &ActionId) -> Arc<ActionChannel> {
        self.channels
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ActionChannel::new(id.clone())))
            .clone()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self, id: &ActionId) -> broadcast::Receiver<ActionEvent> {
        let channel = self.get_or_create(id);
        debug!(action_id = %id, "Subscribed to action channel");
        channel.sender.subscribe()
    }

    /// Claim the producing side of a channel.
    ///
    /// A channel carries at most one execution; a second claim is rejected.
    pub fn attach_producer(&self, id: &ActionId) -> Option<ActionPublisher> {
        let channel = self.get_or_create(id);
        if channel.producer_attached.swap(true, Ordering::AcqRel) {
            warn!(action_id = %id, "Action channel already has a producer");
            return None;
        }
        Some(ActionPublisher {
            registry: self.clone(),
            channel,
        })
    }

    /// Drop a channel nobody produces into or listens on
    pub fn release(&self, id: &ActionId) {
        let removed = self.channels.remove_if(id, |_, channel| {
            !channel.producer_attached.load(Ordering::Acquire) && channel.subscriber_count() == 0
        });
        if removed.is_some() {
            debug!(action_id = %id, "Released idle action channel");
        }
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.channels.contains_key(id)
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    fn schedule_removal(&self, channel: &Arc<ActionChannel>) {
        let channels = self.channels.clone();
        let channel = channel.clone();
        let grace_period = self.grace_period;

        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            let id = channel.id.clone();
            // A fresh channel under the same id is left alone
            let removed = channels.remove_if(&id, |_, current| Arc::ptr_eq(current, &channel));
            if removed.is_some() {
                debug!(action_id = %id, "Removed finished action channel");
            }
        });
    }
}

/// Producing half of an action channel.
///
/// `done` consumes the publisher so nothing is published after completion.
pub struct ActionPublisher {
    registry: StreamRegistry,
    channel: Arc<ActionChannel>,
}

impl ActionPublisher {
    pub fn id(&self) -> &ActionId {
        &self.channel.id
    }

    pub fn data(&self, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.send(ActionEvent::Data(text));
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(ActionEvent::Error {
            message: message.into(),
        });
    }

    pub fn done(self, success: bool) {
        self.send(ActionEvent::Done { success });
        if !self.channel.done.swap(true, Ordering::AcqRel) {
            self.registry.schedule_removal(&self.channel);
        }
    }

    fn send(&self, event: ActionEvent) {
        // No subscribers yet is not an error: there is no replay
        let _ = self.channel.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    fn id(raw: &str) -> ActionId {
        ActionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let first = registry.get_or_create(&id("abc123"));
        let second = registry.get_or_create(&id("abc123"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_early_subscriber_sees_every_event() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let mut rx = registry.subscribe(&id("abc123"));

        let publisher = registry.attach_producer(&id("abc123")).unwrap();
        publisher.data("one");
        publisher.data("two");
        publisher.error("boom");
        publisher.done(false);

        assert_eq!(rx.recv().await.unwrap(), ActionEvent::Data("one".to_string()));
        assert_eq!(rx.recv().await.unwrap(), ActionEvent::Data("two".to_string()));
        assert_eq!(
            rx.recv().await.unwrap(),
            ActionEvent::Error {
                message: "boom".to_string()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), ActionEvent::Done { success: false });
    }

    #[tokio::test]
    async fn test_subscriber_after_done_sees_nothing() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let publisher = registry.attach_producer(&id("late")).unwrap();
        publisher.data("missed");
        publisher.done(true);

        let mut rx = registry.subscribe(&id("late"));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_second_producer_is_rejected() {
        let registry = StreamRegistry::new(Duration::from_secs(60));
        let _first = registry.attach_producer(&id("once")).unwrap();
        assert!(registry.attach_producer(&id("once")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_removed_after_grace_period() {
        let grace = Duration::from_secs(60);
        let registry = StreamRegistry::new(grace);
        let mut rx = registry.subscribe(&id("abc123"));

        registry.attach_producer(&id("abc123")).unwrap().done(true);
        assert_eq!(rx.recv().await.unwrap(), ActionEvent::Done { success: true });

        tokio::time::sleep(grace - Duration::from_secs(1)).await;
        assert!(registry.contains(&id("abc123")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!registry.contains(&id("abc123")));
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_release_only_idle_channels() {
        let registry = StreamRegistry::new(Duration::from_secs(60));

        let rx = registry.subscribe(&id("idle"));
        drop(rx);
        registry.release(&id("idle"));
        assert!(!registry.contains(&id("idle")));

        let _publisher = registry.attach_producer(&id("busy")).unwrap();
        registry.release(&id("busy"));
        assert!(registry.contains(&id("busy")));
    }
}
