//! Typed publish/subscribe bus for governance events.
//!
//! The switchboard, movement processor, and rollout controller publish
//! here; subscribers register via `subscribe()`. Publishing never fails:
//! with no receivers the event is dropped, and a lagging receiver drops
//! its oldest events rather than blocking the publisher.

use chrono::{DateTime, Utc};
use govcore_common::{FlagTier, RolloutPhase};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_BUFFER: usize = 256;

/// Events emitted by the governance core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GovernanceEvent {
    FlagChanged {
        tier: FlagTier,
        name: String,
        enabled: bool,
        reason: String,
        actor: String,
        at: DateTime<Utc>,
    },
    EmergencyChanged {
        name: String,
        active: bool,
        reason: String,
        actor: String,
        at: DateTime<Utc>,
    },
    MovementProcessed {
        record_id: Uuid,
        product: String,
        warehouse: String,
        quantity_delta: i64,
        level_after: i64,
        at: DateTime<Utc>,
    },
    RolloutTransition {
        workflow: String,
        from: RolloutPhase,
        to: RolloutPhase,
        automatic: bool,
        at: DateTime<Utc>,
    },
}

/// Broadcast channel for governance events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<GovernanceEvent>,
}

impl EventBus {
    /// Create a new event bus with the provided buffer size.
    ///
    /// Note: the effective buffer is clamped to at least `DEFAULT_BUFFER`
    /// to avoid frequent lag/drop behavior for bursty event streams.
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1).max(DEFAULT_BUFFER);
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Dropped silently when no subscriber is attached.
    pub fn publish(&self, event: GovernanceEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn flag_event(name: &str) -> GovernanceEvent {
        GovernanceEvent::FlagChanged {
            tier: FlagTier::Component,
            name: name.to_string(),
            enabled: true,
            reason: "test".to_string(),
            actor: "tester".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.publish(flag_event("gateway_enforcement"));
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(flag_event("gateway_enforcement"));

        let event = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("broadcast recv failed");
        match event {
            GovernanceEvent::FlagChanged { name, enabled, .. } => {
                assert_eq!(name, "gateway_enforcement");
                assert!(enabled);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_subscriber_lags_without_blocking_publisher() {
        let bus = EventBus::new(1); // clamped to DEFAULT_BUFFER
        let mut rx = bus.subscribe();

        for _ in 0..=DEFAULT_BUFFER {
            bus.publish(flag_event("gateway_enforcement"));
        }

        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert_eq!(skipped, 1),
            Ok(_) => panic!("expected lag after overflowing the buffer"),
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let json = serde_json::to_value(flag_event("x")).unwrap();
        assert_eq!(json["event"], "flag_changed");
    }
}
