//! Notification channels a provider exposes to its host.
//!
//! Each channel is a `tokio::sync::broadcast` sender. Subscribing hands the
//! host a receiver it owns; dropping the receiver is the unsubscribe.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::domain::{ProviderId, ProviderState};

use super::error::ProviderError;

/// Emitted after every accepted state transition.
#[derive(Debug, Clone)]
pub struct StateChangedEvent {
    pub provider_id: ProviderId,
    pub previous: ProviderState,
    pub current: ProviderState,
    pub description: String,
    pub error: Option<ProviderError>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when an operation (initialization included) finishes.
#[derive(Debug, Clone)]
pub struct OperationCompletedEvent {
    pub provider_id: ProviderId,
    pub operation: String,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<ProviderError>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted when a metric is recorded or metrics are cleared.
#[derive(Debug, Clone)]
pub struct MetricsUpdatedEvent {
    pub provider_id: ProviderId,
    /// Metrics changed by this update; empty after a clear.
    pub changed: HashMap<String, f64>,
    pub cleared: bool,
    pub timestamp: DateTime<Utc>,
}

/// The three broadcast channels owned by one engine.
#[derive(Debug)]
pub(crate) struct EventChannels {
    state_changed: broadcast::Sender<StateChangedEvent>,
    operation_completed: broadcast::Sender<OperationCompletedEvent>,
    metrics_updated: broadcast::Sender<MetricsUpdatedEvent>,
}

impl EventChannels {
    pub(crate) fn new(capacity: usize) -> Self {
        let (state_changed, _) = broadcast::channel(capacity);
        let (operation_completed, _) = broadcast::channel(capacity);
        let (metrics_updated, _) = broadcast::channel(capacity);
        Self {
            state_changed,
            operation_completed,
            metrics_updated,
        }
    }

    // Sending only fails when nobody is subscribed.
    pub(crate) fn state_changed(&self, event: StateChangedEvent) {
        let _ = self.state_changed.send(event);
    }

    pub(crate) fn operation_completed(&self, event: OperationCompletedEvent) {
        let _ = self.operation_completed.send(event);
    }

    pub(crate) fn metrics_updated(&self, event: MetricsUpdatedEvent) {
        let _ = self.metrics_updated.send(event);
    }

    pub(crate) fn subscribe_state_changes(&self) -> broadcast::Receiver<StateChangedEvent> {
        self.state_changed.subscribe()
    }

    pub(crate) fn subscribe_operations(&self) -> broadcast::Receiver<OperationCompletedEvent> {
        self.operation_completed.subscribe()
    }

    pub(crate) fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsUpdatedEvent> {
        self.metrics_updated.subscribe()
    }

    /// Live subscriber counts for (state, operations, metrics).
    pub(crate) fn subscriber_counts(&self) -> (usize, usize, usize) {
        (
            self.state_changed.receiver_count(),
            self.operation_completed.receiver_count(),
            self.metrics_updated.receiver_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_event() -> StateChangedEvent {
        StateChangedEvent {
            provider_id: ProviderId::from("p"),
            previous: ProviderState::Uninitialized,
            current: ProviderState::Initializing,
            description: "init".to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn send_without_subscribers_is_ignored() {
        let channels = EventChannels::new(4);
        channels.state_changed(state_event());
    }

    #[tokio::test]
    async fn subscribers_receive_and_unsubscribe_on_drop() {
        let channels = EventChannels::new(4);
        let mut rx = channels.subscribe_state_changes();
        assert_eq!(channels.subscriber_counts(), (1, 0, 0));

        channels.state_changed(state_event());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.current, ProviderState::Initializing);

        drop(rx);
        assert_eq!(channels.subscriber_counts(), (0, 0, 0));
    }
}
