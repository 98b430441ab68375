//! Process-wide event bus: bounded history plus an admin WebSocket
//! broadcast channel. A slow or failing subscriber never blocks others.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    AppointmentConfirmed,
    CallStarted,
    CallEnded,
    CallError,
    SettingsUpdated,
    VoiceSettingsUpdated,
    FillersUpdated,
    PromptUpdated,
    SystemHealthCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub correlation_id: Option<String>,
}

/// In-memory pub/sub with a bounded ring buffer of recent events and a
/// broadcast channel feeding admin WebSocket observers.
pub struct EventBus {
    history: Mutex<VecDeque<Event>>,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
            tx,
        }
    }

    /// Subscribe for live events (admin WebSocket fan-out uses this).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publishes an event: records it in history (evicting the oldest
    /// once full) then broadcasts to subscribers. A subscriber that
    /// never reads simply lags and misses old events; it cannot block
    /// the publisher.
    pub async fn publish(&self, event_type: EventType, data: serde_json::Value, source: impl Into<String>) {
        let event = Event {
            event_type,
            data,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: Some(Uuid::new_v4().to_string()),
        };

        {
            let mut history = self.history.lock().await;
            if history.len() >= MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No receivers is not an error; it just means nobody is watching.
        let _ = self.tx.send(event);
    }

    pub async fn get_history(&self, event_type: Option<EventType>, limit: usize) -> Vec<Event> {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .filter(|e| event_type.map(|t| t == e.event_type).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.history.lock().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_bounded_and_fifo_evicted() {
        let bus = EventBus::new();
        for i in 0..(MAX_HISTORY + 10) {
            bus.publish(EventType::CallStarted, serde_json::json!({"i": i}), "test").await;
        }
        let history = bus.get_history(None, MAX_HISTORY + 10).await;
        assert_eq!(history.len(), MAX_HISTORY);
        // most recent first
        assert_eq!(history[0].data["i"], MAX_HISTORY + 9);
    }

    #[tokio::test]
    async fn a_lagging_subscriber_does_not_block_publish() {
        let bus = EventBus::new();
        let _rx = bus.subscribe();
        // publish far more than the broadcast channel capacity without
        // ever reading from _rx; publish must not hang or error.
        for i in 0..1000 {
            bus.publish(EventType::SystemHealthCheck, serde_json::json!({"i": i}), "test").await;
        }
    }

    #[tokio::test]
    async fn filters_history_by_type() {
        let bus = EventBus::new();
        bus.publish(EventType::CallStarted, serde_json::json!({}), "test").await;
        bus.publish(EventType::CallEnded, serde_json::json!({}), "test").await;
        let only_ended = bus.get_history(Some(EventType::CallEnded), 10).await;
        assert_eq!(only_ended.len(), 1);
        assert_eq!(only_ended[0].event_type, EventType::CallEnded);
    }
}
