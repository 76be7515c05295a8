// Copyright (c) 2026 gopilot contributors
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for container and task events
//
// In-memory fan-out over a tokio broadcast channel. Feeds the `/events` SSE
// endpoint and any in-process observer. Events are not persisted; a slow
// subscriber loses the oldest buffered events.

use crate::domain::events::{ContainerEvent, TaskEvent};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    Container(ContainerEvent),
    Task(TaskEvent),
}

#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity bounds how many events are buffered per subscriber before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    pub fn publish_container_event(&self, event: ContainerEvent) {
        self.publish(DomainEvent::Container(event));
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);
        if self.sender.send(event).is_err() {
            debug!("No subscribers listening to event");
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscription as a stream; lag gaps are logged and skipped.
    pub fn stream(&self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Event stream subscriber lagged: {}", e);
                None
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskId;
    use crate::domain::workspace::WorkspaceId;
    use chrono::Utc;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.publish_container_event(ContainerEvent::ContainerIdle {
            workspace_id: WorkspaceId::default_workspace(),
            idle_since: Utc::now(),
        });

        match receiver.recv().await.unwrap() {
            DomainEvent::Container(ContainerEvent::ContainerIdle { workspace_id, .. }) => {
                assert_eq!(workspace_id.as_str(), "default");
            }
            other => panic!("Wrong event type received: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish_task_event(TaskEvent::TaskFailed {
            task_id: TaskId::new(),
            workspace_id: None,
            reason: "nobody listening".into(),
            failed_at: Utc::now(),
        });
        let mut receiver = bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_event_wire_shape() {
        let event = DomainEvent::Container(ContainerEvent::ContainerStopped {
            workspace_id: WorkspaceId::default_workspace(),
            container_id: "abc".into(),
            reaped: true,
            stopped_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "container");
        assert_eq!(json["payload"]["event"], "container_stopped");
        assert_eq!(json["payload"]["reaped"], true);
    }
}
