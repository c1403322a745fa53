//! Outbound lifecycle notifications
//!
//! Delivery happens after the state commit and outside the per-ticket
//! critical section. A failed or slow delivery is logged and dropped; it never
//! turns into an engine error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::Ticket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketEventKind {
    Created,
    Assigned,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketEvent {
    pub kind: TicketEventKind,
    pub ticket: Ticket,
    pub emitted_at: DateTime<Utc>,
}

impl TicketEvent {
    pub fn new(kind: TicketEventKind, ticket: Ticket) -> Self {
        Self {
            kind,
            ticket,
            emitted_at: Utc::now(),
        }
    }
}

/// Sink for lifecycle events (chat-platform embeds, webhooks, ...)
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn deliver(&self, event: &TicketEvent) -> anyhow::Result<()>;
}

/// Records events in the service log only
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn deliver(&self, event: &TicketEvent) -> anyhow::Result<()> {
        tracing::info!(
            ticket_id = %event.ticket.id,
            kind = ?event.kind,
            "ticket lifecycle event"
        );
        Ok(())
    }
}

/// Fans events out to in-process subscribers
#[derive(Clone)]
pub struct BroadcastGateway {
    sender: broadcast::Sender<TicketEvent>,
}

impl BroadcastGateway {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TicketEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationGateway for BroadcastGateway {
    async fn deliver(&self, event: &TicketEvent) -> anyhow::Result<()> {
        // No subscribers is not a delivery failure
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// Fire-and-forget dispatcher around a gateway
#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn NotificationGateway>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    /// Spawn delivery; the handle is only useful to tests
    pub fn publish(&self, event: TicketEvent) -> JoinHandle<()> {
        let gateway = self.gateway.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, gateway.deliver(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    ticket_id = %event.ticket.id,
                    kind = ?event.kind,
                    "Failed to deliver ticket notification: {:#}",
                    e
                ),
                Err(_) => tracing::warn!(
                    ticket_id = %event.ticket.id,
                    kind = ?event.kind,
                    "Ticket notification timed out after {:?}",
                    timeout
                ),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, NewTicket};

    struct FailingGateway;

    #[async_trait]
    impl NotificationGateway for FailingGateway {
        async fn deliver(&self, _event: &TicketEvent) -> anyhow::Result<()> {
            anyhow::bail!("chat platform unavailable")
        }
    }

    struct StalledGateway;

    #[async_trait]
    impl NotificationGateway for StalledGateway {
        async fn deliver(&self, _event: &TicketEvent) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn event(kind: TicketEventKind) -> TicketEvent {
        let ticket = Ticket::open(
            "TKT-1",
            NewTicket {
                channel_ref: "thread-1".to_string(),
                opener: Identity::new("user-1", "alice"),
                title: None,
                created_at: None,
            },
        );
        TicketEvent::new(kind, ticket)
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let gateway = BroadcastGateway::new(8);
        let mut rx = gateway.subscribe();
        let notifier = Notifier::new(Arc::new(gateway), Duration::from_secs(1));

        notifier.publish(event(TicketEventKind::Created)).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, TicketEventKind::Created);
        assert_eq!(received.ticket.id, "TKT-1");
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_swallowed() {
        let failing = Notifier::new(Arc::new(FailingGateway), Duration::from_secs(1));
        failing.publish(event(TicketEventKind::Closed)).await.unwrap();

        let stalled = Notifier::new(Arc::new(StalledGateway), Duration::from_millis(10));
        stalled.publish(event(TicketEventKind::Assigned)).await.unwrap();
    }
}
