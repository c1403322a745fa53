//! Chat-platform event adapter
//!
//! The platform transport pushes events here. Events that reference an
//! unknown, closed or already-seen conversation are normal (redeliveries,
//! late messages after close) and are dropped with a debug log.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::engine::ConversationEngine;
use crate::ingest::{MessageSource, RawMessage};
use crate::models::{Identity, NewTicket, Ticket};
use crate::Result;

#[derive(Debug, Clone)]
pub struct ChatMessageEvent {
    pub channel_ref: String,
    pub message_id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub author_is_bot: bool,
    /// Platform-generated notice rather than a human message
    pub system: bool,
}

#[derive(Debug, Clone)]
pub struct ThreadCreatedEvent {
    pub channel_ref: String,
    pub opener_id: String,
    pub opener_display_name: String,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

pub struct ChatConnector {
    engine: Arc<ConversationEngine>,
}

impl ChatConnector {
    pub fn new(engine: Arc<ConversationEngine>) -> Self {
        Self { engine }
    }

    /// Route a thread message into its ticket; `Ok(None)` when the event was dropped
    pub async fn on_message(&self, event: ChatMessageEvent) -> Result<Option<Ticket>> {
        if event.author_is_bot {
            return Ok(None);
        }

        let ticket = match self.engine.get_by_channel(&event.channel_ref).await {
            Ok(ticket) => ticket,
            Err(e) if e.is_stale_event() => {
                tracing::debug!(channel_ref = %event.channel_ref, "dropping chat message: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let raw = RawMessage {
            id: Some(event.message_id),
            author_id: event.author_id,
            author_display_name: event.author_display_name,
            content: event.content,
            timestamp: Some(event.timestamp),
            system: event.system,
            source: MessageSource::Chat,
        };

        match self.engine.ingest(&ticket.id, raw).await {
            Ok(ticket) => Ok(Some(ticket)),
            Err(e) if e.is_stale_event() => {
                tracing::debug!(ticket_id = %ticket.id, "dropping chat message: {}", e);
                Ok(None)
            }
            Err(e) => {
                tracing::error!(ticket_id = %ticket.id, "Failed to ingest chat message: {}", e);
                Err(e)
            }
        }
    }

    /// A new support thread opened on the platform
    pub async fn on_thread_created(&self, event: ThreadCreatedEvent) -> Result<Ticket> {
        let new = NewTicket {
            channel_ref: event.channel_ref,
            opener: Identity::new(event.opener_id, event.opener_display_name),
            title: event.title,
            created_at: event.created_at,
        };

        self.engine.open_ticket(new).await.map_err(|e| {
            tracing::debug!("rejected thread creation: {}", e);
            e
        })
    }
}
