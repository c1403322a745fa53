//! Message normalization and classification
//!
//! Both producers hand the ingestor a [`RawMessage`]. Classification needs the
//! staff directory, so it happens once up front in [`MessageIngestor::normalize`];
//! the resulting [`Message`] is appended inside the store mutation by
//! [`MessageIngestor::append`], which does no I/O.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Message, MessageType, Ticket};
use crate::{ConversationError, Result};

/// Staff-membership lookup supplied by the host service
#[async_trait]
pub trait StaffDirectory: Send + Sync {
    async fn is_staff(&self, author_id: &str) -> Result<bool>;
}

/// In-memory staff roster
#[derive(Default)]
pub struct StaticStaffDirectory {
    members: RwLock<HashSet<String>>,
}

impl StaticStaffDirectory {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: RwLock::new(members.into_iter().map(Into::into).collect()),
        }
    }

    pub async fn add(&self, author_id: impl Into<String>) {
        self.members.write().await.insert(author_id.into());
    }

    pub async fn remove(&self, author_id: &str) -> bool {
        self.members.write().await.remove(author_id)
    }
}

#[async_trait]
impl StaffDirectory for StaticStaffDirectory {
    async fn is_staff(&self, author_id: &str) -> Result<bool> {
        Ok(self.members.read().await.contains(author_id))
    }
}

/// Where a message entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Chat,
    Api,
}

impl MessageSource {
    fn id_prefix(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Api => "web",
        }
    }
}

/// An inbound message before classification
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Platform message id; generated when absent
    pub id: Option<String>,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Set by the chat platform for its own notices
    pub system: bool,
    pub source: MessageSource,
}

impl RawMessage {
    pub fn from_api(author_id: impl Into<String>, author_display_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: None,
            author_id: author_id.into(),
            author_display_name: author_display_name.into(),
            content: content.into(),
            timestamp: None,
            system: false,
            source: MessageSource::Api,
        }
    }
}

pub struct MessageIngestor {
    staff: Arc<dyn StaffDirectory>,
}

impl MessageIngestor {
    pub fn new(staff: Arc<dyn StaffDirectory>) -> Self {
        Self { staff }
    }

    /// Known staff first, then the explicit system marker, else user
    pub async fn classify(&self, raw: &RawMessage) -> Result<MessageType> {
        if self.staff.is_staff(&raw.author_id).await? {
            return Ok(MessageType::Staff);
        }
        if raw.system {
            return Ok(MessageType::System);
        }
        Ok(MessageType::User)
    }

    /// Classify into a canonical [`Message`]; content is validated on append
    pub async fn normalize(&self, raw: RawMessage) -> Result<Message> {
        let message_type = self.classify(&raw).await?;
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}", raw.source.id_prefix(), Uuid::new_v4().simple()));

        Ok(Message {
            id,
            author_id: raw.author_id,
            author_display_name: raw.author_display_name,
            content: raw.content,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            message_type,
        })
    }

    /// Append to the ticket log; closed tickets accept nothing through this path
    pub fn append(ticket: &mut Ticket, message: Message) -> Result<()> {
        if ticket.is_closed() {
            return Err(ConversationError::closed(
                &ticket.id,
                "cannot add message to closed ticket",
            ));
        }
        if message.content.trim().is_empty() {
            return Err(ConversationError::Validation(
                "Message content is required".to_string(),
            ));
        }
        if message.author_id.trim().is_empty() {
            return Err(ConversationError::Validation(
                "Message author is required".to_string(),
            ));
        }
        if ticket.has_message(&message.id) {
            return Err(ConversationError::DuplicateMessage {
                ticket_id: ticket.id.clone(),
                message_id: message.id,
            });
        }
        ticket.push_message(message);
        Ok(())
    }
}
