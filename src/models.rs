use std::fmt;
use std::str::FromStr;

use async_graphql::{Enum, InputObject, SimpleObject};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ConversationError;

/// Author id recorded on audit messages appended by the engine itself
pub const SYSTEM_AUTHOR_ID: &str = "system";
pub const SYSTEM_AUTHOR_NAME: &str = "System";

/// A person or team referenced by a ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject, InputObject)]
#[graphql(input_name = "IdentityInput")]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct Ticket {
    pub id: String,
    pub channel_ref: String,
    pub title: String,
    pub opener: Identity,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_staff: Option<Identity>,
    pub assigned_team: Option<Identity>,
    pub tags: Vec<String>,
    pub messages: Vec<Message>,
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Identity>,
    pub close_reason: Option<String>,
    pub first_response_time_ms: Option<i64>,
    pub total_response_time_ms: i64,
    pub response_count: i64,
    #[graphql(skip)]
    pub last_staff_reply_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Ticket {
    /// Build a fresh `Open` ticket; the store assigns the first version
    pub fn open(id: impl Into<String>, new: NewTicket) -> Self {
        let title = new
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Support for {}", new.opener.display_name));

        Self {
            id: id.into(),
            channel_ref: new.channel_ref,
            title,
            opener: new.opener,
            status: TicketStatus::Open,
            priority: TicketPriority::Low,
            assigned_staff: None,
            assigned_team: None,
            tags: Vec::new(),
            messages: Vec::new(),
            last_message: None,
            created_at: new.created_at.unwrap_or_else(Utc::now),
            closed_at: None,
            closed_by: None,
            close_reason: None,
            first_response_time_ms: None,
            total_response_time_ms: 0,
            response_count: 0,
            last_staff_reply_at: None,
            version: 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TicketStatus::Closed
    }

    pub fn has_message(&self, message_id: &str) -> bool {
        self.messages.iter().any(|m| m.id == message_id)
    }

    pub fn first_response_time(&self) -> Option<Duration> {
        self.first_response_time_ms.map(Duration::milliseconds)
    }

    pub fn total_response_time(&self) -> Duration {
        Duration::milliseconds(self.total_response_time_ms)
    }

    /// Mean delta between consecutive staff replies
    pub fn average_response_time(&self) -> Option<Duration> {
        (self.response_count > 0)
            .then(|| Duration::milliseconds(self.total_response_time_ms / self.response_count))
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.last_message = Some(message.content.clone());
        self.messages.push(message);
    }

    pub(crate) fn push_system_message(&mut self, prefix: &str, content: String, at: DateTime<Utc>) {
        self.push_message(Message::system(prefix, content, at));
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    Urgent,
}

impl TicketPriority {
    /// Serialized form, as stored in the ticket document
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::Urgent => "URGENT",
        }
    }
}

impl fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Urgent => "urgent",
        };
        f.write_str(name)
    }
}

impl FromStr for TicketPriority {
    type Err = ConversationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "urgent" => Ok(Self::Urgent),
            other => Err(ConversationError::Validation(format!(
                "Invalid priority level: {other:?} (expected low, medium or urgent)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    User,
    Staff,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct Message {
    pub id: String,
    pub author_id: String,
    pub author_display_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    #[graphql(name = "type")]
    pub message_type: MessageType,
}

impl Message {
    pub fn system(prefix: &str, content: String, at: DateTime<Utc>) -> Self {
        Self {
            id: format!("{prefix}-{}", Uuid::new_v4().simple()),
            author_id: SYSTEM_AUTHOR_ID.to_string(),
            author_display_name: SYSTEM_AUTHOR_NAME.to_string(),
            content,
            timestamp: at,
            message_type: MessageType::System,
        }
    }

    pub fn author(&self) -> Identity {
        Identity::new(self.author_id.clone(), self.author_display_name.clone())
    }
}

/// Everything needed to open a ticket, from either producer
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub channel_ref: String,
    pub opener: Identity,
    pub title: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

// Input types
#[derive(Debug, Clone, InputObject)]
pub struct OpenTicketInput {
    pub channel_ref: String,
    pub opener: Identity,
    pub title: Option<String>,
}

impl From<OpenTicketInput> for NewTicket {
    fn from(input: OpenTicketInput) -> Self {
        Self {
            channel_ref: input.channel_ref,
            opener: input.opener,
            title: input.title,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, InputObject)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<TicketPriority>,
    pub assigned_staff_id: Option<String>,
    pub assigned_team_id: Option<String>,
    pub opener_id: Option<String>,
}

impl TicketFilter {
    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.status.map_or(true, |s| ticket.status == s)
            && self.priority.map_or(true, |p| ticket.priority == p)
            && self.assigned_staff_id.as_deref().map_or(true, |id| {
                ticket.assigned_staff.as_ref().is_some_and(|s| s.id == id)
            })
            && self.assigned_team_id.as_deref().map_or(true, |id| {
                ticket.assigned_team.as_ref().is_some_and(|t| t.id == id)
            })
            && self.opener_id.as_deref().map_or(true, |id| ticket.opener.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ticket() -> Ticket {
        Ticket::open(
            "TKT-1",
            NewTicket {
                channel_ref: "thread-1".to_string(),
                opener: Identity::new("user-1", "alice"),
                title: None,
                created_at: None,
            },
        )
    }

    #[test]
    fn open_ticket_defaults() {
        let ticket = sample_ticket();
        assert_eq!(ticket.title, "Support for alice");
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.priority, TicketPriority::Low);
        assert!(ticket.first_response_time().is_none());
        assert!(ticket.average_response_time().is_none());
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("URGENT".parse::<TicketPriority>().unwrap(), TicketPriority::Urgent);
        assert_eq!(" medium ".parse::<TicketPriority>().unwrap(), TicketPriority::Medium);
        assert!(matches!(
            "high".parse::<TicketPriority>(),
            Err(ConversationError::Validation(_))
        ));
    }

    #[test]
    fn message_type_serializes_under_type_key() {
        let message = Message::system("close", "Ticket closed".to_string(), Utc::now());
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "SYSTEM");
        assert!(message.id.starts_with("close-"));
    }

    #[test]
    fn filter_matches_assigned_staff() {
        let mut ticket = sample_ticket();
        let filter = TicketFilter {
            assigned_staff_id: Some("staff-1".to_string()),
            status: Some(TicketStatus::Open),
            ..Default::default()
        };
        assert!(!filter.matches(&ticket));

        ticket.assigned_staff = Some(Identity::new("staff-1", "bob"));
        assert!(filter.matches(&ticket));
    }
}
