#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use pleme_conversations::{
    BroadcastGateway, ConversationEngine, EngineConfig, Identity, InMemoryTicketStore,
    MessageSource, NewTicket, NotificationGateway, RawMessage, StaticStaffDirectory,
};

pub const STAFF: [&str; 3] = ["staff-1", "staff-2", "staff-3"];

pub fn engine_with(gateway: Arc<dyn NotificationGateway>) -> Arc<ConversationEngine> {
    Arc::new(ConversationEngine::new(
        Arc::new(InMemoryTicketStore::new()),
        Arc::new(StaticStaffDirectory::new(STAFF)),
        gateway,
        EngineConfig::default(),
    ))
}

pub fn engine() -> Arc<ConversationEngine> {
    engine_with(Arc::new(BroadcastGateway::new(64)))
}

pub fn new_ticket(opener: &str, channel: &str, created_at: Option<DateTime<Utc>>) -> NewTicket {
    NewTicket {
        channel_ref: channel.to_string(),
        opener: Identity::new(opener, opener),
        title: None,
        created_at,
    }
}

pub fn chat(id: &str, author: &str, content: &str, at: DateTime<Utc>) -> RawMessage {
    RawMessage {
        id: Some(id.to_string()),
        author_id: author.to_string(),
        author_display_name: author.to_string(),
        content: content.to_string(),
        timestamp: Some(at),
        system: false,
        source: MessageSource::Chat,
    }
}

pub fn staff(id: &str) -> Identity {
    Identity::new(id, id)
}

pub fn admin() -> Identity {
    Identity::new("admin", "admin")
}
