//! # pleme-conversations
//!
//! Support conversation engine for Pleme platform services.
//!
//! A ticket is a single support conversation that is written to by two
//! independent producers: the chat-platform event stream and the staff
//! management API. This crate keeps that shared record consistent.
//!
//! ## Features
//!
//! - **Single entry point** - every mutation goes through [`ConversationEngine::dispatch`]
//! - **Per-ticket serialization** - operations on one ticket never interleave
//! - **Compare-and-set storage** - [`TicketStore`] with bounded retry
//! - **Race-safe claims** - auto-claim on first staff reply, idempotent assignment
//! - **Response metrics** - set-once first response time, cumulative reply stats
//! - **Best-effort notifications** - created/assigned/closed events after commit
//! - **GraphQL API** - queries and mutations for the staff dashboard
//!
//! ## Usage
//!
//! ### In a Service
//!
//! ```rust,no_run
//! use pleme_conversations::{
//!     ConversationEngine, EngineConfig, LogGateway, PgTicketStore, StaticStaffDirectory,
//! };
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! # async fn example(db_pool: PgPool) -> pleme_conversations::Result<()> {
//! let store = PgTicketStore::new(db_pool.clone());
//! store.migrate().await?;
//!
//! let engine = Arc::new(ConversationEngine::new(
//!     Arc::new(store),
//!     Arc::new(StaticStaffDirectory::new(["staff-1"])),
//!     Arc::new(LogGateway),
//!     EngineConfig::from_env()?,
//! ));
//!
//! // Use in GraphQL schema
//! // Schema::build(ConversationQueries, ConversationMutations, EmptySubscription)
//! //     .data(engine)
//! //     .finish()
//! # Ok(())
//! # }
//! ```
//!
//! ### Chat events
//!
//! ```rust,no_run
//! use pleme_conversations::{ChatConnector, ChatMessageEvent, ConversationEngine};
//! use std::sync::Arc;
//!
//! # async fn example(engine: Arc<ConversationEngine>, event: ChatMessageEvent) {
//! let connector = ChatConnector::new(engine);
//! // Stale or duplicate events resolve to Ok(None)
//! let _ = connector.on_message(event).await;
//! # }
//! ```

pub mod assignment;
pub mod config;
pub mod connector;
pub mod engine;
pub mod graphql;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod repository;
pub mod store;

// Re-export commonly used types
pub use assignment::AssignmentResolver;
pub use config::EngineConfig;
pub use connector::{ChatConnector, ChatMessageEvent, ThreadCreatedEvent};
pub use engine::{ConversationEngine, Operation};
pub use graphql::{ConversationMutations, ConversationQueries};
pub use ingest::{MessageIngestor, MessageSource, RawMessage, StaffDirectory, StaticStaffDirectory};
pub use metrics::MetricsTracker;
pub use models::*;
pub use notify::{BroadcastGateway, LogGateway, NotificationGateway, Notifier, TicketEvent, TicketEventKind};
pub use repository::PgTicketStore;
pub use store::{update_with_retry, Committed, InMemoryTicketStore, Mutation, TicketStore};

use thiserror::Error;

/// Conversation engine errors
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ticket not found: {0}")]
    NotFound(String),

    #[error("No ticket for channel: {0}")]
    ChannelNotFound(String),

    #[error("Invalid transition on ticket {ticket_id}: {reason}")]
    InvalidTransition { ticket_id: String, reason: String },

    #[error("Ticket {0} is busy, try again")]
    Conflict(String),

    #[error("Ticket {ticket_id} changed since version {expected}")]
    VersionConflict { ticket_id: String, expected: i64 },

    #[error("Ticket already exists: {0}")]
    AlreadyExists(String),

    #[error("Opener {opener_id} already has an open ticket")]
    OpenTicketExists { opener_id: String },

    #[error("Message {message_id} already recorded on ticket {ticket_id}")]
    DuplicateMessage { ticket_id: String, message_id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversationError {
    pub(crate) fn closed(ticket_id: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            ticket_id: ticket_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::NotFound(_) | Self::ChannelNotFound(_) => "NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Conflict(_) | Self::VersionConflict { .. } => "CONFLICT",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::OpenTicketExists { .. } => "OPEN_TICKET_EXISTS",
            Self::DuplicateMessage { .. } => "DUPLICATE_MESSAGE",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the management API reports for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) | Self::ChannelNotFound(_) => 404,
            Self::InvalidTransition { .. } | Self::Validation(_) | Self::DuplicateMessage { .. } => 400,
            Self::Conflict(_)
            | Self::VersionConflict { .. }
            | Self::AlreadyExists(_)
            | Self::OpenTicketExists { .. } => 409,
            Self::Timeout(_) => 503,
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => 500,
        }
    }

    /// Expected outcomes for stale or replayed chat events
    pub fn is_stale_event(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ChannelNotFound(_)
                | Self::InvalidTransition { .. }
                | Self::DuplicateMessage { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConversationError>;
