//! Versioned ticket persistence
//!
//! [`TicketStore`] is the only concurrency primitive the engine relies on:
//! every write is a compare-and-set against the version the caller read.
//! [`update_with_retry`] wraps that in a bounded read-modify-write loop.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{Ticket, TicketFilter, TicketStatus};
use crate::{ConversationError, Result};

/// Whether a mutator changed the ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    /// Nothing to write; the store returns the current snapshot and keeps its version
    Unchanged,
}

/// Mutators run against a fresh read and may be re-run on retry
pub type Mutator<'a> = dyn Fn(&mut Ticket) -> Result<Mutation> + Send + Sync + 'a;

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Ticket>;

    async fn get_by_channel(&self, channel_ref: &str) -> Result<Ticket>;

    /// Newest first
    async fn list(&self, filter: &TicketFilter, limit: i64, offset: i64) -> Result<Vec<Ticket>>;

    /// Rejects a duplicate id or channel, and an opener that already has an open ticket
    async fn create(&self, ticket: Ticket) -> Result<Ticket>;

    /// Applies `mutate` to a fresh read and writes only if the stored version
    /// still equals `expected_version`.
    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutate: &Mutator<'_>,
    ) -> Result<Ticket>;
}

/// Snapshot before and after a committed update
#[derive(Debug, Clone)]
pub struct Committed {
    pub previous: Ticket,
    pub current: Ticket,
}

impl Committed {
    pub fn changed(&self) -> bool {
        self.previous.version != self.current.version
    }
}

/// Read-modify-write with at most `max_attempts` compare-and-set rounds
pub async fn update_with_retry(
    store: &dyn TicketStore,
    id: &str,
    max_attempts: u32,
    mutate: &Mutator<'_>,
) -> Result<Committed> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let previous = store.get(id).await?;

        match store.conditional_update(id, previous.version, mutate).await {
            Ok(current) => return Ok(Committed { previous, current }),
            Err(ConversationError::VersionConflict { expected, .. }) if attempt < max_attempts => {
                tracing::debug!(ticket_id = %id, expected, attempt, "version conflict, retrying");
            }
            Err(ConversationError::VersionConflict { .. }) => {
                tracing::warn!(ticket_id = %id, attempt, "giving up after repeated version conflicts");
                return Err(ConversationError::Conflict(id.to_string()));
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Default)]
struct InMemoryState {
    tickets: HashMap<String, Ticket>,
    by_channel: HashMap<String, String>,
    open_by_opener: HashMap<String, String>,
}

/// Process-local store, used by tests and single-node deployments
#[derive(Default, Clone)]
pub struct InMemoryTicketStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn get(&self, id: &str) -> Result<Ticket> {
        let state = self.state.read().await;
        state
            .tickets
            .get(id)
            .cloned()
            .ok_or_else(|| ConversationError::NotFound(id.to_string()))
    }

    async fn get_by_channel(&self, channel_ref: &str) -> Result<Ticket> {
        let state = self.state.read().await;
        state
            .by_channel
            .get(channel_ref)
            .and_then(|id| state.tickets.get(id))
            .cloned()
            .ok_or_else(|| ConversationError::ChannelNotFound(channel_ref.to_string()))
    }

    async fn list(&self, filter: &TicketFilter, limit: i64, offset: i64) -> Result<Vec<Ticket>> {
        let state = self.state.read().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Ok(tickets
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn create(&self, mut ticket: Ticket) -> Result<Ticket> {
        let mut state = self.state.write().await;
        if state.tickets.contains_key(&ticket.id) || state.by_channel.contains_key(&ticket.channel_ref) {
            return Err(ConversationError::AlreadyExists(ticket.id));
        }
        if ticket.status == TicketStatus::Open && state.open_by_opener.contains_key(&ticket.opener.id) {
            return Err(ConversationError::OpenTicketExists {
                opener_id: ticket.opener.id,
            });
        }

        ticket.version = 1;
        state
            .by_channel
            .insert(ticket.channel_ref.clone(), ticket.id.clone());
        if ticket.status == TicketStatus::Open {
            state
                .open_by_opener
                .insert(ticket.opener.id.clone(), ticket.id.clone());
        }
        state.tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutate: &Mutator<'_>,
    ) -> Result<Ticket> {
        let mut state = self.state.write().await;
        let Some(current) = state.tickets.get(id) else {
            return Err(ConversationError::NotFound(id.to_string()));
        };
        if current.version != expected_version {
            return Err(ConversationError::VersionConflict {
                ticket_id: id.to_string(),
                expected: expected_version,
            });
        }

        let mut next = current.clone();
        if mutate(&mut next)? == Mutation::Unchanged {
            return Ok(current.clone());
        }
        next.version = expected_version + 1;

        if next.status == TicketStatus::Closed
            && state.open_by_opener.get(&next.opener.id) == Some(&next.id)
        {
            state.open_by_opener.remove(&next.opener.id);
        }
        state.tickets.insert(id.to_string(), next.clone());
        Ok(next)
    }
}
