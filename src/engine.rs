//! Conversation state machine
//!
//! [`ConversationEngine`] is the single writer for tickets. Both producers
//! (chat events and the management API) call [`ConversationEngine::dispatch`],
//! which:
//!
//! 1. normalizes input that needs I/O (author classification),
//! 2. enters the per-ticket critical section,
//! 3. runs one pure transition inside a compare-and-set update,
//! 4. leaves the critical section and publishes lifecycle notifications.
//!
//! Operations on different tickets never contend with each other.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::assignment::AssignmentResolver;
use crate::config::EngineConfig;
use crate::ingest::{MessageIngestor, RawMessage, StaffDirectory};
use crate::metrics::MetricsTracker;
use crate::models::{
    Identity, Message, MessageType, NewTicket, Ticket, TicketFilter, TicketPriority, TicketStatus,
};
use crate::notify::{NotificationGateway, Notifier, TicketEvent, TicketEventKind};
use crate::store::{update_with_retry, Committed, Mutation, TicketStore};
use crate::{ConversationError, Result};

/// A mutating request against one ticket
#[derive(Debug, Clone)]
pub enum Operation {
    Ingest(RawMessage),
    AssignStaff { staff: Identity, actor: Identity },
    AssignTeam { team: Identity, actor: Identity },
    AddTag { tag: String, actor: Identity },
    SetPriority { priority: TicketPriority, actor: Identity },
    Close { actor: Identity, reason: Option<String> },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ingest(_) => "ingest",
            Self::AssignStaff { .. } => "assign_staff",
            Self::AssignTeam { .. } => "assign_team",
            Self::AddTag { .. } => "add_tag",
            Self::SetPriority { .. } => "set_priority",
            Self::Close { .. } => "close",
        }
    }
}

/// An operation with its I/O already resolved
enum Change {
    Append(Message),
    AssignStaff { staff: Identity, actor: Identity },
    AssignTeam { team: Identity, actor: Identity },
    AddTag { tag: String, actor: Identity },
    SetPriority { priority: TicketPriority, actor: Identity },
    Close { actor: Identity, reason: Option<String> },
}

pub struct ConversationEngine {
    store: Arc<dyn TicketStore>,
    ingestor: MessageIngestor,
    notifier: Notifier,
    config: EngineConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn TicketStore>,
        staff: Arc<dyn StaffDirectory>,
        gateway: Arc<dyn NotificationGateway>,
        config: EngineConfig,
    ) -> Self {
        let notifier = Notifier::new(gateway, config.notification_timeout);
        Self {
            store,
            ingestor: MessageIngestor::new(staff),
            notifier,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open a ticket for a new conversation channel.
    ///
    /// The store enforces one open ticket per opener atomically, so the API
    /// and the chat connector get the same guarantee.
    pub async fn open_ticket(&self, new: NewTicket) -> Result<Ticket> {
        if new.channel_ref.trim().is_empty() {
            return Err(ConversationError::Validation("Channel reference is required".to_string()));
        }
        if new.opener.id.trim().is_empty() {
            return Err(ConversationError::Validation("Opener id is required".to_string()));
        }

        let mut attempt = 0;
        let ticket = loop {
            attempt += 1;
            let candidate = Ticket::open(generate_ticket_id(), new.clone());

            match self.bounded(self.store.create(candidate)).await {
                Ok(ticket) => break ticket,
                Err(ConversationError::AlreadyExists(id)) => {
                    // Either the channel is already tracked or the generated id collided
                    if self.bounded(self.store.get_by_channel(&new.channel_ref)).await.is_ok() {
                        return Err(ConversationError::AlreadyExists(new.channel_ref));
                    }
                    if attempt >= self.config.max_cas_attempts {
                        return Err(ConversationError::Conflict(id));
                    }
                    tracing::debug!(ticket_id = %id, "generated ticket id collided, retrying");
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            ticket_id = %ticket.id,
            opener_id = %ticket.opener.id,
            channel_ref = %ticket.channel_ref,
            "ticket opened"
        );
        self.notifier
            .publish(TicketEvent::new(TicketEventKind::Created, ticket.clone()));

        Ok(ticket)
    }

    /// Single entry point for every mutation of an existing ticket
    pub async fn dispatch(&self, ticket_id: &str, op: Operation) -> Result<Ticket> {
        let name = op.name();
        let change = self.prepare(op).await?;

        let lock = self.lock_for(ticket_id);
        let result = self.apply_serialized(lock.mutex(), ticket_id, &change).await;
        drop(lock);

        let committed = result.map_err(|e| {
            tracing::debug!(ticket_id = %ticket_id, op = name, "operation rejected: {}", e);
            e
        })?;

        if committed.changed() {
            self.announce(&committed);
        } else {
            tracing::debug!(ticket_id = %ticket_id, op = name, "operation was a no-op");
        }

        Ok(committed.current)
    }

    pub async fn ingest(&self, ticket_id: &str, raw: RawMessage) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::Ingest(raw)).await
    }

    pub async fn assign_staff(&self, ticket_id: &str, staff: Identity, actor: Identity) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::AssignStaff { staff, actor }).await
    }

    pub async fn assign_team(&self, ticket_id: &str, team: Identity, actor: Identity) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::AssignTeam { team, actor }).await
    }

    pub async fn add_tag(&self, ticket_id: &str, tag: impl Into<String>, actor: Identity) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::AddTag { tag: tag.into(), actor }).await
    }

    pub async fn set_priority(&self, ticket_id: &str, priority: TicketPriority, actor: Identity) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::SetPriority { priority, actor }).await
    }

    pub async fn close(&self, ticket_id: &str, actor: Identity, reason: Option<String>) -> Result<Ticket> {
        self.dispatch(ticket_id, Operation::Close { actor, reason }).await
    }

    /// Snapshot read; may trail an in-flight write by one version
    pub async fn get(&self, ticket_id: &str) -> Result<Ticket> {
        self.bounded(self.store.get(ticket_id)).await
    }

    pub async fn get_by_channel(&self, channel_ref: &str) -> Result<Ticket> {
        self.bounded(self.store.get_by_channel(channel_ref)).await
    }

    pub async fn list(&self, filter: &TicketFilter, limit: i64, offset: i64) -> Result<Vec<Ticket>> {
        self.bounded(self.store.list(filter, limit, offset)).await
    }

    async fn prepare(&self, op: Operation) -> Result<Change> {
        Ok(match op {
            Operation::Ingest(raw) => Change::Append(self.ingestor.normalize(raw).await?),
            Operation::AssignStaff { staff, actor } => Change::AssignStaff { staff, actor },
            Operation::AssignTeam { team, actor } => Change::AssignTeam { team, actor },
            Operation::AddTag { tag, actor } => Change::AddTag {
                tag: tag.trim().to_string(),
                actor,
            },
            Operation::SetPriority { priority, actor } => Change::SetPriority { priority, actor },
            Operation::Close { actor, reason } => Change::Close {
                actor,
                reason: reason.filter(|r| !r.trim().is_empty()),
            },
        })
    }

    async fn apply_serialized(
        &self,
        lock: &Mutex<()>,
        ticket_id: &str,
        change: &Change,
    ) -> Result<Committed> {
        let _guard = tokio::time::timeout(self.config.lock_timeout, lock.lock())
            .await
            .map_err(|_| {
                tracing::warn!(ticket_id = %ticket_id, "timed out waiting for ticket lock");
                ConversationError::Conflict(ticket_id.to_string())
            })?;

        let before = self.bounded(self.store.get(ticket_id)).await?;
        let at = Utc::now();
        let mutate = |ticket: &mut Ticket| apply(ticket, change, at);
        let update = update_with_retry(
            self.store.as_ref(),
            ticket_id,
            self.config.max_cas_attempts,
            &mutate,
        );

        match tokio::time::timeout(self.config.store_timeout, update).await {
            Ok(result) => result,
            Err(_) => self.recover_timed_out(before).await,
        }
    }

    /// A timed-out update may still have committed; report it if the version moved
    async fn recover_timed_out(&self, before: Ticket) -> Result<Committed> {
        let current = self.bounded(self.store.get(&before.id)).await?;
        if current.version > before.version {
            tracing::warn!(
                ticket_id = %current.id,
                version = current.version,
                "ticket store was slow but the update committed"
            );
            return Ok(Committed {
                previous: before,
                current,
            });
        }

        tracing::warn!(ticket_id = %before.id, "timed out updating ticket");
        Err(ConversationError::Timeout("ticket store"))
    }

    fn announce(&self, committed: &Committed) {
        let Committed { previous, current } = committed;

        let staff_id = |t: &Ticket| t.assigned_staff.as_ref().map(|s| s.id.clone());
        if staff_id(previous) != staff_id(current) {
            tracing::info!(
                ticket_id = %current.id,
                staff_id = ?staff_id(current),
                "ticket assigned"
            );
            self.notifier
                .publish(TicketEvent::new(TicketEventKind::Assigned, current.clone()));
        }

        if !previous.is_closed() && current.is_closed() {
            tracing::info!(
                ticket_id = %current.id,
                closed_by = ?current.closed_by.as_ref().map(|c| c.id.as_str()),
                "ticket closed"
            );
            self.notifier
                .publish(TicketEvent::new(TicketEventKind::Closed, current.clone()));
        }
    }

    fn lock_for(&self, ticket_id: &str) -> TicketLock<'_> {
        let mutex = Arc::clone(
            &self
                .locks
                .entry(ticket_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        TicketLock {
            locks: &self.locks,
            ticket_id: ticket_id.to_string(),
            mutex,
        }
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.store_timeout, fut)
            .await
            .map_err(|_| ConversationError::Timeout("ticket store"))?
    }
}

/// Handle on one lock-table entry. Dropping it removes the entry once nobody
/// else holds or waits on it, including when the dispatch future is cancelled.
struct TicketLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    ticket_id: String,
    mutex: Arc<Mutex<()>>,
}

impl TicketLock<'_> {
    fn mutex(&self) -> &Mutex<()> {
        &self.mutex
    }
}

impl Drop for TicketLock<'_> {
    fn drop(&mut self) {
        // The map and this handle are the only references left
        self.locks
            .remove_if(&self.ticket_id, |_, lock| Arc::strong_count(lock) == 2);
    }
}

/// The transition itself: pure, and safe to re-run on a newer snapshot
fn apply(ticket: &mut Ticket, change: &Change, at: DateTime<Utc>) -> Result<Mutation> {
    if ticket.is_closed() {
        let reason = match change {
            Change::Close { .. } => "ticket already closed",
            Change::Append(_) => "cannot add message to closed ticket",
            _ => "cannot update closed ticket",
        };
        return Err(ConversationError::closed(&ticket.id, reason));
    }

    match change {
        Change::Append(message) => {
            MessageIngestor::append(ticket, message.clone())?;
            MetricsTracker::record_reply(ticket, message);
            if message.message_type == MessageType::Staff {
                AssignmentResolver::auto_claim(ticket, &message.author());
            }
            Ok(Mutation::Applied)
        }
        Change::AssignStaff { staff, actor } => AssignmentResolver::assign_staff(ticket, staff, actor, at),
        Change::AssignTeam { team, actor } => AssignmentResolver::assign_team(ticket, team, actor, at),
        Change::AddTag { tag, actor } => {
            if tag.is_empty() {
                return Err(ConversationError::Validation("Tag is required".to_string()));
            }
            if ticket.tags.iter().any(|t| t == tag) {
                return Err(ConversationError::Validation(format!(
                    "Tag {tag} already added to ticket"
                )));
            }
            ticket.tags.push(tag.clone());
            ticket.push_system_message("tag", format!("Tag {tag} added by {}", actor.display_name), at);
            Ok(Mutation::Applied)
        }
        Change::SetPriority { priority, actor } => {
            if ticket.priority == *priority {
                return Ok(Mutation::Unchanged);
            }
            ticket.priority = *priority;
            ticket.push_system_message(
                "priority",
                format!("Ticket priority set to {priority} by {}", actor.display_name),
                at,
            );
            Ok(Mutation::Applied)
        }
        Change::Close { actor, reason } => {
            ticket.status = TicketStatus::Closed;
            ticket.closed_at = Some(at);
            ticket.closed_by = Some(actor.clone());
            ticket.close_reason = reason.clone();

            let content = match reason {
                Some(reason) => format!("Ticket closed by {}: {reason}", actor.display_name),
                None => format!("Ticket closed by {}", actor.display_name),
            };
            ticket.push_system_message("close", content, at);
            Ok(Mutation::Applied)
        }
    }
}

fn generate_ticket_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("TKT-{}", raw[..8].to_ascii_uppercase())
}
