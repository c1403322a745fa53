//! GraphQL API for the staff dashboard
//!
//! Provides ConversationQueries and ConversationMutations that can be merged
//! into any service's GraphQL schema.
//!
//! ## Usage in Services
//!
//! Services should provide `Arc<ConversationEngine>` in the GraphQL context.
//! Every mutation goes through the engine, so API writes are serialized with
//! chat-event writes on the same ticket.
//!
//! Errors carry `code` and `status` extensions (`NOT_FOUND`/404,
//! `INVALID_TRANSITION`/400, `CONFLICT`/409, ...).
//!
//! Authorization checks should be done by the service layer before
//! delegating to these resolvers.

use async_graphql::{Context, ErrorExtensions, Object, Result as GraphQLResult};
use std::sync::Arc;

use crate::engine::ConversationEngine;
use crate::ingest::RawMessage;
use crate::models::{Identity, OpenTicketInput, Ticket, TicketFilter, TicketPriority};
use crate::ConversationError;

impl ErrorExtensions for ConversationError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_, e| {
            e.set("code", self.code());
            e.set("status", i32::from(self.status_code()));
        })
    }
}

fn engine<'a>(ctx: &Context<'a>) -> GraphQLResult<&'a Arc<ConversationEngine>> {
    ctx.data::<Arc<ConversationEngine>>()
}

pub struct ConversationQueries;

#[Object(name = "Query", extends)]
impl ConversationQueries {
    /// Get a single support ticket by ID
    ///
    /// Note: Services should implement authorization checks before calling this
    async fn support_ticket(&self, ctx: &Context<'_>, id: String) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.get(&id).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Get the ticket tracking a chat-platform conversation
    async fn support_ticket_by_channel(&self, ctx: &Context<'_>, channel_ref: String) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.get_by_channel(&channel_ref).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// List support tickets, newest first
    async fn support_tickets(
        &self,
        ctx: &Context<'_>,
        filter: Option<TicketFilter>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> GraphQLResult<Vec<Ticket>> {
        let engine = engine(ctx)?;

        let tickets = engine
            .list(
                &filter.unwrap_or_default(),
                limit.unwrap_or(20).clamp(1, 100),
                offset.unwrap_or(0).max(0),
            )
            .await
            .map_err(|e| e.extend())?;

        Ok(tickets)
    }
}

pub struct ConversationMutations;

#[Object(name = "Mutation", extends)]
impl ConversationMutations {
    /// Open a ticket for a conversation channel
    ///
    /// Fails with OPEN_TICKET_EXISTS when the opener already has an open ticket
    async fn open_support_ticket(&self, ctx: &Context<'_>, input: OpenTicketInput) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.open_ticket(input.into()).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Post a dashboard message to a ticket
    ///
    /// Note: Services should provide the author from authenticated user context
    async fn post_ticket_message(
        &self,
        ctx: &Context<'_>,
        id: String,
        author: Identity,
        content: String,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let raw = RawMessage::from_api(author.id, author.display_name, content);
        let ticket = engine.ingest(&id, raw).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Assign a staff member to a ticket
    async fn assign_ticket_staff(
        &self,
        ctx: &Context<'_>,
        id: String,
        staff: Identity,
        actor: Identity,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.assign_staff(&id, staff, actor).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Assign a team to a ticket
    async fn assign_ticket_team(
        &self,
        ctx: &Context<'_>,
        id: String,
        team: Identity,
        actor: Identity,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.assign_team(&id, team, actor).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Add a tag to a ticket
    async fn add_ticket_tag(
        &self,
        ctx: &Context<'_>,
        id: String,
        tag: String,
        actor: Identity,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.add_tag(&id, tag, actor).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Set ticket priority (`low`, `medium` or `urgent`)
    async fn set_ticket_priority(
        &self,
        ctx: &Context<'_>,
        id: String,
        priority: String,
        actor: Identity,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let priority: TicketPriority = priority.parse().map_err(|e: ConversationError| e.extend())?;
        let ticket = engine.set_priority(&id, priority, actor).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }

    /// Close a ticket
    async fn close_ticket(
        &self,
        ctx: &Context<'_>,
        id: String,
        actor: Identity,
        reason: Option<String>,
    ) -> GraphQLResult<Ticket> {
        let engine = engine(ctx)?;

        let ticket = engine.close(&id, actor, reason).await.map_err(|e| e.extend())?;
        Ok(ticket)
    }
}
