use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::models::{Ticket, TicketFilter, TicketStatus};
use crate::store::{Mutation, Mutator, TicketStore};
use crate::{ConversationError, Result};

const OPEN_PER_OPENER_CONSTRAINT: &str = "support_conversations_one_open_per_opener";
const CHANNEL_CONSTRAINT: &str = "support_conversations_channel_ref_key";

#[derive(FromRow)]
struct TicketRow {
    document: Json<Ticket>,
    version: i64,
}

impl TicketRow {
    fn into_ticket(self) -> Ticket {
        let mut ticket = self.document.0;
        ticket.version = self.version;
        ticket
    }
}

/// PostgreSQL-backed [`TicketStore`]
///
/// The ticket document lives in a JSONB column next to the columns needed for
/// indexing and the compare-and-set `version`.
pub struct PgTicketStore {
    pool: PgPool,
}

impl PgTicketStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to migrate support conversations schema: {}", e);
                ConversationError::Database(e.into())
            })
    }

    async fn fetch(&self, id: &str) -> Result<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(
            "SELECT document, version FROM support_conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ConversationError::NotFound(id.to_string()),
            _ => {
                tracing::error!("Failed to fetch support conversation: {}", e);
                ConversationError::Database(e)
            }
        })?;

        Ok(row.into_ticket())
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn get(&self, id: &str) -> Result<Ticket> {
        self.fetch(id).await
    }

    async fn get_by_channel(&self, channel_ref: &str) -> Result<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(
            "SELECT document, version FROM support_conversations WHERE channel_ref = $1",
        )
        .bind(channel_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => ConversationError::ChannelNotFound(channel_ref.to_string()),
            _ => {
                tracing::error!("Failed to fetch support conversation by channel: {}", e);
                ConversationError::Database(e)
            }
        })?;

        Ok(row.into_ticket())
    }

    async fn list(&self, filter: &TicketFilter, limit: i64, offset: i64) -> Result<Vec<Ticket>> {
        let mut query = String::from(
            "SELECT document, version FROM support_conversations WHERE TRUE"
        );
        let mut params_count = 0;

        if filter.status.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND status = ${}", params_count));
        }

        if filter.priority.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND document->>'priority' = ${}", params_count));
        }

        if filter.assigned_staff_id.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND document->'assigned_staff'->>'id' = ${}", params_count));
        }

        if filter.assigned_team_id.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND document->'assigned_team'->>'id' = ${}", params_count));
        }

        if filter.opener_id.is_some() {
            params_count += 1;
            query.push_str(&format!(" AND opener_id = ${}", params_count));
        }

        query.push_str(" ORDER BY created_at DESC, id DESC");
        query.push_str(&format!(" LIMIT ${} OFFSET ${}", params_count + 1, params_count + 2));

        let mut q = sqlx::query_as::<_, TicketRow>(&query);

        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            q = q.bind(priority.as_str());
        }
        if let Some(staff_id) = &filter.assigned_staff_id {
            q = q.bind(staff_id);
        }
        if let Some(team_id) = &filter.assigned_team_id {
            q = q.bind(team_id);
        }
        if let Some(opener_id) = &filter.opener_id {
            q = q.bind(opener_id);
        }

        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("list", e))?;

        Ok(rows.into_iter().map(TicketRow::into_ticket).collect())
    }

    async fn create(&self, mut ticket: Ticket) -> Result<Ticket> {
        ticket.version = 1;

        sqlx::query(
            r#"
            INSERT INTO support_conversations (
                id, channel_ref, opener_id, status, version, document, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.channel_ref)
        .bind(&ticket.opener.id)
        .bind(ticket.status.as_str())
        .bind(ticket.version)
        .bind(Json(&ticket))
        .bind(ticket.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &ticket))?;

        Ok(ticket)
    }

    async fn conditional_update(
        &self,
        id: &str,
        expected_version: i64,
        mutate: &Mutator<'_>,
    ) -> Result<Ticket> {
        let current = self.fetch(id).await?;
        if current.version != expected_version {
            return Err(ConversationError::VersionConflict {
                ticket_id: id.to_string(),
                expected: expected_version,
            });
        }

        let mut next = current.clone();
        if mutate(&mut next)? == Mutation::Unchanged {
            return Ok(current);
        }
        next.version = expected_version + 1;

        let result = sqlx::query(
            r#"
            UPDATE support_conversations SET
                status = $3,
                version = $4,
                document = $5,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(next.status.as_str())
        .bind(next.version)
        .bind(Json(&next))
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(ConversationError::VersionConflict {
                ticket_id: id.to_string(),
                expected: expected_version,
            });
        }

        Ok(next)
    }
}

fn store_error(action: &str, e: sqlx::Error) -> ConversationError {
    tracing::error!("Failed to {} support conversations: {}", action, e);
    ConversationError::Database(e)
}

fn map_insert_error(e: sqlx::Error, ticket: &Ticket) -> ConversationError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return unique_violation_error(db_err.constraint(), ticket);
        }
    }

    tracing::error!("Failed to create support conversation: {}", e);
    ConversationError::Database(e)
}

fn unique_violation_error(constraint: Option<&str>, ticket: &Ticket) -> ConversationError {
    match constraint {
        Some(OPEN_PER_OPENER_CONSTRAINT) if ticket.status == TicketStatus::Open => {
            ConversationError::OpenTicketExists {
                opener_id: ticket.opener.id.clone(),
            }
        }
        Some(CHANNEL_CONSTRAINT) => ConversationError::AlreadyExists(ticket.channel_ref.clone()),
        _ => ConversationError::AlreadyExists(ticket.id.clone()),
    }
}
