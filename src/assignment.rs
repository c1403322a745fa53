//! Staff and team claims
//!
//! Every function here is a pure transition on a ticket snapshot. The engine
//! runs them inside a compare-and-set mutation, so a claim and the audit
//! message that records it always commit together or not at all.

use chrono::{DateTime, Utc};

use crate::models::{Identity, Ticket};
use crate::store::Mutation;
use crate::{ConversationError, Result};

pub struct AssignmentResolver;

impl AssignmentResolver {
    /// Explicit assignment. Re-assigning the current staff member is a no-op;
    /// a different staff member overwrites the claim.
    pub fn assign_staff(
        ticket: &mut Ticket,
        staff: &Identity,
        actor: &Identity,
        at: DateTime<Utc>,
    ) -> Result<Mutation> {
        if ticket.is_closed() {
            return Err(ConversationError::closed(&ticket.id, "cannot assign closed ticket"));
        }
        validate_reference(staff, "staff")?;

        let content = match &ticket.assigned_staff {
            Some(current) if current.id == staff.id => return Ok(Mutation::Unchanged),
            Some(current) => format!(
                "Ticket reassigned from {} to {} by {}",
                current.display_name, staff.display_name, actor.display_name
            ),
            None => format!(
                "Ticket assigned to {} by {}",
                staff.display_name, actor.display_name
            ),
        };

        ticket.assigned_staff = Some(staff.clone());
        ticket.push_system_message("assign", content, at);
        Ok(Mutation::Applied)
    }

    /// Claim on reply: only an unclaimed ticket is taken.
    ///
    /// Runs inside the ingest mutation, which appends exactly one message, so
    /// the claim is announced through the `Assigned` notification instead of
    /// an audit message.
    pub fn auto_claim(ticket: &mut Ticket, staff: &Identity) -> Mutation {
        if ticket.is_closed() || ticket.assigned_staff.is_some() || ticket.opener.id == staff.id {
            return Mutation::Unchanged;
        }

        ticket.assigned_staff = Some(staff.clone());
        Mutation::Applied
    }

    pub fn assign_team(
        ticket: &mut Ticket,
        team: &Identity,
        actor: &Identity,
        at: DateTime<Utc>,
    ) -> Result<Mutation> {
        if ticket.is_closed() {
            return Err(ConversationError::closed(&ticket.id, "cannot assign closed ticket"));
        }
        validate_reference(team, "team")?;

        let content = match &ticket.assigned_team {
            Some(current) if current.id == team.id => return Ok(Mutation::Unchanged),
            Some(current) => format!(
                "Ticket moved from team {} to team {} by {}",
                current.display_name, team.display_name, actor.display_name
            ),
            None => format!(
                "Ticket assigned to team {} by {}",
                team.display_name, actor.display_name
            ),
        };

        ticket.assigned_team = Some(team.clone());
        ticket.push_system_message("team", content, at);
        Ok(Mutation::Applied)
    }
}

fn validate_reference(target: &Identity, kind: &str) -> Result<()> {
    if target.id.trim().is_empty() {
        return Err(ConversationError::Validation(format!("{kind} id is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageType, NewTicket, TicketStatus};

    fn ticket() -> Ticket {
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

    fn system_messages(ticket: &Ticket) -> usize {
        ticket
            .messages
            .iter()
            .filter(|m| m.message_type == MessageType::System)
            .count()
    }

    #[test]
    fn assigning_same_staff_twice_is_idempotent() {
        let mut ticket = ticket();
        let bob = Identity::new("staff-1", "bob");
        let admin = Identity::new("admin", "admin");

        assert_eq!(
            AssignmentResolver::assign_staff(&mut ticket, &bob, &admin, Utc::now()).unwrap(),
            Mutation::Applied
        );
        assert_eq!(
            AssignmentResolver::assign_staff(&mut ticket, &bob, &admin, Utc::now()).unwrap(),
            Mutation::Unchanged
        );
        assert_eq!(system_messages(&ticket), 1);
        assert_eq!(ticket.messages[0].content, "Ticket assigned to bob by admin");
    }

    #[test]
    fn explicit_assignment_overwrites_with_reassignment_notice() {
        let mut ticket = ticket();
        let admin = Identity::new("admin", "admin");
        AssignmentResolver::assign_staff(&mut ticket, &Identity::new("staff-1", "bob"), &admin, Utc::now()).unwrap();
        AssignmentResolver::assign_staff(&mut ticket, &Identity::new("staff-2", "carol"), &admin, Utc::now()).unwrap();

        assert_eq!(ticket.assigned_staff.as_ref().map(|s| s.id.as_str()), Some("staff-2"));
        assert_eq!(ticket.messages[1].content, "Ticket reassigned from bob to carol by admin");
    }

    #[test]
    fn auto_claim_only_takes_unclaimed_tickets() {
        let mut ticket = ticket();
        let bob = Identity::new("staff-1", "bob");
        let carol = Identity::new("staff-2", "carol");

        assert_eq!(AssignmentResolver::auto_claim(&mut ticket, &bob), Mutation::Applied);
        assert_eq!(AssignmentResolver::auto_claim(&mut ticket, &carol), Mutation::Unchanged);
        assert_eq!(ticket.assigned_staff, Some(bob));
        assert!(ticket.messages.is_empty());
    }

    #[test]
    fn opener_never_claims_own_ticket() {
        let mut ticket = ticket();
        let opener = ticket.opener.clone();
        assert_eq!(AssignmentResolver::auto_claim(&mut ticket, &opener), Mutation::Unchanged);
        assert!(ticket.assigned_staff.is_none());
    }

    #[test]
    fn closed_ticket_rejects_assignment() {
        let mut ticket = ticket();
        ticket.status = TicketStatus::Closed;
        let result = AssignmentResolver::assign_team(
            &mut ticket,
            &Identity::new("team-1", "billing"),
            &Identity::new("admin", "admin"),
            Utc::now(),
        );
        assert!(matches!(result, Err(ConversationError::InvalidTransition { .. })));
        assert!(ticket.assigned_team.is_none());
    }

    #[test]
    fn blank_team_is_a_validation_error() {
        let mut ticket = ticket();
        let result = AssignmentResolver::assign_team(
            &mut ticket,
            &Identity::new(" ", "nobody"),
            &Identity::new("admin", "admin"),
            Utc::now(),
        );
        assert!(matches!(result, Err(ConversationError::Validation(_))));
    }
}
