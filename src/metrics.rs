//! Response-time metrics derived from the message stream

use crate::models::{Message, MessageType, Ticket};
use crate::store::Mutation;

pub struct MetricsTracker;

impl MetricsTracker {
    /// Fold a freshly appended message into the ticket's response metrics.
    ///
    /// Must run in the same mutation as the append: the first-response
    /// check-then-set is only race-free under the store's compare-and-set.
    pub fn record_reply(ticket: &mut Ticket, message: &Message) -> Mutation {
        if !Self::qualifies(ticket, message) {
            return Mutation::Unchanged;
        }

        match (ticket.first_response_time_ms, ticket.last_staff_reply_at) {
            (None, _) => {
                let elapsed = (message.timestamp - ticket.created_at).num_milliseconds().max(0);
                ticket.first_response_time_ms = Some(elapsed);
                ticket.last_staff_reply_at = Some(message.timestamp);
            }
            (Some(_), previous) => {
                // Replies can arrive out of order; negative deltas count as zero
                let since = previous.unwrap_or(ticket.created_at);
                let delta = (message.timestamp - since).num_milliseconds().max(0);
                ticket.response_count += 1;
                ticket.total_response_time_ms += delta;
                if previous.map_or(true, |p| message.timestamp > p) {
                    ticket.last_staff_reply_at = Some(message.timestamp);
                }
            }
        }

        Mutation::Applied
    }

    fn qualifies(ticket: &Ticket, message: &Message) -> bool {
        message.message_type == MessageType::Staff
            && message.author_id != ticket.opener.id
            && !ticket.is_closed()
    }
}
