//! Fan-out dispatcher.
//!
//! `dispatch` persists first and only then looks up the room's live members,
//! so no connection ever sees an envelope that was not durably recorded. Live
//! delivery is best effort and at most once; members that are offline or
//! whose channel has closed catch up through history.

use std::sync::Arc;

use linkroom_proto::event::{DeliveredMessage, ServerEvent};
use linkroom_proto::message::{Envelope, UserId};

use crate::directory::{UserDirectory, profile_or_placeholder};
use crate::presence::{ConnectionId, PresenceRegistry};
use crate::sink::{DurableSink, SinkError};
use crate::validate::EnvelopeDraft;

/// What happened to one live member during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the connection's writer.
    Delivered,
    /// The connection that submitted the message.
    SkippedSelf,
    /// The connection's writer had already gone away.
    Closed,
}

/// Per-connection entry of a [`DeliveryReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Member connection.
    pub connection_id: ConnectionId,
    /// User behind the connection.
    pub user_id: UserId,
    /// Result of the push.
    pub outcome: DeliveryOutcome,
}

/// Result of a successful dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// The persisted envelope.
    pub envelope: Envelope,
    /// One entry per live member at fan-out time.
    pub deliveries: Vec<Delivery>,
}

impl DeliveryReport {
    /// Number of connections the envelope was pushed to.
    #[must_use]
    pub fn delivered_count(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|d| d.outcome == DeliveryOutcome::Delivered)
            .count()
    }
}

/// Errors from [`Dispatcher::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The durable sink rejected the write; nothing was delivered.
    #[error("failed to persist message: {0}")]
    PersistenceFailed(#[from] SinkError),
}

/// Persists envelopes and fans them out to live room members.
#[derive(Clone)]
pub struct Dispatcher {
    presence: Arc<PresenceRegistry>,
    sink: Arc<dyn DurableSink>,
    directory: Arc<dyn UserDirectory>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given collaborators.
    pub fn new(
        presence: Arc<PresenceRegistry>,
        sink: Arc<dyn DurableSink>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            presence,
            sink,
            directory,
        }
    }

    /// Persists `draft`, then pushes it to every live member of its room
    /// except `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::PersistenceFailed`] if the sink fails. No
    /// member receives anything in that case.
    pub async fn dispatch(
        &self,
        draft: EnvelopeDraft,
        origin: Option<ConnectionId>,
    ) -> Result<DeliveryReport, DispatchError> {
        let room = draft.room().clone();
        let envelope = self.sink.persist(draft).await.inspect_err(|e| {
            tracing::warn!(room_id = %room, error = %e, "persistence failed, message not delivered");
        })?;

        let members = self.presence.live_members(&envelope.room_id);
        if members.is_empty() {
            tracing::debug!(room_id = %room, seq = envelope.seq, "no live members");
            return Ok(DeliveryReport {
                envelope,
                deliveries: Vec::new(),
            });
        }

        let sender = profile_or_placeholder(self.directory.as_ref(), &envelope.sender_id).await;
        let event = ServerEvent::ReceiveMessage(DeliveredMessage {
            envelope: envelope.clone(),
            sender,
        });

        let deliveries: Vec<Delivery> = members
            .into_iter()
            .map(|member| {
                let outcome = if Some(member.connection_id) == origin {
                    DeliveryOutcome::SkippedSelf
                } else if member.outbound.send(event.clone()).is_ok() {
                    DeliveryOutcome::Delivered
                } else {
                    DeliveryOutcome::Closed
                };
                Delivery {
                    connection_id: member.connection_id,
                    user_id: member.user_id,
                    outcome,
                }
            })
            .collect();

        let report = DeliveryReport {
            envelope,
            deliveries,
        };
        tracing::debug!(
            room_id = %room,
            seq = report.envelope.seq,
            delivered = report.delivered_count(),
            "message fanned out"
        );
        Ok(report)
    }
}
