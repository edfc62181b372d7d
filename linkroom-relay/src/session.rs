//! WebSocket session handling.
//!
//! Each upgraded connection gets its own [`Session`], the only place the
//! connection's identity lives. The connection lifecycle:
//! 1. Register the connection with the presence registry (`Connecting`).
//! 2. `authenticate` binds it to a user.
//! 3. `joinChat` / `joinRoom` / `leaveRoom` manage room memberships.
//! 4. `sendMessage` validates, persists and fans out.
//! 5. On disconnect, whatever the cause, a drop guard removes the connection
//!    from every room.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use linkroom_proto::codec;
use linkroom_proto::event::{ClientEvent, ErrorKind, SendMessage, ServerEvent};
use linkroom_proto::message::UserId;
use linkroom_proto::room::RoomKey;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::presence::{ConnectionId, Outbound, PresenceError, PresenceRegistry};
use crate::state::RelayState;
use crate::validate::{ValidationError, validate};

/// How long the writer may keep flushing after the reader has finished.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the connection should stay open after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Close the connection.
    Close,
}

/// Removes the connection from the presence registry when dropped.
struct PresenceGuard {
    presence: Arc<PresenceRegistry>,
    connection_id: ConnectionId,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        let rooms = self.presence.disconnect(self.connection_id);
        tracing::info!(
            connection_id = %self.connection_id,
            rooms = rooms.len(),
            "connection removed from presence"
        );
    }
}

/// Connection-scoped context passed to every event handler.
pub struct Session {
    connection_id: ConnectionId,
    state: Arc<RelayState>,
    outbound: Outbound,
    user: Option<UserId>,
}

impl Session {
    /// Creates the context for a connection already registered under
    /// `connection_id` with `outbound` as its channel.
    pub const fn new(connection_id: ConnectionId, state: Arc<RelayState>, outbound: Outbound) -> Self {
        Self {
            connection_id,
            state,
            outbound,
            user: None,
        }
    }

    /// The connection this session serves.
    #[must_use]
    pub const fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The authenticated user, if any.
    #[must_use]
    pub const fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// Decodes and handles one text frame. Failures are reported to the
    /// client as `error` events.
    pub async fn handle_text(&mut self, text: &str) -> Flow {
        let event: ClientEvent = match codec::decode_bounded(text, self.state.max_payload_size()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "undecodable frame");
                self.fail(&RelayError::from(e));
                return Flow::Continue;
            }
        };

        match self.handle_event(event).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                self.fail(&e);
                if e.kind() == ErrorKind::AlreadyAuthenticated {
                    Flow::Close
                } else {
                    Flow::Continue
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) -> Result<(), RelayError> {
        if let ClientEvent::Authenticate { user_id } = event {
            return self.authenticate(user_id);
        }
        let user = self
            .user
            .clone()
            .ok_or(RelayError::Presence(PresenceError::NotAuthenticated))?;

        match event {
            ClientEvent::Authenticate { .. } => Ok(()),
            ClientEvent::JoinChat {
                user_id,
                other_user_id,
            } => {
                if let Some(claimed) = user_id
                    && claimed != user
                {
                    return Err(ValidationError::SenderMismatch {
                        claimed,
                        authenticated: user,
                    }
                    .into());
                }
                let room = self.state.direct_room(&user, &other_user_id)?;
                self.join(&user, room).await
            }
            ClientEvent::JoinRoom { room_id } => {
                let room = self.state.parse_room(&room_id)?;
                self.join(&user, room).await
            }
            ClientEvent::LeaveRoom { room_id } => {
                let room = self.state.parse_room(&room_id)?;
                let was_member = self.state.presence.leave_room(self.connection_id, &room);
                tracing::debug!(connection_id = %self.connection_id, room_id = %room, was_member, "left room");
                self.reply(ServerEvent::Left { room_id: room });
                Ok(())
            }
            ClientEvent::SendMessage(payload) => self.send_message(&user, payload).await,
        }
    }

    fn authenticate(&mut self, user_id: UserId) -> Result<(), RelayError> {
        if user_id.is_blank() {
            return Err(RelayError::InvalidArgument("userId must not be empty".into()));
        }
        self.state
            .presence
            .authenticate(self.connection_id, user_id.clone())?;
        tracing::info!(connection_id = %self.connection_id, user_id = %user_id, "connection authenticated");
        self.user = Some(user_id.clone());
        self.reply(ServerEvent::Authenticated { user_id });
        Ok(())
    }

    async fn join(&self, user: &UserId, room: RoomKey) -> Result<(), RelayError> {
        self.state.authorize_room(user, &room).await?;
        let newly = self.state.presence.join_room(self.connection_id, &room)?;
        tracing::debug!(connection_id = %self.connection_id, room_id = %room, newly, "joined room");
        self.reply(ServerEvent::Joined { room_id: room });
        Ok(())
    }

    async fn send_message(&self, user: &UserId, payload: SendMessage) -> Result<(), RelayError> {
        let draft = validate(user, payload, self.state.self_chat_policy())?;
        self.state.authorize_room(user, draft.room()).await?;

        // Runs on its own task so a disconnect mid-send cannot cancel
        // persistence or fan-out.
        let dispatcher = self.state.dispatcher.clone();
        let origin = self.connection_id;
        let report = tokio::spawn(async move { dispatcher.dispatch(draft, Some(origin)).await })
            .await
            .map_err(|e| RelayError::DispatchAborted(e.to_string()))??;

        self.reply(ServerEvent::MessageSent {
            message_id: report.envelope.id,
            room_id: report.envelope.room_id.clone(),
            delivered: report.delivered_count(),
        });
        Ok(())
    }

    fn fail(&self, error: &RelayError) {
        tracing::debug!(connection_id = %self.connection_id, error = %error, "request failed");
        self.reply(ServerEvent::error(error.kind(), error.to_string()));
    }

    fn reply(&self, event: ServerEvent) {
        // A closed channel means the writer is gone; the guard cleans up.
        let _ = self.outbound.send(event);
    }
}

/// Handles an upgraded WebSocket connection until either side closes it.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.presence.register(connection_id, tx.clone());
    let guard = PresenceGuard {
        presence: Arc::clone(&state.presence),
        connection_id,
    };
    tracing::info!(connection_id = %connection_id, "connection opened");

    // Spawn a writer task that encodes outbound events onto the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match codec::encode(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(connection_id = %connection_id, "WebSocket write failed");
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Reader loop: events from one connection are handled in order.
    let mut session = Session::new(connection_id, state, tx);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if session.handle_text(text.as_str()).await == Flow::Close {
                        tracing::info!(connection_id = %session.connection_id(), "closing connection");
                        break;
                    }
                }
                Message::Binary(_) => {
                    session.fail(&RelayError::InvalidArgument(
                        "binary frames are not supported".into(),
                    ));
                }
                Message::Close(_) => {
                    tracing::info!(connection_id = %session.connection_id(), "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            // Dropping the registry's sender lets the writer flush what is
            // queued and then close.
            drop(guard);
            if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut write_task).await.is_err() {
                write_task.abort();
            }
        }
        _ = &mut write_task => {
            read_task.abort();
            drop(guard);
        }
    }

    tracing::info!(connection_id = %connection_id, "connection closed");
}
