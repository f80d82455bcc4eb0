//! WebSocket progress feed.
//!
//! A connection may join any number of sessions. Each join registers one
//! subscriber handle on the progress channel and a task forwarding its events
//! to the socket; leaving or disconnecting removes both.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use playground_core::{ProgressChannel, SessionId, traits::SubscriberId};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    protocol::{ClientMessage, ServerMessage},
    state::AppState,
};

struct Membership {
    subscriber: SubscriberId,
    forward: JoinHandle<()>,
}

impl Membership {
    fn is_live(&self, channel: &ProgressChannel, session_id: SessionId) -> bool {
        !self.forward.is_finished() && channel.is_subscribed(session_id, self.subscriber)
    }
}

/// Per-connection session memberships.
pub struct Connection {
    channel: Arc<ProgressChannel>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    joined: HashMap<SessionId, Membership>,
}

impl Connection {
    /// Create a connection whose replies and events go to `outbound`.
    #[must_use]
    pub fn new(
        channel: Arc<ProgressChannel>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            channel,
            outbound,
            joined: HashMap::new(),
        }
    }

    /// Handle one client message. Must be called within a Tokio runtime.
    pub fn handle(&mut self, message: ClientMessage) {
        self.prune();
        match message {
            ClientMessage::JoinTrainingSession { session_id } => self.join(session_id),
            ClientMessage::LeaveTrainingSession { session_id } => {
                self.leave(session_id);
                self.reply(ServerMessage::Left { session_id });
            }
            ClientMessage::PauseTraining { session_id } => {
                tracing::warn!(session_id = %session_id, "Pause requested but not supported");
                self.reply(ServerMessage::Error {
                    message: "Pausing training is not supported".to_string(),
                });
            }
            ClientMessage::StopTraining { session_id } => {
                tracing::warn!(session_id = %session_id, "Stop requested but not supported");
                self.reply(ServerMessage::Error {
                    message: "Stopping training is not supported".to_string(),
                });
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
        }
    }

    /// Sessions this connection is currently joined to.
    #[must_use]
    pub fn joined(&self) -> Vec<SessionId> {
        self.joined.keys().copied().collect()
    }

    fn reply(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    /// Forget memberships whose session has ended.
    ///
    /// The forwarding task is left to drain events already queued for it.
    fn prune(&mut self) {
        let channel = &self.channel;
        self.joined
            .retain(|session_id, membership| membership.is_live(channel, *session_id));
    }

    fn join(&mut self, session_id: SessionId) {
        if let Some(membership) = self.joined.get(&session_id) {
            if membership.is_live(&self.channel, session_id) {
                self.reply(ServerMessage::Joined { session_id });
                return;
            }
            self.joined.remove(&session_id);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let Some(subscriber) = self.channel.subscribe(session_id, tx) else {
            self.reply(ServerMessage::Error {
                message: format!("Training session {session_id} is not active"),
            });
            return;
        };
        tracing::debug!(session_id = %session_id, subscriber_id = %subscriber, "Client joined session");

        // Acknowledge before any forwarded event.
        self.reply(ServerMessage::Joined { session_id });

        let outbound = self.outbound.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if outbound
                    .send(ServerMessage::from_event(session_id, event))
                    .is_err()
                {
                    break;
                }
            }
        });
        self.joined.insert(
            session_id,
            Membership {
                subscriber,
                forward,
            },
        );
    }

    fn leave(&mut self, session_id: SessionId) {
        if let Some(membership) = self.joined.remove(&session_id) {
            self.channel
                .unsubscribe(session_id, membership.subscriber);
            membership.forward.abort();
            tracing::debug!(session_id = %session_id, "Client left session");
        }
    }

    /// Leave every joined session.
    pub fn close(&mut self) {
        let sessions: Vec<_> = self.joined.keys().copied().collect();
        for session_id in sessions {
            self.leave(session_id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut connection = Connection::new(Arc::clone(state.orchestrator.channel()), tx.clone());

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("WebSocket error: {e}");
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&msg) {
            Ok(client_msg) => connection.handle(client_msg),
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
            }
        }
    }

    tracing::debug!(sessions = connection.joined().len(), "WebSocket disconnected");
    connection.close();
    send_task.abort();
}
