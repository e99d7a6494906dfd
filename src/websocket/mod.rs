//! WebSocket server for live feed snapshots and trade chat
//!
//! A client authenticates once with its access token, then subscribes to the
//! browse feed and to the chats of the trades it takes part in. Each
//! subscription is a forwarding task owned by the connection; unsubscribing
//! or disconnecting aborts the task, which releases the underlying change
//! subscription.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use futures_util::{SinkExt, StreamExt};

use crate::chat::{ChannelUpdate, Message};
use crate::listing::{FeedQuery, FeedView};
use crate::session::SessionContext;
use crate::state::AppState;

/// Registry of connected clients
#[derive(Clone, Default)]
pub struct WsState {
    pub clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub user_id: Option<Uuid>,
    pub feed: bool,
    pub trades: Vec<Uuid>,
}

/// Connection counts reported by the health check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WsStats {
    pub clients: usize,
    pub authenticated: usize,
    pub feed_subscribers: usize,
    pub trade_subscriptions: usize,
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Authenticate {
        access_token: String,
    },
    SubscribeFeed {
        #[serde(default)]
        search: Option<String>,
        #[serde(default)]
        category: Option<String>,
    },
    UnsubscribeFeed,
    SubscribeTrade {
        trade_id: Uuid,
    },
    UnsubscribeTrade {
        trade_id: Uuid,
    },
    SendMessage {
        trade_id: Uuid,
        content: String,
    },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    Authenticated { user_id: Uuid },
    Snapshot { feed: FeedView },
    History { trade_id: Uuid, messages: Vec<Message> },
    Message { message: Message },
    Sent { message: Message },
    /// The draft is handed back so the client can resubmit it
    SendFailed { trade_id: Uuid, draft: String, error: String },
    Unsubscribed { topic: String },
    Pong,
    Error { message: String },
}

impl WsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stats(&self) -> WsStats {
        let clients = self.clients.read().await;
        clients.values().fold(
            WsStats {
                clients: clients.len(),
                ..WsStats::default()
            },
            |mut stats, client| {
                stats.authenticated += usize::from(client.user_id.is_some());
                stats.feed_subscribers += usize::from(client.feed);
                stats.trade_subscriptions += client.trades.len();
                stats
            },
        )
    }

    async fn register_client(&self, client_id: Uuid) {
        self.clients.write().await.insert(
            client_id,
            ClientInfo {
                client_id,
                user_id: None,
                feed: false,
                trades: vec![],
            },
        );
    }

    async fn unregister_client(&self, client_id: &Uuid) {
        self.clients.write().await.remove(client_id);
        tracing::info!(client_id = %client_id, "Client disconnected");
    }

    async fn update_client(&self, client_id: &Uuid, update: impl FnOnce(&mut ClientInfo)) {
        if let Some(client) = self.clients.write().await.get_mut(client_id) {
            update(client);
        }
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection subscriptions
struct Connection {
    client_id: Uuid,
    state: AppState,
    out: mpsc::Sender<ServerMessage>,
    session: Option<SessionContext>,
    feed_task: Option<JoinHandle<()>>,
    trade_tasks: HashMap<Uuid, JoinHandle<()>>,
}

impl Connection {
    async fn reply(&self, message: ServerMessage) {
        // The writer is gone only when the socket is closing
        let _ = self.out.send(message).await;
    }

    async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Authenticate { access_token } => {
                match self.state.auth_service.authenticate(&access_token).await {
                    Ok(session) => {
                        let user_id = session.user_id();
                        self.set_session(session).await;
                        tracing::info!(
                            client_id = %self.client_id,
                            user_id = %user_id,
                            "Client authenticated"
                        );
                        self.reply(ServerMessage::Authenticated { user_id }).await;
                    }
                    Err(e) => {
                        self.reply(ServerMessage::Error {
                            message: e.to_string(),
                        })
                        .await;
                    }
                }
            }
            ClientMessage::SubscribeFeed { search, category } => {
                self.subscribe_feed(FeedQuery { search, category }).await;
            }
            ClientMessage::UnsubscribeFeed => {
                if let Some(task) = self.feed_task.take() {
                    task.abort();
                }
                self.state
                    .ws_state
                    .update_client(&self.client_id, |c| c.feed = false)
                    .await;
                self.reply(ServerMessage::Unsubscribed {
                    topic: "feed".to_string(),
                })
                .await;
            }
            ClientMessage::SubscribeTrade { trade_id } => self.subscribe_trade(trade_id).await,
            ClientMessage::UnsubscribeTrade { trade_id } => {
                if let Some(task) = self.trade_tasks.remove(&trade_id) {
                    task.abort();
                }
                self.state
                    .ws_state
                    .update_client(&self.client_id, |c| c.trades.retain(|id| *id != trade_id))
                    .await;
                self.reply(ServerMessage::Unsubscribed {
                    topic: format!("trade:{}", trade_id),
                })
                .await;
            }
            ClientMessage::SendMessage { trade_id, content } => {
                let Some(session) = self.session.clone() else {
                    self.reply(ServerMessage::SendFailed {
                        trade_id,
                        draft: content,
                        error: "Not authenticated".to_string(),
                    })
                    .await;
                    return;
                };
                match self.state.chat_service.send(&session, trade_id, &content).await {
                    Ok(message) => self.reply(ServerMessage::Sent { message }).await,
                    Err(e) => {
                        tracing::debug!(trade_id = %trade_id, error = %e, "Message not sent");
                        self.reply(ServerMessage::SendFailed {
                            trade_id,
                            draft: content,
                            error: e.to_string(),
                        })
                        .await;
                    }
                }
            }
            ClientMessage::Ping => {
                tracing::debug!(client_id = %self.client_id, "Ping");
                self.reply(ServerMessage::Pong).await;
            }
        }
    }

    /// Install a new session. Chat subscriptions belong to the identity that
    /// opened them, so they are dropped when the identity changes.
    async fn set_session(&mut self, session: SessionContext) {
        let user_id = session.user_id();
        let previous = self.session.replace(session).map(|s| s.user_id());

        if previous.is_some_and(|id| id != user_id) {
            let dropped: Vec<Uuid> = self.trade_tasks.keys().copied().collect();
            for (_, task) in self.trade_tasks.drain() {
                task.abort();
            }
            for trade_id in dropped {
                self.reply(ServerMessage::Unsubscribed {
                    topic: format!("trade:{}", trade_id),
                })
                .await;
            }
        }

        let trades: Vec<Uuid> = self.trade_tasks.keys().copied().collect();
        self.state
            .ws_state
            .update_client(&self.client_id, |c| {
                c.user_id = Some(user_id);
                c.trades = trades;
            })
            .await;
    }

    async fn subscribe_feed(&mut self, query: FeedQuery) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }

        let feed = self.state.feed.clone();
        let out = self.out.clone();
        let mut snapshots = feed.watch();
        self.feed_task = Some(tokio::spawn(async move {
            loop {
                snapshots.borrow_and_update();
                let view = feed.view(&query);
                if out.send(ServerMessage::Snapshot { feed: view }).await.is_err() {
                    break;
                }
                if snapshots.changed().await.is_err() {
                    break;
                }
            }
        }));

        self.state
            .ws_state
            .update_client(&self.client_id, |c| c.feed = true)
            .await;
    }

    async fn subscribe_trade(&mut self, trade_id: Uuid) {
        let Some(session) = self.session.clone() else {
            self.reply(ServerMessage::Error {
                message: "Authenticate before subscribing to a trade".to_string(),
            })
            .await;
            return;
        };

        let mut channel = match self.state.chat_service.open_channel(&session, trade_id).await {
            Ok(channel) => channel,
            Err(e) => {
                self.reply(ServerMessage::Error {
                    message: e.to_string(),
                })
                .await;
                return;
            }
        };

        if let Some(previous) = self.trade_tasks.remove(&trade_id) {
            previous.abort();
        }

        let out = self.out.clone();
        let task = tokio::spawn(async move {
            let history = ServerMessage::History {
                trade_id,
                messages: channel.messages().to_vec(),
            };
            if out.send(history).await.is_err() {
                return;
            }
            while let Some(update) = channel.next().await {
                let message = match update {
                    ChannelUpdate::Appended(message) => ServerMessage::Message { message },
                    ChannelUpdate::Reloaded => ServerMessage::History {
                        trade_id,
                        messages: channel.messages().to_vec(),
                    },
                };
                if out.send(message).await.is_err() {
                    break;
                }
            }
            channel.close();
        });
        self.trade_tasks.insert(trade_id, task);

        self.state
            .ws_state
            .update_client(&self.client_id, |c| {
                if !c.trades.contains(&trade_id) {
                    c.trades.push(trade_id);
                }
            })
            .await;
    }

    fn close(&mut self) {
        if let Some(task) = self.feed_task.take() {
            task.abort();
        }
        for (_, task) in self.trade_tasks.drain() {
            task.abort();
        }
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    state.ws_state.register_client(client_id).await;
    tracing::info!(client_id = %client_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(32);

    // Single writer for everything this connection sends
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!("Failed to encode server message: {}", e),
            }
        }
    });

    let mut connection = Connection {
        client_id,
        state: state.clone(),
        out: out_tx,
        session: None,
        feed_task: None,
        trade_tasks: HashMap::new(),
    };

    let recv = async {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                WsMessage::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_message) => connection.handle(client_message).await,
                    Err(e) => {
                        connection
                            .reply(ServerMessage::Error {
                                message: format!("Invalid message: {}", e),
                            })
                            .await;
                    }
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = recv => {}
        _ = &mut send_task => {}
    }

    connection.close();
    send_task.abort();
    state.ws_state.unregister_client(&client_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Identity;
    use crate::storage::MemoryObjectStore;
    use crate::store::Store;

    fn connection(state: &AppState) -> (Connection, mpsc::Receiver<ServerMessage>) {
        let (out, rx) = mpsc::channel(8);
        let connection = Connection {
            client_id: Uuid::new_v4(),
            state: state.clone(),
            out,
            session: None,
            feed_task: None,
            trade_tasks: HashMap::new(),
        };
        (connection, rx)
    }

    fn session(id: Uuid) -> SessionContext {
        let identity = Identity {
            id,
            email: format!("{}@example.com", id.simple()),
        };
        SessionContext::new(identity, Uuid::new_v4().to_string())
    }

    fn test_state() -> AppState {
        AppState::new(
            &Config::default(),
            Store::memory(),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    #[tokio::test]
    async fn test_stats_track_subscriptions() {
        let ws = WsState::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        ws.register_client(a).await;
        ws.register_client(b).await;
        ws.update_client(&a, |c| {
            c.user_id = Some(Uuid::new_v4());
            c.feed = true;
            c.trades = vec![Uuid::new_v4(), Uuid::new_v4()];
        })
        .await;

        assert_eq!(
            ws.stats().await,
            WsStats {
                clients: 2,
                authenticated: 1,
                feed_subscribers: 1,
                trade_subscriptions: 2,
            }
        );

        ws.unregister_client(&a).await;
        assert_eq!(
            ws.stats().await,
            WsStats {
                clients: 1,
                ..WsStats::default()
            }
        );
    }

    #[tokio::test]
    async fn test_new_identity_drops_trade_subscriptions() {
        let state = test_state();
        let (mut conn, mut rx) = connection(&state);
        state.ws_state.register_client(conn.client_id).await;

        let alice = Uuid::new_v4();
        conn.set_session(session(alice)).await;

        let trade_id = Uuid::new_v4();
        let (alive, mut aborted) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await
        });
        conn.trade_tasks.insert(trade_id, task);
        state
            .ws_state
            .update_client(&conn.client_id, |c| c.trades.push(trade_id))
            .await;

        // Refreshing the same identity keeps the chat open
        conn.set_session(session(alice)).await;
        assert!(conn.trade_tasks.contains_key(&trade_id));
        assert_eq!(state.ws_state.stats().await.trade_subscriptions, 1);

        conn.set_session(session(Uuid::new_v4())).await;
        assert!(conn.trade_tasks.is_empty());
        assert_eq!(state.ws_state.stats().await.trade_subscriptions, 0);

        match rx.recv().await {
            Some(ServerMessage::Unsubscribed { topic }) => {
                assert_eq!(topic, format!("trade:{}", trade_id))
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The forwarding task was aborted, dropping its end of the channel
        assert!((&mut aborted).await.is_err());
    }

    #[test]
    fn test_client_message_format() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"SendMessage","trade_id":"0f8fad5b-d9cb-469f-a165-70867728950e","content":"hi"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMessage::SendMessage { content, .. } if content == "hi"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"SubscribeFeed"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SubscribeFeed {
                search: None,
                category: None
            }
        ));
    }

    #[test]
    fn test_send_failed_carries_draft() {
        let json = serde_json::to_value(ServerMessage::SendFailed {
            trade_id: Uuid::nil(),
            draft: "my offer".to_string(),
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "SendFailed");
        assert_eq!(json["draft"], "my offer");
    }
}
