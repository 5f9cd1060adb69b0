//! The connection hub: one task that owns every live connection.
//!
//! Everything that touches the connection set goes through the mailbox, so
//! the set needs no lock and events reach a session in the order the loop
//! processed them. Delivery is `try_send` only. A connection whose queue is
//! full is dropped on the spot and its socket torn down.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use huddle_core::{ConnectionId, Participant, SessionCode};
use metrics::{counter, gauge};
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Delivery};
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_EVICTIONS_TOTAL, WS_REJECTIONS_TOTAL,
};
use crate::rpc::types::RpcEvent;

/// Mailbox depth between callers and the hub loop.
pub const HUB_MAILBOX_CAPACITY: usize = 1024;

/// Sent to a connection once it is registered.
pub const EVENT_CONNECTION_ESTABLISHED: &str = "connection.established";
/// Sent to the rest of a session when someone connects.
pub const EVENT_PARTICIPANT_JOINED: &str = "participant.joined";
/// Sent to the rest of a session when someone disconnects or is evicted.
pub const EVENT_PARTICIPANT_LEFT: &str = "participant.left";
/// Inbound frame relayed to the other participants.
pub const EVENT_SESSION_MESSAGE: &str = "session.message";

/// Hub failures visible to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// `max_connections` reached.
    #[error("hub at capacity ({max} connections)")]
    AtCapacity {
        /// Configured cap.
        max: usize,
    },
    /// The hub loop has stopped.
    #[error("hub is not running")]
    Closed,
    /// Register called on a connection that is not pending.
    #[error("connection is not pending")]
    InvalidState,
}

/// Point-in-time counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registered connections.
    pub connections: usize,
    /// Sessions with at least one registered connection.
    pub sessions: usize,
}

enum HubCommand {
    Register {
        conn: Arc<ClientConnection>,
        ack: oneshot::Sender<Result<(), HubError>>,
    },
    Unregister {
        id: ConnectionId,
    },
    Relay {
        from: ConnectionId,
        frame: Arc<String>,
    },
    Broadcast {
        code: SessionCode,
        frame: Arc<String>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cloneable mailbox handle.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Admit a pending connection. On success `connection.established` is
    /// already queued for it.
    pub async fn register(&self, conn: Arc<ClientConnection>) -> Result<(), HubError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Register { conn, ack })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a connection. Unknown ids are ignored.
    pub async fn unregister(&self, id: &ConnectionId) {
        let _ = self
            .tx
            .send(HubCommand::Unregister { id: id.clone() })
            .await;
    }

    /// Fan an inbound frame out to the sender's session, sender excluded.
    pub async fn relay(&self, from: &ClientConnection, payload: &str) -> Result<(), HubError> {
        let data = relay_data(&from.participant, payload);
        let event = RpcEvent::new(EVENT_SESSION_MESSAGE, Some(from.code.to_string()), Some(data));
        let Some(frame) = event.to_frame() else {
            return Ok(());
        };
        self.tx
            .send(HubCommand::Relay {
                from: from.id.clone(),
                frame: Arc::new(frame),
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Push a server event to every connection of a session.
    pub async fn broadcast(&self, code: &SessionCode, event: &RpcEvent) -> Result<(), HubError> {
        let Some(frame) = event.to_frame() else {
            return Ok(());
        };
        self.tx
            .send(HubCommand::Broadcast {
                code: code.clone(),
                frame: Arc::new(frame),
            })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Current counts.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::Stats { reply })
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// Spawns and owns the hub loop.
pub struct Hub {
    connections: HashMap<ConnectionId, Arc<ClientConnection>>,
    sessions: HashMap<SessionCode, HashSet<ConnectionId>>,
    max_connections: usize,
}

impl Hub {
    /// Start the hub. It runs until `shutdown` fires or every handle is gone.
    pub fn spawn(
        max_connections: usize,
        shutdown: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(HUB_MAILBOX_CAPACITY);
        let hub = Self {
            connections: HashMap::new(),
            sessions: HashMap::new(),
            max_connections,
        };
        let handle = tokio::spawn(hub.run(rx, shutdown));
        (HubHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>, shutdown: CancellationToken) {
        info!(max_connections = self.max_connections, "connection hub started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
            }
        }
        self.close_all();
        info!("connection hub stopped");
    }

    fn handle(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { conn, ack } => {
                let result = self.register(conn);
                let _ = ack.send(result);
            }
            HubCommand::Unregister { id } => {
                self.drain_removals(VecDeque::from([id]));
            }
            HubCommand::Relay { from, frame } => {
                let Some(code) = self.connections.get(&from).map(|c| c.code.clone()) else {
                    debug!(conn_id = %from, "relay from unregistered connection dropped");
                    return;
                };
                self.publish(&code, &frame, Some(&from));
            }
            HubCommand::Broadcast { code, frame } => {
                self.publish(&code, &frame, None);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, conn: Arc<ClientConnection>) -> Result<(), HubError> {
        if self.connections.len() >= self.max_connections {
            counter!(WS_REJECTIONS_TOTAL, "reason" => "capacity").increment(1);
            warn!(
                conn_id = %conn.id,
                max = self.max_connections,
                "hub at capacity, rejecting connection"
            );
            return Err(HubError::AtCapacity {
                max: self.max_connections,
            });
        }
        if !conn.mark_registered() {
            return Err(HubError::InvalidState);
        }

        let _ = self.connections.insert(conn.id.clone(), Arc::clone(&conn));
        let _ = self
            .sessions
            .entry(conn.code.clone())
            .or_default()
            .insert(conn.id.clone());
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        self.record_active();
        info!(
            conn_id = %conn.id,
            session = %conn.code,
            user_id = %conn.participant.user_id,
            role = ?conn.participant.role,
            "connection registered"
        );

        let mut pending = VecDeque::new();
        if let Some(frame) = established_frame(&conn) {
            self.deliver_to(&conn, &Arc::new(frame), &mut pending);
        }
        if let Some(frame) = participant_frame(EVENT_PARTICIPANT_JOINED, &conn) {
            self.deliver(&conn.code, &Arc::new(frame), Some(&conn.id), &mut pending);
        }
        self.drain_removals(pending);
        Ok(())
    }

    fn publish(&mut self, code: &SessionCode, frame: &Arc<String>, except: Option<&ConnectionId>) {
        let mut pending = VecDeque::new();
        self.deliver(code, frame, except, &mut pending);
        self.drain_removals(pending);
    }

    fn deliver(
        &self,
        code: &SessionCode,
        frame: &Arc<String>,
        except: Option<&ConnectionId>,
        pending: &mut VecDeque<ConnectionId>,
    ) {
        let Some(members) = self.sessions.get(code) else {
            return;
        };
        for id in members {
            if except == Some(id) {
                continue;
            }
            if let Some(conn) = self.connections.get(id) {
                self.deliver_to(conn, frame, pending);
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn deliver_to(
        &self,
        conn: &ClientConnection,
        frame: &Arc<String>,
        pending: &mut VecDeque<ConnectionId>,
    ) {
        match conn.try_send(Arc::clone(frame)) {
            Delivery::Queued => {}
            Delivery::Full => {
                counter!(WS_EVICTIONS_TOTAL).increment(1);
                warn!(
                    conn_id = %conn.id,
                    session = %conn.code,
                    dropped = conn.drop_count(),
                    "outbound queue full, evicting connection"
                );
                pending.push_back(conn.id.clone());
            }
            Delivery::Closed => {
                debug!(conn_id = %conn.id, "outbound queue closed, removing connection");
                pending.push_back(conn.id.clone());
            }
        }
    }

    /// Remove connections one at a time. Each removal announces
    /// `participant.left`, which can itself fill another queue.
    fn drain_removals(&mut self, mut pending: VecDeque<ConnectionId>) {
        while let Some(id) = pending.pop_front() {
            let Some(conn) = self.detach(&id) else {
                continue;
            };
            if let Some(frame) = participant_frame(EVENT_PARTICIPANT_LEFT, &conn) {
                self.deliver(&conn.code, &Arc::new(frame), None, &mut pending);
            }
        }
    }

    fn detach(&mut self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let conn = self.connections.remove(id)?;
        if let Some(members) = self.sessions.get_mut(&conn.code) {
            let _ = members.remove(id);
            if members.is_empty() {
                let _ = self.sessions.remove(&conn.code);
            }
        }
        let _ = conn.begin_close();
        conn.close_queue();
        conn.cancel();
        self.record_active();
        info!(conn_id = %conn.id, session = %conn.code, "connection removed");
        Some(conn)
    }

    fn close_all(&mut self) {
        for (_, conn) in self.connections.drain() {
            let _ = conn.begin_close();
            conn.close_queue();
            conn.cancel();
        }
        self.sessions.clear();
        self.record_active();
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            sessions: self.sessions.len(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_active(&self) {
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
    }
}

/// What other participants get to see about someone. The user id stays
/// private since it admits a connection.
fn public_view(participant: &Participant) -> Map<String, Value> {
    let mut view = Map::new();
    let _ = view.insert("role".into(), json!(participant.role));
    if let Some(name) = &participant.name {
        let _ = view.insert("name".into(), json!(name));
    }
    view
}

fn relay_data(participant: &Participant, payload: &str) -> Value {
    let mut data = public_view(participant);
    let payload = serde_json::from_str::<Value>(payload)
        .unwrap_or_else(|_| Value::String(payload.to_owned()));
    let _ = data.insert("payload".into(), payload);
    Value::Object(data)
}

fn established_frame(conn: &ClientConnection) -> Option<String> {
    RpcEvent::new(
        EVENT_CONNECTION_ESTABLISHED,
        Some(conn.code.to_string()),
        Some(json!({
            "connectionId": conn.id,
            "sessionCode": conn.code,
            "userId": conn.participant.user_id,
            "role": conn.participant.role,
        })),
    )
    .to_frame()
}

fn participant_frame(event_type: &str, conn: &ClientConnection) -> Option<String> {
    RpcEvent::new(
        event_type,
        Some(conn.code.to_string()),
        Some(Value::Object(public_view(&conn.participant))),
    )
    .to_frame()
}
