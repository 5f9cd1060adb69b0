//! Socket lifecycle of one admitted client, from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use huddle_core::{Participant, SessionCode};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::coordinator::{HubError, HubHandle};
use super::heartbeat::{Beat, Heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL};

/// How long the final Close frame may take.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocket, Message>;

/// What an inbound frame means for the connection.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Relay to the session.
    Text(String),
    /// Ping or pong from the client.
    Alive,
    /// Client asked to close.
    Close,
    /// Non-UTF-8 binary.
    Ignore,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(text) => Inbound::Text(text.to_string()),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => Inbound::Text(text.to_owned()),
            Err(_) => Inbound::Ignore,
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Alive,
        Message::Close(_) => Inbound::Close,
    }
}

fn rejection_frame(err: &HubError) -> CloseFrame {
    let code = match err {
        HubError::AtCapacity { .. } => close_code::AGAIN,
        HubError::Closed => close_code::AWAY,
        HubError::InvalidState => close_code::ERROR,
    };
    CloseFrame {
        code,
        reason: err.to_string().into(),
    }
}

async fn send_frame(sink: &mut WsSink, msg: Message, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        res = sink.send(msg) => res.is_ok(),
    }
}

/// Run an authorized client's socket on two tasks: this one reads, a
/// spawned writer drains the queue and owns the heartbeat.
///
/// 1. Registers with the hub, which queues `connection.established`
/// 2. Writes queued frames, and a Ping on every heartbeat tick
/// 3. Relays inbound text and binary frames through the hub
/// 4. Drops the client once a heartbeat tick finds it silent too long
/// 5. Unregisters on disconnect, read error, write error or eviction
#[instrument(skip_all, fields(session = %code, user_id = %participant.user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    code: SessionCode,
    participant: Participant,
    hub: HubHandle,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(config.outbound_queue.max(1));
    let conn = Arc::new(ClientConnection::new(code, participant, tx, shutdown.child_token()));

    if let Err(err) = hub.register(Arc::clone(&conn)).await {
        warn!(error = %err, "connection refused by hub");
        let close = Message::Close(Some(rejection_frame(&err)));
        let _ = tokio::time::timeout(CLOSE_GRACE, ws_tx.send(close)).await;
        conn.mark_closed();
        return;
    }
    info!(conn_id = %conn.id, "client connected");

    let cancel = conn.cancel_token().clone();

    let writer = {
        let cancel = cancel.clone();
        let conn = Arc::clone(&conn);
        let interval = config.heartbeat_interval();
        let timeout = config.heartbeat_timeout();
        tokio::spawn(async move {
            let mut heartbeat = Heartbeat::new(interval, timeout);
            // The first tick fires at once and consumes the flag set at connect.
            let mut ping = tokio::time::interval(interval);
            ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        let text = Message::Text(frame.as_str().into());
                        if !send_frame(&mut ws_tx, text, &cancel).await {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if heartbeat.on_tick(&conn) == Beat::Dead {
                            warn!(
                                conn_id = %conn.id,
                                "client unresponsive for {timeout:?}, disconnecting"
                            );
                            break;
                        }
                        let frame = Message::Ping(Vec::new().into());
                        if !send_frame(&mut ws_tx, frame, &cancel).await {
                            break;
                        }
                    }
                }
            }
            let _ = tokio::time::timeout(CLOSE_GRACE, ws_tx.send(Message::Close(None))).await;
            cancel.cancel();
        })
    };

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(conn_id = %conn.id, error = %e, "read error");
                break;
            }
            None => break,
        };
        match classify(msg) {
            Inbound::Text(text) => {
                if hub.relay(&conn, &text).await.is_err() {
                    break;
                }
            }
            Inbound::Alive => conn.mark_alive(),
            Inbound::Close => {
                info!(conn_id = %conn.id, "client sent close frame");
                break;
            }
            Inbound::Ignore => {
                debug!(conn_id = %conn.id, "ignoring non-UTF-8 binary frame");
            }
        }
    }

    let _ = conn.begin_close();
    hub.unregister(&conn.id).await;
    cancel.cancel();
    let _ = writer.await;
    conn.mark_closed();

    info!(conn_id = %conn.id, dropped = conn.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
}
