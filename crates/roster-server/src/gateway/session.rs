//! Gateway session lifecycle — one connected client from upgrade through
//! disconnect.
//!
//! 1. Runs the authorization handshake (or skips it for pre-resolved tokens)
//! 2. Registers the connection and spawns the outbound writer + delivery loop
//! 3. Drains inbound frames, echoing valid JSON back verbatim
//! 4. On disconnect: cancels the per-connection token, unregisters, closes

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use roster_core::ids::ConnectionId;
use roster_core::protocol::{ServerFrame, CLOSE_NO_AUTH, REASON_NO_AUTH};
use roster_directory::{BotSubject, CredentialResolver};
use roster_events::EventLog;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::delivery::run_delivery_loop;
use super::handshake::Handshake;
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_AUTH_REJECTIONS_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Validate an inbound frame for the echo loop.
///
/// Returns the text to relay back when the frame is well-formed JSON, `None`
/// when it should be silently ignored.
pub fn echo_reply(text: &str) -> Option<String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(_) => Some(text.to_owned()),
        Err(_) => None,
    }
}

/// Run a gateway session for an upgraded socket.
///
/// `preauthorized` carries subjects resolved from upgrade-URL tokens; when
/// non-empty the credentials challenge is skipped.
#[instrument(skip_all, fields(conn_id = %connection_id))]
pub async fn run_gateway_session(
    ws: WebSocket,
    connection_id: ConnectionId,
    preauthorized: Vec<BotSubject>,
    registry: Arc<ConnectionRegistry>,
    events: Arc<EventLog>,
    resolver: Arc<dyn CredentialResolver>,
    config: ServerConfig,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    // ── Handshake, while this task still owns the sink ──
    let mut handshake = Handshake::new();
    let subjects = if preauthorized.is_empty() {
        let identity = ServerFrame::identity().to_json();
        if ws_tx.send(Message::Text(identity.into())).await.is_err() {
            return;
        }
        handshake.challenge_sent();

        let frame = tokio::time::timeout(
            config.handshake_timeout(),
            next_text_frame(&mut ws_rx),
        )
        .await
        .unwrap_or(None);

        match handshake
            .on_credentials(resolver.as_ref(), frame.as_deref())
            .await
        {
            Ok(subjects) => subjects,
            Err(rejection) => {
                info!(reason = %rejection, "handshake rejected");
                counter!(WS_AUTH_REJECTIONS_TOTAL).increment(1);
                reject(&mut ws_tx).await;
                return;
            }
        }
    } else {
        handshake.preauthorized(&preauthorized);
        preauthorized
    };

    // ── Authorized: build the connection and register it ──
    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(config.send_queue);
    let connection = Arc::new(ClientConnection::new(connection_id.clone(), send_tx));
    connection.authorize(subjects);

    let ready = ServerFrame::ready().to_json();
    if ws_tx.send(Message::Text(ready.into())).await.is_err() {
        return;
    }

    if let Err(e) = registry.register(Arc::clone(&connection)).await {
        // Invariant violation — close rather than serve a duplicate identity.
        warn!(error = %e, "refusing duplicate connection identity");
        let _ = ws_tx.close().await;
        return;
    }

    let connection_start = std::time::Instant::now();
    info!("client authorized");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    // One token governs every task of this connection; server shutdown
    // propagates through the parent.
    let cancel = shutdown.child_token();

    // Outbound writer: forwards queued frames, pings for liveness.
    let writer = tokio::spawn(run_writer(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        config.clone(),
        cancel.clone(),
    ));

    let delivery = tokio::spawn(run_delivery_loop(
        Arc::clone(&connection),
        Arc::clone(&events),
        config.delivery_tick(),
        cancel.clone(),
    ));

    // ── Inbound echo loop ──
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        match msg {
            Message::Text(text) => {
                connection.mark_alive();
                if let Some(reply) = echo_reply(&text) {
                    let _ = connection.send(Arc::new(reply));
                } else {
                    debug!("ignoring malformed inbound frame");
                }
            }
            Message::Binary(data) => {
                connection.mark_alive();
                if let Ok(text) = std::str::from_utf8(&data) {
                    if let Some(reply) = echo_reply(text) {
                        let _ = connection.send(Arc::new(reply));
                    }
                }
            }
            Message::Ping(_) | Message::Pong(_) => connection.mark_alive(),
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
        }
    }

    // ── Teardown ──
    let _ = connection.close();
    cancel.cancel();
    registry.unregister(&connection.id).await;

    info!("client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!("ws_connection_duration_seconds")
        .record(connection_start.elapsed().as_secs_f64());

    let _ = tokio::join!(writer, delivery);
}

/// Send the rejection frame and the auth-failure close code.
///
/// Both sends ignore errors: the peer may already be gone, and a rejection
/// must never raise.
async fn reject(ws_tx: &mut SplitSink<WebSocket, Message>) {
    let kill = ServerFrame::kill_conn().to_json();
    let _ = ws_tx.send(Message::Text(kill.into())).await;
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_NO_AUTH,
            reason: REASON_NO_AUTH.into(),
        })))
        .await;
}

/// Wait for the next inbound frame that carries text.
///
/// Control frames are skipped; a closed stream or a Close frame resolves to
/// `None`, which the handshake treats as missing credentials.
async fn next_text_frame(ws_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => return Some(text.to_string()),
            Message::Binary(data) => {
                if let Ok(text) = std::str::from_utf8(&data) {
                    return Some(text.to_owned());
                }
                return None;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return None,
        }
    }
    None
}

/// Outbound writer: drains the send queue, pings on an interval, and
/// disconnects clients that stop answering.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(config.ping_interval());
    // Skip the immediate first tick.
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = send_rx.recv() => {
                match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive()
                    && connection.last_pong_elapsed() > config.pong_timeout()
                {
                    warn!(conn_id = %connection.id, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
            () = cancel.cancelled() => break,
        }
    }

    let _ = connection.close();
    // Best-effort close frame; the peer may already be gone.
    let _ = ws_tx.send(Message::Close(None)).await;
    // Wake the session's inbound loop and the delivery loop.
    cancel.cancel();
}
