use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use spdlog::prelude::{error, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::client::ClientSession;
use super::error::UnregisterReason;
use super::manager::SessionManager;

const READ_DEADLINE: Duration = Duration::from_secs(60);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// `9/10 * pongWait` with `pongWait = 60s`.
const PING_PERIOD: Duration = Duration::from_secs(54);
const FAUCET_PERIOD: Duration = Duration::from_secs(2);

/// Reads application messages from the browser, gated by a pacing token per
/// message. Protocol-level ping/pong frames are consumed below the
/// application read: they refresh the deadline (any read resets the
/// `timeout` on the next loop iteration) without spending a pacing token or
/// counting as a forwarded message.
pub async fn read_pump(
    manager: Arc<SessionManager>,
    session: Arc<ClientSession>,
    mut ws_rx: SplitStream<WebSocket>,
    mut pacing_rx: mpsc::Receiver<()>,
) {
    loop {
        let frame = match timeout(READ_DEADLINE, ws_rx.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                warn!(
                    "websocket read error: connection_id={} error={}",
                    session.connection_id, err
                );
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    "websocket read deadline elapsed: connection_id={}",
                    session.connection_id
                );
                break;
            }
        };

        let payload = match frame {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };

        if pacing_rx.recv().await.is_none() {
            break;
        }

        manager.reclaim(&session);

        let write_result = match session.upstream() {
            Some(upstream) => upstream.write_to_engine(&payload).await,
            None => break,
        };

        if let Err(err) = write_result {
            error!(
                "client message rejected: connection_id={} error={}",
                session.connection_id, err
            );
            break;
        }

        manager.put_idle(&session);
    }

    // Every loop exit — read error, deadline, close frame, closed pacing
    // channel, or a dead upstream link — ends the session the same way.
    manager.request_unregister(session.clone(), UnregisterReason::ClientSideError);
}

/// Dequeues outbound frames and writes them one at a time, deadlined at 10
/// seconds; also emits a transport-level ping every `PING_PERIOD` to keep
/// the browser's connection alive between application messages.
pub async fn write_pump(
    manager: Arc<SessionManager>,
    session: Arc<ClientSession>,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut ws_tx: SplitSink<WebSocket, Message>,
) {
    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            maybe_message = outbound_rx.recv() => {
                let message = match maybe_message {
                    Some(message) => message,
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                };

                match timeout(WRITE_DEADLINE, ws_tx.send(message)).await {
                    Ok(Ok(())) => {}
                    _ => break,
                }

                manager.put_idle(&session);
            }
            _ = ping_interval.tick() => {
                if timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new()))).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Emits a pacing token every two seconds, dropping it if the channel is
/// already full (bursts beyond capacity 3 simply don't get extra tokens).
/// Exits as soon as the session's `done` signal fires.
pub async fn token_faucet(session: Arc<ClientSession>, pacing_tx: mpsc::Sender<()>) {
    let mut ticker = tokio::time::interval(FAUCET_PERIOD);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = pacing_tx.try_send(());
            }
            _ = session.done_signal().notified() => {
                break;
            }
        }
    }
}
