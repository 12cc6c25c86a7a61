use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::state::{AppState, WsTimings};
use crate::ws::protocol::{ClientEvent, ProtocolError, ServerEvent};
use crate::ws::{new_connection_id, EventSender};

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, encodes router events and forwards control frames
/// - Ping task: keepalive, signals the reader when a pong is overdue
/// - Reader loop (this task): decodes frames and hands them to the event router
///
/// The router holds the event sender for the lifetime of the session and is
/// told about the close exactly once, after the reader loop ends.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let connection_id = new_connection_id();
    let (ws_sender, mut ws_receiver) = socket.split();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    state
        .router
        .connect(connection_id.clone(), Some(user_id.clone()), event_tx.clone());

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, event_rx, control_rx));

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();
    let ping_handle = tokio::spawn(ping_task(state.ws, control_tx.clone(), pong_rx, dead_tx));

    loop {
        let next = tokio::select! {
            next = ws_receiver.next() => next,
            _ = &mut dead_rx => {
                tracing::info!(connection_id = %connection_id, "Closing unresponsive connection");
                break;
            }
        };

        match next {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    handle_text(&state, &connection_id, &event_tx, text.as_str());
                }
                Message::Binary(data) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        len = data.len(),
                        "Ignoring binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = control_tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        connection_id = %connection_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(connection_id = %connection_id, "WebSocket stream ended");
                break;
            }
        }
    }

    ping_handle.abort();
    state.router.disconnect(connection_id.clone());

    // Let a pending close frame reach the socket before the writer goes away.
    drop(event_tx);
    drop(control_tx);
    if timeout(state.ws.pong_timeout, writer_handle).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Writer did not finish in time");
    }

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket actor stopped"
    );
}

fn handle_text(state: &AppState, connection_id: &str, event_tx: &EventSender, text: &str) {
    match ClientEvent::decode(text) {
        Ok(event) => {
            tracing::trace!(
                connection_id = %connection_id,
                event = event.name(),
                "Inbound event"
            );
            state.router.inbound(connection_id.to_string(), event);
        }
        Err(e) => {
            tracing::debug!(
                connection_id = %connection_id,
                error = %e,
                "Malformed frame: {}",
                text.chars().take(100).collect::<String>()
            );
            send_protocol_error(event_tx, &format!("Malformed event: {}", e));
        }
    }
}

fn send_protocol_error(event_tx: &EventSender, message: &str) {
    let _ = event_tx.send(ServerEvent::Error(ProtocolError {
        message: message.to_string(),
    }));
}

/// Sends periodic pings and fires `dead` when a pong does not arrive in time.
async fn ping_task(
    timings: WsTimings,
    control_tx: mpsc::UnboundedSender<Message>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    dead: oneshot::Sender<()>,
) {
    let mut ping_timer = interval(timings.ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        if control_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died
            break;
        }

        match timeout(timings.pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                let _ = control_tx.send(Message::Close(Some(CloseFrame {
                    code: 1001,
                    reason: "Pong timeout".into(),
                })));
                let _ = dead.send(());
                break;
            }
        }
    }
}

/// Writer task: encodes router events and forwards control frames to the WebSocket sink.
/// Ends when both queues are closed or the socket breaks.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    let mut events_open = true;
    let mut control_open = true;

    while events_open || control_open {
        let msg = tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(event) => match event.encode() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                },
                None => {
                    events_open = false;
                    continue;
                }
            },
            frame = control.recv(), if control_open => match frame {
                Some(frame) => frame,
                None => {
                    control_open = false;
                    continue;
                }
            },
        };

        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }

    let _ = ws_sender.close().await;
}
