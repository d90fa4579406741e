use crate::channel::{ChannelEvent, ChannelRoute, CloseReason, OUTBOUND_CAPACITY, Outbound};
use crate::value::Serializer;
use crate::worker::WorkerPool;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Drive one upgraded websocket through a channel handler.
///
/// The handler and every callback run on the worker pool. Events are
/// delivered one at a time, in arrival order.
pub(crate) async fn serve_channel(
    socket: WebSocket,
    route: Arc<ChannelRoute>,
    path: String,
    params: Vec<(String, String)>,
    pool: WorkerPool,
    serializer: Arc<dyn Serializer>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    // Single writer: one frame completes before the next starts.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let message = match frame {
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Binary(data) => Message::Binary(data),
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_tx.send(message).await.is_err() {
                debug!("Failed to send frame, connection closed");
                break;
            }
        }
    });

    let opened = {
        let route = route.clone();
        let tx = tx.clone();
        pool.execute(move || route.open(path, params, tx, serializer))
            .await
    };
    let session = match opened {
        Ok(Ok(session)) => Arc::new(session),
        Ok(Err(e)) => {
            warn!(error = %e, "Channel handler failed");
            let _ = tx.try_send(Outbound::Close);
            drop(tx);
            let _ = send_task.await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "Channel handler did not complete");
            let _ = tx.try_send(Outbound::Close);
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };
    info!(channel = %session.id(), path = %session.path(), "Channel opened");

    let mut closed = false;
    while let Some(result) = ws_rx.next().await {
        let event = match result {
            Ok(Message::Text(text)) => {
                trace!(channel = %session.id(), len = text.len(), "Received text frame");
                ChannelEvent::Text(text.as_str().to_owned())
            }
            Ok(Message::Binary(data)) => {
                trace!(channel = %session.id(), len = data.len(), "Received binary frame");
                ChannelEvent::Binary(vec![data])
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(frame)) => {
                closed = true;
                ChannelEvent::Close(frame.map(|f| CloseReason {
                    code: f.code,
                    reason: f.reason.as_str().to_owned(),
                }))
            }
            Err(e) => {
                warn!(channel = %session.id(), error = %e, "WebSocket error");
                ChannelEvent::Error(e.to_string())
            }
        };
        let terminal = matches!(event, ChannelEvent::Close(_) | ChannelEvent::Error(_));

        let target = session.clone();
        if let Err(e) = pool.execute(move || target.deliver(event)).await {
            warn!(channel = %session.id(), error = %e, "Channel callback panicked");
        }
        if terminal {
            break;
        }
    }

    if !closed {
        let target = session.clone();
        let _ = pool
            .execute(move || target.deliver(ChannelEvent::Close(None)))
            .await;
    }

    let _ = tx.try_send(Outbound::Close);
    drop(tx);
    drop(session);
    let _ = send_task.await;
    debug!("Channel closed");
}
