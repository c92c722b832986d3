//! Per-socket session loop.
//!
//! Reads frames from one open progress socket, answers heartbeats,
//! forwards payloads to the [`ChannelHandler`], and writes queued
//! outbound messages, until the socket closes, a receive fails, or the
//! channel is cancelled.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::WsStream;
use crate::handler::ChannelHandler;
use crate::messages::{classify_frame, pong_frame, InboundFrame};
use crate::reconnect::CloseCause;

/// How long to wait for our close frame to be flushed on shutdown.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Signals that end a session from the outside.
pub(crate) struct SessionControl<'a> {
    pub cancel: &'a CancellationToken,
    pub force_reconnect: &'a Notify,
}

/// Drive one open socket until it ends and report why.
///
/// Outbound messages still queued from a previous session are dropped
/// first: they were accepted while the channel was open and must not be
/// replayed onto a new socket.
pub(crate) async fn run_session(
    ws_stream: WsStream,
    job_id: &str,
    handler: &dyn ChannelHandler,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    control: SessionControl<'_>,
) -> CloseCause {
    let mut stale = 0usize;
    while outbound.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        tracing::warn!(job_id, count = stale, "Dropping messages queued before reconnect");
    }

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            _ = control.cancel.cancelled() => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client closed".into(),
                };
                let close = sink.send(Message::Close(Some(frame)));
                if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, close).await.is_err() {
                    tracing::debug!(job_id, "Timed out sending close frame");
                }
                return CloseCause::Intentional;
            }

            _ = control.force_reconnect.notified() => {
                tracing::info!(job_id, "Forced reconnect, dropping socket");
                let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
                return CloseCause::Forced;
            }

            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::error!(job_id, error = %e, "WebSocket send error");
                    handler.on_error(job_id, &e.to_string());
                    return CloseCause::Transport(e.to_string());
                }
            }

            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_text_frame(&text, job_id, handler, &mut sink).await {
                            tracing::error!(job_id, error = %e, "Failed to answer heartbeat");
                            handler.on_error(job_id, &e.to_string());
                            return CloseCause::Transport(e.to_string());
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!(job_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(job_id, ?frame, "Progress socket closed by server");
                        return CloseCause::from_frame(frame.as_ref());
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(job_id, error = %e, "WebSocket receive error");
                        handler.on_error(job_id, &e.to_string());
                        return CloseCause::Transport(e.to_string());
                    }
                    None => {
                        tracing::info!(job_id, "Progress socket stream exhausted");
                        return CloseCause::NoStatus;
                    }
                }
            }
        }
    }
}

/// Dispatch a single text frame.
///
/// Only a failed pong write is an error; undecodable frames are logged
/// and dropped so that one bad frame cannot end the session.
async fn handle_text_frame<S>(
    text: &str,
    job_id: &str,
    handler: &dyn ChannelHandler,
    sink: &mut S,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    match classify_frame(text) {
        Ok(InboundFrame::Ping) => {
            tracing::trace!(job_id, "Heartbeat ping, sending pong");
            sink.send(Message::Text(pong_frame())).await?;
        }
        Ok(InboundFrame::Connected(data)) => {
            tracing::debug!(job_id, %data, "Server acknowledged connection");
        }
        Ok(InboundFrame::Payload(value)) => {
            handler.on_message(job_id, value);
        }
        Err(e) => {
            tracing::warn!(
                job_id,
                error = %e,
                raw_message = %text,
                "Failed to decode progress frame",
            );
        }
    }
    Ok(())
}
