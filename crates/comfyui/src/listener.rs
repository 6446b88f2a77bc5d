//! Per-job event-stream listener.
//!
//! Runs as a background task next to the watcher's poll loop. It reads
//! frames from the ComfyUI WebSocket, turns them into
//! [`CompletionSignal`]s for one job, and publishes the first signal on a
//! [`watch`] channel. Connection problems never propagate: the listener
//! logs them and keeps reconnecting with backoff while the watcher polls.
//!
//! The task is owned by a [`ListenerHandle`]; dropping the handle cancels
//! and aborts the task, [`ListenerHandle::shutdown`] cancels and joins it.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, EventStream};
use crate::messages::{parse_message, CompletionSignal};
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Grace period for the close handshake when tearing down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on joining the task during shutdown.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// What one job's listener needs to know.
#[derive(Debug, Clone)]
pub struct ListenerTarget {
    pub client_id: String,
    pub job_id: String,
    pub target_nodes: Vec<String>,
}

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// A completion signal was published.
    Completed,
    /// The server closed the stream or a receive error occurred.
    Disconnected,
    /// The cancellation token fired.
    Cancelled,
}

/// Owner of a running listener task.
pub struct ListenerHandle {
    signal: watch::Receiver<Option<CompletionSignal>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    /// Spawn a listener for `target`. The task stops when `parent` is
    /// cancelled, when the handle is shut down or dropped, or after it has
    /// published a completion signal.
    pub fn spawn(
        client: ComfyUIClient,
        target: ListenerTarget,
        reconnect: ReconnectConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            run_listener(&client, &target, &reconnect, &tx, &task_cancel).await;
            tracing::debug!(job_id = %target.job_id, "Event listener exited");
        });

        Self {
            signal: rx,
            cancel,
            task: Some(task),
        }
    }

    /// A receiver for the completion signal.
    pub fn subscribe(&self) -> watch::Receiver<Option<CompletionSignal>> {
        self.signal.clone()
    }

    /// The signal published so far, if any.
    pub fn completion(&self) -> Option<CompletionSignal> {
        self.signal.borrow().clone()
    }

    /// Cancel the task and wait for it to release its connection.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, task).await.is_err() {
                tracing::warn!("Event listener did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Connect, process frames, reconnect on disconnect until completion or
/// cancellation.
async fn run_listener(
    client: &ComfyUIClient,
    target: &ListenerTarget,
    reconnect: &ReconnectConfig,
    tx: &watch::Sender<Option<CompletionSignal>>,
    cancel: &CancellationToken,
) {
    let mut pending = tokio::select! {
        _ = cancel.cancelled() => return,
        result = client.connect(&target.client_id) => match result {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(
                    job_id = %target.job_id,
                    error = %e,
                    "Event stream unavailable, relying on history polling",
                );
                None
            }
        },
    };

    loop {
        let conn = match pending.take() {
            Some(conn) => conn,
            None => match reconnect_loop(client, &target.client_id, reconnect, cancel).await {
                Some(conn) => conn,
                None => return,
            },
        };

        match process_messages(conn.ws_stream, target, tx, cancel).await {
            StreamEnd::Completed | StreamEnd::Cancelled => return,
            StreamEnd::Disconnected => {
                tracing::info!(job_id = %target.job_id, "Event stream lost before completion");
            }
        }
    }
}

/// Read frames until a completion signal, disconnect or cancellation.
///
/// The stream is closed before returning in every case.
pub async fn process_messages(
    mut ws_stream: EventStream,
    target: &ListenerTarget,
    tx: &watch::Sender<Option<CompletionSignal>>,
    cancel: &CancellationToken,
) -> StreamEnd {
    let end = loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break StreamEnd::Cancelled,
            frame = ws_stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(signal) = handle_text_message(&text, target) {
                    tracing::info!(job_id = %target.job_id, ?signal, "Event stream signalled completion");
                    tx.send_replace(Some(signal));
                    break StreamEnd::Completed;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                // Preview images.
                tracing::trace!(job_id = %target.job_id, "Ignoring binary message");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(job_id = %target.job_id, ?frame, "ComfyUI WebSocket closed");
                break StreamEnd::Disconnected;
            }
            Some(Err(e)) => {
                tracing::warn!(job_id = %target.job_id, error = %e, "WebSocket receive error");
                break StreamEnd::Disconnected;
            }
            None => break StreamEnd::Disconnected,
        }
    };

    if end != StreamEnd::Disconnected {
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_stream.close(None)).await;
    }
    end
}

/// Parse one text frame and classify it for the target job.
fn handle_text_message(text: &str, target: &ListenerTarget) -> Option<CompletionSignal> {
    match parse_message(text) {
        Ok(msg) => {
            let signal = msg.completion_signal(&target.job_id, &target.target_nodes);
            if let Some(CompletionSignal::Failed { node_id, message }) = &signal {
                tracing::error!(
                    job_id = %target.job_id,
                    node_id = node_id.as_deref().unwrap_or("-"),
                    error_message = %message,
                    "Execution error reported by ComfyUI",
                );
            }
            signal
        }
        Err(e) => {
            // Custom nodes broadcast their own message types.
            tracing::trace!(error = %e, raw_message = %text, "Unrecognised ComfyUI message");
            None
        }
    }
}
