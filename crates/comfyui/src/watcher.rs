//! Completion watcher: wait until a submitted job has produced output.
//!
//! Two signals race:
//!
//! * a background [`ListenerHandle`] on the job's event stream, which only
//!   says "the engine thinks it is done", and
//! * history polling through the [`OutputResolver`], which is the only
//!   source of actual media descriptors.
//!
//! The watcher resolves once immediately, then every poll interval (or as
//! soon as the listener signals) until `max_wait` elapses. A listener signal
//! with nothing usable yet (absent or an empty list) buys one grace period
//! and a final lookup. Timing
//! out is not an error: the result is simply empty. The listener is
//! cancelled and joined before [`CompletionWatcher::await_completion`]
//! returns, whatever the exit path.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use animegen_core::media::{MediaDescriptor, MediaKind};

use crate::api::ComfyUIApiError;
use crate::client::ComfyUIClient;
use crate::listener::{ListenerHandle, ListenerTarget};
use crate::reconnect::ReconnectConfig;
use crate::resolver::{OutputResolver, Resolution};

/// Default interval between history lookups.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default extra wait after completion (or timeout) before the last lookup.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Default upper bound on waiting for one job.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(300);

/// Timing knobs for the watcher.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// One job to wait for.
#[derive(Debug, Clone)]
pub struct WatchRequest {
    /// Correlation id the workflow was submitted with.
    pub client_id: String,
    pub job_id: String,
    /// Output nodes in priority order.
    pub target_nodes: Vec<String>,
    pub kind: MediaKind,
    pub max_wait: Duration,
}

/// Errors that end a watch early.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The caller's cancellation token fired.
    #[error("Watch cancelled")]
    Cancelled,

    /// History lookups can never succeed (e.g. malformed base URL).
    #[error("Cannot query ComfyUI history: {0}")]
    Resolver(#[source] ComfyUIApiError),
}

/// Waits for jobs on one ComfyUI instance. Holds no per-job state, so one
/// watcher can serve any number of concurrent jobs.
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    resolver: OutputResolver,
    client: ComfyUIClient,
    config: WatchConfig,
}

impl CompletionWatcher {
    pub fn new(resolver: OutputResolver, client: ComfyUIClient, config: WatchConfig) -> Self {
        Self {
            resolver,
            client,
            config,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Wait until the job's media can be resolved, the listener reports
    /// completion, `max_wait` elapses, or `cancel` fires.
    ///
    /// Returns the normalized descriptors, possibly empty.
    pub async fn await_completion(
        &self,
        request: &WatchRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaDescriptor>, WatchError> {
        let started = Instant::now();
        let listener = ListenerHandle::spawn(
            self.client.clone(),
            ListenerTarget {
                client_id: request.client_id.clone(),
                job_id: request.job_id.clone(),
                target_nodes: request.target_nodes.clone(),
            },
            self.config.reconnect.clone(),
            cancel,
        );

        let result = self.watch(request, &listener, cancel, started).await;
        listener.shutdown().await;

        match &result {
            Ok(media) => tracing::info!(
                job_id = %request.job_id,
                count = media.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Watch finished",
            ),
            Err(e) => tracing::warn!(job_id = %request.job_id, error = %e, "Watch aborted"),
        }
        result
    }

    async fn watch(
        &self,
        request: &WatchRequest,
        listener: &ListenerHandle,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Vec<MediaDescriptor>, WatchError> {
        // Engines that finish synchronously (and test doubles) answer here.
        if let Some(media) = self.check(request).await? {
            if !media.is_empty() {
                tracing::debug!(job_id = %request.job_id, "Outputs available immediately");
                return Ok(media);
            }
        }

        let deadline = started + request.max_wait;
        let mut signal = listener.subscribe();
        let mut listener_alive = true;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.config.poll_interval.min(deadline - now);

            // A signal that arrived during the previous lookup is acted on
            // without waiting.
            if signal.borrow().is_none() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                    changed = signal.changed(), if listener_alive => {
                        if changed.is_err() {
                            listener_alive = false;
                        }
                    }
                }
            } else if cancel.is_cancelled() {
                return Err(WatchError::Cancelled);
            }

            let completion = signal.borrow().clone();
            if let Some(media) = self.check(request).await? {
                if !media.is_empty() {
                    return Ok(media);
                }
            }

            if let Some(completion) = completion {
                tracing::debug!(
                    job_id = %request.job_id,
                    ?completion,
                    "Completion signalled without outputs, waiting grace period",
                );
                self.grace(cancel).await?;
                return Ok(self.check(request).await?.unwrap_or_default());
            }
        }

        tracing::info!(
            job_id = %request.job_id,
            max_wait_secs = request.max_wait.as_secs_f64(),
            "Timed out waiting for outputs, final lookup after grace period",
        );
        self.grace(cancel).await?;
        Ok(self.check(request).await?.unwrap_or_default())
    }

    /// One resolver call; `None` means "not yet".
    async fn check(&self, request: &WatchRequest) -> Result<Option<Vec<MediaDescriptor>>, WatchError> {
        match self
            .resolver
            .resolve(&request.job_id, &request.target_nodes, &request.kind)
            .await
        {
            Resolution::Found(media) => Ok(Some(media)),
            Resolution::NotYetAvailable => Ok(None),
            Resolution::Fatal(e) => Err(WatchError::Resolver(e)),
        }
    }

    async fn grace(&self, cancel: &CancellationToken) -> Result<(), WatchError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WatchError::Cancelled),
            _ = tokio::time::sleep(self.config.grace_period) => Ok(()),
        }
    }
}
