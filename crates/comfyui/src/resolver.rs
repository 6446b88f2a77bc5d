//! Output resolver: find a job's media in the ComfyUI history.
//!
//! The history endpoints are not shape-stable across ComfyUI versions and
//! proxies. `/history/{id}` may answer `{"outputs": {...}}` or
//! `{id: {"outputs": {...}}}`; `/history` maps ids to records. The resolver
//! tries an ordered list of pure extraction [`Strategy`]s against each
//! response and never invents a result.
//!
//! Transport failures and "not there yet" both map to
//! [`Resolution::NotYetAvailable`], which is what the watcher's poll loop
//! wants. Only a request that can never succeed is [`Resolution::Fatal`].

use serde_json::Value;

use animegen_core::media::{normalize_items, MediaDescriptor, MediaKind};

use crate::api::{ComfyUIApi, ComfyUIApiError};

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of one resolution attempt.
#[derive(Debug)]
pub enum Resolution {
    /// A matching output block was found. The list may be empty when the
    /// engine reported an empty list under a matching key.
    Found(Vec<MediaDescriptor>),
    /// Nothing yet; poll again later.
    NotYetAvailable,
    /// Retrying cannot help.
    Fatal(ComfyUIApiError),
}

impl Resolution {
    /// Found with at least one item.
    pub fn has_media(&self) -> bool {
        matches!(self, Self::Found(items) if !items.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// What the strategies search for.
#[derive(Debug, Clone)]
pub struct OutputQuery<'a> {
    pub job_id: &'a str,
    /// Node ids in priority order.
    pub target_nodes: &'a [String],
    /// Output keys in priority order.
    pub keys: Vec<&'a str>,
}

impl<'a> OutputQuery<'a> {
    pub fn new(job_id: &'a str, target_nodes: &'a [String], kind: &'a MediaKind) -> Self {
        Self {
            job_id,
            target_nodes,
            keys: kind.lookup_keys(),
        }
    }
}

/// A pure extraction over one parsed history response.
pub type Extract = fn(&Value, &OutputQuery<'_>) -> Option<Vec<Value>>;

/// A named extraction, named for logging.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub extract: Extract,
}

/// Strategies applied to `GET /history/{job_id}`.
pub const PER_JOB_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "direct-outputs",
        extract: direct_outputs,
    },
    Strategy {
        name: "keyed-by-job",
        extract: keyed_by_job,
    },
];

/// Strategies applied to `GET /history`.
pub const FULL_HISTORY_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "keyed-by-job",
        extract: keyed_by_job,
    },
    Strategy {
        name: "scan-entries",
        extract: scan_entries,
    },
];

/// Run strategies in order; the first that matches wins.
pub fn apply_strategies(
    strategies: &[Strategy],
    response: &Value,
    query: &OutputQuery<'_>,
) -> Option<(&'static str, Vec<Value>)> {
    strategies
        .iter()
        .find_map(|s| (s.extract)(response, query).map(|items| (s.name, items)))
}

/// The response itself is the job record: `{"outputs": {...}}`.
pub fn direct_outputs(response: &Value, query: &OutputQuery<'_>) -> Option<Vec<Value>> {
    search_outputs(response.get("outputs")?, query)
}

/// The response is keyed by job id: `{job_id: {"outputs": {...}}}`.
pub fn keyed_by_job(response: &Value, query: &OutputQuery<'_>) -> Option<Vec<Value>> {
    let record = response.get(query.job_id).filter(|r| r.is_object())?;
    search_outputs(record.get("outputs")?, query)
}

/// Last resort over the full history: walk every record that belongs to the
/// job (keyed by its id, or whose `prompt` tuple names it) and take the
/// first target node in the record's own output order. Unlike the other
/// strategies, `target_nodes` order is not a priority here, only a filter.
pub fn scan_entries(history: &Value, query: &OutputQuery<'_>) -> Option<Vec<Value>> {
    history
        .as_object()?
        .iter()
        .filter(|(key, record)| belongs_to_job(key, record, query.job_id))
        .filter_map(|(_, record)| record.get("outputs")?.as_object())
        .flat_map(|outputs| outputs.iter())
        .filter(|(node_id, _)| query.target_nodes.iter().any(|t| t == *node_id))
        .find_map(|(_, node_output)| pick_media(node_output, &query.keys))
}

/// Node order dominates key order: the first target node with any matching
/// key wins.
fn search_outputs(outputs: &Value, query: &OutputQuery<'_>) -> Option<Vec<Value>> {
    query
        .target_nodes
        .iter()
        .filter_map(|node| outputs.get(node.as_str()))
        .find_map(|node_output| pick_media(node_output, &query.keys))
}

/// First present key wins; scalars are wrapped into a one-item list.
fn pick_media(node_output: &Value, keys: &[&str]) -> Option<Vec<Value>> {
    keys.iter()
        .find_map(|key| node_output.get(*key))
        .map(|media| match media {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        })
}

fn belongs_to_job(key: &str, record: &Value, job_id: &str) -> bool {
    key == job_id
        || record
            .get("prompt")
            .and_then(|p| p.get(1))
            .and_then(Value::as_str)
            .is_some_and(|id| id == job_id)
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Stateless resolver over a ComfyUI instance's history.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    api: ComfyUIApi,
}

impl OutputResolver {
    pub fn new(api: ComfyUIApi) -> Self {
        Self { api }
    }

    /// Look up the media produced by `target_nodes` for `job_id`.
    pub async fn resolve(&self, job_id: &str, target_nodes: &[String], kind: &MediaKind) -> Resolution {
        let query = OutputQuery::new(job_id, target_nodes, kind);

        match self.api.get_history(job_id).await {
            Ok(response) => {
                if let Some(found) = self.found(PER_JOB_STRATEGIES, &response, &query, "/history/{id}") {
                    return found;
                }
                tracing::debug!(job_id, "No matching outputs in per-job history yet");
            }
            Err(e) if e.is_fatal() => return Resolution::Fatal(e),
            Err(e) => {
                tracing::debug!(job_id, error = %e, "Per-job history unavailable, using full history");
            }
        }

        match self.api.get_full_history().await {
            Ok(history) => self
                .found(FULL_HISTORY_STRATEGIES, &history, &query, "/history")
                .unwrap_or(Resolution::NotYetAvailable),
            Err(e) if e.is_fatal() => Resolution::Fatal(e),
            Err(e) => {
                tracing::debug!(job_id, error = %e, "Full history unavailable");
                Resolution::NotYetAvailable
            }
        }
    }

    fn found(
        &self,
        strategies: &[Strategy],
        response: &Value,
        query: &OutputQuery<'_>,
        source: &str,
    ) -> Option<Resolution> {
        let (strategy, items) = apply_strategies(strategies, response, query)?;
        tracing::debug!(
            job_id = query.job_id,
            source,
            strategy,
            count = items.len(),
            "Resolved job outputs",
        );
        Some(Resolution::Found(normalize_items(&items)))
    }
}
