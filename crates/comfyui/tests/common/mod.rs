//! In-process fake ComfyUI engine for integration tests.
//!
//! Serves the subset of the engine API the crate talks to: `/prompt`,
//! `/queue`, `/history[/{id}]`, `/view`, `/upload/image` and `/ws`. Every
//! response is scripted through [`EngineState`] and every request is
//! recorded so tests can assert on what the client actually sent.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use animegen_comfyui::api::ComfyUIApi;
use animegen_comfyui::client::ComfyUIClient;
use animegen_comfyui::endpoint::EngineEndpoint;
use animegen_comfyui::reconnect::ReconnectConfig;
use animegen_comfyui::resolver::OutputResolver;
use animegen_comfyui::watcher::{CompletionWatcher, WatchConfig};

/// A file served by `/view`.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A multipart upload received on `/upload/image`.
#[derive(Debug, Clone, Default)]
pub struct ReceivedUpload {
    pub image_type: String,
    pub overwrite: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Scripted behaviour and request log of the fake engine.
#[derive(Debug)]
pub struct EngineState {
    /// Responses for `/history/{id}`, consumed in order; the last one repeats.
    pub history: Mutex<VecDeque<(StatusCode, Value)>>,
    pub full_history: Mutex<Value>,
    pub history_calls: AtomicUsize,
    pub full_history_calls: AtomicUsize,

    pub prompt_response: Mutex<(StatusCode, String)>,
    pub submitted: Mutex<Vec<Value>>,
    pub cancelled: Mutex<Vec<Value>>,

    pub files: Mutex<HashMap<String, StoredFile>>,
    pub view_queries: Mutex<Vec<HashMap<String, String>>>,

    pub upload_status: Mutex<StatusCode>,
    /// When set, `/upload/image` answers with this name instead of echoing.
    pub upload_rename: Mutex<Option<String>>,
    pub uploads: Mutex<Vec<ReceivedUpload>>,

    /// Text frames sent to each new WebSocket after `ws_delay`.
    pub ws_messages: Mutex<Vec<String>>,
    pub ws_delay: Mutex<Duration>,
    pub ws_client_ids: Mutex<Vec<String>>,
    pub ws_active: AtomicUsize,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            history: Mutex::new(VecDeque::from([(StatusCode::OK, json!({}))])),
            full_history: Mutex::new(json!({})),
            history_calls: AtomicUsize::new(0),
            full_history_calls: AtomicUsize::new(0),
            prompt_response: Mutex::new((
                StatusCode::OK,
                json!({"prompt_id": "job-1", "number": 1, "node_errors": {}}).to_string(),
            )),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            files: Mutex::new(HashMap::new()),
            view_queries: Mutex::new(Vec::new()),
            upload_status: Mutex::new(StatusCode::OK),
            upload_rename: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            ws_messages: Mutex::new(Vec::new()),
            ws_delay: Mutex::new(Duration::ZERO),
            ws_client_ids: Mutex::new(Vec::new()),
            ws_active: AtomicUsize::new(0),
        }
    }
}

impl EngineState {
    /// Replace the `/history/{id}` script.
    pub fn script_history(&self, responses: Vec<(StatusCode, Value)>) {
        *self.history.lock().unwrap() = responses.into();
    }

    pub fn add_file(&self, name: &str, content_type: Option<&str>, bytes: &[u8]) {
        self.files.lock().unwrap().insert(
            name.to_string(),
            StoredFile {
                content_type: content_type.map(str::to_string),
                bytes: bytes.to_vec(),
            },
        );
    }

    pub fn ws_active(&self) -> usize {
        self.ws_active.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

/// A running fake engine.
pub struct FakeEngine {
    pub state: Arc<EngineState>,
    pub base_url: String,
}

impl FakeEngine {
    pub async fn start() -> Self {
        Self::start_with(EngineState::default()).await
    }

    pub async fn start_with(state: EngineState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/prompt", post(prompt))
            .route("/queue", post(queue))
            .route("/history", get(full_history))
            .route("/history/{id}", get(history))
            .route("/view", get(view))
            .route("/upload/image", post(upload_image))
            .route("/ws", get(ws))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub fn endpoint(&self) -> EngineEndpoint {
        EngineEndpoint::parse(&self.base_url).unwrap()
    }

    pub fn api(&self) -> ComfyUIApi {
        ComfyUIApi::new(self.base_url.clone())
    }

    pub fn watcher(&self, config: WatchConfig) -> CompletionWatcher {
        CompletionWatcher::new(
            OutputResolver::new(self.api()),
            ComfyUIClient::new(self.endpoint()),
            config,
        )
    }
}

/// Watch timings shortened for tests; the poll interval stays at its
/// production value so timing assertions mean something.
pub fn fast_config() -> WatchConfig {
    WatchConfig {
        grace_period: Duration::from_millis(200),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        },
        ..WatchConfig::default()
    }
}

/// A finished per-job history record for `node` with one image.
pub fn image_history(node: &str, filename: &str) -> Value {
    json!({"outputs": {node: {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}}})
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn prompt(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> Response {
    state.submitted.lock().unwrap().push(body);
    let (status, body) = state.prompt_response.lock().unwrap().clone();
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

async fn queue(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> StatusCode {
    state.cancelled.lock().unwrap().push(body);
    StatusCode::OK
}

async fn history(State(state): State<Arc<EngineState>>, Path(_id): Path<String>) -> Response {
    state.history_calls.fetch_add(1, Ordering::SeqCst);
    let (status, body) = {
        let mut script = state.history.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or((StatusCode::OK, json!({})))
        }
    };
    (status, Json(body)).into_response()
}

async fn full_history(State(state): State<Arc<EngineState>>) -> Json<Value> {
    state.full_history_calls.fetch_add(1, Ordering::SeqCst);
    Json(state.full_history.lock().unwrap().clone())
}

async fn view(
    State(state): State<Arc<EngineState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.view_queries.lock().unwrap().push(query.clone());
    let file = query
        .get("filename")
        .and_then(|name| state.files.lock().unwrap().get(name).cloned());
    match file {
        Some(StoredFile {
            content_type: Some(ct),
            bytes,
        }) => ([(CONTENT_TYPE, ct)], bytes).into_response(),
        // Without a Content-Type header at all.
        Some(StoredFile { bytes, .. }) => Response::new(axum::body::Body::from(bytes)),
        None => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

async fn upload_image(State(state): State<Arc<EngineState>>, mut multipart: Multipart) -> Response {
    let mut upload = ReceivedUpload::default();
    while let Some(field) = multipart.next_field().await.unwrap() {
        match field.name().unwrap_or_default() {
            "type" => upload.image_type = field.text().await.unwrap(),
            "overwrite" => upload.overwrite = field.text().await.unwrap(),
            "image" => {
                upload.file_name = field.file_name().unwrap_or_default().to_string();
                upload.content_type = field.content_type().unwrap_or_default().to_string();
                upload.bytes = field.bytes().await.unwrap().to_vec();
            }
            _ => {}
        }
    }

    let status = *state.upload_status.lock().unwrap();
    if !status.is_success() {
        return (status, "upload rejected").into_response();
    }
    let name = state
        .upload_rename
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_else(|| upload.file_name.clone());
    state.uploads.lock().unwrap().push(upload);
    Json(json!({"name": name, "subfolder": "", "type": "input"})).into_response()
}

async fn ws(
    State(state): State<Arc<EngineState>>,
    Query(query): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if let Some(id) = query.get("clientId") {
        state.ws_client_ids.lock().unwrap().push(id.clone());
    }
    upgrade.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: Arc<EngineState>) {
    state.ws_active.fetch_add(1, Ordering::SeqCst);

    let delay = *state.ws_delay.lock().unwrap();
    let messages = state.ws_messages.lock().unwrap().clone();
    tokio::time::sleep(delay).await;
    for text in messages {
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    // Hold the connection open until the client goes away.
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    state.ws_active.fetch_sub(1, Ordering::SeqCst);
}
