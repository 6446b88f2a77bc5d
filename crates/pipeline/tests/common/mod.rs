//! Minimal fake ComfyUI engine and fixtures for generator tests.
//!
//! Queues every submitted workflow, answers history with a scripted record
//! and serves `/view` files from memory. The event stream accepts
//! connections and stays silent, so completion is always found by polling.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use animegen_comfyui::endpoint::EngineEndpoint;
use animegen_comfyui::watcher::WatchConfig;
use animegen_core::storage::OutputRoot;
use animegen_core::workflow::{JobTemplate, TemplateKind, TemplateStore};
use animegen_pipeline::generator::{Generator, GeneratorConfig};

#[derive(Debug)]
pub struct EngineState {
    pub prompt_status: Mutex<StatusCode>,
    pub submitted: Mutex<Vec<Value>>,
    pub cancelled: Mutex<Vec<Value>>,
    /// Returned by `/history/{id}` for every job.
    pub history: Mutex<Value>,
    pub files: Mutex<HashMap<String, (String, Vec<u8>)>>,
    pub uploads: Mutex<Vec<String>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            prompt_status: Mutex::new(StatusCode::OK),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            history: Mutex::new(json!({})),
            files: Mutex::new(HashMap::new()),
            uploads: Mutex::new(Vec::new()),
        }
    }
}

impl EngineState {
    pub fn set_outputs(&self, node: &str, key: &str, filename: &str, content_type: &str, bytes: &[u8]) {
        *self.history.lock().unwrap() =
            json!({"outputs": {node: {key: [{"filename": filename, "subfolder": "", "type": "output"}]}}});
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), (content_type.to_string(), bytes.to_vec()));
    }

    pub fn last_submitted_prompt(&self) -> Value {
        self.submitted.lock().unwrap().last().cloned().unwrap()["prompt"].clone()
    }
}

pub struct FakeEngine {
    pub state: Arc<EngineState>,
    pub base_url: String,
}

impl FakeEngine {
    pub async fn start() -> Self {
        let state = Arc::new(EngineState::default());
        let app = Router::new()
            .route("/prompt", post(prompt))
            .route("/queue", post(queue))
            .route("/history", get(|| async { Json(json!({})) }))
            .route("/history/{id}", get(history))
            .route("/view", get(view))
            .route("/upload/image", post(upload))
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

    pub fn generator(&self, output_dir: &std::path::Path, max_wait: Duration) -> Generator {
        let config = GeneratorConfig {
            watch: WatchConfig {
                grace_period: Duration::from_millis(100),
                ..WatchConfig::default()
            },
            max_wait,
            ..GeneratorConfig::new(
                EngineEndpoint::parse(&self.base_url).unwrap(),
                OutputRoot::new(output_dir).unwrap(),
            )
        };
        Generator::new(Arc::new(templates()), config)
    }
}

/// Small stand-ins for the bundled workflows, with the node ids the
/// recipes write to.
pub fn templates() -> TemplateStore {
    let mut store = TemplateStore::new();
    store.insert(
        TemplateKind::TextToImage,
        JobTemplate::from_value(json!({
            "5": {"class_type": "EmptyLatentImage", "inputs": {"width": 512, "height": 512}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "masterpiece, <Prompt Start> placeholder"}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "lowres"}},
            "10": {"class_type": "KSamplerAdvanced", "inputs": {"steps": 30, "noise_seed": 0}},
            "19": {"class_type": "SaveImage", "inputs": {"filename_prefix": "t2i"}}
        }))
        .unwrap(),
    );
    store.insert(
        TemplateKind::ImageToVideo,
        JobTemplate::from_value(json!({
            "89": {"class_type": "CLIPTextEncode", "inputs": {"text": "static"}},
            "93": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
            "94": {"class_type": "CreateVideo", "inputs": {"fps": 16}},
            "97": {"class_type": "LoadImage", "inputs": {"image": ""}},
            "98": {"class_type": "WanImageToVideo", "inputs": {"width": 640, "height": 640, "length": 81}},
            "108": {"class_type": "SaveVideo", "inputs": {"format": "mp4"}}
        }))
        .unwrap(),
    );
    store.insert(
        TemplateKind::ImageEdit,
        JobTemplate::from_value(json!({
            "3": {"class_type": "KSampler", "inputs": {"steps": 4, "seed": 0}},
            "60": {"class_type": "SaveImage", "inputs": {"filename_prefix": "edit"}},
            "78": {"class_type": "LoadImage", "inputs": {"image": ""}},
            "93": {"class_type": "ImageScaleToTotalPixels", "inputs": {"megapixels": 1.0}},
            "110": {"class_type": "TextEncodeQwenImageEditPlus", "inputs": {"prompt": "x"}},
            "111": {"class_type": "TextEncodeQwenImageEditPlus", "inputs": {"prompt": ""}},
            "112": {"class_type": "EmptySD3LatentImage", "inputs": {"width": 1024, "height": 1024}}
        }))
        .unwrap(),
    );
    store
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn prompt(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> Response {
    let status = *state.prompt_status.lock().unwrap();
    if !status.is_success() {
        return (status, r#"{"error": "invalid prompt"}"#).into_response();
    }
    let mut submitted = state.submitted.lock().unwrap();
    submitted.push(body);
    Json(json!({"prompt_id": format!("job-{}", submitted.len()), "number": submitted.len()})).into_response()
}

async fn queue(State(state): State<Arc<EngineState>>, Json(body): Json<Value>) -> StatusCode {
    state.cancelled.lock().unwrap().push(body);
    StatusCode::OK
}

async fn history(State(state): State<Arc<EngineState>>, Path(_id): Path<String>) -> Json<Value> {
    Json(state.history.lock().unwrap().clone())
}

async fn view(State(state): State<Arc<EngineState>>, Query(query): Query<HashMap<String, String>>) -> Response {
    let file = query
        .get("filename")
        .and_then(|name| state.files.lock().unwrap().get(name).cloned());
    match file {
        Some((content_type, bytes)) => ([(CONTENT_TYPE, content_type)], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn upload(State(state): State<Arc<EngineState>>, mut multipart: Multipart) -> Json<Value> {
    let mut name = String::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let is_image = field.name() == Some("image");
        if is_image {
            name = field.file_name().unwrap_or_default().to_string();
        }
        field.bytes().await.unwrap();
    }
    state.uploads.lock().unwrap().push(name.clone());
    Json(json!({"name": name, "subfolder": "", "type": "input"}))
}

async fn ws(upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(_)) = socket.recv().await {}
    })
}
