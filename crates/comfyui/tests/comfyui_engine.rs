//! Integration tests for [`ComfyUIEngine`] against a local mock ComfyUI.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use sparkle_comfyui::{
    ComfyUIEngine, ComfyUIEngineConfig, GenerationEngine, GenerationError, GenerationRequest,
    ModelHandle, ModelRepository,
};
use sparkle_core::types::RepositoryCredentials;

// ---------------------------------------------------------------------------
// Mock server
// ---------------------------------------------------------------------------

/// What `/history/{id}` reports once the pending polls are used up.
#[derive(Clone, Copy)]
enum Outcome {
    Success,
    Error,
    Never,
    /// Accept the request but never respond.
    Hang,
}

#[derive(Clone)]
struct MockComfy {
    workflows: Arc<Mutex<Vec<Value>>>,
    history_polls: Arc<AtomicUsize>,
    interrupts: Arc<AtomicUsize>,
    pending_polls: usize,
    outcome: Outcome,
    /// Checkpoints listed regardless of the model directory.
    listed: Vec<String>,
    /// Files in this directory are listed as checkpoints too.
    model_dir: Option<PathBuf>,
}

const PROMPT_ID: &str = "prompt-1";
const AUTH_HEADER: &str = "Basic aGY6c2VjcmV0"; // hf:secret

async fn submit(State(mock): State<MockComfy>, Json(body): Json<Value>) -> Json<Value> {
    mock.workflows.lock().unwrap().push(body["prompt"].clone());
    Json(json!({ "prompt_id": PROMPT_ID, "number": 3, "node_errors": {} }))
}

async fn history(State(mock): State<MockComfy>, Path(id): Path<String>) -> Json<Value> {
    let polls = mock.history_polls.fetch_add(1, Ordering::SeqCst);
    if let Outcome::Hang = mock.outcome {
        std::future::pending::<()>().await;
    }
    if polls < mock.pending_polls {
        return Json(json!({}));
    }
    match mock.outcome {
        Outcome::Never | Outcome::Hang => Json(json!({})),
        Outcome::Success => Json(json!({
            id: {
                "outputs": {
                    "9": { "images": [{ "filename": "sparkle_00001_.png", "subfolder": "", "type": "output" }] }
                },
                "status": { "status_str": "success", "completed": true, "messages": [] }
            }
        })),
        Outcome::Error => Json(json!({
            id: {
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", {
                        "exception_type": "RuntimeError",
                        "exception_message": "sampler exploded"
                    }]]
                }
            }
        })),
    }
}

async fn view(Query(params): Query<std::collections::HashMap<String, String>>) -> impl IntoResponse {
    if params.get("filename").map(String::as_str) != Some("sparkle_00001_.png")
        || params.get("type").map(String::as_str) != Some("output")
    {
        return (StatusCode::NOT_FOUND, Vec::new());
    }
    let image = RgbImage::from_pixel(8, 8, Rgb([10, 200, 30]));
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    (StatusCode::OK, png)
}

async fn interrupt(State(mock): State<MockComfy>) -> StatusCode {
    mock.interrupts.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn object_info(State(mock): State<MockComfy>) -> Json<Value> {
    let mut names = mock.listed.clone();
    if let Some(dir) = &mock.model_dir {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if !name.ends_with(".part") {
                    names.push(name);
                }
            }
        }
    }
    Json(json!({
        "CheckpointLoaderSimple": {
            "input": { "required": { "ckpt_name": [names, {}] } }
        }
    }))
}

async fn download(headers: HeaderMap) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some(AUTH_HEADER);
    if authorized {
        (StatusCode::OK, b"checkpoint-bytes".to_vec())
    } else {
        (StatusCode::UNAUTHORIZED, Vec::new())
    }
}

async fn spawn_mock(mock: MockComfy) -> String {
    let app = Router::new()
        .route("/prompt", post(submit))
        .route("/history/{id}", get(history))
        .route("/view", get(view))
        .route("/interrupt", post(interrupt))
        .route("/object_info/{node}", get(object_info))
        .route("/models/{file}", get(download))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn mock(outcome: Outcome) -> MockComfy {
    MockComfy {
        workflows: Arc::default(),
        history_polls: Arc::default(),
        interrupts: Arc::default(),
        pending_polls: 2,
        outcome,
        listed: vec!["stable_diffusion.ckpt".into()],
        model_dir: None,
    }
}

fn engine(base: &str, dir: PathBuf) -> ComfyUIEngine {
    let mut config = ComfyUIEngineConfig::new(base, dir);
    config.poll_interval = Duration::from_millis(10);
    config.generation_timeout = Duration::from_secs(5);
    ComfyUIEngine::new(config).unwrap()
}

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "a lighthouse at dusk".into(),
        negative_prompt: None,
        sampler: "k_euler_a".into(),
        steps: 16,
        seed: 777,
    }
}

fn model() -> ModelHandle {
    ModelHandle {
        name: "stable_diffusion.ckpt".into(),
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_polls_until_output_and_decodes_image() {
    let mock = mock(Outcome::Success);
    let workflows = Arc::clone(&mock.workflows);
    let polls = Arc::clone(&mock.history_polls);
    let base = spawn_mock(mock).await;
    let engine = engine(&base, PathBuf::from("unused"));

    let image = engine.generate(&model(), &request()).await.unwrap();

    assert_eq!(image.dimensions(), (8, 8));
    assert_eq!(*image.get_pixel(3, 3), Rgb([10, 200, 30]));
    assert_eq!(polls.load(Ordering::SeqCst), 3);

    let workflows = workflows.lock().unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0]["3"]["inputs"]["seed"], 777);
    assert_eq!(workflows[0]["3"]["inputs"]["sampler_name"], "euler_ancestral");
    assert_eq!(workflows[0]["4"]["inputs"]["ckpt_name"], "stable_diffusion.ckpt");
}

#[tokio::test]
async fn execution_error_is_reported() {
    let base = spawn_mock(mock(Outcome::Error)).await;
    let engine = engine(&base, PathBuf::from("unused"));

    let result = engine.generate(&model(), &request()).await;

    assert_matches!(result, Err(GenerationError::Execution(msg)) if msg == "RuntimeError: sampler exploded");
}

#[tokio::test]
async fn stuck_prompt_times_out_and_interrupts() {
    let mock = mock(Outcome::Never);
    let interrupts = Arc::clone(&mock.interrupts);
    let base = spawn_mock(mock).await;

    let mut config = ComfyUIEngineConfig::new(base, "unused");
    config.poll_interval = Duration::from_millis(10);
    config.generation_timeout = Duration::from_millis(100);
    let engine = ComfyUIEngine::new(config).unwrap();

    let result = engine.generate(&model(), &request()).await;

    assert_matches!(result, Err(GenerationError::Timeout(_)));
    assert_eq!(interrupts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unresponsive_history_is_bounded_by_generation_timeout() {
    let mock = mock(Outcome::Hang);
    let interrupts = Arc::clone(&mock.interrupts);
    let base = spawn_mock(mock).await;

    let mut config = ComfyUIEngineConfig::new(base, "unused");
    config.poll_interval = Duration::from_millis(10);
    config.generation_timeout = Duration::from_millis(200);
    let engine = ComfyUIEngine::new(config).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), engine.generate(&model(), &request()))
        .await
        .expect("generate must return once the generation timeout passes");

    assert_matches!(result, Err(GenerationError::Timeout(_)));
    assert_eq!(interrupts.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Model loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listed_checkpoint_loads_without_download() {
    let base = spawn_mock(mock(Outcome::Success)).await;
    let engine = engine(&base, PathBuf::from("unused"));

    let handle = engine.load_model("stable_diffusion.ckpt").await.unwrap();
    assert_eq!(handle, model());
}

#[tokio::test]
async fn missing_checkpoint_without_repository_is_unavailable() {
    let base = spawn_mock(mock(Outcome::Success)).await;
    let engine = engine(&base, PathBuf::from("unused"));

    let result = engine.load_model("other.ckpt").await;
    assert_matches!(result, Err(GenerationError::ModelUnavailable(name)) if name == "other.ckpt");
}

#[tokio::test]
async fn missing_checkpoint_is_downloaded_with_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = mock(Outcome::Success);
    mock.listed.clear();
    mock.model_dir = Some(dir.path().to_path_buf());
    let base = spawn_mock(mock).await;

    let mut config = ComfyUIEngineConfig::new(base.clone(), dir.path());
    config.repository = Some(ModelRepository {
        url: format!("{base}/models/sd.ckpt"),
        credentials: RepositoryCredentials {
            username: "hf".into(),
            password: "secret".into(),
        },
    });
    let engine = ComfyUIEngine::new(config).unwrap();

    let handle = engine.load_model("stable_diffusion.ckpt").await.unwrap();

    assert_eq!(handle.name, "stable_diffusion.ckpt");
    let written = std::fs::read(dir.path().join("stable_diffusion.ckpt")).unwrap();
    assert_eq!(written, b"checkpoint-bytes");
    assert!(!dir.path().join("stable_diffusion.ckpt.part").exists());
}

#[tokio::test]
async fn rejected_credentials_fail_the_download() {
    let dir = tempfile::tempdir().unwrap();
    let mut mock = mock(Outcome::Success);
    mock.listed.clear();
    let base = spawn_mock(mock).await;

    let mut config = ComfyUIEngineConfig::new(base.clone(), dir.path());
    config.repository = Some(ModelRepository {
        url: format!("{base}/models/sd.ckpt"),
        credentials: RepositoryCredentials {
            username: "hf".into(),
            password: "wrong".into(),
        },
    });
    let engine = ComfyUIEngine::new(config).unwrap();

    let result = engine.load_model("stable_diffusion.ckpt").await;

    assert_matches!(result, Err(GenerationError::Http(e)) if e.status().map(|s| s.as_u16()) == Some(401));
    assert!(!dir.path().join("stable_diffusion.ckpt").exists());
}
