//! Integration tests for the `UploadBridge` source-image paths.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;

use animegen_comfyui::upload::{UploadBridge, UploadError};
use animegen_core::error::CoreError;
use animegen_core::media::MediaDescriptor;
use animegen_core::storage::OutputRoot;
use common::FakeEngine;

fn bridge(engine: &FakeEngine, dir: &std::path::Path) -> UploadBridge {
    UploadBridge::new(engine.api(), OutputRoot::new(dir).unwrap())
}

// ---------------------------------------------------------------------------
// Data URLs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn data_url_is_uploaded_as_input() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let uploaded = bridge(&engine, tmp.path())
        .upload_data_url("data:image/png;base64,aGVsbG8=", None, None)
        .await
        .unwrap();

    assert!(uploaded.name.starts_with("user_upload_"), "{}", uploaded.name);
    assert!(uploaded.name.ends_with(".png"));

    let uploads = engine.state.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].image_type, "input");
    assert_eq!(uploads[0].overwrite, "true");
    assert_eq!(uploads[0].content_type, "image/png");
    assert_eq!(uploads[0].file_name, uploaded.name);
    assert_eq!(uploads[0].bytes, b"hello");
}

#[tokio::test]
async fn data_url_filename_extension_is_kept() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let uploaded = bridge(&engine, tmp.path())
        .upload_data_url("data:image/jpeg;base64,aGVsbG8=", Some("../holiday photo.jpg"), None)
        .await
        .unwrap();

    assert!(uploaded.name.ends_with(".jpg"), "{}", uploaded.name);
}

#[tokio::test]
async fn data_url_extension_derived_from_mime() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let uploaded = bridge(&engine, tmp.path())
        .upload_data_url("data:image/webp;base64,aGVsbG8=", Some("pasted"), None)
        .await
        .unwrap();

    assert!(uploaded.name.ends_with(".webp"), "{}", uploaded.name);
    assert_eq!(engine.state.uploads.lock().unwrap()[0].content_type, "image/webp");
}

#[tokio::test]
async fn empty_data_url_content_is_rejected() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path())
        .upload_data_url("data:image/png;base64,", None, None)
        .await
        .unwrap_err();

    assert_matches!(err, UploadError::Core(CoreError::Validation(_)));
    assert!(engine.state.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn data_url_without_comma_is_rejected() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path())
        .upload_data_url("data:image/png;base64", None, None)
        .await
        .unwrap_err();

    assert_matches!(err, UploadError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn local_file_is_uploaded_with_guessed_mime() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("job-1_images_01_abc.webp"), b"webp").unwrap();

    let uploaded = bridge(&engine, tmp.path())
        .upload_local("job-1_images_01_abc.webp")
        .await
        .unwrap();

    assert!(uploaded.name.starts_with("user_upload_"));
    assert!(uploaded.name.ends_with(".webp"));
    let uploads = engine.state.uploads.lock().unwrap().clone();
    assert_eq!(uploads[0].content_type, "image/webp");
    assert_eq!(uploads[0].bytes, b"webp");
}

#[tokio::test]
async fn local_traversal_is_rejected_before_io() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let upload = bridge(&engine, tmp.path());

    for name in ["../../etc/passwd", "..\\..\\etc\\passwd", ".."] {
        let err = upload.upload_local(name).await.unwrap_err();
        assert_matches!(err, UploadError::Core(CoreError::PathTraversal(_)), "{name}");
    }
    assert!(engine.state.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_local_file_is_not_found() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path())
        .upload_local("nope.png")
        .await
        .unwrap_err();

    assert_matches!(err, UploadError::Core(CoreError::NotFound(_)));
}

#[tokio::test]
async fn empty_local_name_is_a_validation_error() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path()).upload_local("").await.unwrap_err();

    assert_matches!(err, UploadError::Core(CoreError::Validation(_)));
}

// ---------------------------------------------------------------------------
// Engine files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_file_is_downloaded_and_reuploaded() {
    let engine = FakeEngine::start().await;
    engine.state.add_file("frame.png", Some("image/png"), b"frame");
    let tmp = tempfile::tempdir().unwrap();
    let descriptor = MediaDescriptor {
        subfolder: "batch".to_string(),
        ..MediaDescriptor::output("frame.png")
    };

    let uploaded = bridge(&engine, tmp.path())
        .reupload_engine_file(&descriptor)
        .await
        .unwrap();

    assert!(uploaded.name.starts_with("video_source_"), "{}", uploaded.name);
    assert!(uploaded.name.ends_with(".png"));
    let queries = engine.state.view_queries.lock().unwrap().clone();
    assert_eq!(queries[0].get("subfolder").map(String::as_str), Some("batch"));
    assert_eq!(engine.state.uploads.lock().unwrap()[0].bytes, b"frame");
}

#[tokio::test]
async fn missing_engine_file_reports_status() {
    let engine = FakeEngine::start().await;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path())
        .reupload_engine_file(&MediaDescriptor::output("absent.png"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(err.to_string().contains("absent.png"));
}

#[tokio::test]
async fn rejected_upload_carries_status() {
    let engine = FakeEngine::start().await;
    *engine.state.upload_status.lock().unwrap() = StatusCode::INTERNAL_SERVER_ERROR;
    let tmp = tempfile::tempdir().unwrap();

    let err = bridge(&engine, tmp.path())
        .upload_data_url("data:image/png;base64,aGVsbG8=", None, None)
        .await
        .unwrap_err();

    assert_matches!(err, UploadError::Api(_));
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn engine_assigned_name_is_used() {
    let engine = FakeEngine::start().await;
    *engine.state.upload_rename.lock().unwrap() = Some("renamed (1).png".to_string());
    let tmp = tempfile::tempdir().unwrap();

    let uploaded = bridge(&engine, tmp.path())
        .upload_data_url("data:image/png;base64,aGVsbG8=", None, None)
        .await
        .unwrap();

    assert_eq!(uploaded.name, "renamed (1).png");
}
