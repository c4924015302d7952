//! HTTP tests over a local store and the in-memory channel.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use imgtier_api::handlers::{DeleteResponse, ListResponse, ReadinessResponse, UploadResponse};
use imgtier_api::{create_router, ApiConfig, AppState};
use imgtier_media::JpegCodec;
use imgtier_models::{ImageId, QualityLevel};
use imgtier_queue::{MemoryChannel, TaskChannel};
use imgtier_storage::{BlobStore, LocalBlobStore};
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "imgtier-test-boundary";

struct TestApp {
    _dir: TempDir,
    store: Arc<LocalBlobStore>,
    channel: MemoryChannel,
    router: Router,
}

fn app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalBlobStore::new(dir.path().join("storage")));
    let channel = MemoryChannel::new();
    let state = AppState::new(
        ApiConfig::default(),
        store.clone(),
        Arc::new(channel.clone()),
        Arc::new(JpegCodec::new()),
    );

    TestApp {
        _dir: dir,
        store,
        channel,
        router: create_router(state, None),
    }
}

fn fixture_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
        .encode(img.as_raw(), 32, 32, image::ColorType::Rgb8)
        .unwrap();
    out
}

fn upload_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/api/images")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::delete(uri).body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json<T: DeserializeOwned>(app: &TestApp, request: Request<Body>) -> (StatusCode, T) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn upload(app: &TestApp) -> ImageId {
    let (status, response): (_, UploadResponse) =
        send_json(app, upload_request("image", "cat.jpg", &fixture_jpeg())).await;
    assert_eq!(status, StatusCode::OK);
    response.id
}

#[tokio::test]
async fn test_upload_stores_original_and_publishes_task() {
    let app = app();
    let data = fixture_jpeg();

    let (status, response): (_, UploadResponse) =
        send_json(&app, upload_request("image", "cat.JPG", &data)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(response.message.contains("queued"));
    assert_eq!(app.store.get(&response.id, QualityLevel::Original).await.unwrap(), data);
    assert_eq!(app.channel.published(), 1);

    let mut stream = app.channel.consume().await.unwrap();
    let delivery = stream.next().await.unwrap().unwrap();
    assert_eq!(delivery.task.id, response.id);
    assert_eq!(
        delivery.task.source_path,
        app.store.locate(&response.id, QualityLevel::Original).unwrap()
    );
}

#[tokio::test]
async fn test_upload_rejects_extension() {
    let app = app();
    let (status, _, _) = send(&app, upload_request("image", "cat.gif", &fixture_jpeg())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.channel.published(), 0);
    assert_eq!(app.store.list().count().await, 0);
}

#[tokio::test]
async fn test_upload_rejects_undecodable_bytes() {
    let app = app();
    let (status, _, _) = send(&app, upload_request("image", "cat.jpg", b"not an image at all")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.channel.published(), 0);
    assert_eq!(app.store.list().count().await, 0);
}

#[tokio::test]
async fn test_upload_without_image_field() {
    let app = app();
    let (status, _, _) = send(&app, upload_request("file", "cat.jpg", &fixture_jpeg())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_with_channel_down_keeps_nothing() {
    let app = app();
    app.channel.disconnect();

    let (status, _, _) = send(&app, upload_request("image", "cat.png", &fixture_jpeg())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.store.list().count().await, 0);
}

#[tokio::test]
async fn test_get_image_variants() {
    let app = app();
    let id = upload(&app).await;

    let (status, headers, body) = send(&app, get(&format!("/api/images/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=31536000");
    assert_eq!(body, fixture_jpeg());

    // Not processed yet
    let (status, _, _) = send(&app, get(&format!("/api/images/{id}?quality=75"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.store.save(&id, QualityLevel::High, b"seventy-five").await.unwrap();
    let (status, _, body) = send(&app, get(&format!("/api/images/{id}?quality=75"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"seventy-five");
}

#[tokio::test]
async fn test_get_image_bad_requests() {
    let app = app();
    let id = upload(&app).await;

    let (status, _, _) = send(&app, get(&format!("/api/images/{id}?quality=90"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Level names are not quality tokens
    let (status, _, _) = send(&app, get(&format!("/api/images/{id}?quality=high"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get("/api/images/x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get("/api/images/ffff0000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_single_level() {
    let app = app();
    let id = upload(&app).await;
    app.store.save(&id, QualityLevel::Low, b"low").await.unwrap();

    let (status, response): (_, DeleteResponse) =
        send_json(&app, delete(&format!("/api/images/{id}?quality=25"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.deleted, vec![QualityLevel::Low]);
    assert!(app.store.get(&id, QualityLevel::Original).await.is_ok());

    let (status, _, _) = send(&app, delete(&format!("/api/images/{id}?quality=25"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_all_levels() {
    let app = app();
    let id = upload(&app).await;
    app.store.save(&id, QualityLevel::Medium, b"medium").await.unwrap();

    let (status, response): (_, DeleteResponse) =
        send_json(&app, delete(&format!("/api/images/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.deleted, vec![QualityLevel::Original, QualityLevel::Medium]);
    assert_eq!(app.store.list().count().await, 0);

    let (status, _, _) = send(&app, delete(&format!("/api/images/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_images_with_limit() {
    let app = app();
    let mut uploaded = Vec::new();
    for _ in 0..3 {
        uploaded.push(upload(&app).await);
    }

    let (status, response): (_, ListResponse) = send_json(&app, get("/api/images")).await;
    assert_eq!(status, StatusCode::OK);
    let mut ids = response.ids;
    ids.sort();
    uploaded.sort();
    assert_eq!(ids, uploaded);

    let (_, response): (_, ListResponse) = send_json(&app, get("/api/images?limit=2")).await;
    assert_eq!(response.ids.len(), 2);
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = app();

    let (status, _, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, response): (_, ReadinessResponse) = send_json(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response.status, "ready");

    app.channel.disconnect();
    let (status, response): (_, ReadinessResponse) = send_json(&app, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.checks.channel.status, "error");
    assert_eq!(response.checks.storage.status, "ok");
}

#[tokio::test]
async fn test_metrics_route_absent_without_handle() {
    let app = app();
    let (status, _, _) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
