//! End-to-end tests against the real router, with a local stub standing in
//! for the image generation API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use axum_test::TestServer;
use base64::Engine;
use serde_json::{Value, json};
use tempfile::TempDir;

use coloring_printer::{AppState, Config, router};

#[derive(Clone, Copy)]
enum StubMode {
    Url,
    Inline,
    InlineJpeg,
    Rejected,
}

#[derive(Clone)]
struct Stub {
    mode: StubMode,
    base: String,
    png: Arc<Vec<u8>>,
    last_body: Arc<Mutex<Option<Value>>>,
}

fn white_square_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(1024, 1024, image::Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn white_square_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(256, 256, image::Rgb([255, 255, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

async fn stub_generate(State(stub): State<Stub>, Json(body): Json<Value>) -> axum::response::Response {
    *stub.last_body.lock().unwrap() = Some(body);
    match stub.mode {
        StubMode::Url => Json(json!({
            "created": 1,
            "data": [{"url": format!("{}/files/square.png", stub.base)}]
        }))
        .into_response(),
        StubMode::Inline => Json(json!({
            "created": 1,
            "data": [{"b64_json": base64::engine::general_purpose::STANDARD.encode(stub.png.as_slice())}]
        }))
        .into_response(),
        StubMode::InlineJpeg => Json(json!({
            "created": 1,
            "data": [{"b64_json": base64::engine::general_purpose::STANDARD.encode(white_square_jpeg())}]
        }))
        .into_response(),
        StubMode::Rejected => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {
                "message": "Your request was rejected as a result of our safety system.",
                "type": "invalid_request_error"
            }})),
        )
            .into_response(),
    }
}

async fn stub_file(State(stub): State<Stub>) -> axum::response::Response {
    ([(header::CONTENT_TYPE, "image/png")], stub.png.to_vec()).into_response()
}

async fn spawn_stub(mode: StubMode) -> Stub {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let stub = Stub {
        mode,
        base,
        png: Arc::new(white_square_png()),
        last_body: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/v1/images/generations", post(stub_generate))
        .route("/files/square.png", get(stub_file))
        .with_state(stub.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    stub
}

struct TestApp {
    server: TestServer,
    stub: Stub,
    output: TempDir,
}

async fn test_app(mode: StubMode) -> TestApp {
    let stub = spawn_stub(mode).await;
    let output = tempfile::tempdir().unwrap();
    let vars: HashMap<&str, String> = HashMap::from([
        ("OPENAI_API_KEY", "sk-test".to_string()),
        ("OPENAI_BASE_URL", format!("{}/v1", stub.base)),
        ("OUTPUT_DIR", output.path().display().to_string()),
    ]);
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    let server = TestServer::new(router(AppState::new(config))).unwrap();
    TestApp {
        server,
        stub,
        output,
    }
}

fn filename_of(url: &str) -> &str {
    url.rsplit('/').next().unwrap()
}

fn assert_two_valued(bytes: &[u8]) {
    let img = image::load_from_memory(bytes).unwrap().to_rgb8();
    for pixel in img.pixels() {
        for channel in pixel.0 {
            assert!(channel == 0 || channel == 255, "gray level {channel} survived");
        }
    }
}

#[tokio::test]
async fn test_health() {
    let app = test_app(StubMode::Url).await;
    let response = app.server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generation_configured"], true);
    assert_eq!(body["printing_enabled"], false);
}

#[tokio::test]
async fn test_index_page() {
    let app = test_app(StubMode::Url).await;
    let response = app.server.get("/").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("/generate"));
}

#[tokio::test]
async fn test_generate_requires_subject() {
    let app = test_app(StubMode::Url).await;

    let response = app.server.post("/generate").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Subject is required");

    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "   "}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(app.stub.last_body.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_generate_fox_end_to_end() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "fox"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();

    assert_eq!(body["success"], true);
    let filename = body["filename"].as_str().unwrap();
    assert!(filename.starts_with("coloring_fox_"));
    assert!(filename.ends_with(".png"));
    assert_eq!(body["image_url"], format!("/output/{filename}"));
    assert_eq!(
        body["original_url"],
        format!("{}/files/square.png", app.stub.base)
    );
    assert_eq!(body["printed"], false);
    assert!(body["outline_url"].is_null());

    let sent = app.stub.last_body.lock().unwrap().clone().unwrap();
    assert_eq!(sent["n"], 1);
    assert_eq!(sent["size"], "1024x1024");
    assert_eq!(sent["quality"], "standard");
    assert!(sent["prompt"].as_str().unwrap().contains("coloring page of fox"));

    let original = app.server.get(body["image_url"].as_str().unwrap()).await;
    assert_eq!(original.status_code(), StatusCode::OK);
    assert_eq!(original.as_bytes().as_ref(), app.stub.png.as_slice());

    let enhanced_url = body["enhanced_url"].as_str().unwrap();
    assert!(filename_of(enhanced_url).ends_with("_enhanced.png"));
    let enhanced = app.server.get(enhanced_url).await;
    assert_eq!(enhanced.status_code(), StatusCode::OK);
    assert_two_valued(enhanced.as_bytes());
}

#[tokio::test]
async fn test_generate_with_outline_and_stub_print() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({
            "subject": "Cat & Dog!",
            "style": "cartoon",
            "detail_level": "extreme",
            "outline": true,
            "print": true
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();

    assert!(body["filename"].as_str().unwrap().starts_with("coloring_Cat_Dog_"));
    assert!(
        body["outline_url"]
            .as_str()
            .unwrap()
            .ends_with("_outline.png")
    );
    assert_eq!(body["printed"], true);
    assert!(body["print_message"].as_str().unwrap().contains("[STUB]"));
    assert!(
        body["print_message"]
            .as_str()
            .unwrap()
            .contains("_enhanced.png")
    );

    let prompt = app.stub.last_body.lock().unwrap().clone().unwrap()["prompt"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(prompt.contains("cartoon style"));
    assert!(prompt.contains("moderate amount of details"));
}

#[tokio::test]
async fn test_generate_inline_image() {
    let app = test_app(StubMode::Inline).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "owl", "enhance": false}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert!(body["original_url"].is_null());
    assert!(body["enhanced_url"].is_null());

    let filename = body["filename"].as_str().unwrap();
    let saved = std::fs::read(app.output.path().join(filename)).unwrap();
    assert_eq!(saved, *app.stub.png);
}

#[tokio::test]
async fn test_generate_converts_jpeg_payload() {
    let app = test_app(StubMode::InlineJpeg).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "heron", "outline": true}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();

    let filename = body["filename"].as_str().unwrap();
    let saved = std::fs::read(app.output.path().join(filename)).unwrap();
    assert_eq!(image::guess_format(&saved).unwrap(), image::ImageFormat::Png);
    assert!(body["enhanced_url"].as_str().unwrap().ends_with("_enhanced.png"));
    assert!(body["outline_url"].as_str().unwrap().ends_with("_outline.png"));
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let app = test_app(StubMode::Url).await;

    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": 5}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Request body has invalid fields");

    let response = app
        .server
        .post("/generate")
        .content_type("application/json")
        .bytes(axum::body::Bytes::from_static(b"{\"subject\":"))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], "Request body is not valid JSON");

    let response = app.server.post("/print").text("coloring_x.png").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Expected a JSON request body");

    let response = app.server.post("/alice").text("hello").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(app.stub.last_body.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_voice_webhook_without_version() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/alice")
        .json(&json!({"request": {"command": "привет"}}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["version"], "1.0");
    assert!(body["response"]["text"].as_str().unwrap().starts_with("Что нарисовать?"));
}

#[tokio::test]
async fn test_upstream_rejection_is_server_error() {
    let app = test_app(StubMode::Rejected).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "something odd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("safety system"));
    assert!(std::fs::read_dir(app.output.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_output_rejects_traversal() {
    let app = test_app(StubMode::Url).await;

    let response = app.server.get("/output/..%2F..%2Fetc%2Fpasswd").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = app.server.get("/output/..%5C..%5Cwindows%5Cwin.ini").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = app.server.get("/output/missing.png").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_print_endpoint() {
    let app = test_app(StubMode::Url).await;
    std::fs::write(app.output.path().join("coloring_x_20240101_000000.png"), white_square_png()).unwrap();

    let response = app
        .server
        .post("/print")
        .json(&json!({"filename": "coloring_x_20240101_000000.png"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().unwrap().contains("[STUB]"));

    let response = app
        .server
        .post("/print")
        .json(&json!({"filename": "../../etc/passwd"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = app
        .server
        .post("/print")
        .json(&json!({"filename": "nope.png"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = app.server.post("/print").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_gallery_after_generation() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/generate")
        .json(&json!({"subject": "whale"}))
        .await;
    let generated: Value = response.json();

    let response = app.server.get("/gallery").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let names: Vec<&str> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&generated["filename"].as_str().unwrap()));
    assert!(names.contains(&filename_of(generated["enhanced_url"].as_str().unwrap())));
}

#[tokio::test]
async fn test_voice_webhook_asks_again_without_keyword() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/alice")
        .json(&json!({
            "version": "1.0",
            "session": {"session_id": "s-1", "message_id": 0, "user_id": "u", "new": true},
            "request": {"command": "", "original_utterance": ""}
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["version"], "1.0");
    assert_eq!(body["session"]["session_id"], "s-1");
    assert_eq!(body["session"]["new"], true);
    assert!(body["response"]["text"].as_str().unwrap().starts_with("Что нарисовать?"));
    assert_eq!(body["response"]["end_session"], false);
    assert!(app.stub.last_body.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_voice_webhook_generates_and_prints() {
    let app = test_app(StubMode::Url).await;
    let response = app
        .server
        .post("/alice")
        .json(&json!({
            "version": "1.0",
            "session": {"session_id": "s-2", "message_id": 1, "user_id": "u"},
            "request": {"command": "сделай раскраску капибара", "original_utterance": "Сделай раскраску капибара"}
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["session"]["session_id"], "s-2");
    assert_eq!(
        body["response"]["text"],
        "Готово! Раскраска «капибара» отправлена на печать."
    );

    let prompt = app.stub.last_body.lock().unwrap().clone().unwrap()["prompt"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(prompt.contains("coloring page of капибара"));
}

#[tokio::test]
async fn test_voice_webhook_reports_generation_failure() {
    let app = test_app(StubMode::Rejected).await;
    let response = app
        .server
        .post("/alice")
        .json(&json!({
            "version": "1.0",
            "session": {"session_id": "s-3"},
            "request": {"command": "нарисуй дракона"}
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert!(body["response"]["text"].as_str().unwrap().starts_with("Не получилось"));
}
