use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use school_directory::config::{ApiConfig, LocalImageConfig};
use school_directory::{
    create_router, AppState, ImageReference, ImageSink, ImageStoreError, ImageUpload,
    InMemorySchoolStore, LocalUploader, NewSchool, RecordService, SchoolId, SchoolStore,
    SchoolSummary, StorageError,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "directory-test-boundary";

const PNG_BYTES: &[u8] = &[
    0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 13, b'I', b'H', b'D', b'R',
];

const GREENWOOD: &[(&str, &str)] = &[
    ("name", "Greenwood High"),
    ("address", "12 Oak Street"),
    ("city", "Springfield"),
    ("state", "IL"),
    ("contact", "5551234567"),
    ("email_id", "admin@greenwood.edu"),
];

struct TestApp {
    router: Router,
    store: Arc<InMemorySchoolStore>,
    dir: TempDir,
}

fn local_config(dir: &TempDir) -> LocalImageConfig {
    LocalImageConfig {
        public_dir: dir.path().join("uploads"),
        url_prefix: "/uploads".to_string(),
    }
}

fn app_with(api: ApiConfig) -> TestApp {
    let dir = TempDir::new().unwrap();
    let local = local_config(&dir);
    let store = Arc::new(InMemorySchoolStore::new());
    let records = RecordService::new(Arc::new(LocalUploader::new(&local)), store.clone());
    let router = create_router(
        AppState {
            records: Arc::new(records),
        },
        &api,
        Some(&local),
    );

    TestApp { router, store, dir }
}

fn app() -> TestApp {
    app_with(ApiConfig::default())
}

/// Image sink that always fails and counts attempts
#[derive(Default)]
struct FailingSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl ImageSink for FailingSink {
    async fn store(&self, _image: &ImageUpload) -> Result<ImageReference, ImageStoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ImageStoreError::Upload {
            key: "schools/greenwood.png".to_string(),
            message: "service unavailable".to_string(),
        })
    }

    async fn discard(&self, reference: &ImageReference) -> Result<(), ImageStoreError> {
        Err(ImageStoreError::ForeignReference(reference.to_string()))
    }
}

const DRIVER_MESSAGE: &str =
    "Access denied for user 'directory'@'10.0.0.7' (using password: YES)";

/// Store whose database is unreachable
struct UnreachableStore;

#[async_trait]
impl SchoolStore for UnreachableStore {
    async fn insert_school(&self, _school: &NewSchool) -> Result<SchoolId, StorageError> {
        Err(StorageError::Connect(DRIVER_MESSAGE.to_string()))
    }

    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, StorageError> {
        Err(StorageError::Connect(DRIVER_MESSAGE.to_string()))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::Connect(DRIVER_MESSAGE.to_string()))
    }
}

fn unreachable_store_app(dir: &TempDir) -> Router {
    let local = local_config(dir);
    let records = RecordService::new(
        Arc::new(LocalUploader::new(&local)),
        Arc::new(UnreachableStore),
    );
    create_router(
        AppState {
            records: Arc::new(records),
        },
        &ApiConfig::default(),
        Some(&local),
    )
}

fn multipart_body(fields: &[(&str, &str)], image: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();

    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }

    if let Some((file_name, content_type, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn post_schools(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/schools")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, bytes) = send(router, request).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn with_field<'a>(name: &'a str, value: &'a str) -> Vec<(&'a str, &'a str)> {
    GREENWOOD
        .iter()
        .map(|&(k, v)| if k == name { (k, value) } else { (k, v) })
        .collect()
}

fn uploaded_files(app: &TestApp) -> usize {
    std::fs::read_dir(app.dir.path().join("uploads"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_submit_and_list_school() {
    let app = app();

    let body = multipart_body(GREENWOOD, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "School added successfully!");
    assert!(json["id"].as_u64().unwrap() > 0);
    let reference = json["imageReference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("/uploads/"));

    let (status, json) = send_json(&app.router, get("/schools")).await;
    assert_eq!(status, StatusCode::OK);
    let schools = json["schools"].as_array().unwrap();
    assert_eq!(schools.len(), 1);
    assert_eq!(schools[0]["name"], "Greenwood High");
    assert_eq!(schools[0]["address"], "12 Oak Street");
    assert_eq!(schools[0]["city"], "Springfield");
    assert_eq!(schools[0]["image"], reference.as_str());
    assert!(schools[0].get("contact").is_none());
    assert!(schools[0].get("email_id").is_none());
    assert!(schools[0].get("state").is_none());

    // The stored reference resolves to the uploaded bytes
    let (status, bytes) = send(&app.router, get(&reference)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, PNG_BYTES);
}

#[tokio::test]
async fn test_separator_contact_is_rejected() {
    let app = app();

    let fields = with_field("contact", "555-123-4567");
    let body = multipart_body(&fields, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert_eq!(json["fields"]["contact"], "Contact must be a 10-digit number.");
    assert!(json["fields"].get("name").is_none());

    let (_, json) = send_json(&app.router, get("/schools")).await;
    assert_eq!(json["schools"], serde_json::json!([]));
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_invalid_email_is_rejected() {
    let app = app();

    let fields = with_field("email_id", "not-an-email");
    let body = multipart_body(&fields, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["fields"]["email_id"], "Invalid email address.");
}

#[tokio::test]
async fn test_missing_image_is_rejected() {
    let app = app();

    let body = multipart_body(GREENWOOD, None);
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Image is required.");
    assert_eq!(json["kind"], "missing_image");
    assert!(app.store.rows().is_empty());
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_empty_file_input_counts_as_missing() {
    let app = app();

    let body = multipart_body(GREENWOOD, Some(("", "application/octet-stream", b"")));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Image is required.");
}

#[tokio::test]
async fn test_zero_byte_named_file_fails_validation() {
    let app = app();

    let body = multipart_body(GREENWOOD, Some(("blank.png", "image/png", b"")));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert_eq!(json["fields"]["image"], "Image is required.");
}

#[tokio::test]
async fn test_image_store_failure_writes_no_row() {
    let sink = Arc::new(FailingSink::default());
    let store = Arc::new(InMemorySchoolStore::new());
    let records = RecordService::new(sink.clone(), store.clone());
    let router = create_router(
        AppState {
            records: Arc::new(records),
        },
        &ApiConfig::default(),
        None,
    );

    let body = multipart_body(GREENWOOD, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, json) = send_json(&router, post_schools(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "Failed to add school");
    assert_eq!(json["kind"], "image_store");
    assert!(json["details"].is_string());
    assert!(!json.to_string().contains("service unavailable"));
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    assert!(store.list_schools().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_failure_hides_driver_message() {
    let dir = TempDir::new().unwrap();
    let router = unreachable_store_app(&dir);

    let (status, bytes) = send(&router, get("/schools")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Failed to fetch schools");
    assert_eq!(json["kind"], "storage");
    assert!(json["details"].is_string());

    let body = String::from_utf8(bytes).unwrap();
    assert!(!body.contains("Access denied"));
    assert!(!body.contains("10.0.0.7"));
}

#[tokio::test]
async fn test_insert_failure_discards_stored_image() {
    let dir = TempDir::new().unwrap();
    let router = unreachable_store_app(&dir);

    let body = multipart_body(GREENWOOD, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, bytes) = send(&router, post_schools(body)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["kind"], "storage");
    assert!(!String::from_utf8(bytes).unwrap().contains("Access denied"));

    let remaining = std::fs::read_dir(dir.path().join("uploads"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(remaining, 0);
}

#[tokio::test]
async fn test_readiness_fails_when_store_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let router = unreachable_store_app(&dir);

    let (status, bytes) = send(&router, get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "not_ready");
    assert!(!String::from_utf8(bytes).unwrap().contains("Access denied"));

    // Liveness does not depend on the store
    let (status, _) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_html_upload_is_rejected_and_not_published() {
    let app = app();

    let page: &[u8] = b"<html><script>alert(document.cookie)</script></html>";
    let body = multipart_body(GREENWOOD, Some(("x.html", "text/html", page)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert_eq!(
        json["fields"]["image"],
        "Image must be a JPEG, PNG, WebP, GIF or BMP file."
    );
    assert!(app.store.rows().is_empty());
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_svg_upload_is_rejected() {
    let app = app();

    let svg: &[u8] = br#"<svg xmlns="http://www.w3.org/2000/svg"><script>alert(1)</script></svg>"#;
    let body = multipart_body(GREENWOOD, Some(("logo.svg", "image/svg+xml", svg)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "validation");
    assert!(json["fields"]["image"].is_string());
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_stored_extension_follows_image_content() {
    let app = app();

    let body = multipart_body(GREENWOOD, Some(("x.html", "text/html", PNG_BYTES)));
    let (status, json) = send_json(&app.router, post_schools(body)).await;
    assert_eq!(status, StatusCode::OK);

    let reference = json["imageReference"].as_str().unwrap().to_string();
    assert!(reference.ends_with("-x.png"), "{reference}");

    let response = app.router.clone().oneshot(get(&reference)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
}

#[tokio::test]
async fn test_empty_directory_lists_empty_array() {
    let app = app();

    let (status, json) = send_json(&app.router, get("/schools")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({ "schools": [] }));
}

#[tokio::test]
async fn test_listing_is_stable_across_reads() {
    let app = app();

    for name in ["Greenwood High", "Lakeside Academy", "Hillcrest School"] {
        let fields = with_field("name", name);
        let body = multipart_body(&fields, Some(("logo.jpg", "image/jpeg", PNG_BYTES)));
        let (status, _) = send(&app.router, post_schools(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, first) = send_json(&app.router, get("/schools")).await;
    let (_, second) = send_json(&app.router, get("/schools")).await;
    assert_eq!(first, second);

    let names: Vec<_> = first["schools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Greenwood High", "Lakeside Academy", "Hillcrest School"]);
}

#[tokio::test]
async fn test_unknown_fields_are_ignored() {
    let app = app();

    let mut fields = GREENWOOD.to_vec();
    fields.push(("website", "https://greenwood.edu"));
    let body = multipart_body(&fields, Some(("greenwood.png", "image/png", PNG_BYTES)));
    let (status, _) = send(&app.router, post_schools(body)).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_non_multipart_body_is_rejected() {
    let app = app();

    let request = Request::builder()
        .method("POST")
        .uri("/schools")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"Greenwood High"}"#))
        .unwrap();
    let (status, json) = send_json(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "bad_request");
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let app = app_with(ApiConfig {
        max_upload_bytes: 1024,
        ..ApiConfig::default()
    });

    let large = vec![7u8; 8 * 1024];
    let body = multipart_body(GREENWOOD, Some(("huge.png", "image/png", &large)));
    let (status, _) = send(&app.router, post_schools(body)).await;

    assert!(status.is_client_error());
    assert!(app.store.rows().is_empty());
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = app();

    let (status, json) = send_json(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");

    let (status, json) = send_json(&app.router, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ready");
}
