use crate::config::{ApiConfig, LocalImageConfig};
use crate::record_service::{RecordError, RecordService};
use crate::school_store::{SchoolId, SchoolSummary};
use crate::validation::{ImageUpload, SchoolSubmission, ValidationErrors, IMAGE_REQUIRED_MESSAGE};
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<RecordService>,
}

/// Successful submission response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchoolResponse {
    pub success: bool,
    pub message: String,
    pub id: SchoolId,
    pub image_reference: String,
}

/// School listing response
#[derive(Debug, Serialize)]
pub struct SchoolListResponse {
    pub schools: Vec<SchoolSummary>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<ValidationErrors>,
}

/// Error returned by a handler: status plus JSON body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: &str, kind: &str) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.to_string(),
                kind: kind.to_string(),
                details: None,
                fields: None,
            },
        }
    }

    fn with_details(mut self, details: &str) -> Self {
        self.body.details = Some(details.to_string());
        self
    }

    /// Map a write-path failure. Internal messages stay in the logs.
    fn from_create(error: RecordError) -> Self {
        let kind = error.kind();
        match error {
            RecordError::MissingImage => {
                Self::new(StatusCode::BAD_REQUEST, IMAGE_REQUIRED_MESSAGE, kind)
            }
            RecordError::Validation(fields) => {
                let mut api_error = Self::new(StatusCode::BAD_REQUEST, "Validation failed.", kind);
                api_error.body.fields = Some(fields);
                api_error
            }
            RecordError::ImageStore(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add school", kind)
                    .with_details("The school image could not be stored.")
            }
            RecordError::Storage(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to add school", kind)
                    .with_details("The school record could not be saved.")
            }
        }
    }

    fn from_list(error: RecordError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch schools",
            error.kind(),
        )
        .with_details("The school directory could not be read.")
    }

    fn from_multipart(status: StatusCode) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(status, "Upload exceeds the size limit.", "payload_too_large")
        } else {
            Self::new(
                StatusCode::BAD_REQUEST,
                "Malformed multipart request.",
                "bad_request",
            )
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        warn!(error = %error, "Failed to read multipart body");
        Self::from_multipart(error.status())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!(error = %rejection, "Rejected non-multipart submission");
        Self::from_multipart(rejection.status())
    }
}

/// Create the API router.
///
/// When images are stored locally, their public directory is served under
/// the configured URL prefix so stored references resolve.
pub fn create_router(
    state: AppState,
    config: &ApiConfig,
    public_images: Option<&LocalImageConfig>,
) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/schools", get(list_schools).post(create_school));

    if let Some(images) = public_images {
        router = router.nest_service(images.route_prefix(), ServeDir::new(&images.public_dir));
    }

    router
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "school-directory"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.records.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

/// List all registered schools
#[instrument(skip(state))]
async fn list_schools(
    State(state): State<AppState>,
) -> Result<Json<SchoolListResponse>, ApiError> {
    let schools = state
        .records
        .list_records()
        .await
        .map_err(ApiError::from_list)?;

    Ok(Json(SchoolListResponse { schools }))
}

/// Register a new school from a multipart form
#[instrument(skip(state, multipart))]
async fn create_school(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CreateSchoolResponse>, ApiError> {
    let submission = read_submission(multipart?).await?;

    let created = state
        .records
        .create_record(submission)
        .await
        .map_err(ApiError::from_create)?;

    Ok(Json(CreateSchoolResponse {
        success: true,
        message: "School added successfully!".to_string(),
        id: created.id,
        image_reference: created.image_reference.into_string(),
    }))
}

/// Collect the text fields and image parts of a multipart body
async fn read_submission(mut multipart: Multipart) -> Result<SchoolSubmission, MultipartError> {
    let mut submission = SchoolSubmission::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == "image" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;

            // An empty file input still sends a part, with no name and no bytes
            if file_name.as_deref().map_or(true, str::is_empty) && bytes.is_empty() {
                continue;
            }

            submission.images.push(ImageUpload {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await?;
            if !submission.set_field(&name, value) {
                debug!(field = %name, "Ignoring unknown form field");
            }
        }
    }

    Ok(submission)
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    router: Router,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting directory API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
