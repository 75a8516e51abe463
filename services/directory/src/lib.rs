//! School Directory Service
//!
//! Accepts school registrations (six text fields plus one image) and serves
//! a public listing of every registered school.
//!
//! ## Features
//!
//! - **Validate before write**: every field is checked before any image is
//!   stored or any row is written
//! - **Pluggable image storage**: S3-compatible object storage or a locally
//!   served public directory
//! - **Per-call or pooled MySQL access** behind one storage trait
//! - **Client controllers**: the submission form state machine and the
//!   directory list view, independent of any UI toolkit
//!
//! ## Architecture
//!
//! ```text
//!  POST /schools                                     GET /schools
//!       │                                                 │
//!       ▼                                                 ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐ │
//! │ Multipart    │──▶│ Validator    │──▶│ Image Sink   │ │
//! │ Reader       │   └──────────────┘   │ (S3 / local) │ │
//! └──────────────┘                      └──────────────┘ │
//!                                              │         │
//!                                              ▼         ▼
//!                                       ┌──────────────────┐
//!                                       │ School Store     │
//!                                       │ (MySQL / memory) │
//!                                       └──────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod image_sink;
pub mod local_uploader;
pub mod mysql_store;
pub mod record_service;
pub mod s3_uploader;
pub mod school_store;
pub mod validation;

pub use api::{create_router, AppState};
pub use client::{DirectoryView, FormController, FormState, SchoolApi};
pub use config::Config;
pub use image_sink::{ImageReference, ImageSink, ImageStoreError};
pub use local_uploader::LocalUploader;
pub use mysql_store::{MySqlSchoolStore, PooledMySqlSchoolStore};
pub use record_service::{CreatedSchool, RecordError, RecordService};
pub use s3_uploader::S3Uploader;
pub use school_store::{InMemorySchoolStore, NewSchool, SchoolId, SchoolStore, SchoolSummary, StorageError};
pub use validation::{validate, ImageUpload, SchoolSubmission, ValidatedSchool, ValidationErrors};
