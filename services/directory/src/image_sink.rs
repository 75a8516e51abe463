//! Durable storage for uploaded school images.
//!
//! An [`ImageSink`] turns raw bytes into a public [`ImageReference`]. The
//! reference is only handed out once the bytes are fully written, so a
//! reference that reaches the database always points at existing content.

use crate::validation::ImageUpload;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while storing or discarding an image
#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("Failed to write image to {path}: {message}")]
    Write { path: String, message: String },

    #[error("Failed to upload image {key}: {message}")]
    Upload { key: String, message: String },

    #[error("Failed to discard image {reference}: {message}")]
    Discard { reference: String, message: String },

    #[error("Image reference {0} is not managed by this sink")]
    ForeignReference(String),

    #[error("Unsupported image content type: {0}")]
    UnsupportedType(String),
}

/// Public URL or root-relative path of a stored image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageReference(String);

impl ImageReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Destination for uploaded images
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageSink: Send + Sync {
    /// Persist the image and return where it can be fetched from.
    async fn store(&self, image: &ImageUpload) -> Result<ImageReference, ImageStoreError>;

    /// Remove a previously stored image.
    async fn discard(&self, reference: &ImageReference) -> Result<(), ImageStoreError>;
}

/// Content type an upload is stored and served with.
///
/// Uploads that are not an accepted image fall back to
/// `application/octet-stream`.
pub fn resolve_content_type(image: &ImageUpload) -> String {
    image
        .image_type()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// File extension used for a stored image, derived from its detected type
pub fn extension_for(image: &ImageUpload) -> String {
    let ext = match image.image_type() {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        Some("image/bmp") => "bmp",
        _ => "bin",
    };
    ext.to_string()
}

/// Reject uploads that are not an accepted image format
pub fn ensure_image(image: &ImageUpload) -> Result<(), ImageStoreError> {
    match image.image_type() {
        Some(_) => Ok(()),
        None => Err(ImageStoreError::UnsupportedType(
            image
                .content_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        )),
    }
}

/// Sanitize a client-supplied file name so it is safe as a single path segment
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let sanitized: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .take(100)
        .collect();

    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}
