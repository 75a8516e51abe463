use crate::config::LocalImageConfig;
use crate::image_sink::{
    ensure_image, extension_for, sanitize_file_name, ImageReference, ImageSink, ImageStoreError,
};
use crate::validation::ImageUpload;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Image sink writing into a publicly served directory.
///
/// References are root-relative paths: `{url_prefix}/{file_name}`.
pub struct LocalUploader {
    public_dir: PathBuf,
    url_prefix: String,
}

impl LocalUploader {
    pub fn new(config: &LocalImageConfig) -> Self {
        Self {
            public_dir: config.public_dir.clone(),
            url_prefix: config.route_prefix().to_string(),
        }
    }

    /// Create the public directory if it does not exist yet
    pub async fn prepare(&self) -> Result<(), ImageStoreError> {
        fs::create_dir_all(&self.public_dir)
            .await
            .map_err(|e| ImageStoreError::Write {
                path: self.public_dir.display().to_string(),
                message: e.to_string(),
            })?;

        info!(
            public_dir = %self.public_dir.display(),
            url_prefix = %self.url_prefix,
            "Local image storage initialized"
        );
        Ok(())
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    pub fn url_prefix(&self) -> &str {
        &self.url_prefix
    }

    /// Generate a collision-resistant file name.
    /// Format: {unix_millis}-{random}-{client stem}.{detected extension}
    pub fn generate_file_name(&self, image: &ImageUpload, now: DateTime<Utc>) -> String {
        let stem = match image.file_name.as_deref() {
            Some(name) if !name.trim().is_empty() => {
                let name = sanitize_file_name(name);
                match name.rsplit_once('.') {
                    Some((stem, _)) if !stem.is_empty() => stem.to_string(),
                    _ => name,
                }
            }
            _ => "image".to_string(),
        };
        let random = Uuid::new_v4().simple().to_string();

        format!(
            "{}-{}-{}.{}",
            now.timestamp_millis(),
            &random[..8],
            stem,
            extension_for(image)
        )
    }

    fn reference_for(&self, file_name: &str) -> ImageReference {
        ImageReference::new(format!("{}/{}", self.url_prefix, file_name))
    }

    fn file_name_from_reference<'a>(&self, reference: &'a ImageReference) -> Option<&'a str> {
        let name = reference
            .as_str()
            .strip_prefix(self.url_prefix.as_str())?
            .strip_prefix('/')?;

        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(name)
    }

    async fn write_atomically(&self, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let temp_path = target.with_extension("tmp");

        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, target).await
        }
        .await;

        if result.is_err() {
            if let Err(e) = fs::remove_file(&temp_path).await {
                debug!(temp_path = %temp_path.display(), error = %e, "Temp file cleanup skipped");
            }
        }

        result
    }
}

#[async_trait]
impl ImageSink for LocalUploader {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn store(&self, image: &ImageUpload) -> Result<ImageReference, ImageStoreError> {
        ensure_image(image)?;

        let file_name = self.generate_file_name(image, Utc::now());
        let target = self.public_dir.join(&file_name);
        let write_error = |e: std::io::Error| ImageStoreError::Write {
            path: target.display().to_string(),
            message: e.to_string(),
        };

        fs::create_dir_all(&self.public_dir).await.map_err(write_error)?;
        self.write_atomically(&target, &image.bytes)
            .await
            .map_err(write_error)?;

        let reference = self.reference_for(&file_name);

        info!(
            path = %target.display(),
            reference = %reference,
            size_bytes = image.len(),
            "Image written to public directory"
        );

        Ok(reference)
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn discard(&self, reference: &ImageReference) -> Result<(), ImageStoreError> {
        let file_name = self
            .file_name_from_reference(reference)
            .ok_or_else(|| ImageStoreError::ForeignReference(reference.to_string()))?;
        let path = self.public_dir.join(file_name);

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Image removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Image already absent");
                Ok(())
            }
            Err(e) => Err(ImageStoreError::Discard {
                reference: reference.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
