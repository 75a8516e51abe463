use crate::config::S3Config;
use crate::image_sink::{
    ensure_image, extension_for, resolve_content_type, ImageReference, ImageSink, ImageStoreError,
};
use crate::validation::ImageUpload;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// S3 uploader for school images
pub struct S3Uploader {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3Uploader {
    /// Create a new S3 uploader
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            folder = %config.folder,
            "S3 uploader initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        }
    }

    /// Generate the object key for an image.
    /// Format: {folder}/{date}/{time}_{id}.{ext}
    ///
    /// The date prefix keeps listings and lifecycle rules cheap; the random
    /// id keeps concurrent uploads of the same file apart.
    pub fn generate_s3_key(&self, image: &ImageUpload, now: DateTime<Utc>, id: Uuid) -> String {
        format!(
            "{folder}/{date}/{time}_{id}.{ext}",
            folder = self.config.folder.trim_matches('/'),
            date = now.format("%Y-%m-%d"),
            time = now.format("%H%M%S%3f"),
            id = id.simple(),
            ext = extension_for(image),
        )
    }

    /// Public URL an object key is served under
    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.config, key)
    }

    fn key_from_reference<'a>(&self, reference: &'a ImageReference) -> Option<&'a str> {
        let base = public_url(&self.config, "");
        reference
            .as_str()
            .strip_prefix(base.as_str())
            .filter(|key| !key.is_empty())
    }

    /// Simple single-part upload for small images
    async fn simple_upload(
        &self,
        image: &ImageUpload,
        s3_key: &str,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        let checksum = STANDARD.encode(Sha256::digest(&image.bytes));
        let body = ByteStream::from(image.bytes.clone());

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .body(body)
            .content_type(content_type)
            .checksum_sha256(checksum);

        if let Some(ref name) = image.file_name {
            request = request.metadata("original-name", ascii_metadata(name));
        }

        request
            .send()
            .await
            .map_err(|e| upload_error(s3_key, e))?;

        Ok(())
    }

    /// Multipart upload for large images
    async fn multipart_upload(
        &self,
        image: &ImageUpload,
        s3_key: &str,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(s3_key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| upload_error(s3_key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| ImageStoreError::Upload {
                key: s3_key.to_string(),
                message: "No upload ID in response".to_string(),
            })?
            .to_string();

        match self.upload_parts(image, s3_key, &upload_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Release the parts uploaded so far
                if let Err(abort_error) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(s3_key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(s3_key = %s3_key, error = %abort_error, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        image: &ImageUpload,
        s3_key: &str,
        upload_id: &str,
    ) -> Result<(), ImageStoreError> {
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        for chunk in image.bytes.chunks(self.config.part_size_bytes) {
            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(s3_key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| upload_error(s3_key, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(s3_key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| upload_error(s3_key, e))?;

        Ok(())
    }
}

#[async_trait]
impl ImageSink for S3Uploader {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn store(&self, image: &ImageUpload) -> Result<ImageReference, ImageStoreError> {
        ensure_image(image)?;

        let s3_key = self.generate_s3_key(image, Utc::now(), Uuid::new_v4());
        let content_type = resolve_content_type(image);

        debug!(
            s3_key = %s3_key,
            content_type = %content_type,
            "Uploading image to S3"
        );

        if image.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(image, &s3_key, &content_type).await?;
        } else {
            self.simple_upload(image, &s3_key, &content_type).await?;
        }

        let reference = ImageReference::new(self.public_url(&s3_key));

        info!(
            s3_key = %s3_key,
            size_bytes = image.len(),
            "Image uploaded successfully"
        );

        Ok(reference)
    }

    #[instrument(skip(self), fields(reference = %reference))]
    async fn discard(&self, reference: &ImageReference) -> Result<(), ImageStoreError> {
        let s3_key = self
            .key_from_reference(reference)
            .ok_or_else(|| ImageStoreError::ForeignReference(reference.to_string()))?;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(s3_key)
            .send()
            .await
            .map_err(|e| ImageStoreError::Discard {
                reference: reference.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        debug!(s3_key = %s3_key, "Image deleted from S3");
        Ok(())
    }
}

/// Public URL for a key: the configured base URL, or the virtual-hosted S3 URL
fn public_url(config: &S3Config, key: &str) -> String {
    match config.public_base_url.as_deref() {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    }
}

fn upload_error(s3_key: &str, error: impl std::error::Error) -> ImageStoreError {
    ImageStoreError::Upload {
        key: s3_key.to_string(),
        message: DisplayErrorContext(error).to_string(),
    }
}

/// S3 user metadata must be ASCII
fn ascii_metadata(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect()
}
