use crate::image_sink::{ImageReference, ImageSink, ImageStoreError};
use crate::school_store::{NewSchool, SchoolId, SchoolStore, SchoolSummary, StorageError};
use crate::validation::{validate, SchoolSubmission, ValidationErrors};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

/// Errors that can occur while creating or listing records
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Image is required.")]
    MissingImage,

    #[error("Submission rejected: {0}")]
    Validation(ValidationErrors),

    #[error("Image storage failed: {0}")]
    ImageStore(#[from] ImageStoreError),

    #[error("Database operation failed: {0}")]
    Storage(#[from] StorageError),
}

impl RecordError {
    /// Machine-readable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingImage => "missing_image",
            Self::Validation(_) => "validation",
            Self::ImageStore(_) => "image_store",
            Self::Storage(_) => "storage",
        }
    }
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSchool {
    pub id: SchoolId,
    pub image_reference: ImageReference,
}

/// Orchestrates the write path (validate, store image, insert row) and the
/// read path (projected listing).
pub struct RecordService {
    images: Arc<dyn ImageSink>,
    store: Arc<dyn SchoolStore>,
    cleanup_orphans: bool,
}

impl RecordService {
    pub fn new(images: Arc<dyn ImageSink>, store: Arc<dyn SchoolStore>) -> Self {
        Self {
            images,
            store,
            cleanup_orphans: true,
        }
    }

    /// Whether to delete the stored image when the row insert fails
    pub fn with_orphan_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_orphans = enabled;
        self
    }

    /// Validate, store the image, then insert the row.
    ///
    /// Each stage runs only after the previous one has completed; a failure
    /// stops the pipeline before any later side effect.
    #[instrument(skip(self, submission), fields(name = ?submission.name))]
    pub async fn create_record(
        &self,
        submission: SchoolSubmission,
    ) -> Result<CreatedSchool, RecordError> {
        if submission.images.is_empty() {
            warn!(stage = "parse", "Submission rejected: no image attached");
            metrics::counter!("directory.submissions.rejected", "reason" => "missing_image")
                .increment(1);
            return Err(RecordError::MissingImage);
        }

        let school = validate(&submission).map_err(|errors| {
            warn!(stage = "validate", errors = %errors, "Submission rejected");
            metrics::counter!("directory.submissions.rejected", "reason" => "validation")
                .increment(1);
            RecordError::Validation(errors)
        })?;

        let image_reference = self.images.store(&school.image).await.map_err(|e| {
            error!(stage = "image_store", error = %e, "Failed to store school image");
            metrics::counter!("directory.images.failures").increment(1);
            e
        })?;
        metrics::counter!("directory.images.stored").increment(1);

        let row = NewSchool {
            name: school.name,
            address: school.address,
            city: school.city,
            state: school.state,
            contact: school.contact,
            email_id: school.email_id,
            image: image_reference.clone(),
        };

        let id = match self.store.insert_school(&row).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    stage = "insert",
                    error = %e,
                    image = %image_reference,
                    "Failed to insert school record"
                );
                metrics::counter!("directory.storage.failures").increment(1);
                self.release_orphan(&image_reference).await;
                return Err(e.into());
            }
        };

        metrics::counter!("directory.schools.created").increment(1);
        info!(school_id = id, image = %image_reference, "School record created");

        Ok(CreatedSchool {
            id,
            image_reference,
        })
    }

    /// List all schools, projected to the public columns
    #[instrument(skip(self))]
    pub async fn list_records(&self) -> Result<Vec<SchoolSummary>, RecordError> {
        self.store.list_schools().await.map_err(|e| {
            error!(stage = "list", error = %e, "Failed to list schools");
            metrics::counter!("directory.storage.failures").increment(1);
            RecordError::from(e)
        })
    }

    /// Check the backing store is reachable
    pub async fn ping(&self) -> Result<(), RecordError> {
        Ok(self.store.ping().await?)
    }

    async fn release_orphan(&self, reference: &ImageReference) {
        metrics::counter!("directory.images.orphaned").increment(1);

        if !self.cleanup_orphans {
            warn!(image = %reference, "Leaving orphaned image in place");
            return;
        }

        match self.images.discard(reference).await {
            Ok(()) => info!(image = %reference, "Discarded orphaned image"),
            Err(e) => warn!(image = %reference, error = %e, "Failed to discard orphaned image"),
        }
    }
}
