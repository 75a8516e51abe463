//! Client-side controllers for the submission form and the directory view.
//!
//! These are UI-agnostic state machines: a front end renders from
//! [`FormController::state`] and [`DirectoryView`] and feeds user actions
//! and clock ticks back in.

use crate::record_service::{CreatedSchool, RecordError, RecordService};
use crate::school_store::SchoolSummary;
use crate::validation::{validate, ImageUpload, SchoolSubmission, ValidationErrors};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long the success banner stays before the form resets
pub const SUCCESS_RESET_DELAY: Duration = Duration::from_secs(3);

pub const SUCCESS_MESSAGE: &str = "School added successfully!";
pub const FAILURE_MESSAGE: &str = "Failed to add school. Please try again.";
pub const LIST_FAILURE_MESSAGE: &str = "Failed to fetch schools. Please try again later.";

/// Transport used by the controllers to reach the directory service
#[async_trait]
pub trait SchoolApi: Send + Sync {
    async fn create_school(&self, submission: SchoolSubmission)
        -> Result<CreatedSchool, RecordError>;

    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, RecordError>;
}

#[async_trait]
impl SchoolApi for RecordService {
    async fn create_school(
        &self,
        submission: SchoolSubmission,
    ) -> Result<CreatedSchool, RecordError> {
        self.create_record(submission).await
    }

    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, RecordError> {
        self.list_records().await
    }
}

/// Editable form contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormDraft {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub contact: String,
    pub email_id: String,
    pub image: Option<ImageUpload>,
}

impl FormDraft {
    fn to_submission(&self) -> SchoolSubmission {
        SchoolSubmission {
            name: Some(self.name.clone()),
            address: Some(self.address.clone()),
            city: Some(self.city.clone()),
            state: Some(self.state.clone()),
            contact: Some(self.contact.clone()),
            email_id: Some(self.email_id.clone()),
            images: self.image.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormState {
    /// Form editable, submit enabled
    Idle,
    /// Request in flight, submit disabled
    Submitting,
    /// Confirmation shown until `reset_at`, then the form clears
    Success { message: String, reset_at: Instant },
    /// Error banner shown; form keeps its contents and stays editable
    Failure { message: String },
}

/// Returned when a submit is attempted in a state that does not allow it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitRejected {
    #[error("a submission is already in flight")]
    InFlight,
    #[error("the form is about to reset")]
    Resetting,
    #[error("the form has invalid fields")]
    Invalid(ValidationErrors),
}

#[derive(Debug, Clone)]
pub struct FormController {
    state: FormState,
    draft: FormDraft,
    field_errors: ValidationErrors,
}

impl Default for FormController {
    fn default() -> Self {
        Self::new()
    }
}

impl FormController {
    pub fn new() -> Self {
        Self {
            state: FormState::Idle,
            draft: FormDraft::default(),
            field_errors: ValidationErrors::new(),
        }
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn draft(&self) -> &FormDraft {
        &self.draft
    }

    /// Inline errors from the last client-side check
    pub fn field_errors(&self) -> &ValidationErrors {
        &self.field_errors
    }

    /// Banner text for the current state, if any
    pub fn status_message(&self) -> Option<&str> {
        match &self.state {
            FormState::Success { message, .. } | FormState::Failure { message } => Some(message),
            FormState::Idle | FormState::Submitting => None,
        }
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self.state, FormState::Submitting)
    }

    pub fn can_submit(&self) -> bool {
        matches!(self.state, FormState::Idle | FormState::Failure { .. })
    }

    /// Mutable access to the draft; `None` while a request is in flight
    pub fn draft_mut(&mut self) -> Option<&mut FormDraft> {
        if self.is_editable() {
            Some(&mut self.draft)
        } else {
            None
        }
    }

    /// Run client-side validation and, if it passes, enter `Submitting`.
    ///
    /// Returns the payload to send. On invalid input the state returns to
    /// `Idle` with `field_errors` populated and nothing is sent.
    pub fn begin_submit(&mut self) -> Result<SchoolSubmission, SubmitRejected> {
        match self.state {
            FormState::Submitting => return Err(SubmitRejected::InFlight),
            FormState::Success { .. } => return Err(SubmitRejected::Resetting),
            FormState::Idle | FormState::Failure { .. } => {}
        }

        let submission = self.draft.to_submission();
        if let Err(errors) = validate(&submission) {
            debug!(errors = %errors, "Client-side validation failed");
            self.field_errors = errors.clone();
            self.state = FormState::Idle;
            return Err(SubmitRejected::Invalid(errors));
        }

        self.field_errors = ValidationErrors::new();
        self.state = FormState::Submitting;
        Ok(submission)
    }

    /// Record the outcome of the in-flight request
    pub fn finish_submit(&mut self, outcome: Result<CreatedSchool, RecordError>, now: Instant) {
        if self.state != FormState::Submitting {
            warn!(state = ?self.state, "Submission outcome arrived with no request in flight");
            return;
        }

        self.state = match outcome {
            Ok(created) => {
                debug!(school_id = created.id, "Submission accepted");
                FormState::Success {
                    message: SUCCESS_MESSAGE.to_string(),
                    reset_at: now + SUCCESS_RESET_DELAY,
                }
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Submission failed");
                FormState::Failure {
                    message: FAILURE_MESSAGE.to_string(),
                }
            }
        };
    }

    /// Advance timers; clears the form once the success banner expires
    pub fn tick(&mut self, now: Instant) {
        if let FormState::Success { reset_at, .. } = self.state {
            if now >= reset_at {
                self.draft = FormDraft::default();
                self.field_errors = ValidationErrors::new();
                self.state = FormState::Idle;
            }
        }
    }

    /// Validate, send, and record the outcome in one step.
    ///
    /// The request runs to completion; there is no cancellation. The reset
    /// delay starts when the response arrives.
    pub async fn submit<A>(&mut self, api: &A) -> Result<(), SubmitRejected>
    where
        A: SchoolApi + ?Sized,
    {
        let submission = self.begin_submit()?;
        let outcome = api.create_school(submission).await;
        self.finish_submit(outcome, Instant::now());
        Ok(())
    }
}

/// State of the school listing view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryView {
    Loading,
    Empty,
    Loaded(Vec<SchoolSummary>),
    Failed(String),
}

impl DirectoryView {
    /// Fetch the listing and settle into the matching state
    pub async fn load<A>(api: &A) -> Self
    where
        A: SchoolApi + ?Sized,
    {
        match api.list_schools().await {
            Ok(schools) if schools.is_empty() => Self::Empty,
            Ok(schools) => Self::Loaded(schools),
            Err(e) => {
                warn!(error = %e, "Failed to load school directory");
                Self::Failed(LIST_FAILURE_MESSAGE.to_string())
            }
        }
    }

    pub fn schools(&self) -> &[SchoolSummary] {
        match self {
            Self::Loaded(schools) => schools,
            _ => &[],
        }
    }
}
