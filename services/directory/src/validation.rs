//! Submission validation shared by the server and the client form controller.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// One uploaded image as received from a multipart form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    /// Original file name supplied by the client
    pub file_name: Option<String>,
    /// Declared content type
    pub content_type: Option<String>,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Accepted image type of this upload, if it is one.
    ///
    /// A recognised signature in the bytes wins. Otherwise the declared
    /// type must name an accepted format, or the file extension when no
    /// type was declared.
    pub fn image_type(&self) -> Option<&'static str> {
        sniff_image_type(&self.bytes).or_else(|| self.declared_image_type())
    }

    fn declared_image_type(&self) -> Option<&'static str> {
        let declared = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| !ct.is_empty() && !ct.eq_ignore_ascii_case("application/octet-stream"));

        match declared {
            Some(ct) => accepted_image_type(ct),
            None => self
                .file_name
                .as_deref()
                .and_then(file_extension)
                .and_then(|ext| image_type_for_extension(&ext)),
        }
    }
}

/// Image formats accepted for upload
pub const ACCEPTED_IMAGE_TYPES: [&str; 5] =
    ["image/jpeg", "image/png", "image/webp", "image/gif", "image/bmp"];

fn accepted_image_type(content_type: &str) -> Option<&'static str> {
    if content_type.eq_ignore_ascii_case("image/jpg") {
        return Some("image/jpeg");
    }
    ACCEPTED_IMAGE_TYPES
        .iter()
        .copied()
        .find(|accepted| accepted.eq_ignore_ascii_case(content_type))
}

fn image_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        [b'B', b'M', ..] => Some("image/bmp"),
        _ => None,
    }
}

/// Lowercased extension of a file name, if it has a plain alphanumeric one
fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Candidate school record before validation.
///
/// Text fields are `None` when the form did not contain them at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchoolSubmission {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub contact: Option<String>,
    pub email_id: Option<String>,
    pub images: Vec<ImageUpload>,
}

impl SchoolSubmission {
    /// Set a text field by its form name. Unknown names are ignored.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "name" => &mut self.name,
            "address" => &mut self.address,
            "city" => &mut self.city,
            "state" => &mut self.state,
            "contact" => &mut self.contact,
            "email_id" => &mut self.email_id,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Submission that passed every rule, with text fields trimmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSchool {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub contact: String,
    pub email_id: String,
    pub image: ImageUpload,
}

/// Field name to human-readable violation
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
#[error("invalid fields: {}", joined_fields(.0))]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }
}

pub const NAME_MESSAGE: &str = "Name must be at least 3 characters.";
pub const ADDRESS_MESSAGE: &str = "Address is required.";
pub const CITY_MESSAGE: &str = "City is required.";
pub const STATE_MESSAGE: &str = "State is required.";
pub const CONTACT_MESSAGE: &str = "Contact must be a 10-digit number.";
pub const EMAIL_MESSAGE: &str = "Invalid email address.";
pub const IMAGE_REQUIRED_MESSAGE: &str = "Image is required.";
pub const IMAGE_COUNT_MESSAGE: &str = "Only one image may be uploaded.";
pub const IMAGE_TYPE_MESSAGE: &str = "Image must be a JPEG, PNG, WebP, GIF or BMP file.";

/// Check a submission against every field rule.
///
/// All rules run, so the error map names every failing field at once.
pub fn validate(submission: &SchoolSubmission) -> Result<ValidatedSchool, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let name = normalized(&submission.name);
    let address = normalized(&submission.address);
    let city = normalized(&submission.city);
    let state = normalized(&submission.state);
    let contact = normalized(&submission.contact);
    let email_id = normalized(&submission.email_id);

    if name.chars().count() < 3 {
        errors.add("name", NAME_MESSAGE);
    }
    if address.chars().count() < 5 {
        errors.add("address", ADDRESS_MESSAGE);
    }
    if city.chars().count() < 2 {
        errors.add("city", CITY_MESSAGE);
    }
    if state.chars().count() < 2 {
        errors.add("state", STATE_MESSAGE);
    }
    if !is_valid_contact(&contact) {
        errors.add("contact", CONTACT_MESSAGE);
    }
    if !is_valid_email(&email_id) {
        errors.add("email_id", EMAIL_MESSAGE);
    }

    match submission.images.as_slice() {
        [image] if image.is_empty() => errors.add("image", IMAGE_REQUIRED_MESSAGE),
        [image] if image.image_type().is_none() => errors.add("image", IMAGE_TYPE_MESSAGE),
        [_] => {}
        [] => errors.add("image", IMAGE_REQUIRED_MESSAGE),
        _ => errors.add("image", IMAGE_COUNT_MESSAGE),
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedSchool {
        name,
        address,
        city,
        state,
        contact,
        email_id,
        image: submission.images[0].clone(),
    })
}

fn joined_fields(errors: &BTreeMap<&'static str, String>) -> String {
    errors.keys().copied().collect::<Vec<_>>().join(", ")
}

fn normalized(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Exactly ten ASCII digits, no separators
pub fn is_valid_contact(contact: &str) -> bool {
    contact.len() == 10 && contact.bytes().all(|b| b.is_ascii_digit())
}

/// `local@domain` where the domain has at least one dot and no empty labels
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }

    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    })
}
