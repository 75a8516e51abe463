//! Storage gateway for the `schools` table.

use crate::image_sink::ImageReference;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// Server-assigned surrogate key
pub type SchoolId = u64;

/// Errors raised by the storage gateway
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to connect to database: {0}")]
    Connect(String),

    #[error("Database statement failed: {0}")]
    Query(String),

    #[error("Failed to run migrations: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => Self::Connect(error.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Row to insert; every column is required
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchool {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub contact: String,
    pub email_id: String,
    pub image: ImageReference,
}

/// Public projection of a school row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SchoolSummary {
    pub id: SchoolId,
    pub name: String,
    pub address: String,
    pub city: String,
    pub image: String,
}

/// Persistence for school records.
///
/// Each call executes exactly one statement.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchoolStore: Send + Sync {
    /// Insert a school and return its new id.
    async fn insert_school(&self, school: &NewSchool) -> Result<SchoolId, StorageError>;

    /// All schools in ascending id order, projected to the public columns.
    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, StorageError>;

    /// Verify the backing store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryTable {
    next_id: SchoolId,
    rows: Vec<(SchoolId, NewSchool)>,
}

/// Process-local store for development and tests
#[derive(Debug, Default)]
pub struct InMemorySchoolStore {
    table: Mutex<MemoryTable>,
}

impl InMemorySchoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rows, including the columns the public projection hides
    pub fn rows(&self) -> Vec<(SchoolId, NewSchool)> {
        self.lock().rows.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryTable> {
        // A panic while holding the lock cannot leave a row half-written.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SchoolStore for InMemorySchoolStore {
    async fn insert_school(&self, school: &NewSchool) -> Result<SchoolId, StorageError> {
        let mut table = self.lock();
        table.next_id += 1;
        let id = table.next_id;
        table.rows.push((id, school.clone()));

        debug!(school_id = id, "School inserted into memory store");
        Ok(id)
    }

    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, StorageError> {
        let table = self.lock();
        Ok(table
            .rows
            .iter()
            .map(|(id, school)| SchoolSummary {
                id: *id,
                name: school.name.clone(),
                address: school.address.clone(),
                city: school.city.clone(),
                image: school.image.to_string(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
