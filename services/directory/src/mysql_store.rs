use crate::config::DatabaseConfig;
use crate::school_store::{NewSchool, SchoolId, SchoolStore, SchoolSummary, StorageError};
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions};
use sqlx::{Connection, Executor};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const INSERT_SCHOOL: &str = r#"
    INSERT INTO schools (name, address, city, state, contact, email_id, image)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

const LIST_SCHOOLS: &str = r#"
    SELECT id, name, address, city, image
    FROM schools
    ORDER BY id ASC
"#;

/// Build MySQL connect options from the service configuration
pub fn connect_options(config: &DatabaseConfig) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.name);

    match config.password.as_deref() {
        Some(password) => options.password(password),
        None => options,
    }
}

async fn insert_with<'e, E>(executor: E, school: &NewSchool) -> Result<SchoolId, sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    let result = sqlx::query(INSERT_SCHOOL)
        .bind(&school.name)
        .bind(&school.address)
        .bind(&school.city)
        .bind(&school.state)
        .bind(&school.contact)
        .bind(&school.email_id)
        .bind(school.image.as_str())
        .execute(executor)
        .await?;

    Ok(result.last_insert_id())
}

async fn list_with<'e, E>(executor: E) -> Result<Vec<SchoolSummary>, sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    sqlx::query_as::<_, SchoolSummary>(LIST_SCHOOLS)
        .fetch_all(executor)
        .await
}

/// MySQL store that opens a fresh connection for every statement.
///
/// Connect, execute, close: nothing is held between calls, so each request
/// pays the full handshake.
pub struct MySqlSchoolStore {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl MySqlSchoolStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        info!(
            host = %config.host,
            port = config.port,
            database = %config.name,
            "Using per-call MySQL connections"
        );

        Self {
            options: connect_options(config),
            connect_timeout: config.connect_timeout(),
        }
    }

    async fn connect(&self) -> Result<MySqlConnection, StorageError> {
        tokio::time::timeout(self.connect_timeout, MySqlConnection::connect_with(&self.options))
            .await
            .map_err(|_| {
                StorageError::Connect(format!("timed out after {:?}", self.connect_timeout))
            })?
            .map_err(|e| StorageError::Connect(e.to_string()))
    }

    async fn release(connection: MySqlConnection) {
        if let Err(e) = connection.close().await {
            warn!(error = %e, "Failed to close database connection cleanly");
        }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running database migrations");

        let mut connection = self.connect().await?;
        let result = MIGRATOR.run(&mut connection).await;
        Self::release(connection).await;
        result.map_err(|e| StorageError::Migration(e.to_string()))?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl SchoolStore for MySqlSchoolStore {
    #[instrument(skip(self, school), fields(name = %school.name))]
    async fn insert_school(&self, school: &NewSchool) -> Result<SchoolId, StorageError> {
        let mut connection = self.connect().await?;
        let result = insert_with(&mut connection, school).await;
        Self::release(connection).await;

        let id = result?;
        debug!(school_id = id, "School inserted");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, StorageError> {
        let mut connection = self.connect().await?;
        let result = list_with(&mut connection).await;
        Self::release(connection).await;

        Ok(result?)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut connection = self.connect().await?;
        let result = connection.ping().await;
        Self::release(connection).await;

        Ok(result?)
    }
}

/// MySQL store backed by a connection pool
pub struct PooledMySqlSchoolStore {
    pool: MySqlPool,
}

impl PooledMySqlSchoolStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(connect_options(config))
            .await
            .map_err(|e| StorageError::Connect(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Connected to MySQL database"
        );

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running database migrations");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl SchoolStore for PooledMySqlSchoolStore {
    #[instrument(skip(self, school), fields(name = %school.name))]
    async fn insert_school(&self, school: &NewSchool) -> Result<SchoolId, StorageError> {
        let id = insert_with(&self.pool, school).await?;
        debug!(school_id = id, "School inserted");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn list_schools(&self) -> Result<Vec<SchoolSummary>, StorageError> {
        Ok(list_with(&self.pool).await?)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
