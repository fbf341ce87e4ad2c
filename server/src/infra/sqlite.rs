//! SQLite user-record store

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

#[cfg(test)]
use mockall::automock;

use crate::domain::endpoint::{validate_paths, RemoteEndpoint, UserDetails};
use crate::error::{Error, Result};

/// username -> remote endpoint, resolved fresh for every action
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn resolve(&self, username: &str) -> Result<RemoteEndpoint>;
}

/// Database row for a user's endpoint
#[derive(Debug, FromRow)]
struct DetailsRow {
    server_ip: String,
    server_port: i64,
    server_user: String,
    server_pass: String,
    paths: String,
}

impl TryFrom<DetailsRow> for RemoteEndpoint {
    type Error = Error;

    fn try_from(row: DetailsRow) -> Result<Self> {
        let port = u16::try_from(row.server_port)
            .map_err(|_| Error::Internal(format!("Invalid stored port: {}", row.server_port)))?;

        let paths: Vec<String> = serde_json::from_str(&row.paths)
            .map_err(|e| Error::Internal(format!("Failed to parse paths: {}", e)))?;

        Ok(RemoteEndpoint {
            host: row.server_ip,
            port,
            login: row.server_user,
            password: row.server_pass,
            paths,
        })
    }
}

/// User repository for database operations
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Create a new repository with the given pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database connection pool
    pub async fn init(database_url: &str) -> anyhow::Result<SqlitePool> {
        // Ensure parent directory exists
        if let Some(path) = database_url.strip_prefix("sqlite:") {
            if let Some(path) = path.split('?').next() {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(pool)
    }

    /// Create the user if absent and return its id
    async fn ensure_user(&self, username: &str) -> Result<i64> {
        sqlx::query("INSERT OR IGNORE INTO users (username, created_at) VALUES (?, ?)")
            .bind(username)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;

        self.user_id(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))
    }

    async fn user_id(&self, username: &str) -> Result<Option<i64>> {
        let id: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id.map(|(id,)| id))
    }

    /// Store a user's endpoint, creating the user record if needed
    pub async fn save_details(&self, username: &str, endpoint: &RemoteEndpoint) -> Result<()> {
        if username.trim().is_empty() {
            return Err(Error::MissingParameter("username".to_string()));
        }
        endpoint.validate()?;

        let user_id = self.ensure_user(username).await?;
        let paths = serde_json::to_string(&endpoint.paths)
            .map_err(|e| Error::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO details (user_id, server_ip, server_port, server_user, server_pass, paths, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                server_ip = excluded.server_ip,
                server_port = excluded.server_port,
                server_user = excluded.server_user,
                server_pass = excluded.server_pass,
                paths = excluded.paths,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&endpoint.host)
        .bind(endpoint.port as i64)
        .bind(&endpoint.login)
        .bind(&endpoint.password)
        .bind(&paths)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the jail-root list of a user with saved details
    pub async fn set_paths(&self, username: &str, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Err(Error::InvalidParameter("paths must not be empty".to_string()));
        }
        validate_paths(paths)?;

        let user_id = self
            .user_id(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
        let paths = serde_json::to_string(paths).map_err(|e| Error::Internal(e.to_string()))?;

        let result = sqlx::query("UPDATE details SET paths = ?, updated_at = ? WHERE user_id = ?")
            .bind(&paths)
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::EndpointNotConfigured(username.to_string()));
        }

        Ok(())
    }

    /// Stored settings without the password
    pub async fn get_details(&self, username: &str) -> Result<UserDetails> {
        let endpoint = self.resolve(username).await?;
        Ok(UserDetails::from_endpoint(username, &endpoint))
    }
}

#[async_trait]
impl EndpointResolver for UserRepository {
    async fn resolve(&self, username: &str) -> Result<RemoteEndpoint> {
        let user_id = self
            .user_id(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;

        let row: DetailsRow = sqlx::query_as(
            r#"
            SELECT server_ip, server_port, server_user, server_pass, paths
            FROM details
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::EndpointNotConfigured(username.to_string()))?;

        row.try_into()
    }
}
