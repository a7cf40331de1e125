//! Database error types.

use thiserror::Error;

/// Database connection and migration errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/fleet-manager.")]
    MigrationDirNotFound { tried: String, last_error: String },
}
