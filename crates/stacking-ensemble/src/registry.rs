//! SQLite audit trail of published artifacts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::artifact::ArtifactRecord;

/// One registry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: i64,
    pub entity: String,
    pub horizon: u32,
    pub version: u32,
    pub name: String,
    pub checksum: String,
    pub n_oof: i64,
    pub n_folds: i64,
    pub seed: i64,
    pub published_at: DateTime<Utc>,
}

/// Internal DB row type with String dates
#[derive(Debug, FromRow)]
struct RegistryRow {
    id: i64,
    entity: String,
    horizon: i64,
    version: i64,
    name: String,
    checksum: String,
    n_oof: i64,
    n_folds: i64,
    seed: i64,
    published_at: String,
}

impl RegistryRow {
    fn into_entry(self) -> RegistryEntry {
        RegistryEntry {
            id: self.id,
            entity: self.entity,
            horizon: self.horizon as u32,
            version: self.version as u32,
            name: self.name,
            checksum: self.checksum,
            n_oof: self.n_oof,
            n_folds: self.n_folds,
            seed: self.seed,
            published_at: self
                .published_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

pub struct ArtifactRegistry {
    pool: SqlitePool,
}

impl ArtifactRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) the registry database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .with_context(|| format!("Failed to open artifact registry at {}", url))?;
        let registry = Self::new(pool);
        registry.init().await?;
        Ok(registry)
    }

    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ensemble_artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                horizon INTEGER NOT NULL,
                version INTEGER NOT NULL,
                name TEXT NOT NULL,
                checksum TEXT NOT NULL,
                n_oof INTEGER NOT NULL,
                n_folds INTEGER NOT NULL,
                seed INTEGER NOT NULL,
                published_at TEXT NOT NULL,
                UNIQUE (entity, horizon, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a published artifact. A version can be recorded only once.
    pub async fn record(&self, record: &ArtifactRecord) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO ensemble_artifacts (
                entity, horizon, version, name, checksum, n_oof, n_folds, seed, published_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.id.entity)
        .bind(record.id.horizon as i64)
        .bind(record.id.version as i64)
        .bind(&record.name)
        .bind(&record.checksum)
        .bind(record.metadata.n_oof as i64)
        .bind(record.metadata.n_folds() as i64)
        // stored bit-for-bit; SQLite integers are signed
        .bind(record.metadata.seed as i64)
        .bind(record.published_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to record {}", record.name))?;

        tracing::info!("Registered {} as row {}", record.name, id);
        Ok(id)
    }

    pub async fn latest_version(&self, entity: &str, horizon: u32) -> Result<Option<u32>> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(version) FROM ensemble_artifacts WHERE entity = ? AND horizon = ?",
        )
        .bind(entity)
        .bind(horizon as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.map(|v| v as u32))
    }

    /// All recorded versions for (entity, horizon), newest first.
    pub async fn history(&self, entity: &str, horizon: u32) -> Result<Vec<RegistryEntry>> {
        let rows: Vec<RegistryRow> = sqlx::query_as(
            r#"
            SELECT id, entity, horizon, version, name, checksum, n_oof, n_folds, seed, published_at
            FROM ensemble_artifacts
            WHERE entity = ? AND horizon = ?
            ORDER BY version DESC
            "#,
        )
        .bind(entity)
        .bind(horizon as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RegistryRow::into_entry).collect())
    }
}
