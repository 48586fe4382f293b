use crate::portero::{device, provider::Identity};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info_span, Instrument};
use utoipa::ToSchema;

/// One completed verification, keyed by identity id.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VerificationRecord {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub origin: String,
    pub device: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationRecord {
    #[must_use]
    pub fn build(identity: Identity, origin: &str, user_agent: Option<&str>) -> Self {
        Self {
            id: identity.id,
            username: identity.username,
            email: identity.email,
            origin: origin.to_string(),
            device: Some(device::describe(user_agent)),
            updated_at: Utc::now(),
        }
    }
}

const SELECT_COLUMNS: &str = "id, username, email, origin, device, updated_at";

/// Durable store for verification records, backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: PgPool,
}

impl RecordStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Origin-level dedup lookup.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_by_origin(&self, origin: &str) -> Result<Option<VerificationRecord>> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM verifications WHERE origin = $1 LIMIT 1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );

        sqlx::query_as::<_, VerificationRecord>(&query)
            .bind(origin)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to look up verification record by origin")
    }

    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<VerificationRecord>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM verifications WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );

        sqlx::query_as::<_, VerificationRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to look up verification record by id")
    }

    /// Insert or replace the record for its identity id.
    ///
    /// A repeat verification by the same identity refreshes the row instead
    /// of duplicating it.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn upsert(&self, record: &VerificationRecord) -> Result<()> {
        let query = "INSERT INTO verifications (id, username, email, origin, device) \
                     VALUES ($1, $2, $3, $4, $5) \
                     ON CONFLICT (id) DO UPDATE SET \
                     username = EXCLUDED.username, email = EXCLUDED.email, \
                     origin = EXCLUDED.origin, device = EXCLUDED.device, \
                     updated_at = NOW()";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        sqlx::query(query)
            .bind(&record.id)
            .bind(&record.username)
            .bind(record.email.as_deref())
            .bind(&record.origin)
            .bind(record.device.as_deref())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to upsert verification record")?;

        Ok(())
    }
}
