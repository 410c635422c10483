//! Persistence of tracker entries.

use crate::models::{StampedEntry, TrackerEntry};
use crate::services::metrics::db_timer;
use async_trait::async_trait;
use chrono::Utc;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ENTRY_COLUMNS: &str =
    "id, team_id, project_id, assigned_id, date, start, stop, duration, description, created_at";

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Write all entries as one batch; either every row lands or none does.
    async fn insert_entries(&self, entries: &[StampedEntry]) -> Result<Vec<TrackerEntry>, AppError>;

    /// Entries of `team_id`, newest date first.
    async fn list_entries(&self, team_id: &str) -> Result<Vec<TrackerEntry>, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// PostgreSQL-backed store over the `tracker_entries` table.
#[derive(Clone)]
pub struct PgEntryStore {
    pool: PgPool,
}

impl PgEntryStore {
    #[instrument(skip(database_url), fields(service = "import-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl EntryStore for PgEntryStore {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn insert_entries(&self, entries: &[StampedEntry]) -> Result<Vec<TrackerEntry>, AppError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let _timer = db_timer("insert_entries");

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO tracker_entries (id, team_id, project_id, assigned_id, date, start, stop, duration, description) ",
        );
        builder.push_values(entries, |mut row, stamped| {
            let entry = &stamped.entry;
            row.push_bind(Uuid::new_v4())
                .push_bind(&stamped.team_id)
                .push_bind(entry.project_id)
                .push_bind(entry.assigned_id)
                .push_bind(entry.date)
                .push_bind(entry.start)
                .push_bind(entry.stop)
                .push_bind(entry.duration)
                .push_bind(&entry.description);
        });
        builder.push(" RETURNING ");
        builder.push(ENTRY_COLUMNS);

        let inserted = builder
            .build_query_as::<TrackerEntry>()
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert tracker entries: {}", e))
            })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit tracker entries: {}", e))
        })?;

        info!(count = inserted.len(), "Tracker entries inserted");
        Ok(inserted)
    }

    #[instrument(skip(self), fields(team_id = %team_id))]
    async fn list_entries(&self, team_id: &str) -> Result<Vec<TrackerEntry>, AppError> {
        let _timer = db_timer("list_entries");

        sqlx::query_as::<_, TrackerEntry>(&format!(
            "SELECT {} FROM tracker_entries WHERE team_id = $1 ORDER BY date DESC, created_at DESC",
            ENTRY_COLUMNS
        ))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list tracker entries: {}", e)))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let _timer = db_timer("health_check");

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }
}

/// Store kept in process memory, used by tests and local runs without a
/// database.
#[derive(Default)]
pub struct InMemoryEntryStore {
    rows: Mutex<Vec<TrackerEntry>>,
    fail_writes: AtomicBool,
    insert_calls: AtomicUsize,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail without storing anything.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of batch writes attempted.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self) -> Vec<TrackerEntry> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn insert_entries(&self, entries: &[StampedEntry]) -> Result<Vec<TrackerEntry>, AppError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to insert tracker entries: store unavailable"
            )));
        }

        let now = Utc::now();
        let inserted: Vec<TrackerEntry> = entries
            .iter()
            .map(|stamped| TrackerEntry {
                id: Uuid::new_v4(),
                team_id: stamped.team_id.clone(),
                project_id: stamped.entry.project_id,
                assigned_id: stamped.entry.assigned_id,
                date: stamped.entry.date,
                start: stamped.entry.start,
                stop: stamped.entry.stop,
                duration: stamped.entry.duration,
                description: stamped.entry.description.clone(),
                created_at: now,
            })
            .collect();

        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn list_entries(&self, team_id: &str) -> Result<Vec<TrackerEntry>, AppError> {
        let mut rows: Vec<TrackerEntry> = self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|row| row.team_id == team_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.created_at.cmp(&a.created_at)));
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
