//! SQLite task store (durable).
//!
//! One table, `uploads`, with the logical columns of the queue schema.
//! `updatedAt` is stored as epoch milliseconds so that ordering and the
//! TTL bounds are plain integer comparisons.
//!
//! Every mutation is a single statement (`RETURNING` gives back the
//! post-update row), so each operation is atomic without an explicit
//! transaction and a failure leaves the prior state untouched.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite};

use crate::domain::{NewUpload, PorterError, TaskId, TaskStatus, UploadTask};
use crate::ports::{Clock, StatusQuery, SystemClock, TaskStore};

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    "key"     TEXT    NOT NULL,
    imageUri  TEXT    NOT NULL,
    fname     TEXT    NOT NULL,
    lat       REAL,
    lon       REAL,
    quality   INTEGER NOT NULL,
    payload   TEXT    NOT NULL,
    state     TEXT    NOT NULL CHECK (state IN ('QUEUED', 'UPLOADING', 'DONE')),
    updatedAt INTEGER NOT NULL
)
"#;

const CREATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_uploads_state_updated ON uploads (state, updatedAt)";

const SELECT_COLUMNS: &str =
    r#"SELECT id, "key", imageUri, fname, lat, lon, quality, payload, state, updatedAt FROM uploads"#;

/// Raw `uploads` row as SQLite returns it.
#[derive(Debug, sqlx::FromRow)]
struct UploadRow {
    id: i64,
    key: String,
    #[sqlx(rename = "imageUri")]
    image_uri: String,
    fname: String,
    lat: Option<f64>,
    lon: Option<f64>,
    quality: i32,
    payload: String,
    state: String,
    #[sqlx(rename = "updatedAt")]
    updated_at: i64,
}

impl UploadRow {
    fn into_task(self) -> Result<UploadTask, PorterError> {
        let status = TaskStatus::from_str(&self.state)?;
        let updated_at = DateTime::from_timestamp_millis(self.updated_at).ok_or_else(|| {
            PorterError::Storage(format!(
                "invalid updatedAt {} for {}",
                self.updated_at,
                TaskId::new(self.id)
            ))
        })?;

        Ok(UploadTask {
            id: TaskId::new(self.id),
            key: self.key,
            image_uri: self.image_uri,
            file_name: self.fname,
            latitude: self.lat,
            longitude: self.lon,
            quality: self.quality,
            payload: self.payload,
            status,
            updated_at,
        })
    }
}

/// SQLite-backed [`TaskStore`]; survives restarts and crashes.
pub struct SqliteTaskStore {
    pool: Pool<Sqlite>,
    clock: Arc<dyn Clock>,
}

impl SqliteTaskStore {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://porter.db`.
    pub async fn open(url: &str) -> Result<Self, PorterError> {
        Self::open_with_clock(url, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(url: &str, clock: Arc<dyn Clock>) -> Result<Self, PorterError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(PorterError::storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // Single writer: one connection avoids "database is locked" under concurrent callers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(PorterError::storage)?;

        Self::from_pool(pool, clock).await
    }

    /// A private in-memory database (テスト用). Lives as long as the store.
    pub async fn in_memory(clock: Arc<dyn Clock>) -> Result<Self, PorterError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(PorterError::storage)?;

        // The database disappears with its connection, so never let the pool recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(PorterError::storage)?;

        Self::from_pool(pool, clock).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: Pool<Sqlite>, clock: Arc<dyn Clock>) -> Result<Self, PorterError> {
        let store = Self { pool, clock };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PorterError> {
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(PorterError::storage)?;
        sqlx::query(CREATE_INDEX_SQL)
            .execute(&self.pool)
            .await
            .map_err(PorterError::storage)?;
        tracing::debug!("uploads schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool and wait for connections to finish.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, fields: NewUpload) -> Result<UploadTask, PorterError> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            INSERT INTO uploads ("key", imageUri, fname, lat, lon, quality, payload, state, updatedAt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, "key", imageUri, fname, lat, lon, quality, payload, state, updatedAt
            "#,
        )
        .bind(&fields.key)
        .bind(&fields.image_uri)
        .bind(&fields.file_name)
        .bind(fields.latitude)
        .bind(fields.longitude)
        .bind(fields.quality)
        .bind(&fields.payload)
        .bind(TaskStatus::Queued.as_str())
        .bind(self.clock.now().timestamp_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(PorterError::storage)?;

        row.into_task()
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<UploadTask>, PorterError> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        let row = sqlx::query_as::<_, UploadRow>(&sql)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(PorterError::storage)?;

        row.map(UploadRow::into_task).transpose()
    }

    async fn find_by_status(&self, query: StatusQuery) -> Result<Vec<UploadTask>, PorterError> {
        let mut qb = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        qb.push(" WHERE state = ").push_bind(query.status.as_str());
        if let Some(at) = query.older_than {
            qb.push(" AND updatedAt <= ").push_bind(at.timestamp_millis());
        }
        if let Some(at) = query.newer_than {
            qb.push(" AND updatedAt > ").push_bind(at.timestamp_millis());
        }
        qb.push(" ORDER BY updatedAt ASC, id ASC");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build_query_as::<UploadRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(PorterError::storage)?;

        rows.into_iter().map(UploadRow::into_task).collect()
    }

    async fn find_all(&self) -> Result<Vec<UploadTask>, PorterError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY id ASC");
        let rows = sqlx::query_as::<_, UploadRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(PorterError::storage)?;

        rows.into_iter().map(UploadRow::into_task).collect()
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<UploadTask, PorterError> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            UPDATE uploads SET state = ?, updatedAt = ?
            WHERE id = ?
            RETURNING id, "key", imageUri, fname, lat, lon, quality, payload, state, updatedAt
            "#,
        )
        .bind(status.as_str())
        .bind(self.clock.now().timestamp_millis())
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(PorterError::storage)?;

        row.ok_or(PorterError::NotFound(id))?.into_task()
    }

    async fn touch(&self, id: TaskId) -> Result<UploadTask, PorterError> {
        let row = sqlx::query_as::<_, UploadRow>(
            r#"
            UPDATE uploads SET updatedAt = ?
            WHERE id = ?
            RETURNING id, "key", imageUri, fname, lat, lon, quality, payload, state, updatedAt
            "#,
        )
        .bind(self.clock.now().timestamp_millis())
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(PorterError::storage)?;

        row.ok_or(PorterError::NotFound(id))?.into_task()
    }

    async fn count(&self, status: Option<TaskStatus>) -> Result<usize, PorterError> {
        let count: i64 = match status {
            Some(status) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM uploads WHERE state = ?")
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM uploads")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(PorterError::storage)?;

        usize::try_from(count).map_err(PorterError::storage)
    }

    async fn clear(&self) -> Result<usize, PorterError> {
        let result = sqlx::query("DELETE FROM uploads")
            .execute(&self.pool)
            .await
            .map_err(PorterError::storage)?;

        usize::try_from(result.rows_affected()).map_err(PorterError::storage)
    }
}
