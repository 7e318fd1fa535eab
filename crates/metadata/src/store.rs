//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FileMeta, PendingInvoice, StoreStats};
use crate::repos::{FileRepo, InvoiceRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetaStore: FileRepo + InvoiceRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// Timestamps are stored as integer epoch seconds and `host_duration` as
/// integer nanoseconds, so expiry comparisons and the paid-transition
/// extension are plain integer arithmetic inside single statements.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and run migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl From<std::io::Error> for MetadataError {
    fn from(e: std::io::Error) -> Self {
        MetadataError::Config(format!("failed to prepare database path: {e}"))
    }
}

fn from_unix(secs: i64) -> MetadataResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| MetadataError::InvalidRow(format!("bad timestamp {secs}: {e}")))
}

type FileRow = (String, i64, i64, i64, bool, i64);

fn file_row_to_meta(row: FileRow) -> MetadataResult<FileMeta> {
    let (id, size, expires_at, host_duration_ns, paid, created_at) = row;
    Ok(FileMeta {
        id,
        size,
        expires_at: from_unix(expires_at)?,
        host_duration: time::Duration::nanoseconds(host_duration_ns),
        paid,
        created_at: from_unix(created_at)?,
    })
}

type InvoiceRow = (String, String, String, i64, i64);

fn invoice_row_to_model(row: InvoiceRow) -> MetadataResult<PendingInvoice> {
    let (payment_hash, file_id, payment_request, amount_sats, created_at) = row;
    Ok(PendingInvoice {
        payment_hash,
        file_id,
        payment_request,
        amount_sats,
        created_at: from_unix(created_at)?,
    })
}

const SELECT_FILE: &str =
    "SELECT id, size, expires_at, host_duration_ns, paid, created_at FROM files";

const SELECT_INVOICE: &str =
    "SELECT payment_hash, file_id, payment_request, amount_sats, created_at FROM pending_invoices";

#[async_trait]
impl MetaStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS files (
                 id TEXT PRIMARY KEY,
                 size INTEGER NOT NULL,
                 expires_at INTEGER NOT NULL,
                 host_duration_ns INTEGER NOT NULL DEFAULT 0,
                 paid INTEGER NOT NULL DEFAULT 0,
                 created_at INTEGER NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_expires_at ON files (expires_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_invoices (
                 payment_hash TEXT PRIMARY KEY,
                 file_id TEXT NOT NULL,
                 payment_request TEXT NOT NULL,
                 amount_sats INTEGER NOT NULL,
                 created_at INTEGER NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for SqliteStore {
    async fn save_file_meta(&self, meta: &FileMeta) -> MetadataResult<()> {
        let host_duration_ns = i64::try_from(meta.host_duration.whole_nanoseconds())
            .map_err(|_| MetadataError::InvalidRow("host_duration overflows i64 ns".to_string()))?;

        let result = sqlx::query(
            "INSERT INTO files (id, size, expires_at, host_duration_ns, paid, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.id)
        .bind(meta.size)
        .bind(meta.expires_at.unix_timestamp())
        .bind(host_duration_ns)
        .bind(meta.paid)
        .bind(meta.created_at.unix_timestamp())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                MetadataError::AlreadyExists(format!("file id {} already exists", meta.id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_file_meta(&self, id: &str) -> MetadataResult<Option<FileMeta>> {
        let row = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILE} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(file_row_to_meta).transpose()
    }

    async fn mark_paid(&self, id: &str) -> MetadataResult<()> {
        // Single statement: the extension reads host_duration_ns from the row
        // it updates, so there is no window for a concurrent sweep to observe
        // a paid row with a stale expiry.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let result = sqlx::query(
            "UPDATE files SET paid = 1, expires_at = ? + host_duration_ns / 1000000000
             WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("file id {id} not found")));
        }
        Ok(())
    }

    async fn delete_file_meta(&self, id: &str) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("file id {id} not found")));
        }
        Ok(())
    }

    async fn list_expired_files(&self) -> MetadataResult<Vec<FileMeta>> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let rows = sqlx::query_as::<_, FileRow>(&format!("{SELECT_FILE} WHERE expires_at < ?"))
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(file_row_to_meta).collect()
    }

    async fn get_stats(&self) -> MetadataResult<StoreStats> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64, i64)>(
            "SELECT
                 COUNT(*),
                 COALESCE(SUM(CASE WHEN paid = 1 THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN paid = 0 THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN expires_at < ? THEN 1 ELSE 0 END), 0),
                 COALESCE(SUM(size), 0),
                 COALESCE(SUM(CASE WHEN paid = 1 THEN size ELSE 0 END), 0),
                 COALESCE(SUM(CASE WHEN paid = 0 THEN size ELSE 0 END), 0)
             FROM files",
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            total_files: row.0,
            paid_files: row.1,
            pending_files: row.2,
            expired_files: row.3,
            total_bytes: row.4,
            paid_bytes: row.5,
            pending_bytes: row.6,
        })
    }
}

#[async_trait]
impl InvoiceRepo for SqliteStore {
    async fn save_pending_invoice(&self, invoice: &PendingInvoice) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO pending_invoices
                 (payment_hash, file_id, payment_request, amount_sats, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(payment_hash) DO UPDATE SET
                 file_id = excluded.file_id,
                 payment_request = excluded.payment_request,
                 amount_sats = excluded.amount_sats,
                 created_at = excluded.created_at",
        )
        .bind(&invoice.payment_hash)
        .bind(&invoice.file_id)
        .bind(&invoice.payment_request)
        .bind(invoice.amount_sats)
        .bind(invoice.created_at.unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pending_invoice(&self, payment_hash: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM pending_invoices WHERE payment_hash = ?")
            .bind(payment_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_pending_invoices(&self) -> MetadataResult<Vec<PendingInvoice>> {
        let rows = sqlx::query_as::<_, InvoiceRow>(SELECT_INVOICE)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(invoice_row_to_model).collect()
    }
}
