use chrono::{DateTime, Utc};
use marquee_core::error::AppError;
use marquee_core::models::{
    ImageRecord, InsertOutcome, NewImage, NewSyncRun, RunStatus, SharedHash, SyncRun,
    SyncRunSummary, Venue, VenueSummary,
};
use sqlx::SqlitePool;

/// The dedup and persistence store over SQLite.
///
/// The `UNIQUE` constraint on `images.source_url` is the dedup boundary;
/// every write is a single statement or a single transaction.
#[derive(Clone)]
pub struct SqliteImageStore {
    pool: SqlitePool,
}

impl SqliteImageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the venue row for `name`, creating it on first sight.
    ///
    /// An existing row is returned untouched; only `finalize_run` changes it.
    pub async fn ensure_venue(&self, name: &str, url: &str) -> Result<Venue, AppError> {
        sqlx::query("INSERT INTO venues (name, url) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(name)
            .bind(url)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        let row = sqlx::query_as::<_, VenueRow>(
            "SELECT id, name, url, last_scraped FROM venues WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    pub async fn is_known_source_url(&self, url: &str) -> Result<bool, AppError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM images WHERE source_url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    /// Atomic check-and-insert keyed on `source_url`.
    pub async fn try_insert_image(&self, image: &NewImage) -> Result<InsertOutcome, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO images (venue_id, source_url, local_path, event_name, event_date, image_hash, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_url) DO NOTHING
            "#,
        )
        .bind(image.venue_id)
        .bind(&image.source_url)
        .bind(&image.local_path)
        .bind(&image.event_name)
        .bind(&image.event_date)
        .bind(&image.image_hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::AlreadyPresent)
        } else {
            Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
        }
    }

    /// Write the terminal run row and, for `success`/`partial`, advance the
    /// venue's `last_scraped`, in one transaction.
    pub async fn finalize_run(&self, run: &NewSyncRun) -> Result<SyncRun, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let id = sqlx::query(
            r#"
            INSERT INTO sync_log (venue_id, started_at, completed_at, images_found, images_new, status, error_message)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.venue_id)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(i64::from(run.images_found))
        .bind(i64::from(run.images_new))
        .bind(run.status.as_str())
        .bind(&run.error_message)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .last_insert_rowid();

        if run.status.advances_venue() {
            sqlx::query("UPDATE venues SET last_scraped = ? WHERE id = ?")
                .bind(run.completed_at)
                .bind(run.venue_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        Ok(SyncRun {
            id,
            venue_id: run.venue_id,
            started_at: run.started_at,
            completed_at: run.completed_at,
            images_found: run.images_found,
            images_new: run.images_new,
            status: run.status,
            error_message: run.error_message.clone(),
        })
    }

    /// Sync history joined with venue names, newest first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRunSummary>, AppError> {
        let rows = sqlx::query_as::<_, SyncRunSummaryRow>(
            r#"
            SELECT s.id, s.venue_id, v.name AS venue_name, s.started_at, s.completed_at,
                   s.images_found, s.images_new, s.status, s.error_message
            FROM sync_log s
            JOIN venues v ON v.id = s.venue_id
            ORDER BY s.completed_at DESC, s.id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Every known venue with its stored image count, by name.
    pub async fn venue_summaries(&self) -> Result<Vec<VenueSummary>, AppError> {
        let rows = sqlx::query_as::<_, VenueSummaryRow>(
            r#"
            SELECT v.id, v.name, v.url, v.last_scraped, COUNT(i.id) AS image_count
            FROM venues v
            LEFT JOIN images i ON i.venue_id = v.id
            GROUP BY v.id, v.name, v.url, v.last_scraped
            ORDER BY v.name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// All rows carrying the given content hash, oldest first.
    pub async fn images_by_hash(&self, hash: &str) -> Result<Vec<ImageRecord>, AppError> {
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT id, venue_id, source_url, local_path, image_hash, event_name, event_date, scraped_at
            FROM images
            WHERE image_hash = ?
            ORDER BY id
            "#,
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Content hashes stored under more than one source URL.
    pub async fn shared_hashes(&self, limit: usize) -> Result<Vec<SharedHash>, AppError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT image_hash, COUNT(*) AS copies
            FROM images
            GROUP BY image_hash
            HAVING COUNT(*) > 1
            ORDER BY copies DESC, image_hash
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(image_hash, copies)| SharedHash { image_hash, copies })
            .collect())
    }

    pub async fn count_images(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count)
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::StorageError(e.to_string())
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct VenueRow {
    id: i64,
    name: String,
    url: String,
    last_scraped: Option<DateTime<Utc>>,
}

impl From<VenueRow> for Venue {
    fn from(row: VenueRow) -> Self {
        Venue {
            id: row.id,
            name: row.name,
            url: row.url,
            last_scraped: row.last_scraped,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VenueSummaryRow {
    id: i64,
    name: String,
    url: String,
    last_scraped: Option<DateTime<Utc>>,
    image_count: i64,
}

impl From<VenueSummaryRow> for VenueSummary {
    fn from(row: VenueSummaryRow) -> Self {
        VenueSummary {
            venue: Venue {
                id: row.id,
                name: row.name,
                url: row.url,
                last_scraped: row.last_scraped,
            },
            image_count: row.image_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImageRow {
    id: i64,
    venue_id: i64,
    source_url: String,
    local_path: String,
    image_hash: String,
    event_name: Option<String>,
    event_date: Option<String>,
    scraped_at: DateTime<Utc>,
}

impl From<ImageRow> for ImageRecord {
    fn from(row: ImageRow) -> Self {
        ImageRecord {
            id: row.id,
            venue_id: row.venue_id,
            source_url: row.source_url,
            local_path: row.local_path,
            image_hash: row.image_hash,
            event_name: row.event_name,
            event_date: row.event_date,
            scraped_at: row.scraped_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SyncRunSummaryRow {
    id: i64,
    venue_id: i64,
    venue_name: String,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    images_found: i64,
    images_new: i64,
    status: String,
    error_message: Option<String>,
}

impl TryFrom<SyncRunSummaryRow> for SyncRunSummary {
    type Error = AppError;

    fn try_from(row: SyncRunSummaryRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row.status.parse().map_err(AppError::StorageError)?;
        Ok(SyncRunSummary {
            venue_name: row.venue_name,
            run: SyncRun {
                id: row.id,
                venue_id: row.venue_id,
                started_at: row.started_at,
                completed_at: row.completed_at,
                images_found: count(row.images_found),
                images_new: count(row.images_new),
                status,
                error_message: row.error_message,
            },
        })
    }
}

fn count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

// -- Trait implementation --

impl marquee_core::traits::ImageStore for SqliteImageStore {
    async fn ensure_venue(&self, name: &str, url: &str) -> Result<Venue, AppError> {
        SqliteImageStore::ensure_venue(self, name, url).await
    }

    async fn is_known_source_url(&self, url: &str) -> Result<bool, AppError> {
        SqliteImageStore::is_known_source_url(self, url).await
    }

    async fn try_insert_image(&self, image: &NewImage) -> Result<InsertOutcome, AppError> {
        SqliteImageStore::try_insert_image(self, image).await
    }

    async fn finalize_run(&self, run: &NewSyncRun) -> Result<SyncRun, AppError> {
        SqliteImageStore::finalize_run(self, run).await
    }
}
