//! Release database operations
//!
//! A release is one download of a movie in a specific quality. Besides its
//! status it carries free-form info pairs written by the searcher and
//! downloader (`download_id`, `download_downloader`, `name`, `protocol`)
//! and the library files it owns.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::{decode_text, now_timestamp};
use crate::media::Quality;

/// Info key holding the downloader's id for the transfer
pub const INFO_DOWNLOAD_ID: &str = "download_id";
/// Info key holding the downloader's name
pub const INFO_DOWNLOADER: &str = "download_downloader";
/// Info key holding the release name as found by the searcher
pub const INFO_NAME: &str = "name";
/// Info key holding the protocol (`torrent`, `torrent_magnet`, `nzb`)
pub const INFO_PROTOCOL: &str = "protocol";
/// Older spelling of the protocol key
pub const INFO_TYPE: &str = "type";

/// Protocols whose source files are still read by a seeding client
pub const TORRENT_PROTOCOLS: &[&str] = &["torrent", "torrent_magnet"];

/// Lifecycle status of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseStatus {
    Snatched,
    Seeding,
    Downloaded,
    Done,
    Failed,
    Ignored,
}

impl ReleaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snatched => "snatched",
            Self::Seeding => "seeding",
            Self::Downloaded => "downloaded",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "snatched" => Ok(Self::Snatched),
            "seeding" => Ok(Self::Seeding),
            "downloaded" => Ok(Self::Downloaded),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "ignored" => Ok(Self::Ignored),
            other => bail!("Unknown release status '{}'", other),
        }
    }
}

/// A release record with its info pairs and files
#[derive(Debug, Clone)]
pub struct ReleaseRecord {
    pub id: i64,
    pub movie_id: i64,
    pub identifier: String,
    pub status: ReleaseStatus,
    pub quality: Quality,
    pub last_edit: i64,
    pub info: BTreeMap<String, String>,
    pub files: Vec<PathBuf>,
}

impl sqlx::FromRow<'_, SqliteRow> for ReleaseRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let status: String = row.try_get("status")?;

        Ok(Self {
            id: row.try_get("id")?,
            movie_id: row.try_get("movie_id")?,
            identifier: row.try_get("identifier")?,
            status: decode_text(&status)?,
            quality: Quality {
                identifier: row.try_get("quality_identifier")?,
                label: row.try_get("quality_label")?,
                order: row.try_get("quality_order")?,
            },
            last_edit: row.try_get("last_edit")?,
            // Filled in by the repository
            info: BTreeMap::new(),
            files: Vec::new(),
        })
    }
}

impl ReleaseRecord {
    pub fn info(&self, key: &str) -> Option<&str> {
        self.info
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn download_id(&self) -> Option<&str> {
        self.info(INFO_DOWNLOAD_ID)
    }

    pub fn downloader(&self) -> Option<&str> {
        self.info(INFO_DOWNLOADER)
    }

    /// Protocol, falling back to the older `type` key
    pub fn protocol(&self) -> Option<&str> {
        self.info(INFO_PROTOCOL).or_else(|| self.info(INFO_TYPE))
    }
}

/// Input for creating a release
#[derive(Debug, Clone)]
pub struct CreateRelease {
    pub movie_id: i64,
    pub identifier: String,
    pub status: ReleaseStatus,
    pub quality: Quality,
    pub info: BTreeMap<String, String>,
    pub files: Vec<PathBuf>,
}

/// Release repository for database operations
pub struct ReleaseRepository {
    pool: SqlitePool,
}

impl ReleaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a release with its info pairs and files
    pub async fn create(&self, input: CreateRelease) -> Result<ReleaseRecord> {
        let mut tx = self.pool.begin().await?;
        let now = now_timestamp();

        let id = sqlx::query(
            r#"
            INSERT INTO releases
                (movie_id, identifier, status, quality_identifier, quality_label, quality_order, last_edit)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(input.movie_id)
        .bind(&input.identifier)
        .bind(input.status.as_str())
        .bind(&input.quality.identifier)
        .bind(&input.quality.label)
        .bind(input.quality.order)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (key, value) in &input.info {
            sqlx::query("INSERT INTO release_info (release_id, identifier, value) VALUES (?1, ?2, ?3)")
                .bind(id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for path in &input.files {
            sqlx::query("INSERT INTO release_files (release_id, path) VALUES (?1, ?2)")
                .bind(id)
                .bind(path.to_string_lossy().as_ref())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(ReleaseRecord {
            id,
            movie_id: input.movie_id,
            identifier: input.identifier,
            status: input.status,
            quality: input.quality,
            last_edit: now,
            info: input.info,
            files: input.files,
        })
    }

    /// Get a release by ID
    pub async fn get(&self, id: i64) -> Result<Option<ReleaseRecord>> {
        let record = sqlx::query_as::<_, ReleaseRecord>("SELECT * FROM releases WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// Releases of a movie in creation order
    pub async fn list_for_movie(&self, movie_id: i64) -> Result<Vec<ReleaseRecord>> {
        let records = sqlx::query_as::<_, ReleaseRecord>(
            "SELECT * FROM releases WHERE movie_id = ?1 ORDER BY id",
        )
        .bind(movie_id)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_all(records).await
    }

    /// Releases in any of the given statuses, in creation order
    pub async fn list_by_status(&self, statuses: &[ReleaseStatus]) -> Result<Vec<ReleaseRecord>> {
        let mut records = Vec::new();
        for status in statuses {
            let batch = sqlx::query_as::<_, ReleaseRecord>(
                "SELECT * FROM releases WHERE status = ?1 ORDER BY id",
            )
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
            records.extend(batch);
        }
        records.sort_by_key(|r| r.id);

        self.hydrate_all(records).await
    }

    /// The release a downloader transfer belongs to
    pub async fn find_by_download(
        &self,
        download_id: &str,
        downloader: &str,
    ) -> Result<Option<ReleaseRecord>> {
        let record = sqlx::query_as::<_, ReleaseRecord>(
            r#"
            SELECT r.* FROM releases r
            JOIN release_info i ON i.release_id = r.id
                AND i.identifier = ?1 AND i.value = ?2
            JOIN release_info d ON d.release_id = r.id
                AND d.identifier = ?3 AND d.value = ?4
            ORDER BY r.id
            LIMIT 1
            "#,
        )
        .bind(INFO_DOWNLOAD_ID)
        .bind(download_id)
        .bind(INFO_DOWNLOADER)
        .bind(downloader)
        .fetch_optional(&self.pool)
        .await?;

        match record {
            Some(record) => Ok(Some(self.hydrate(record).await?)),
            None => Ok(None),
        }
    }

    /// Update a release's status and bump its edit time
    pub async fn set_status(&self, id: i64, status: ReleaseStatus) -> Result<()> {
        sqlx::query("UPDATE releases SET status = ?1, last_edit = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace one info pair
    pub async fn set_info(&self, id: i64, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO release_info (release_id, identifier, value) VALUES (?1, ?2, ?3)
            ON CONFLICT (release_id, identifier) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a release with its info pairs and files
    pub async fn delete(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM release_info WHERE release_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM release_files WHERE release_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM releases WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn hydrate_all(&self, records: Vec<ReleaseRecord>) -> Result<Vec<ReleaseRecord>> {
        let mut hydrated = Vec::with_capacity(records.len());
        for record in records {
            hydrated.push(self.hydrate(record).await?);
        }
        Ok(hydrated)
    }

    async fn hydrate(&self, mut record: ReleaseRecord) -> Result<ReleaseRecord> {
        let info: Vec<(String, String)> =
            sqlx::query_as("SELECT identifier, value FROM release_info WHERE release_id = ?1")
                .bind(record.id)
                .fetch_all(&self.pool)
                .await?;
        let files: Vec<String> =
            sqlx::query_scalar("SELECT path FROM release_files WHERE release_id = ?1 ORDER BY rowid")
                .bind(record.id)
                .fetch_all(&self.pool)
                .await?;

        record.info = info.into_iter().collect();
        record.files = files.into_iter().map(PathBuf::from).collect();
        Ok(record)
    }
}
