//! Movie and category database operations

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::{decode_text, now_timestamp};

/// Library status of a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieStatus {
    /// Still wanted
    Active,
    /// A finishing quality has been placed in the library
    Done,
}

impl MovieStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for MovieStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovieStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            other => bail!("Unknown movie status '{}'", other),
        }
    }
}

/// A movie record in the database
#[derive(Debug, Clone)]
pub struct MovieRecord {
    pub id: i64,
    /// Identifier of the library entry (IMDB id)
    pub library_identifier: String,
    pub status: MovieStatus,
    pub profile_id: Option<i64>,
    pub category_id: Option<i64>,
    pub last_edit: i64,
}

impl sqlx::FromRow<'_, SqliteRow> for MovieRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let status: String = row.try_get("status")?;

        Ok(Self {
            id: row.try_get("id")?,
            library_identifier: row.try_get("library_identifier")?,
            status: decode_text(&status)?,
            profile_id: row.try_get("profile_id")?,
            category_id: row.try_get("category_id")?,
            last_edit: row.try_get("last_edit")?,
        })
    }
}

/// Input for creating a new movie record
#[derive(Debug)]
pub struct CreateMovie {
    pub library_identifier: String,
    pub status: MovieStatus,
    pub profile_id: Option<i64>,
    pub category_id: Option<i64>,
}

/// Movie repository for database operations
pub struct MovieRepository {
    pool: SqlitePool,
}

impl MovieRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new movie
    pub async fn create(&self, input: CreateMovie) -> Result<MovieRecord> {
        let id = sqlx::query(
            r#"
            INSERT INTO movies (library_identifier, status, profile_id, category_id, last_edit)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&input.library_identifier)
        .bind(input.status.as_str())
        .bind(input.profile_id)
        .bind(input.category_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Movie {} vanished after insert", id))
    }

    /// Get a movie by ID
    pub async fn get(&self, id: i64) -> Result<Option<MovieRecord>> {
        let record = sqlx::query_as::<_, MovieRecord>("SELECT * FROM movies WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// All movies attached to a library entry, oldest first
    pub async fn list_by_library(&self, library_identifier: &str) -> Result<Vec<MovieRecord>> {
        let records = sqlx::query_as::<_, MovieRecord>(
            "SELECT * FROM movies WHERE library_identifier = ?1 ORDER BY id",
        )
        .bind(library_identifier)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Update a movie's status and bump its edit time
    pub async fn set_status(&self, id: i64, status: MovieStatus) -> Result<()> {
        sqlx::query("UPDATE movies SET status = ?1, last_edit = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Destination override from the movie's category, if one is set
    pub async fn category_destination(&self, id: i64) -> Result<Option<String>> {
        let destination: Option<Option<String>> = sqlx::query_scalar(
            r#"
            SELECT c.destination FROM movies m
            JOIN categories c ON c.id = m.category_id
            WHERE m.id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(destination
            .flatten()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty() && d != "None"))
    }
}

/// A category record in the database
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRecord {
    pub id: i64,
    pub label: String,
    /// Library root overriding the configured destination
    pub destination: Option<String>,
}

/// Category repository for database operations
pub struct CategoryRepository {
    pool: SqlitePool,
}

impl CategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, label: &str, destination: Option<&str>) -> Result<CategoryRecord> {
        let id = sqlx::query("INSERT INTO categories (label, destination) VALUES (?1, ?2)")
            .bind(label)
            .bind(destination)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();

        Ok(CategoryRecord {
            id,
            label: label.to_string(),
            destination: destination.map(str::to_string),
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<CategoryRecord>> {
        let record = sqlx::query_as::<_, CategoryRecord>("SELECT * FROM categories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }
}
