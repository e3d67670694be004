//! Database connection and operations
//!
//! SQLite store for the movies, profiles, categories and releases the
//! renamer reads and updates. Every status change is committed by the
//! statement that makes it.

pub mod movies;
pub mod profiles;
pub mod releases;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use movies::{
    CategoryRecord, CategoryRepository, CreateMovie, MovieRecord, MovieRepository, MovieStatus,
};
pub use profiles::{CreateProfile, ProfileRecord, ProfileRepository, ProfileType};
pub use releases::{CreateRelease, ReleaseRecord, ReleaseRepository, ReleaseStatus};

/// Schema, applied statement by statement on connect
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        core INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profile_types (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        profile_id INTEGER NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        quality_identifier TEXT NOT NULL,
        finish INTEGER NOT NULL DEFAULT 0,
        ord INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        destination TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        library_identifier TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        profile_id INTEGER REFERENCES profiles(id) ON DELETE SET NULL,
        category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
        last_edit INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_movies_library ON movies(library_identifier)",
    r#"
    CREATE TABLE IF NOT EXISTS releases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        movie_id INTEGER NOT NULL REFERENCES movies(id) ON DELETE CASCADE,
        identifier TEXT NOT NULL,
        status TEXT NOT NULL,
        quality_identifier TEXT NOT NULL,
        quality_label TEXT NOT NULL,
        quality_order INTEGER NOT NULL,
        last_edit INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_releases_status ON releases(status)",
    r#"
    CREATE TABLE IF NOT EXISTS release_info (
        release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
        identifier TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (release_id, identifier)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS release_files (
        release_id INTEGER NOT NULL REFERENCES releases(id) ON DELETE CASCADE,
        path TEXT NOT NULL
    )
    "#,
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if needed) a database file and apply the schema
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database url {}", url))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", url))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// A private in-memory database, used by tests and dry runs
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // One connection that never expires; each new connection would be a fresh database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get a movies repository
    pub fn movies(&self) -> MovieRepository {
        MovieRepository::new(self.pool.clone())
    }

    /// Get a categories repository
    pub fn categories(&self) -> CategoryRepository {
        CategoryRepository::new(self.pool.clone())
    }

    /// Get a quality profiles repository
    pub fn profiles(&self) -> ProfileRepository {
        ProfileRepository::new(self.pool.clone())
    }

    /// Get a releases repository
    pub fn releases(&self) -> ReleaseRepository {
        ReleaseRepository::new(self.pool.clone())
    }
}

/// Current time as unix seconds, the format of every `last_edit` column
pub(crate) fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse a TEXT column into a typed value, as a row decode error
pub(crate) fn decode_text<T>(value: &str) -> sqlx::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    value.parse().map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))
}
