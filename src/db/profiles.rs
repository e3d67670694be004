//! Quality profile database operations

use anyhow::Result;
use sqlx::SqlitePool;

/// One acceptable quality within a profile
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProfileType {
    pub quality_identifier: String,
    /// Reaching this quality marks the movie done
    pub finish: bool,
    #[sqlx(rename = "ord")]
    pub order: i64,
}

/// A quality profile with its ordered types
#[derive(Debug, Clone)]
pub struct ProfileRecord {
    pub id: i64,
    pub label: String,
    /// Built-in profile (one per quality)
    pub core: bool,
    pub types: Vec<ProfileType>,
}

impl ProfileRecord {
    /// Whether `quality_identifier` is a finishing quality of this profile
    pub fn finishes_on(&self, quality_identifier: &str) -> bool {
        self.types
            .iter()
            .any(|t| t.finish && t.quality_identifier == quality_identifier)
    }
}

/// Input for creating a profile
#[derive(Debug)]
pub struct CreateProfile {
    pub label: String,
    pub core: bool,
    pub types: Vec<ProfileType>,
}

/// Profile repository for database operations
pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, input: CreateProfile) -> Result<ProfileRecord> {
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query("INSERT INTO profiles (label, core) VALUES (?1, ?2)")
            .bind(&input.label)
            .bind(input.core)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();

        for profile_type in &input.types {
            sqlx::query(
                r#"
                INSERT INTO profile_types (profile_id, quality_identifier, finish, ord)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(id)
            .bind(&profile_type.quality_identifier)
            .bind(profile_type.finish)
            .bind(profile_type.order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ProfileRecord {
            id,
            label: input.label,
            core: input.core,
            types: input.types,
        })
    }

    /// Get a profile and its types
    pub async fn get(&self, id: i64) -> Result<Option<ProfileRecord>> {
        let row: Option<(i64, String, bool)> =
            sqlx::query_as("SELECT id, label, core FROM profiles WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, label, core)) = row else {
            return Ok(None);
        };

        Ok(Some(ProfileRecord {
            id,
            label,
            core,
            types: self.types(id).await?,
        }))
    }

    /// The built-in profile for a quality label
    pub async fn find_core_by_label(&self, label: &str) -> Result<Option<ProfileRecord>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM profiles WHERE core = 1 AND label = ?1 LIMIT 1")
                .bind(label)
                .fetch_optional(&self.pool)
                .await?;

        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn types(&self, profile_id: i64) -> Result<Vec<ProfileType>> {
        let types = sqlx::query_as::<_, ProfileType>(
            r#"
            SELECT quality_identifier, finish, ord FROM profile_types
            WHERE profile_id = ?1 ORDER BY ord, id
            "#,
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_create_and_find_core() {
        let db = Database::in_memory().await.unwrap();
        db.profiles()
            .create(CreateProfile {
                label: "720p".to_string(),
                core: true,
                types: vec![ProfileType {
                    quality_identifier: "720p".to_string(),
                    finish: true,
                    order: 0,
                }],
            })
            .await
            .unwrap();

        let found = db.profiles().find_core_by_label("720p").await.unwrap().unwrap();
        assert!(found.core);
        assert!(found.finishes_on("720p"));
        assert!(!found.finishes_on("1080p"));
        assert!(db.profiles().find_core_by_label("dvdr").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_types_are_ordered() {
        let db = Database::in_memory().await.unwrap();
        let created = db
            .profiles()
            .create(CreateProfile {
                label: "Best".to_string(),
                core: false,
                types: vec![
                    ProfileType {
                        quality_identifier: "720p".to_string(),
                        finish: false,
                        order: 1,
                    },
                    ProfileType {
                        quality_identifier: "1080p".to_string(),
                        finish: true,
                        order: 0,
                    },
                ],
            })
            .await
            .unwrap();

        let fetched = db.profiles().get(created.id).await.unwrap().unwrap();
        let order: Vec<_> = fetched
            .types
            .iter()
            .map(|t| t.quality_identifier.as_str())
            .collect();
        assert_eq!(order, vec!["1080p", "720p"]);
    }
}
