//! User repository for database operations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::UserDbModel;
use crate::database::time;
use crate::domain::User;
use crate::{Error, Result};

/// Read access to the full user list, consumed by the notification sweep.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// List every known user.
    async fn list_all_users(&self) -> Result<Vec<User>>;
}

/// SQLx implementation of UserDirectory.
pub struct SqlxUserRepository {
    pool: SqlitePool,
}

impl SqlxUserRepository {
    /// Create a new SqlxUserRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user in the database.
    pub async fn create(&self, user: &UserDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, last_seen_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.last_seen_at)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find a user by their unique ID.
    pub async fn find_by_id(&self, id: &str) -> Result<UserDbModel> {
        sqlx::query_as::<_, UserDbModel>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("User", id))
    }

    /// Record a visit by the user.
    pub async fn update_last_seen(&self, id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET last_seen_at = ? WHERE id = ?")
            .bind(time::datetime_to_ms(seen_at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("User", id));
        }
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SqlxUserRepository {
    async fn list_all_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, UserDbModel>("SELECT * FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users.into_iter().map(User::from).collect())
    }
}
