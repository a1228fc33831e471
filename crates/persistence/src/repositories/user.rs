//! User repository for database operations.

use sqlx::PgPool;

use domain::models::NewUser;

use crate::entities::UserEntity;
use crate::metrics::QueryTimer;

/// Repository for target accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Creates a new UserRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by username.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<UserEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_user_by_username");
        let result = sqlx::query_as::<_, UserEntity>(
            r#"
            SELECT id, username, email, display_name, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(result)
    }

    /// Create a user. `created_at` falls back to now when not carried over.
    pub async fn create(&self, user: &NewUser) -> Result<UserEntity, sqlx::Error> {
        let timer = QueryTimer::new("create_user");
        let result = sqlx::query_as::<_, UserEntity>(
            r#"
            INSERT INTO users (username, email, display_name, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, COALESCE($5, NOW()), COALESCE($5, NOW()))
            RETURNING id, username, email, display_name, password_hash, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await;
        timer.finish(result)
    }
}
