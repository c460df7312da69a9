//! `users` table (spec.md §3) — a minimal read accessor. Full User CRUD
//! (registration, username validation against the reserved set, email
//! verification) belongs to the excluded API layer; this runtime only
//! needs a task owner's notification defaults at dispatch time.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{Result, ToraleError};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub default_webhook_url: Option<String>,
    pub default_webhook_secret: Option<String>,
    pub default_webhook_enabled: bool,
}

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                username TEXT UNIQUE,
                default_webhook_url TEXT,
                default_webhook_secret TEXT,
                default_webhook_enabled BOOLEAN NOT NULL DEFAULT false,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>(
            "SELECT id, email, username, default_webhook_url, default_webhook_secret, \
             default_webhook_enabled FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(row)
    }
}
