//! `oauth_integrations` table (spec.md §3, §6).
//!
//! `access_token` (and `refresh_token`, when present) are stored encrypted
//! at rest with AES-256-GCM, keyed off `AppConfig::oauth_encryption_key`.
//! Grounded on the teacher's `fc-secrets` envelope-encryption approach:
//! random 96-bit nonce per value, nonce prepended to ciphertext, both
//! base64-encoded for storage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use torale_common::{Result, ToraleError};

const NONCE_LEN: usize = 12;

fn derive_key(raw_key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hasher.finalize().into()
}

fn encrypt(plaintext: &str, raw_key: &str) -> Result<String> {
    let key = derive_key(raw_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| ToraleError::Config(format!("invalid oauth encryption key: {e}")))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| ToraleError::Config(format!("token encryption failed: {e}")))?;
    let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

fn decrypt(encoded: &str, raw_key: &str) -> Result<String> {
    let key = derive_key(raw_key);
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| ToraleError::Config(format!("invalid oauth encryption key: {e}")))?;
    let combined = STANDARD
        .decode(encoded)
        .map_err(|e| ToraleError::Config(format!("malformed stored token: {e}")))?;
    if combined.len() < NONCE_LEN {
        return Err(ToraleError::Config("stored token too short to contain a nonce".into()));
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| ToraleError::Config(format!("token decryption failed: {e}")))?;
    String::from_utf8(plaintext).map_err(|e| ToraleError::Config(format!("decrypted token not utf8: {e}")))
}

#[derive(Debug, Clone, FromRow)]
struct OAuthIntegrationRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    access_token_encrypted: String,
    refresh_token_encrypted: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    scopes: String,
    channel_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthIntegration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    /// The channel the user selected for notifications on this provider
    /// (e.g. a Slack channel ID).
    pub channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OAuthIntegrationRepository {
    pool: PgPool,
    encryption_key: String,
}

impl OAuthIntegrationRepository {
    pub fn new(pool: PgPool, encryption_key: String) -> Self {
        Self { pool, encryption_key }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_integrations (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                provider TEXT NOT NULL,
                access_token_encrypted TEXT NOT NULL,
                refresh_token_encrypted TEXT,
                expires_at TIMESTAMPTZ,
                scopes TEXT NOT NULL DEFAULT '',
                channel_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (user_id, provider)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    fn to_domain(&self, row: OAuthIntegrationRow) -> Result<OAuthIntegration> {
        let access_token = decrypt(&row.access_token_encrypted, &self.encryption_key)?;
        let refresh_token = row
            .refresh_token_encrypted
            .as_deref()
            .map(|enc| decrypt(enc, &self.encryption_key))
            .transpose()?;
        let scopes = row
            .scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Ok(OAuthIntegration {
            id: row.id,
            user_id: row.user_id,
            provider: row.provider,
            access_token,
            refresh_token,
            expires_at: row.expires_at,
            scopes,
            channel_id: row.channel_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    pub async fn find_by_user_and_provider(
        &self,
        user_id: Uuid,
        provider: &str,
    ) -> Result<Option<OAuthIntegration>> {
        let row = sqlx::query_as::<_, OAuthIntegrationRow>(
            r#"SELECT id, user_id, provider, access_token_encrypted, refresh_token_encrypted,
               expires_at, scopes, channel_id, created_at, updated_at
               FROM oauth_integrations WHERE user_id = $1 AND provider = $2"#,
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        row.map(|r| self.to_domain(r)).transpose()
    }

    pub async fn upsert(
        &self,
        id: Uuid,
        user_id: Uuid,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        scopes: &[String],
        channel_id: Option<&str>,
    ) -> Result<()> {
        let access_token_encrypted = encrypt(access_token, &self.encryption_key)?;
        let refresh_token_encrypted = refresh_token.map(|t| encrypt(t, &self.encryption_key)).transpose()?;
        let scopes_joined = scopes.join(",");
        sqlx::query(
            "INSERT INTO oauth_integrations \
                (id, user_id, provider, access_token_encrypted, refresh_token_encrypted, expires_at, scopes, channel_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_id, provider) DO UPDATE SET \
                access_token_encrypted = EXCLUDED.access_token_encrypted, \
                refresh_token_encrypted = EXCLUDED.refresh_token_encrypted, \
                expires_at = EXCLUDED.expires_at, \
                scopes = EXCLUDED.scopes, \
                channel_id = EXCLUDED.channel_id, \
                updated_at = now()",
        )
        .bind(id)
        .bind(user_id)
        .bind(provider)
        .bind(access_token_encrypted)
        .bind(refresh_token_encrypted)
        .bind(expires_at)
        .bind(scopes_joined)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }

    pub async fn delete(&self, user_id: Uuid, provider: &str) -> Result<()> {
        sqlx::query("DELETE FROM oauth_integrations WHERE user_id = $1 AND provider = $2")
            .bind(user_id)
            .bind(provider)
            .execute(&self.pool)
            .await
            .map_err(|e| ToraleError::Database(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = "a-test-encryption-key";
        let plaintext = "ya29.super-secret-access-token";
        let encrypted = encrypt(plaintext, key).unwrap();
        assert_ne!(encrypted, plaintext);
        let decrypted = decrypt(&encrypted, key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let encrypted = encrypt("secret", "key-one").unwrap();
        assert!(decrypt(&encrypted, "key-two").is_err());
    }

    #[test]
    fn each_encryption_uses_a_fresh_nonce() {
        let key = "a-test-encryption-key";
        let a = encrypt("same-plaintext", key).unwrap();
        let b = encrypt("same-plaintext", key).unwrap();
        assert_ne!(a, b);
    }
}
