use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use contracts::system::auth::TokenClaims;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::OnceCell;
use rand::Rng;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use serde::{de::DeserializeOwned, Serialize};

const ACCESS_TOKEN_LIFETIME_HOURS: i64 = 24;
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 90;

/// Ключ sys_settings для секрета access-токенов
pub const ACCESS_SECRET_KEY: &str = "jwt_secret";
/// Ключ sys_settings для секрета приглашений, отдельный от access-токенов
pub const INVITE_SECRET_KEY: &str = "invite_jwt_secret";

static ACCESS_SECRET: OnceCell<String> = OnceCell::new();

// ============================================================================
// Generic signing
// ============================================================================

/// Подписать claims (HS256)
pub fn sign_claims<T: Serialize>(claims: &T, secret: &str) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("Failed to encode JWT token")
}

/// Проверить подпись и `exp` без допуска по времени
pub fn verify_claims<T: DeserializeOwned>(token: &str, secret: &str) -> Result<T> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let token_data = decode::<T>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .context("Failed to decode JWT token")?;
    Ok(token_data.claims)
}

/// Проверить только подпись и структуру. Срок действия проверяет вызывающий
/// по своим часам.
pub fn verify_signature<T: DeserializeOwned>(token: &str, secret: &str) -> Result<T> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;

    let token_data = decode::<T>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .context("Failed to decode JWT token")?;
    Ok(token_data.claims)
}

// ============================================================================
// Access / refresh tokens
// ============================================================================

/// Загрузить секрет access-токенов при старте
pub async fn init_access_secret(db: &DatabaseConnection) -> Result<()> {
    let secret = get_or_create_secret(db, ACCESS_SECRET_KEY, "Auto-generated JWT secret for authentication").await?;
    // повторная инициализация (тесты) оставляет первый секрет
    let _ = ACCESS_SECRET.set(secret);
    Ok(())
}

fn access_secret() -> Result<&'static str> {
    ACCESS_SECRET
        .get()
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Access token secret has not been initialized"))
}

/// Generate JWT access token with 24 hours lifetime
pub fn generate_access_token(user_id: &str, username: &str, is_admin: bool) -> Result<String> {
    let now = Utc::now();
    let claims = TokenClaims {
        sub: user_id.to_string(),
        username: username.to_string(),
        is_admin,
        exp: (now + chrono::Duration::hours(ACCESS_TOKEN_LIFETIME_HOURS)).timestamp(),
        iat: now.timestamp(),
    };
    sign_claims(&claims, access_secret()?)
}

/// Validate JWT access token and extract claims
pub fn validate_token(token: &str) -> Result<TokenClaims> {
    verify_claims(token, access_secret()?)
}

/// Generate refresh token (UUID-based)
pub fn generate_refresh_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Calculate refresh token expiration timestamp
pub fn calculate_refresh_token_expiration() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(REFRESH_TOKEN_LIFETIME_DAYS)
}

// ============================================================================
// Secrets
// ============================================================================

/// Секрет приглашений: из конфигурации, иначе из sys_settings
pub async fn resolve_invite_secret(db: &DatabaseConnection, configured: Option<&str>) -> Result<String> {
    match configured.map(str::trim).filter(|s| !s.is_empty()) {
        Some(secret) => Ok(secret.to_string()),
        None => {
            get_or_create_secret(db, INVITE_SECRET_KEY, "Auto-generated secret for group invitations").await
        }
    }
}

/// Get or create a secret in sys_settings
pub async fn get_or_create_secret(db: &DatabaseConnection, key: &str, description: &str) -> Result<String> {
    if let Some(secret) = read_setting(db, key).await? {
        return Ok(secret);
    }

    let now = Utc::now().to_rfc3339();
    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT OR IGNORE INTO sys_settings (key, value, description, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        [
            key.into(),
            generate_secret().into(),
            description.into(),
            now.clone().into(),
            now.into(),
        ],
    ))
    .await?;
    tracing::info!("Generated new secret '{}' in sys_settings", key);

    // перечитываем: при гонке побеждает первая вставка
    read_setting(db, key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Secret '{}' was not persisted", key))
}

/// Generate a cryptographically secure secret (256 bits)
fn generate_secret() -> String {
    use base64::{engine::general_purpose, Engine as _};
    let random_bytes: [u8; 32] = rand::thread_rng().gen();
    general_purpose::STANDARD.encode(random_bytes)
}

async fn read_setting(db: &DatabaseConnection, key: &str) -> Result<Option<String>> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT value FROM sys_settings WHERE key = ?",
            [key.into()],
        ))
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("", "value")?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::connect_in_memory;
    use contracts::system::auth::InviteClaims;

    #[test]
    fn signed_claims_roundtrip_and_reject_wrong_secret() {
        let claims = InviteClaims {
            group_id: "g1".into(),
            exp: (Utc::now() + chrono::Duration::hours(1)).timestamp(),
        };
        let token = sign_claims(&claims, "secret-a").unwrap();
        let decoded: InviteClaims = verify_claims(&token, "secret-a").unwrap();
        assert_eq!(decoded, claims);
        assert!(verify_claims::<InviteClaims>(&token, "secret-b").is_err());
        assert!(verify_claims::<InviteClaims>("not.a.token", "secret-a").is_err());
    }

    #[test]
    fn expired_claims_are_rejected_without_leeway() {
        let claims = InviteClaims {
            group_id: "g1".into(),
            exp: Utc::now().timestamp() - 1,
        };
        let token = sign_claims(&claims, "secret").unwrap();
        assert!(verify_claims::<InviteClaims>(&token, "secret").is_err());
        // подпись при этом корректна
        let decoded: InviteClaims = verify_signature(&token, "secret").unwrap();
        assert_eq!(decoded.group_id, "g1");
        assert!(verify_signature::<InviteClaims>(&token, "other").is_err());
    }

    #[tokio::test]
    async fn secrets_are_persisted_once_and_kept_apart() {
        let db = connect_in_memory().await;
        let first = get_or_create_secret(&db, INVITE_SECRET_KEY, "test").await.unwrap();
        let second = resolve_invite_secret(&db, None).await.unwrap();
        assert_eq!(first, second);

        let access = get_or_create_secret(&db, ACCESS_SECRET_KEY, "test").await.unwrap();
        assert_ne!(access, first);

        assert_eq!(
            resolve_invite_secret(&db, Some("configured")).await.unwrap(),
            "configured"
        );
        assert_eq!(resolve_invite_secret(&db, Some("  ")).await.unwrap(), first);
    }
}
