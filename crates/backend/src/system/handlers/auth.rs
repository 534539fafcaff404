use axum::{extract::Json, http::StatusCode};
use chrono::Utc;
use contracts::system::auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, UserInfo};
use contracts::system::users::User;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};

use crate::shared::data::db::get_connection;
use crate::shared::error::{AppError, AppResult};
use crate::system::auth::extractor::CurrentUser;
use crate::system::{auth::jwt, users::service as user_service};

fn user_info(user: User) -> UserInfo {
    UserInfo {
        id: user.id,
        username: user.username,
        full_name: user.full_name,
        email: user.email,
        is_admin: user.is_admin,
    }
}

/// Login handler
pub async fn login(Json(request): Json<LoginRequest>) -> AppResult<Json<LoginResponse>> {
    let db = get_connection();

    let user = user_service::verify_credentials(db, &request.username, &request.password)
        .await?
        .ok_or(AppError::Unauthorized("auth.invalid_credentials"))?;

    let access_token = jwt::generate_access_token(&user.id, &user.username, user.is_admin)?;
    let refresh_token = jwt::generate_refresh_token();

    store_refresh_token(db, &user.id, &refresh_token).await?;
    if let Err(e) = crate::system::users::repository::update_last_login(db, &user.id).await {
        tracing::warn!("Failed to update last login for {}: {}", user.id, e);
    }
    tracing::info!("User {} logged in", user.username);

    Ok(Json(LoginResponse {
        access_token,
        refresh_token,
        user: user_info(user),
    }))
}

/// Refresh token handler
pub async fn refresh(Json(request): Json<RefreshRequest>) -> AppResult<Json<RefreshResponse>> {
    let db = get_connection();

    let user_id = validate_refresh_token(db, &request.refresh_token)
        .await?
        .ok_or(AppError::Unauthorized("auth.invalid_refresh_token"))?;

    let user = user_service::get_by_id(db, &user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or(AppError::Unauthorized("auth.invalid_refresh_token"))?;

    let access_token = jwt::generate_access_token(&user.id, &user.username, user.is_admin)?;
    Ok(Json(RefreshResponse { access_token }))
}

/// Logout handler
pub async fn logout(Json(request): Json<RefreshRequest>) -> AppResult<StatusCode> {
    revoke_refresh_token(get_connection(), &request.refresh_token).await?;
    Ok(StatusCode::OK)
}

/// Get current user handler (protected by middleware)
pub async fn current_user(CurrentUser(claims): CurrentUser) -> AppResult<Json<UserInfo>> {
    let user = user_service::get_by_id(get_connection(), &claims.sub)
        .await?
        .ok_or(AppError::NotFound("user.not_found"))?;

    Ok(Json(user_info(user)))
}

// Helper functions for refresh tokens

async fn store_refresh_token(db: &DatabaseConnection, user_id: &str, token: &str) -> anyhow::Result<()> {
    let token_id = uuid::Uuid::new_v4().to_string();
    let expires_at = jwt::calculate_refresh_token_expiration().to_rfc3339();
    let created_at = Utc::now().to_rfc3339();

    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "INSERT INTO sys_refresh_tokens (id, user_id, token_hash, expires_at, created_at)
         VALUES (?, ?, ?, ?, ?)",
        [
            token_id.into(),
            user_id.to_string().into(),
            hash_token(token).into(),
            expires_at.into(),
            created_at.into(),
        ],
    ))
    .await?;

    Ok(())
}

async fn validate_refresh_token(db: &DatabaseConnection, token: &str) -> anyhow::Result<Option<String>> {
    let now = Utc::now().to_rfc3339();

    let row = db
        .query_one(Statement::from_sql_and_values(
            DatabaseBackend::Sqlite,
            "SELECT user_id FROM sys_refresh_tokens
             WHERE token_hash = ? AND expires_at > ? AND revoked_at IS NULL",
            [hash_token(token).into(), now.into()],
        ))
        .await?;

    match row {
        Some(row) => Ok(Some(row.try_get("", "user_id")?)),
        None => Ok(None),
    }
}

async fn revoke_refresh_token(db: &DatabaseConnection, token: &str) -> anyhow::Result<()> {
    let revoked_at = Utc::now().to_rfc3339();

    db.execute(Statement::from_sql_and_values(
        DatabaseBackend::Sqlite,
        "UPDATE sys_refresh_tokens SET revoked_at = ? WHERE token_hash = ? AND revoked_at IS NULL",
        [revoked_at.into(), hash_token(token).into()],
    ))
    .await?;

    Ok(())
}

fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::connect_in_memory;

    #[test]
    fn token_hash_is_hex_sha256() {
        let hash = hash_token("refresh");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_token("refresh2"));
    }

    #[tokio::test]
    async fn refresh_token_lifecycle() {
        let db = connect_in_memory().await;
        let token = jwt::generate_refresh_token();

        store_refresh_token(&db, "user-1", &token).await.unwrap();
        assert_eq!(
            validate_refresh_token(&db, &token).await.unwrap().as_deref(),
            Some("user-1")
        );
        assert_eq!(validate_refresh_token(&db, "other").await.unwrap(), None);

        revoke_refresh_token(&db, &token).await.unwrap();
        assert_eq!(validate_refresh_token(&db, &token).await.unwrap(), None);
    }
}
