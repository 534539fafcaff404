use axum::{extract::Json, http::StatusCode};
use contracts::shared::api::ApiResponse;
use contracts::system::users::{CreateUserDto, User};

use crate::shared::data::db::get_connection;
use crate::shared::error::{AppError, AppResult};
use crate::system::auth::extractor::CurrentUser;
use crate::system::users::service;

/// List all users (admin only)
pub async fn list(CurrentUser(_claims): CurrentUser) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let users = service::list_all(get_connection()).await?;
    Ok(Json(ApiResponse::ok(200, users)))
}

/// Create user (admin only)
pub async fn create(
    CurrentUser(claims): CurrentUser,
    Json(dto): Json<CreateUserDto>,
) -> AppResult<(StatusCode, Json<ApiResponse<serde_json::Value>>)> {
    let user_id = service::create(get_connection(), dto, Some(claims.sub))
        .await
        .map_err(|e| {
            tracing::warn!("Failed to create user: {}", e);
            AppError::BadRequest("user.invalid")
        })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(201, serde_json::json!({ "id": user_id }))),
    ))
}
