use axum::{
    extract::{Multipart, Path, Query},
    http::StatusCode,
    Json,
};
use contracts::domain::a001_group::dto::{
    AddContributorsDto, CreateGroupDto, GroupListQuery, GroupView, InviteLinkDto,
    JoinGroupRequest, RecordPaymentDto, UpdateGroupDto,
};
use contracts::shared::api::ApiResponse;
use serde::Deserialize;

use crate::shared::context;
use crate::shared::error::{AppError, AppResult};
use crate::system::auth::extractor::CurrentUser;

type GroupResponse = AppResult<Json<ApiResponse<GroupView>>>;

fn ok(view: GroupView) -> GroupResponse {
    Ok(Json(ApiResponse::ok(200, view)))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub id: String,
}

/// POST /api/groups
pub async fn create(
    CurrentUser(claims): CurrentUser,
    Json(dto): Json<CreateGroupDto>,
) -> AppResult<(StatusCode, Json<ApiResponse<GroupView>>)> {
    let view = context::get().groups.create(&claims.sub, dto).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(201, view))))
}

/// GET /api/groups
pub async fn list(
    CurrentUser(claims): CurrentUser,
    Query(query): Query<GroupListQuery>,
) -> AppResult<Json<ApiResponse<Vec<GroupView>>>> {
    let page = context::get().groups.list(&claims.sub, query).await?;
    Ok(Json(ApiResponse::page(
        page.items,
        page.count,
        page.page.page,
        page.page.limit,
    )))
}

/// GET /api/groups/:id
pub async fn get_by_id(CurrentUser(claims): CurrentUser, Path(id): Path<String>) -> GroupResponse {
    ok(context::get().groups.get(&claims.sub, &id).await?)
}

/// PUT /api/groups/:id
pub async fn update(
    CurrentUser(claims): CurrentUser,
    Path(id): Path<String>,
    Json(dto): Json<UpdateGroupDto>,
) -> GroupResponse {
    ok(context::get().groups.update(&claims.sub, &id, dto).await?)
}

/// DELETE /api/groups/:id
pub async fn delete(
    CurrentUser(claims): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> AppResult<Json<ApiResponse<()>>> {
    context::get()
        .groups
        .delete(&claims.sub, &id, query.permanent)
        .await?;
    let message = if query.permanent {
        "group.deleted"
    } else {
        "group.disabled"
    };
    Ok(Json(ApiResponse::ok(200, ()).with_message(message)))
}

/// PUT /api/groups/image (multipart: `id`, `image`)
pub async fn upload_image(CurrentUser(claims): CurrentUser, mut multipart: Multipart) -> GroupResponse {
    let mut id: Option<String> = None;
    let mut image: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("group.invalid_upload"))?
    {
        match field.name() {
            Some("id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::BadRequest("group.invalid_upload"))?;
                id = Some(value);
            }
            Some("image") => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::BadRequest("group.invalid_upload"))?;
                image = Some((file_name, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let id = id.ok_or(AppError::BadRequest("group.id_required"))?;
    let (file_name, bytes) = image.ok_or(AppError::BadRequest("group.image_required"))?;
    ok(context::get()
        .groups
        .upload_image(&claims.sub, &id, &file_name, &bytes)
        .await?)
}

/// DELETE /api/groups/image/remove?id=
pub async fn remove_image(
    CurrentUser(claims): CurrentUser,
    Query(query): Query<ImageQuery>,
) -> GroupResponse {
    ok(context::get().groups.remove_image(&claims.sub, &query.id).await?)
}

/// GET /api/groups/:id/invite
pub async fn invite(
    CurrentUser(claims): CurrentUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<InviteLinkDto>>> {
    let link = context::get().invites.issue(&claims.sub, &id).await?;
    Ok(Json(ApiResponse::ok(200, link)))
}

/// POST /api/groups/join
pub async fn join(
    CurrentUser(claims): CurrentUser,
    Json(request): Json<JoinGroupRequest>,
) -> GroupResponse {
    ok(context::get()
        .joins
        .join_by_token(&claims.sub, &request.token)
        .await?)
}

/// POST /api/groups/:id/contributors
pub async fn add_contributors(
    CurrentUser(claims): CurrentUser,
    Path(id): Path<String>,
    Json(dto): Json<AddContributorsDto>,
) -> GroupResponse {
    ok(context::get()
        .groups
        .add_contributors(&claims.sub, &id, dto.contributors)
        .await?)
}

/// DELETE /api/groups/:id/contributors/:client
pub async fn remove_contributor(
    CurrentUser(claims): CurrentUser,
    Path((id, client)): Path<(String, String)>,
) -> GroupResponse {
    ok(context::get()
        .groups
        .remove_contributor(&claims.sub, &id, &client)
        .await?)
}

/// POST /api/groups/:id/payments (admin)
pub async fn record_payment(
    CurrentUser(claims): CurrentUser,
    Path(id): Path<String>,
    Json(dto): Json<RecordPaymentDto>,
) -> GroupResponse {
    tracing::info!("Payment result for group {} submitted by {}", id, claims.username);
    ok(context::get().groups.record_payment(&id, dto).await?)
}
