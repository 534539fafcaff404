use contracts::domain::a001_group::dto::InviteLinkDto;
use contracts::enums::group_status::GroupStatus;
use contracts::system::auth::InviteClaims;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use super::policy::assert_creator;
use super::repository;
use super::service::parse_group_id;
use crate::shared::clock::Clock;
use crate::shared::error::{AppError, AppResult};
use crate::system::auth::jwt;

/// Пригласительные ссылки в группу.
///
/// Токен не хранится на сервере. Его `exp` равен дедлайну группы на момент
/// выдачи, при использовании группа всё равно перепроверяется по живому состоянию.
pub struct InviteService {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    secret: String,
    join_url: String,
}

impl InviteService {
    pub fn new(
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
        secret: String,
        join_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            clock,
            secret,
            join_url: join_url.into(),
        }
    }

    /// Выдать ссылку. Только создатель, только активная группа с дедлайном.
    pub async fn issue(&self, client: &str, id: &str) -> AppResult<InviteLinkDto> {
        let id = parse_group_id(id)?;
        let mut state = assert_creator(&self.db, client, &id).await?;
        let now = self.clock.now();

        if !state.is_active {
            return Err(AppError::BadRequest("group.inactive"));
        }
        let dead_line = state
            .dead_line
            .ok_or(AppError::BadRequest("invite.deadline_required"))?;
        if state.status == GroupStatus::Active && dead_line <= now {
            if repository::close_if_expired(&self.db, &id, now).await? {
                tracing::info!("Group {} closed on invite: deadline passed", id);
            }
            state.status = GroupStatus::Closed;
        }
        if state.status != GroupStatus::Active {
            return Err(AppError::BadRequest("group.not_active"));
        }

        let claims = InviteClaims {
            group_id: id.to_string(),
            exp: dead_line.timestamp(),
        };
        let token = jwt::sign_claims(&claims, &self.secret)?;
        let link = format!("{}?token={}", self.join_url, token);

        tracing::info!("Invite issued for group {} (exp {})", id, claims.exp);
        Ok(InviteLinkDto {
            group_id: claims.group_id,
            token,
            exp: claims.exp,
            link,
        })
    }

    /// Проверить подпись и срок токена. Любая ошибка: `Forbidden`.
    pub fn verify(&self, token: &str) -> AppResult<InviteClaims> {
        let claims: InviteClaims = jwt::verify_signature(token, &self.secret).map_err(|e| {
            tracing::debug!("Invite token rejected: {:#}", e);
            AppError::Forbidden("invite.invalid_or_expired")
        })?;
        if claims.exp < self.clock.now().timestamp() {
            return Err(AppError::Forbidden("invite.invalid_or_expired"));
        }
        Ok(claims)
    }
}
