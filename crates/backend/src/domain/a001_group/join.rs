use contracts::domain::a001_group::aggregate::GroupId;
use contracts::domain::a001_group::dto::GroupView;
use contracts::domain::common::AggregateId;
use contracts::enums::group_status::GroupStatus;
use std::sync::Arc;

use super::invite::InviteService;
use super::policy::require_client;
use super::repository::{self, JoinInsert};
use super::service::GroupService;
use crate::shared::error::{AppError, AppResult};

/// Вступление в группу по пригласительной ссылке
pub struct JoinService {
    groups: Arc<GroupService>,
    invites: Arc<InviteService>,
}

impl JoinService {
    pub fn new(groups: Arc<GroupService>, invites: Arc<InviteService>) -> Self {
        Self { groups, invites }
    }

    /// Добавить клиента в реестр группы из токена.
    ///
    /// Для уже состоящих в группе операция идемпотентна. Повторная вставка
    /// исключена на уровне БД, а не проверкой в коде.
    pub async fn join_by_token(&self, client: &str, token: &str) -> AppResult<GroupView> {
        let client = require_client(client)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::BadRequest("invite.token_required"));
        }

        let claims = self.invites.verify(token)?;
        let id = GroupId::from_string(&claims.group_id)
            .map_err(|_| AppError::Forbidden("invite.invalid_or_expired"))?;

        let group = self.groups.observe(&id).await?;
        let now = self.groups.clock().now();

        if !group.is_active || group.status != GroupStatus::Active {
            return Err(AppError::Forbidden("group.not_joinable"));
        }
        let dead_line = group
            .dead_line
            .ok_or(AppError::Forbidden("group.not_joinable"))?;
        if now > dead_line {
            return Err(AppError::Forbidden("group.deadline_passed"));
        }
        // дедлайн могли перенести на более ранний срок после выдачи токена
        if claims.exp > dead_line.timestamp() {
            return Err(AppError::Forbidden("invite.invalid_or_expired"));
        }

        if group.is_member(client) {
            return self.groups.populate(&group).await;
        }

        match repository::join_contributor(self.groups.db(), &id, client, now).await? {
            JoinInsert::Inserted => {
                tracing::info!("Client {} joined group {} by invite", client, id);
            }
            JoinInsert::Skipped => {
                let current = self.groups.load(&id).await?;
                if !current.is_member(client) {
                    return Err(AppError::Forbidden("group.not_joinable"));
                }
                tracing::debug!("Client {} already joined group {} concurrently", client, id);
            }
        }

        let stored = self.groups.load(&id).await?;
        self.groups.populate(&stored).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::a001_group::service::tests::{create_dto, fixture, fixture_on, Fixture};
    use crate::shared::data::db::TempDb;
    use crate::shared::media::MemoryMediaStore;
    use crate::shared::clock::Clock;
    use chrono::Duration;
    use contracts::domain::a001_group::dto::UpdateGroupDto;

    struct JoinFixture {
        f: Fixture,
        groups: Arc<GroupService>,
        invites: Arc<InviteService>,
        joins: JoinService,
    }

    async fn setup() -> JoinFixture {
        setup_with(fixture().await)
    }

    fn setup_with(f: Fixture) -> JoinFixture {
        let groups = Arc::new(GroupService::new(
            f.service.db().clone(),
            Arc::new(crate::domain::a003_product::catalog::SqlProductCatalog::new(
                f.service.db().clone(),
            )),
            f.media.clone(),
            f.clock.clone(),
        ));
        let invites = Arc::new(InviteService::new(
            f.service.db().clone(),
            f.clock.clone(),
            "secret".into(),
            "http://front/join",
        ));
        let joins = JoinService::new(groups.clone(), invites.clone());
        JoinFixture {
            f,
            groups,
            invites,
            joins,
        }
    }

    async fn group_with_invite(j: &JoinFixture, hours: i64) -> (String, String) {
        let mut dto = create_dto(&j.f.product);
        dto.dead_line = Some(j.f.clock.now() + Duration::hours(hours));
        let view = j.groups.create("creator", dto).await.unwrap();
        let link = j.invites.issue("creator", &view.id).await.unwrap();
        (view.id, link.token)
    }

    #[tokio::test]
    async fn join_twice_keeps_single_entry() {
        let j = setup().await;
        let (id, token) = group_with_invite(&j, 24).await;

        let first = j.joins.join_by_token("newcomer", &token).await.unwrap();
        let second = j.joins.join_by_token("newcomer", &token).await.unwrap();
        assert_eq!(first.contributors.len(), 3);
        assert_eq!(second.contributors.len(), 3);
        let entry = second
            .contributors
            .iter()
            .find(|c| c.client.id == "newcomer")
            .unwrap();
        assert_eq!(entry.paid_amount, 0.0);
        assert!(!entry.transaction_status);
        assert!(j.groups.get("newcomer", &id).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_insert_once() {
        // несколько соединений, чтобы вставки действительно шли параллельно
        let db = TempDb::connect(4).await;
        let j = setup_with(fixture_on(db.conn.clone(), MemoryMediaStore::default()).await);
        let (id, token) = group_with_invite(&j, 24).await;

        let (a, b, c, d) = tokio::join!(
            j.joins.join_by_token("racer", &token),
            j.joins.join_by_token("racer", &token),
            j.joins.join_by_token("racer", &token),
            j.joins.join_by_token("racer", &token)
        );
        for result in [a, b, c, d] {
            assert!(result.is_ok(), "{:?}", result.err());
        }

        let view = j.groups.get("racer", &id).await.unwrap();
        assert_eq!(
            view.contributors.iter().filter(|c| c.client.id == "racer").count(),
            1
        );
    }

    #[tokio::test]
    async fn members_join_idempotently() {
        let j = setup().await;
        let (_, token) = group_with_invite(&j, 24).await;
        let view = j.joins.join_by_token("creator", &token).await.unwrap();
        assert_eq!(view.contributors.len(), 2);
    }

    #[tokio::test]
    async fn join_after_live_deadline_is_forbidden() {
        let j = setup().await;
        let (id, token) = group_with_invite(&j, 1).await;

        j.f.clock.advance(Duration::minutes(61));
        assert!(matches!(
            j.joins.join_by_token("late", &token).await,
            Err(AppError::Forbidden(_))
        ));
        let view = j.groups.get("creator", &id).await.unwrap();
        assert_eq!(view.status, GroupStatus::Closed);
    }

    #[tokio::test]
    async fn token_outliving_shortened_deadline_is_rejected() {
        let j = setup().await;
        let (id, token) = group_with_invite(&j, 48).await;

        let patch = UpdateGroupDto {
            dead_line: Some(Some(j.f.clock.now() + Duration::hours(2))),
            ..Default::default()
        };
        j.groups.update("creator", &id, patch).await.unwrap();

        assert!(matches!(
            j.joins.join_by_token("newcomer", &token).await,
            Err(AppError::Forbidden("invite.invalid_or_expired"))
        ));
    }

    #[tokio::test]
    async fn join_validates_input_and_group_state() {
        let j = setup().await;
        let (id, token) = group_with_invite(&j, 24).await;

        assert!(matches!(
            j.joins.join_by_token("", &token).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            j.joins.join_by_token("newcomer", "  ").await,
            Err(AppError::BadRequest("invite.token_required"))
        ));
        assert!(matches!(
            j.joins.join_by_token("newcomer", "garbage").await,
            Err(AppError::Forbidden("invite.invalid_or_expired"))
        ));

        j.groups.delete("creator", &id, false).await.unwrap();
        assert!(matches!(
            j.joins.join_by_token("newcomer", &token).await,
            Err(AppError::Forbidden("group.not_joinable"))
        ));

        j.groups.delete("creator", &id, true).await.unwrap();
        assert!(matches!(
            j.joins.join_by_token("newcomer", &token).await,
            Err(AppError::NotFound(_))
        ));
    }
}
