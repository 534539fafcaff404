use contracts::domain::a001_group::aggregate::{Group, GroupId};
use sea_orm::DatabaseConnection;

use super::repository::{self, GroupState};
use crate::shared::error::{AppError, AppResult};

pub fn is_creator(group: &Group, client: &str) -> bool {
    group.is_creator(client)
}

pub fn is_member(group: &Group, client: &str) -> bool {
    group.is_member(client)
}

/// Вызывающий должен быть аутентифицирован
pub fn require_client(client: &str) -> AppResult<&str> {
    let client = client.trim();
    if client.is_empty() {
        return Err(AppError::Unauthorized("auth.required"));
    }
    Ok(client)
}

/// Проверка "вызывающий создатель группы" по минимальной проекции.
///
/// Нет клиента: `Unauthorized`. Нет группы: `NotFound`. Группа чужая: `Forbidden`.
pub async fn assert_creator(
    db: &DatabaseConnection,
    client: &str,
    id: &GroupId,
) -> AppResult<GroupState> {
    let client = require_client(client)?;
    let state = repository::get_state(db, id)
        .await?
        .ok_or(AppError::NotFound("group.not_found"))?;
    if state.creator_ref != client {
        return Err(AppError::Forbidden("group.creator_only"));
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::connect_in_memory;
    use chrono::Utc;
    use contracts::domain::a001_group::aggregate::Contributor;
    use contracts::domain::a001_group::dto::CreateGroupDto;
    use contracts::domain::a003_product::aggregate::ProductSnapshot;

    fn group() -> Group {
        let dto = CreateGroupDto {
            product: "p".into(),
            name: "Bikes".into(),
            contributors: Some(vec![Contributor::pending("member")]),
            ..Default::default()
        };
        let snapshot = ProductSnapshot {
            product_ref: "p".into(),
            price: 10.0,
            store_ref: "s".into(),
        };
        Group::new_for_insert("owner", dto, snapshot, Utc::now())
    }

    #[test]
    fn predicates() {
        let g = group();
        assert!(is_creator(&g, "owner"));
        assert!(!is_creator(&g, "member"));
        assert!(is_member(&g, "member"));
        assert!(is_member(&g, "owner"));
        assert!(!is_member(&g, "stranger"));
    }

    #[tokio::test]
    async fn assert_creator_orders_checks() {
        let db = connect_in_memory().await;
        let g = group();
        repository::insert(&db, &g).await.unwrap();

        assert!(matches!(
            assert_creator(&db, "", &g.id).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            assert_creator(&db, "member", &g.id).await,
            Err(AppError::Forbidden("group.creator_only"))
        ));
        assert!(matches!(
            assert_creator(&db, "member", &GroupId::new_v4()).await,
            Err(AppError::NotFound("group.not_found"))
        ));
        let state = assert_creator(&db, "owner", &g.id).await.unwrap();
        assert_eq!(state.creator_ref, "owner");
    }
}
