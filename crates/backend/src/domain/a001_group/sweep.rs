use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;

use super::repository::{self, SweepOutcome};

/// Один прогон закрытия групп с наступившим дедлайном
pub async fn close_expired_groups(
    db: &DatabaseConnection,
    now: DateTime<Utc>,
) -> anyhow::Result<SweepOutcome> {
    let outcome = repository::close_expired(db, now).await?;
    tracing::info!(
        "Group deadline sweep: matched {}, modified {}",
        outcome.matched,
        outcome.modified
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::a001_group::service::tests::{create_dto, fixture};
    use crate::shared::clock::Clock;
    use chrono::Duration;
    use contracts::enums::group_status::GroupStatus;

    #[tokio::test]
    async fn sweep_closes_once_then_matches_nothing() {
        let f = fixture().await;
        let mut dto = create_dto(&f.product);
        dto.dead_line = Some(f.clock.now() + Duration::seconds(1));
        let expired = f.service.create("creator", dto).await.unwrap();
        let open = f.service.create("creator", create_dto(&f.product)).await.unwrap();

        f.clock.advance(Duration::seconds(2));
        let db = f.service.db();
        let first = close_expired_groups(db, f.clock.now()).await.unwrap();
        assert_eq!(first, SweepOutcome { matched: 1, modified: 1 });
        let second = close_expired_groups(db, f.clock.now()).await.unwrap();
        assert_eq!(second, SweepOutcome::default());

        let closed = f.service.get("creator", &expired.id).await.unwrap();
        assert_eq!(closed.status, GroupStatus::Closed);
        assert!(closed.is_active);
        assert_eq!(closed.collected_amount, expired.collected_amount);
        assert_eq!(closed.updated_at, expired.updated_at);

        let untouched = f.service.get("creator", &open.id).await.unwrap();
        assert_eq!(untouched.status, GroupStatus::Active);
    }
}
