use chrono::{DateTime, Utc};
use contracts::domain::a001_group::aggregate::{Contributor, Group, GroupId, GroupParts};
use contracts::domain::common::{AggregateId, EntityMetadata};
use contracts::enums::group_status::GroupStatus;
use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, FromQueryResult, Order, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    QueryTrait, Statement, TransactionTrait, Value,
};
use std::collections::HashMap;

use crate::shared::listing::{like_pattern, GroupSortField, PageRequest, SortSpec};

pub mod group {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a001_group")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub name: String,
        pub description: Option<String>,
        pub image: Option<String>,
        pub product_id: String,
        pub store_id: String,
        pub target_amount: f64,
        pub collected_amount: f64,
        pub creator_id: String,
        pub status: String,
        pub dead_line: Option<chrono::DateTime<chrono::Utc>>,
        pub is_active: bool,
        pub created_at: chrono::DateTime<chrono::Utc>,
        pub updated_at: chrono::DateTime<chrono::Utc>,
        pub version: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod contributor {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "a001_group_contributor")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub seq: i64,
        pub group_id: String,
        pub client_id: String,
        pub paid_amount: f64,
        pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
        pub transaction_status: bool,
        pub transaction_id: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

impl From<contributor::Model> for Contributor {
    fn from(m: contributor::Model) -> Self {
        Contributor {
            client: m.client_id,
            paid_amount: m.paid_amount,
            paid_at: m.paid_at,
            transaction_status: m.transaction_status,
            transaction_id: m.transaction_id,
        }
    }
}

fn parse_id(raw: &str) -> Result<GroupId, DbErr> {
    GroupId::from_string(raw).map_err(|e| DbErr::Custom(format!("a001_group.id: {}", e)))
}

fn parse_status(raw: &str) -> Result<GroupStatus, DbErr> {
    GroupStatus::from_code(raw)
        .ok_or_else(|| DbErr::Custom(format!("a001_group.status: unknown '{}'", raw)))
}

fn into_group(m: group::Model, contributors: Vec<Contributor>) -> Result<Group, DbErr> {
    Ok(Group::from_parts(GroupParts {
        id: parse_id(&m.id)?,
        name: m.name,
        description: m.description,
        image: m.image,
        product_ref: m.product_id,
        store_ref: m.store_id,
        target_amount: m.target_amount,
        collected_amount: m.collected_amount,
        creator_ref: m.creator_id,
        contributors,
        status: parse_status(&m.status)?,
        dead_line: m.dead_line,
        is_active: m.is_active,
        metadata: EntityMetadata {
            created_at: m.created_at,
            updated_at: m.updated_at,
            version: m.version,
        },
    }))
}

fn stmt(sql: &str, values: Vec<Value>) -> Statement {
    Statement::from_sql_and_values(DatabaseBackend::Sqlite, sql, values)
}

/// Фильтр "группа активна и дедлайн наступил". Общий для фонового закрытия
/// и закрытия при чтении.
const EXPIRED_PREDICATE: &str =
    "status = 'active' AND dead_line IS NOT NULL AND dead_line <= ?";

// ============================================================================
// Ledger primitives
// ============================================================================

/// Пересчитать `collected_amount` по текущим строкам реестра.
///
/// Вызывается последним шагом каждой транзакции, меняющей реестр.
async fn recompute_collected_amount<C: ConnectionTrait>(
    conn: &C,
    id: &str,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    conn.execute(stmt(
        "UPDATE a001_group
         SET collected_amount = (
                 SELECT COALESCE(SUM(paid_amount), 0)
                 FROM a001_group_contributor
                 WHERE group_id = ? AND transaction_status = 1 AND paid_amount > 0
             ),
             updated_at = ?,
             version = version + 1
         WHERE id = ?",
        vec![id.into(), now.into(), id.into()],
    ))
    .await?;
    Ok(())
}

/// Вставка записи реестра, если клиента ещё нет. Возвращает true, если строка добавлена.
async fn insert_contributor_if_absent<C: ConnectionTrait>(
    conn: &C,
    id: &str,
    c: &Contributor,
) -> Result<bool, DbErr> {
    let result = conn
        .execute(stmt(
            "INSERT INTO a001_group_contributor
                 (group_id, client_id, paid_amount, paid_at, transaction_status, transaction_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(group_id, client_id) DO NOTHING",
            vec![
                id.into(),
                c.client.clone().into(),
                c.paid_amount.into(),
                c.paid_at.into(),
                c.transaction_status.into(),
                c.transaction_id.clone().into(),
            ],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Условие "группа принадлежит создателю" в виде пустого UPDATE.
/// Ноль строк означает, что группы нет или она чужая.
async fn touch_owned<C: ConnectionTrait>(
    conn: &C,
    id: &str,
    creator: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = conn
        .execute(stmt(
            "UPDATE a001_group SET updated_at = ? WHERE id = ? AND creator_id = ?",
            vec![now.into(), id.into(), creator.into()],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Reads
// ============================================================================

async fn load_contributors(
    db: &DatabaseConnection,
    ids: Vec<String>,
) -> Result<HashMap<String, Vec<Contributor>>, DbErr> {
    let mut by_group: HashMap<String, Vec<Contributor>> = HashMap::new();
    if ids.is_empty() {
        return Ok(by_group);
    }
    let rows = contributor::Entity::find()
        .filter(contributor::Column::GroupId.is_in(ids))
        .order_by_asc(contributor::Column::Seq)
        .all(db)
        .await?;
    for row in rows {
        by_group
            .entry(row.group_id.clone())
            .or_default()
            .push(row.into());
    }
    Ok(by_group)
}

pub async fn get_by_id(db: &DatabaseConnection, id: &GroupId) -> Result<Option<Group>, DbErr> {
    let Some(model) = group::Entity::find_by_id(id.as_string()).one(db).await? else {
        return Ok(None);
    };
    let mut contributors = load_contributors(db, vec![model.id.clone()]).await?;
    let ledger = contributors.remove(&model.id).unwrap_or_default();
    into_group(model, ledger).map(Some)
}

/// Минимальная проекция группы для проверок доступа
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    pub creator_ref: String,
    pub status: GroupStatus,
    pub is_active: bool,
    pub dead_line: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct GroupStateRow {
    creator_id: String,
    status: String,
    is_active: bool,
    dead_line: Option<DateTime<Utc>>,
}

pub async fn get_state(db: &DatabaseConnection, id: &GroupId) -> Result<Option<GroupState>, DbErr> {
    let row = group::Entity::find_by_id(id.as_string())
        .select_only()
        .column(group::Column::CreatorId)
        .column(group::Column::Status)
        .column(group::Column::IsActive)
        .column(group::Column::DeadLine)
        .into_model::<GroupStateRow>()
        .one(db)
        .await?;
    match row {
        Some(row) => Ok(Some(GroupState {
            creator_ref: row.creator_id,
            status: parse_status(&row.status)?,
            is_active: row.is_active,
            dead_line: row.dead_line,
        })),
        None => Ok(None),
    }
}

/// Фильтры списка групп
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub search: Option<String>,
    pub status: Option<GroupStatus>,
    pub is_active: Option<bool>,
}

fn sort_column(field: GroupSortField) -> group::Column {
    match field {
        GroupSortField::Name => group::Column::Name,
        GroupSortField::CreatedAt => group::Column::CreatedAt,
        GroupSortField::UpdatedAt => group::Column::UpdatedAt,
        GroupSortField::DeadLine => group::Column::DeadLine,
        GroupSortField::TargetAmount => group::Column::TargetAmount,
        GroupSortField::CollectedAmount => group::Column::CollectedAmount,
        GroupSortField::Status => group::Column::Status,
    }
}

/// Группы, где клиент создатель или участник. Возвращает страницу и общее число.
pub async fn list_for_member(
    db: &DatabaseConnection,
    client: &str,
    filter: &ListFilter,
    sort: SortSpec,
    page: PageRequest,
) -> Result<(Vec<Group>, u64), DbErr> {
    let member_of = contributor::Entity::find()
        .select_only()
        .column(contributor::Column::GroupId)
        .filter(contributor::Column::ClientId.eq(client))
        .into_query();

    let mut condition = Condition::all().add(
        Condition::any()
            .add(group::Column::CreatorId.eq(client))
            .add(group::Column::Id.in_subquery(member_of)),
    );

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        condition = condition.add(
            Condition::any()
                .add(Expr::col(group::Column::Name).like(LikeExpr::new(pattern.clone()).escape('\\')))
                .add(Expr::col(group::Column::Description).like(LikeExpr::new(pattern).escape('\\'))),
        );
    }
    if let Some(status) = filter.status {
        condition = condition.add(group::Column::Status.eq(status.code()));
    }
    if let Some(is_active) = filter.is_active {
        condition = condition.add(group::Column::IsActive.eq(is_active));
    }

    let order = if sort.descending { Order::Desc } else { Order::Asc };
    let query = group::Entity::find()
        .filter(condition)
        .order_by(sort_column(sort.field), order)
        .order_by_asc(group::Column::Id);

    let total = query.clone().count(db).await?;
    let models = query
        .offset(page.offset())
        .limit(page.limit)
        .all(db)
        .await?;

    let ids = models.iter().map(|m| m.id.clone()).collect();
    let mut ledgers = load_contributors(db, ids).await?;
    let groups = models
        .into_iter()
        .map(|m| {
            let ledger = ledgers.remove(&m.id).unwrap_or_default();
            into_group(m, ledger)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((groups, total))
}

// ============================================================================
// Writes
// ============================================================================

pub async fn insert(db: &DatabaseConnection, group: &Group) -> Result<(), DbErr> {
    let id = group.id.as_string();
    let txn = db.begin().await?;

    txn.execute(stmt(
        "INSERT INTO a001_group
             (id, name, description, image, product_id, store_id, target_amount, collected_amount,
              creator_id, status, dead_line, is_active, created_at, updated_at, version)
         VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?)",
        vec![
            id.clone().into(),
            group.name.clone().into(),
            group.description.clone().into(),
            group.image.clone().into(),
            group.product_ref.clone().into(),
            group.store_ref.clone().into(),
            group.target_amount.into(),
            group.creator_ref().to_string().into(),
            group.status.code().into(),
            group.dead_line.into(),
            group.is_active.into(),
            group.metadata.created_at.into(),
            group.metadata.updated_at.into(),
            group.metadata.version.into(),
        ],
    ))
    .await?;

    for c in group.contributors() {
        insert_contributor_if_absent(&txn, &id, c).await?;
    }
    recompute_collected_amount(&txn, &id, group.metadata.updated_at).await?;

    txn.commit().await
}

/// Версия и статус группы на момент чтения, от которых построена запись
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadStamp {
    pub version: i32,
    pub status: GroupStatus,
}

impl ReadStamp {
    pub fn of(group: &Group) -> Self {
        Self {
            version: group.metadata.version,
            status: group.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// Группы нет или `creator` не её создатель
    Missing,
    /// После чтения группу изменили (например, платёж или закрытие по дедлайну)
    Stale,
}

/// Запись полей группы создателем. При `replace_ledger` реестр заменяется целиком.
///
/// Запись проходит только если версия и статус в БД совпадают с `read`.
/// Закрытие по дедлайну версию не меняет, поэтому статус сверяется отдельно.
pub async fn update(
    db: &DatabaseConnection,
    group: &Group,
    creator: &str,
    read: ReadStamp,
    replace_ledger: bool,
) -> Result<UpdateOutcome, DbErr> {
    let id = group.id.as_string();
    let now = group.metadata.updated_at;
    let txn = db.begin().await?;

    let result = txn
        .execute(stmt(
            "UPDATE a001_group
             SET name = ?, description = ?, image = ?, product_id = ?, store_id = ?,
                 target_amount = ?, status = ?, dead_line = ?, is_active = ?, updated_at = ?
             WHERE id = ? AND creator_id = ? AND version = ? AND status = ?",
            vec![
                group.name.clone().into(),
                group.description.clone().into(),
                group.image.clone().into(),
                group.product_ref.clone().into(),
                group.store_ref.clone().into(),
                group.target_amount.into(),
                group.status.code().into(),
                group.dead_line.into(),
                group.is_active.into(),
                now.into(),
                id.clone().into(),
                creator.into(),
                read.version.into(),
                read.status.code().into(),
            ],
        ))
        .await?;
    if result.rows_affected() == 0 {
        let owned = txn
            .query_one(stmt(
                "SELECT 1 AS found FROM a001_group WHERE id = ? AND creator_id = ?",
                vec![id.into(), creator.into()],
            ))
            .await?
            .is_some();
        txn.rollback().await?;
        return Ok(if owned {
            UpdateOutcome::Stale
        } else {
            UpdateOutcome::Missing
        });
    }

    if replace_ledger {
        txn.execute(stmt(
            "DELETE FROM a001_group_contributor WHERE group_id = ?",
            vec![id.clone().into()],
        ))
        .await?;
        for c in group.contributors() {
            insert_contributor_if_absent(&txn, &id, c).await?;
        }
    }
    recompute_collected_amount(&txn, &id, now).await?;

    txn.commit().await?;
    Ok(UpdateOutcome::Updated)
}

/// Добавить участников, которых ещё нет. `None`, если группа не найдена у этого создателя.
pub async fn add_contributors(
    db: &DatabaseConnection,
    id: &GroupId,
    creator: &str,
    contributors: &[Contributor],
    now: DateTime<Utc>,
) -> Result<Option<u64>, DbErr> {
    let id = id.as_string();
    let txn = db.begin().await?;

    if !touch_owned(&txn, &id, creator, now).await? {
        txn.rollback().await?;
        return Ok(None);
    }
    let mut added = 0;
    for c in contributors {
        if insert_contributor_if_absent(&txn, &id, c).await? {
            added += 1;
        }
    }
    recompute_collected_amount(&txn, &id, now).await?;

    txn.commit().await?;
    Ok(Some(added))
}

/// Убрать участника. Строку создателя условие не затрагивает.
pub async fn remove_contributor(
    db: &DatabaseConnection,
    id: &GroupId,
    creator: &str,
    client: &str,
    now: DateTime<Utc>,
) -> Result<Option<bool>, DbErr> {
    let id = id.as_string();
    let txn = db.begin().await?;

    if !touch_owned(&txn, &id, creator, now).await? {
        txn.rollback().await?;
        return Ok(None);
    }
    let result = txn
        .execute(stmt(
            "DELETE FROM a001_group_contributor
             WHERE group_id = ? AND client_id = ?
               AND client_id <> (SELECT creator_id FROM a001_group WHERE id = ?)",
            vec![id.clone().into(), client.into(), id.clone().into()],
        ))
        .await?;
    recompute_collected_amount(&txn, &id, now).await?;

    txn.commit().await?;
    Ok(Some(result.rows_affected() > 0))
}

/// Результат платежа для существующей записи реестра.
/// false, если у клиента нет записи в этой группе.
pub async fn record_payment(
    db: &DatabaseConnection,
    id: &GroupId,
    client: &str,
    paid_amount: f64,
    transaction_id: &str,
    confirmed: bool,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let id = id.as_string();
    let txn = db.begin().await?;

    let paid_at: Option<DateTime<Utc>> = confirmed.then_some(now);
    let result = txn
        .execute(stmt(
            "UPDATE a001_group_contributor
             SET paid_amount = ?, transaction_status = ?, transaction_id = ?,
                 paid_at = COALESCE(?, paid_at)
             WHERE group_id = ? AND client_id = ?",
            vec![
                paid_amount.into(),
                confirmed.into(),
                transaction_id.into(),
                paid_at.into(),
                id.clone().into(),
                client.into(),
            ],
        ))
        .await?;
    if result.rows_affected() == 0 {
        txn.rollback().await?;
        return Ok(false);
    }
    recompute_collected_amount(&txn, &id, now).await?;

    txn.commit().await?;
    Ok(true)
}

/// Итог вставки участника по приглашению
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinInsert {
    Inserted,
    /// Строка не вставлена: клиент уже в реестре или группа перестала принимать участников
    Skipped,
}

/// Вставка участника одним условным запросом.
///
/// Уникальный индекс `(group_id, client_id)` исключает двойную запись при
/// параллельных запросах, условие `EXISTS` повторяет проверки живого состояния группы.
pub async fn join_contributor(
    db: &DatabaseConnection,
    id: &GroupId,
    client: &str,
    now: DateTime<Utc>,
) -> Result<JoinInsert, DbErr> {
    let id = id.as_string();
    let txn = db.begin().await?;

    let result = txn
        .execute(stmt(
            "INSERT INTO a001_group_contributor
                 (group_id, client_id, paid_amount, paid_at, transaction_status, transaction_id)
             SELECT ?, ?, 0, NULL, 0, ''
             WHERE EXISTS (
                 SELECT 1 FROM a001_group
                 WHERE id = ? AND is_active = 1 AND status = 'active'
                   AND dead_line IS NOT NULL AND dead_line > ?
             )
             ON CONFLICT(group_id, client_id) DO NOTHING",
            vec![id.clone().into(), client.into(), id.clone().into(), now.into()],
        ))
        .await?;
    if result.rows_affected() == 0 {
        txn.rollback().await?;
        return Ok(JoinInsert::Skipped);
    }
    recompute_collected_amount(&txn, &id, now).await?;

    txn.commit().await?;
    Ok(JoinInsert::Inserted)
}

pub async fn set_image(
    db: &DatabaseConnection,
    id: &GroupId,
    creator: &str,
    image: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = db
        .execute(stmt(
            "UPDATE a001_group SET image = ?, updated_at = ?, version = version + 1
             WHERE id = ? AND creator_id = ?",
            vec![
                image.map(str::to_string).into(),
                now.into(),
                id.as_string().into(),
                creator.into(),
            ],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Мягкое удаление. Уже выключенная группа тоже считается найденной.
pub async fn soft_delete(
    db: &DatabaseConnection,
    id: &GroupId,
    creator: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = db
        .execute(stmt(
            "UPDATE a001_group
             SET is_active = 0,
                 updated_at = CASE WHEN is_active = 1 THEN ? ELSE updated_at END,
                 version = CASE WHEN is_active = 1 THEN version + 1 ELSE version END
             WHERE id = ? AND creator_id = ?",
            vec![now.into(), id.as_string().into(), creator.into()],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn hard_delete(db: &DatabaseConnection, id: &GroupId, creator: &str) -> Result<bool, DbErr> {
    let id = id.as_string();
    let txn = db.begin().await?;

    let result = txn
        .execute(stmt(
            "DELETE FROM a001_group WHERE id = ? AND creator_id = ?",
            vec![id.clone().into(), creator.into()],
        ))
        .await?;
    if result.rows_affected() == 0 {
        txn.rollback().await?;
        return Ok(false);
    }
    txn.execute(stmt(
        "DELETE FROM a001_group_contributor WHERE group_id = ?",
        vec![id.into()],
    ))
    .await?;

    txn.commit().await?;
    Ok(true)
}

// ============================================================================
// Deadline closure
// ============================================================================

/// Итог прогона закрытия просроченных групп
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepOutcome {
    pub matched: u64,
    pub modified: u64,
}

/// Закрыть все активные группы с наступившим дедлайном.
///
/// Меняется только `status`: `is_active`, суммы и метки времени не трогаются.
/// Подсчёт и UPDATE идут отдельными autocommit-запросами без общей транзакции:
/// чтение не удерживает блокировку до записи. `modified` берётся из самого
/// UPDATE, `matched` носит справочный характер и не меньше `modified`.
pub async fn close_expired(db: &DatabaseConnection, now: DateTime<Utc>) -> Result<SweepOutcome, DbErr> {
    let counted = db
        .query_one(stmt(
            &format!("SELECT COUNT(*) AS cnt FROM a001_group WHERE {}", EXPIRED_PREDICATE),
            vec![now.into()],
        ))
        .await?
        .map(|row| row.try_get::<i64>("", "cnt"))
        .transpose()?
        .unwrap_or(0);

    let modified = db
        .execute(stmt(
            &format!("UPDATE a001_group SET status = 'closed' WHERE {}", EXPIRED_PREDICATE),
            vec![now.into()],
        ))
        .await?
        .rows_affected();

    Ok(SweepOutcome {
        matched: (counted.max(0) as u64).max(modified),
        modified,
    })
}

/// То же условие, что и у фонового закрытия, но для одной группы
pub async fn close_if_expired(
    db: &DatabaseConnection,
    id: &GroupId,
    now: DateTime<Utc>,
) -> Result<bool, DbErr> {
    let result = db
        .execute(stmt(
            &format!("UPDATE a001_group SET status = 'closed' WHERE id = ? AND {}", EXPIRED_PREDICATE),
            vec![id.as_string().into(), now.into()],
        ))
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Закрыть просроченные группы клиента перед выдачей списка
pub async fn close_expired_for_member(
    db: &DatabaseConnection,
    client: &str,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = db
        .execute(stmt(
            &format!(
                "UPDATE a001_group SET status = 'closed'
                 WHERE {}
                   AND (creator_id = ?
                        OR id IN (SELECT group_id FROM a001_group_contributor WHERE client_id = ?))",
                EXPIRED_PREDICATE
            ),
            vec![now.into(), client.into(), client.into()],
        ))
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::data::db::{connect_in_memory, TempDb};
    use contracts::domain::a001_group::dto::CreateGroupDto;
    use contracts::domain::a003_product::aggregate::ProductSnapshot;

    fn new_group(creator: &str, dead_line: Option<DateTime<Utc>>) -> Group {
        let dto = CreateGroupDto {
            product: "p1".into(),
            name: "Espresso machine".into(),
            dead_line,
            contributors: Some(vec![Contributor::pending("c1")]),
            ..Default::default()
        };
        let snapshot = ProductSnapshot {
            product_ref: "p1".into(),
            price: 300.0,
            store_ref: "s1".into(),
        };
        Group::new_for_insert(creator, dto, snapshot, Utc::now())
    }

    #[tokio::test]
    async fn insert_and_load_keeps_ledger_order() {
        let db = connect_in_memory().await;
        let group = new_group("creator", None);
        insert(&db, &group).await.unwrap();

        let loaded = get_by_id(&db, &group.id).await.unwrap().unwrap();
        let clients: Vec<&str> = loaded.contributors().iter().map(|c| c.client.as_str()).collect();
        assert_eq!(clients, vec!["c1", "creator"]);
        assert_eq!(loaded.target_amount, 300.0);
        assert_eq!(loaded.collected_amount(), 0.0);

        let state = get_state(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(state.creator_ref, "creator");
        assert_eq!(state.status, GroupStatus::Active);
    }

    #[tokio::test]
    async fn ledger_writes_recompute_collected_amount_in_storage() {
        let db = connect_in_memory().await;
        let group = new_group("creator", None);
        insert(&db, &group).await.unwrap();
        let now = Utc::now();

        assert!(record_payment(&db, &group.id, "c1", 50.0, "tx1", true, now).await.unwrap());
        let confirmed_c2 = Contributor {
            client: "c2".into(),
            paid_amount: 30.0,
            paid_at: Some(now),
            transaction_status: true,
            transaction_id: "tx2".into(),
        };
        let added = add_contributors(&db, &group.id, "creator", &[confirmed_c2.clone(), confirmed_c2], now)
            .await
            .unwrap();
        assert_eq!(added, Some(1));
        let loaded = get_by_id(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(loaded.collected_amount(), 80.0);

        assert_eq!(
            remove_contributor(&db, &group.id, "creator", "c1", now).await.unwrap(),
            Some(true)
        );
        let loaded = get_by_id(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(loaded.collected_amount(), 30.0);
        assert_eq!(loaded.contributors().len(), 2);
    }

    #[tokio::test]
    async fn creator_scoped_writes_match_nothing_for_strangers() {
        let db = connect_in_memory().await;
        let group = new_group("creator", None);
        insert(&db, &group).await.unwrap();
        let now = Utc::now();

        assert_eq!(
            update(&db, &group, "c1", ReadStamp::of(&group), false).await.unwrap(),
            UpdateOutcome::Missing
        );
        assert_eq!(add_contributors(&db, &group.id, "c1", &[], now).await.unwrap(), None);
        assert!(!set_image(&db, &group.id, "c1", Some("/media/x.png"), now).await.unwrap());
        assert!(!soft_delete(&db, &group.id, "c1", now).await.unwrap());
        assert!(!hard_delete(&db, &group.id, "c1").await.unwrap());
        assert!(get_by_id(&db, &group.id).await.unwrap().unwrap().is_active);

        // строка создателя не удаляется даже прямым запросом
        assert_eq!(
            remove_contributor(&db, &group.id, "creator", "creator", now).await.unwrap(),
            Some(false)
        );
    }

    #[tokio::test]
    async fn update_from_a_read_taken_before_closure_is_stale() {
        let db = connect_in_memory().await;
        let now = Utc::now();
        let group = new_group("creator", Some(now + chrono::Duration::minutes(5)));
        insert(&db, &group).await.unwrap();

        let mut read = get_by_id(&db, &group.id).await.unwrap().unwrap();
        let stamp = ReadStamp::of(&read);
        let later = now + chrono::Duration::hours(1);
        assert_eq!(close_expired(&db, later).await.unwrap().modified, 1);

        read.name = "Renamed".into();
        read.before_write(later);
        assert_eq!(
            update(&db, &read, "creator", stamp, false).await.unwrap(),
            UpdateOutcome::Stale
        );

        let stored = get_by_id(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GroupStatus::Closed);
        assert_eq!(stored.name, group.name);
    }

    #[tokio::test]
    async fn stale_ledger_replacement_keeps_a_concurrent_payment() {
        let db = connect_in_memory().await;
        let group = new_group("creator", None);
        insert(&db, &group).await.unwrap();
        let now = Utc::now();

        let mut read = get_by_id(&db, &group.id).await.unwrap().unwrap();
        let stamp = ReadStamp::of(&read);
        assert!(record_payment(&db, &group.id, "c1", 70.0, "tx-1", true, now).await.unwrap());

        read.replace_contributors(vec![Contributor::pending("c1"), Contributor::pending("c2")]);
        read.before_write(now);
        assert_eq!(
            update(&db, &read, "creator", stamp, true).await.unwrap(),
            UpdateOutcome::Stale
        );

        let stored = get_by_id(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(stored.collected_amount(), 70.0);
        assert!(!stored.is_member("c2"));

        // свежее чтение проходит
        let mut fresh = stored.clone();
        let stamp = ReadStamp::of(&fresh);
        fresh.name = "Renamed".into();
        fresh.before_write(now);
        assert_eq!(
            update(&db, &fresh, "creator", stamp, false).await.unwrap(),
            UpdateOutcome::Updated
        );
    }

    #[tokio::test]
    async fn soft_delete_is_idempotent() {
        let db = connect_in_memory().await;
        let group = new_group("creator", None);
        insert(&db, &group).await.unwrap();
        let now = Utc::now();

        assert!(soft_delete(&db, &group.id, "creator", now).await.unwrap());
        assert!(soft_delete(&db, &group.id, "creator", now).await.unwrap());
        assert!(!get_by_id(&db, &group.id).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn join_insert_is_guarded_by_unique_index_and_live_state() {
        let db = connect_in_memory().await;
        let now = Utc::now();
        let group = new_group("creator", Some(now + chrono::Duration::hours(1)));
        insert(&db, &group).await.unwrap();

        assert_eq!(join_contributor(&db, &group.id, "c9", now).await.unwrap(), JoinInsert::Inserted);
        assert_eq!(join_contributor(&db, &group.id, "c9", now).await.unwrap(), JoinInsert::Skipped);

        let later = now + chrono::Duration::hours(2);
        assert_eq!(join_contributor(&db, &group.id, "c10", later).await.unwrap(), JoinInsert::Skipped);

        let loaded = get_by_id(&db, &group.id).await.unwrap().unwrap();
        assert_eq!(loaded.contributors().iter().filter(|c| c.client == "c9").count(), 1);
        assert!(!loaded.is_member("c10"));
    }

    #[tokio::test]
    async fn close_expired_touches_only_status() {
        let db = connect_in_memory().await;
        let now = Utc::now();
        let expired = new_group("creator", Some(now - chrono::Duration::seconds(1)));
        let future = new_group("creator", Some(now + chrono::Duration::days(1)));
        let open_ended = new_group("creator", None);
        for g in [&expired, &future, &open_ended] {
            insert(&db, g).await.unwrap();
        }
        let before = get_by_id(&db, &expired.id).await.unwrap().unwrap();

        let outcome = close_expired(&db, now).await.unwrap();
        assert_eq!(outcome, SweepOutcome { matched: 1, modified: 1 });

        let after = get_by_id(&db, &expired.id).await.unwrap().unwrap();
        assert_eq!(after.status, GroupStatus::Closed);
        assert_eq!(after.is_active, before.is_active);
        assert_eq!(after.metadata, before.metadata);
        assert_eq!(
            get_by_id(&db, &future.id).await.unwrap().unwrap().status,
            GroupStatus::Active
        );

        assert_eq!(close_expired(&db, now).await.unwrap(), SweepOutcome::default());
        assert!(!close_if_expired(&db, &expired.id, now).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_sweeps_on_separate_connections_both_succeed() {
        let db = TempDb::connect(4).await;
        let now = Utc::now();
        for _ in 0..5 {
            insert(&db.conn, &new_group("creator", Some(now - chrono::Duration::seconds(1))))
                .await
                .unwrap();
        }
        let live = new_group("creator", Some(now + chrono::Duration::hours(1)));
        insert(&db.conn, &live).await.unwrap();

        let (a, b, joined) = tokio::join!(
            close_expired(&db.conn, now),
            close_expired(&db.conn, now),
            join_contributor(&db.conn, &live.id, "c9", now)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.modified + b.modified, 5);
        assert!(a.matched >= a.modified && b.matched >= b.modified);
        assert_eq!(joined.unwrap(), JoinInsert::Inserted);
        assert_eq!(close_expired(&db.conn, now).await.unwrap(), SweepOutcome::default());
    }

    #[tokio::test]
    async fn list_is_scoped_to_members_and_paginated() {
        let db = connect_in_memory().await;
        for i in 0..3 {
            let mut g = new_group("creator", None);
            g.name = format!("Group {}", i);
            insert(&db, &g).await.unwrap();
        }
        let mut foreign = new_group("someone-else", None);
        foreign.name = "Group foreign".into();
        foreign.replace_contributors(vec![]);
        insert(&db, &foreign).await.unwrap();

        let sort = SortSpec {
            field: GroupSortField::Name,
            descending: false,
        };
        let (page, total) = list_for_member(
            &db,
            "creator",
            &ListFilter::default(),
            sort,
            PageRequest { page: 1, limit: 2 },
        )
        .await
        .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].name, "Group 0");

        // c1 участник трёх групп создателя, но не чужой
        let (groups, total) = list_for_member(
            &db,
            "c1",
            &ListFilter {
                search: Some("group".into()),
                ..Default::default()
            },
            sort,
            PageRequest { page: 1, limit: 10 },
        )
        .await
        .unwrap();
        assert_eq!(total, 3);
        assert!(groups.iter().all(|g| g.name != "Group foreign"));

        let (_, total) = list_for_member(
            &db,
            "stranger",
            &ListFilter::default(),
            sort,
            PageRequest { page: 1, limit: 10 },
        )
        .await
        .unwrap();
        assert_eq!(total, 0);
    }
}
