use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::dto::CreateGroupDto;
use crate::domain::a003_product::aggregate::ProductSnapshot;
use crate::domain::common::{AggregateId, EntityMetadata};
use crate::enums::group_status::GroupStatus;

// ============================================================================
// ID Type
// ============================================================================

/// Уникальный идентификатор группы
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new(value: Uuid) -> Self {
        Self(value)
    }

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl AggregateId for GroupId {
    fn as_string(&self) -> String {
        self.0.to_string()
    }

    fn from_string(s: &str) -> Result<Self, String> {
        Uuid::parse_str(s)
            .map(GroupId::new)
            .map_err(|e| format!("Invalid UUID: {}", e))
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Contributor ledger
// ============================================================================

/// Запись участника в реестре взносов группы
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    /// ID клиента (ссылка на sys_users)
    pub client: String,
    #[serde(rename = "paidAmount", default)]
    pub paid_amount: f64,
    #[serde(rename = "paidAt", default)]
    pub paid_at: Option<DateTime<Utc>>,
    /// Платёж подтверждён внешним платёжным модулем
    #[serde(rename = "transactionStatus", default)]
    pub transaction_status: bool,
    #[serde(rename = "transactionId", default)]
    pub transaction_id: String,
}

impl Contributor {
    /// Новый участник без оплаты
    pub fn pending(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            paid_amount: 0.0,
            paid_at: None,
            transaction_status: false,
            transaction_id: String::new(),
        }
    }

    /// Входит ли взнос в `collectedAmount`
    pub fn counts_toward_total(&self) -> bool {
        self.transaction_status && self.paid_amount.is_finite() && self.paid_amount > 0.0
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client.trim().is_empty() {
            return Err("contributor.client_required");
        }
        if !self.paid_amount.is_finite() || self.paid_amount < 0.0 {
            return Err("contributor.invalid_amount");
        }
        Ok(())
    }
}

/// Сумма подтверждённых взносов.
///
/// Единственное место, где считается `collectedAmount`; SQL-пересчёт в
/// репозитории повторяет этот же фильтр.
pub fn collected_amount_of(contributors: &[Contributor]) -> f64 {
    contributors
        .iter()
        .filter(|c| c.counts_toward_total())
        .map(|c| c.paid_amount)
        .sum()
}

/// Убирает повторы по клиенту, оставляя первое вхождение
pub fn dedup_by_client(contributors: impl IntoIterator<Item = Contributor>) -> Vec<Contributor> {
    let mut seen = HashSet::new();
    contributors
        .into_iter()
        .filter(|c| seen.insert(c.client.clone()))
        .collect()
}

// ============================================================================
// Aggregate Root
// ============================================================================

/// Группа совместной покупки.
///
/// Реестр участников закрыт: любое изменение идёт через методы агрегата,
/// которые сразу пересчитывают `collectedAmount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,

    /// ID товара (ссылка на a003_product)
    #[serde(rename = "product")]
    pub product_ref: String,

    /// ID магазина товара, денормализован при записи
    #[serde(rename = "store")]
    pub store_ref: String,

    #[serde(rename = "targetAmount")]
    pub target_amount: f64,

    #[serde(rename = "collectedAmount")]
    collected_amount: f64,

    #[serde(rename = "creator")]
    creator_ref: String,

    contributors: Vec<Contributor>,

    pub status: GroupStatus,

    #[serde(rename = "deadLine")]
    pub dead_line: Option<DateTime<Utc>>,

    #[serde(rename = "isActive")]
    pub is_active: bool,

    #[serde(flatten)]
    pub metadata: EntityMetadata,
}

/// Поля группы в том виде, в котором они лежат в БД
#[derive(Debug, Clone)]
pub struct GroupParts {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub product_ref: String,
    pub store_ref: String,
    pub target_amount: f64,
    pub collected_amount: f64,
    pub creator_ref: String,
    pub contributors: Vec<Contributor>,
    pub status: GroupStatus,
    pub dead_line: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub metadata: EntityMetadata,
}

impl Group {
    /// Создать новую группу для вставки в БД.
    ///
    /// Создатель всегда попадает в реестр участников.
    pub fn new_for_insert(
        creator_ref: impl Into<String>,
        dto: CreateGroupDto,
        snapshot: ProductSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let mut group = Self {
            id: GroupId::new_v4(),
            name: dto.name.trim().to_string(),
            description: dto.description,
            image: dto.image,
            product_ref: snapshot.product_ref,
            store_ref: snapshot.store_ref,
            target_amount: snapshot.price,
            collected_amount: 0.0,
            creator_ref: creator_ref.into(),
            contributors: Vec::new(),
            status: dto.status.unwrap_or_default(),
            dead_line: dto.dead_line,
            is_active: dto.is_active.unwrap_or(true),
            metadata: EntityMetadata::new_at(now),
        };
        group.replace_contributors(dto.contributors.unwrap_or_default());
        group
    }

    /// Загрузка из БД. `collected_amount` берётся как есть: его поддерживает
    /// хранилище в той же транзакции, что и реестр.
    pub fn from_parts(parts: GroupParts) -> Self {
        Self {
            id: parts.id,
            name: parts.name,
            description: parts.description,
            image: parts.image,
            product_ref: parts.product_ref,
            store_ref: parts.store_ref,
            target_amount: parts.target_amount,
            collected_amount: parts.collected_amount,
            creator_ref: parts.creator_ref,
            contributors: parts.contributors,
            status: parts.status,
            dead_line: parts.dead_line,
            is_active: parts.is_active,
            metadata: parts.metadata,
        }
    }

    pub fn collected_amount(&self) -> f64 {
        self.collected_amount
    }

    pub fn creator_ref(&self) -> &str {
        &self.creator_ref
    }

    pub fn contributors(&self) -> &[Contributor] {
        &self.contributors
    }

    pub fn is_creator(&self, client: &str) -> bool {
        self.creator_ref == client
    }

    pub fn is_member(&self, client: &str) -> bool {
        self.is_creator(client) || self.contributors.iter().any(|c| c.client == client)
    }

    /// Полная замена реестра. Повторы по клиенту отбрасываются, создатель
    /// сохраняет свою прежнюю запись, если его нет в новом списке.
    pub fn replace_contributors(&mut self, contributors: Vec<Contributor>) {
        let mut next = dedup_by_client(contributors);
        if !next.iter().any(|c| c.client == self.creator_ref) {
            let creator_entry = self
                .contributors
                .iter()
                .find(|c| c.client == self.creator_ref)
                .cloned()
                .unwrap_or_else(|| Contributor::pending(self.creator_ref.clone()));
            next.push(creator_entry);
        }
        self.contributors = next;
        self.recompute_collected_amount();
    }

    /// Добавить участников, которых ещё нет в реестре. Возвращает число добавленных.
    pub fn add_contributors(&mut self, contributors: Vec<Contributor>) -> usize {
        let mut added = 0;
        for contributor in contributors {
            if self.contributors.iter().any(|c| c.client == contributor.client) {
                continue;
            }
            self.contributors.push(contributor);
            added += 1;
        }
        self.recompute_collected_amount();
        added
    }

    /// Убрать участника. Создателя убрать нельзя.
    pub fn remove_contributor(&mut self, client: &str) -> Result<bool, &'static str> {
        if self.is_creator(client) {
            return Err("group.creator_required");
        }
        let before = self.contributors.len();
        self.contributors.retain(|c| c.client != client);
        self.recompute_collected_amount();
        Ok(self.contributors.len() != before)
    }

    /// Зафиксировать результат платежа участника
    pub fn record_payment(
        &mut self,
        client: &str,
        paid_amount: f64,
        transaction_id: &str,
        confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<(), &'static str> {
        if !paid_amount.is_finite() || paid_amount < 0.0 {
            return Err("contributor.invalid_amount");
        }
        let entry = self
            .contributors
            .iter_mut()
            .find(|c| c.client == client)
            .ok_or("contributor.not_found")?;
        entry.paid_amount = paid_amount;
        entry.transaction_status = confirmed;
        entry.transaction_id = transaction_id.to_string();
        entry.paid_at = if confirmed { Some(now) } else { entry.paid_at };
        self.recompute_collected_amount();
        Ok(())
    }

    /// Перенести цену и магазин из снимка товара
    pub fn apply_product_snapshot(&mut self, snapshot: ProductSnapshot) {
        self.product_ref = snapshot.product_ref;
        self.store_ref = snapshot.store_ref;
        self.target_amount = snapshot.price;
    }

    /// Дедлайн наступил (граница включительно, как у фонового закрытия)
    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.dead_line.map_or(false, |d| d <= now)
    }

    /// Активная группа с прошедшим дедлайном должна быть закрыта
    pub fn needs_closing(&self, now: DateTime<Utc>) -> bool {
        self.status == GroupStatus::Active && self.deadline_elapsed(now)
    }

    pub fn dead_line_epoch(&self) -> Option<i64> {
        self.dead_line.map(|d| d.timestamp())
    }

    /// Валидация данных
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("group.name_required");
        }
        if self.product_ref.trim().is_empty() {
            return Err("group.product_required");
        }
        if self.store_ref.trim().is_empty() {
            return Err("product.store_missing");
        }
        if !self.target_amount.is_finite() || self.target_amount < 0.0 {
            return Err("group.invalid_target_amount");
        }
        for contributor in &self.contributors {
            contributor.validate()?;
        }
        Ok(())
    }

    /// Хук перед записью
    pub fn before_write(&mut self, now: DateTime<Utc>) {
        self.metadata.touch(now);
        self.metadata.increment_version();
    }

    fn recompute_collected_amount(&mut self) {
        self.collected_amount = collected_amount_of(&self.contributors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(price: f64) -> ProductSnapshot {
        ProductSnapshot {
            product_ref: "product-1".into(),
            price,
            store_ref: "store-1".into(),
        }
    }

    fn confirmed(client: &str, amount: f64) -> Contributor {
        Contributor {
            client: client.into(),
            paid_amount: amount,
            paid_at: Some(Utc::now()),
            transaction_status: true,
            transaction_id: format!("tx-{}", client),
        }
    }

    fn new_group(contributors: Vec<Contributor>) -> Group {
        let dto = CreateGroupDto {
            product: "product-1".into(),
            name: "  Coffee machine  ".into(),
            contributors: Some(contributors),
            ..Default::default()
        };
        Group::new_for_insert("creator", dto, snapshot(120.0), Utc::now())
    }

    #[test]
    fn creator_is_appended_to_ledger_on_insert() {
        let group = new_group(vec![Contributor::pending("c1")]);
        let clients: Vec<&str> = group.contributors().iter().map(|c| c.client.as_str()).collect();
        assert_eq!(clients, vec!["c1", "creator"]);
        assert_eq!(group.name, "Coffee machine");
        assert_eq!(group.target_amount, 120.0);
        assert_eq!(group.status, GroupStatus::Active);
        assert!(group.is_active);
    }

    #[test]
    fn collected_amount_follows_every_ledger_mutation() {
        let mut group = new_group(vec![Contributor::pending("c1")]);
        assert_eq!(group.collected_amount(), 0.0);

        group.replace_contributors(vec![confirmed("c1", 50.0)]);
        assert_eq!(group.collected_amount(), 50.0);

        group.add_contributors(vec![confirmed("c2", 30.0)]);
        assert_eq!(group.collected_amount(), 80.0);

        assert_eq!(group.remove_contributor("c1"), Ok(true));
        assert_eq!(group.collected_amount(), 30.0);
    }

    #[test]
    fn unconfirmed_and_non_positive_payments_are_ignored() {
        let mut unconfirmed = confirmed("c1", 40.0);
        unconfirmed.transaction_status = false;
        let ledger = vec![
            unconfirmed,
            confirmed("c2", 0.0),
            confirmed("c3", f64::INFINITY),
            confirmed("c4", 15.5),
        ];
        assert_eq!(collected_amount_of(&ledger), 15.5);
    }

    #[test]
    fn replace_keeps_creator_entry_and_drops_duplicates() {
        let mut group = new_group(vec![]);
        group
            .record_payment("creator", 10.0, "tx-creator", true, Utc::now())
            .unwrap();

        group.replace_contributors(vec![confirmed("c1", 5.0), confirmed("c1", 99.0)]);

        assert_eq!(group.contributors().len(), 2);
        assert_eq!(group.contributors()[0].paid_amount, 5.0);
        assert_eq!(group.contributors()[1].client, "creator");
        assert_eq!(group.collected_amount(), 15.0);
    }

    #[test]
    fn add_contributors_is_add_if_absent() {
        let mut group = new_group(vec![Contributor::pending("c1")]);
        let added = group.add_contributors(vec![
            Contributor::pending("c1"),
            Contributor::pending("c2"),
            Contributor::pending("c2"),
        ]);
        assert_eq!(added, 1);
        assert_eq!(group.contributors().len(), 3);
    }

    #[test]
    fn creator_cannot_be_removed() {
        let mut group = new_group(vec![]);
        assert_eq!(
            group.remove_contributor("creator"),
            Err("group.creator_required")
        );
        assert_eq!(group.remove_contributor("stranger"), Ok(false));
    }

    #[test]
    fn membership_predicates() {
        let group = new_group(vec![Contributor::pending("c1")]);
        assert!(group.is_creator("creator"));
        assert!(!group.is_creator("c1"));
        assert!(group.is_member("c1"));
        assert!(group.is_member("creator"));
        assert!(!group.is_member("stranger"));
    }

    #[test]
    fn record_payment_rejects_unknown_client_and_bad_amounts() {
        let mut group = new_group(vec![Contributor::pending("c1")]);
        let now = Utc::now();
        assert_eq!(
            group.record_payment("ghost", 1.0, "tx", true, now),
            Err("contributor.not_found")
        );
        assert_eq!(
            group.record_payment("c1", -1.0, "tx", true, now),
            Err("contributor.invalid_amount")
        );
        assert_eq!(
            group.record_payment("c1", f64::NAN, "tx", true, now),
            Err("contributor.invalid_amount")
        );
        group.record_payment("c1", 25.0, "tx-1", true, now).unwrap();
        assert_eq!(group.contributors()[0].paid_at, Some(now));
        assert_eq!(group.collected_amount(), 25.0);
    }

    #[test]
    fn deadline_boundary_is_inclusive() {
        let now = Utc::now();
        let mut group = new_group(vec![]);
        assert!(!group.needs_closing(now));

        group.dead_line = Some(now);
        assert!(group.needs_closing(now));

        group.dead_line = Some(now + chrono::Duration::seconds(1));
        assert!(!group.needs_closing(now));

        group.dead_line = Some(now - chrono::Duration::seconds(1));
        group.status = GroupStatus::Funded;
        assert!(!group.needs_closing(now));
    }

    #[test]
    fn validate_rejects_empty_name_and_bad_target() {
        let mut group = new_group(vec![]);
        assert!(group.validate().is_ok());

        group.target_amount = -1.0;
        assert_eq!(group.validate(), Err("group.invalid_target_amount"));

        group.target_amount = 1.0;
        group.name = "   ".into();
        assert_eq!(group.validate(), Err("group.name_required"));
    }

    #[test]
    fn serialized_form_uses_api_field_names() {
        let group = new_group(vec![]);
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["creator"], "creator");
        assert_eq!(json["collectedAmount"], 0.0);
        assert_eq!(json["targetAmount"], 120.0);
        assert_eq!(json["status"], "active");
        assert!(json["contributors"].is_array());
        assert!(json.get("createdAt").is_some());
    }
}
