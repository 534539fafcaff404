use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use super::aggregate::{Contributor, Group};
use crate::enums::group_status::GroupStatus;

// ============================================================================
// Forms / DTOs
// ============================================================================

/// DTO для создания группы. Создатель берётся из токена, не из тела запроса.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupDto {
    pub product: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub dead_line: Option<DateTime<Utc>>,
    pub status: Option<GroupStatus>,
    pub is_active: Option<bool>,
    pub contributors: Option<Vec<Contributor>>,
}

/// DTO для частичного обновления группы.
///
/// Для `description`, `image` и `deadLine` различаются "поле не передано"
/// (`None`) и "явный null" (`Some(None)`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGroupDto {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub image: Option<Option<String>>,
    pub product: Option<String>,
    pub target_amount: Option<f64>,
    /// Принимается только для валидации, значение всегда пересчитывается
    pub collected_amount: Option<f64>,
    #[serde(default, deserialize_with = "double_option")]
    pub dead_line: Option<Option<DateTime<Utc>>>,
    pub status: Option<GroupStatus>,
    pub is_active: Option<bool>,
    /// Полная замена реестра участников
    pub contributors: Option<Vec<Contributor>>,
}

fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Параметры списка групп
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GroupListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Поле сортировки, `-` в начале означает убывание
    pub sort: Option<String>,
    pub search: Option<String>,
    pub status: Option<GroupStatus>,
    pub is_active: Option<bool>,
}

/// Результат платежа от платёжного модуля
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPaymentDto {
    pub client: String,
    pub paid_amount: f64,
    #[serde(default)]
    pub transaction_id: String,
    pub confirmed: bool,
}

/// Участники для добавления в реестр (уже состоящие пропускаются)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddContributorsDto {
    pub contributors: Vec<Contributor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteLinkDto {
    pub group_id: String,
    pub token: String,
    pub exp: i64,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGroupRequest {
    pub token: String,
}

// ============================================================================
// Populated view
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    pub id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
}

impl ClientRef {
    pub fn unresolved(id: &str) -> Self {
        Self {
            id: id.to_string(),
            username: None,
            full_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorView {
    pub client: ClientRef,
    pub paid_amount: f64,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_status: bool,
    pub transaction_id: String,
}

/// Группа со ссылками, развёрнутыми в отображаемую форму
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub product: Option<ProductRef>,
    pub store: Option<StoreRef>,
    pub target_amount: f64,
    pub collected_amount: f64,
    pub creator: ClientRef,
    pub contributors: Vec<ContributorView>,
    pub status: GroupStatus,
    pub dead_line: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupView {
    /// Собрать представление из группы и уже загруженных справочников.
    /// Ненайденные клиенты отображаются только своим ID.
    pub fn assemble(
        group: &Group,
        product: Option<ProductRef>,
        store: Option<StoreRef>,
        clients: &HashMap<String, ClientRef>,
    ) -> Self {
        let client_ref = |id: &str| {
            clients
                .get(id)
                .cloned()
                .unwrap_or_else(|| ClientRef::unresolved(id))
        };

        Self {
            id: group.id.to_string(),
            name: group.name.clone(),
            description: group.description.clone(),
            image: group.image.clone(),
            product,
            store,
            target_amount: group.target_amount,
            collected_amount: group.collected_amount(),
            creator: client_ref(group.creator_ref()),
            contributors: group
                .contributors()
                .iter()
                .map(|c| ContributorView {
                    client: client_ref(&c.client),
                    paid_amount: c.paid_amount,
                    paid_at: c.paid_at,
                    transaction_status: c.transaction_status,
                    transaction_id: c.transaction_id.clone(),
                })
                .collect(),
            status: group.status,
            dead_line: group.dead_line,
            is_active: group.is_active,
            created_at: group.metadata.created_at,
            updated_at: group.metadata.updated_at,
        }
    }
}
