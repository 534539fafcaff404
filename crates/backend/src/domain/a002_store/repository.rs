use chrono::Utc;
use contracts::domain::a002_store::aggregate::Store;
use serde::{Deserialize, Serialize};

use sea_orm::entity::prelude::*;
use sea_orm::Set;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "a002_store")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Store {
    fn from(m: Model) -> Self {
        Store {
            id: m.id,
            name: m.name,
            is_active: m.is_active,
        }
    }
}

pub async fn get_by_id(db: &DatabaseConnection, id: &str) -> Result<Option<Store>, DbErr> {
    let result = Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(result.map(Into::into))
}

pub async fn insert(db: &DatabaseConnection, store: &Store) -> Result<(), DbErr> {
    let now = Utc::now();
    let active = ActiveModel {
        id: Set(store.id.clone()),
        name: Set(store.name.clone()),
        is_active: Set(store.is_active),
        created_at: Set(Some(now)),
        updated_at: Set(Some(now)),
    };
    active.insert(db).await?;
    Ok(())
}
