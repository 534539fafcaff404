use chrono::Utc;
use contracts::domain::a003_product::aggregate::Product;
use serde::{Deserialize, Serialize};

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::Expr;
use sea_orm::Set;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "a003_product")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub price: f64,
    pub store_id: Option<String>,
    pub image: Option<String>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Product {
    fn from(m: Model) -> Self {
        Product {
            id: m.id,
            name: m.name,
            price: m.price,
            store_ref: m.store_id,
            image: m.image,
        }
    }
}

pub async fn get_by_id(db: &DatabaseConnection, id: &str) -> Result<Option<Product>, DbErr> {
    let result = Entity::find_by_id(id.to_string()).one(db).await?;
    Ok(result.map(Into::into))
}

pub async fn insert(db: &DatabaseConnection, product: &Product) -> Result<(), DbErr> {
    let now = Utc::now();
    let active = ActiveModel {
        id: Set(product.id.clone()),
        name: Set(product.name.clone()),
        price: Set(product.price),
        store_id: Set(product.store_ref.clone()),
        image: Set(product.image.clone()),
        created_at: Set(Some(now)),
        updated_at: Set(Some(now)),
    };
    active.insert(db).await?;
    Ok(())
}

pub async fn update_price(db: &DatabaseConnection, id: &str, price: f64) -> Result<bool, DbErr> {
    let result = Entity::update_many()
        .col_expr(Column::Price, Expr::value(price))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}
