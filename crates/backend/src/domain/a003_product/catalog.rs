use async_trait::async_trait;
use contracts::domain::a001_group::dto::{ProductRef, StoreRef};
use contracts::domain::a003_product::aggregate::{Product, ProductSnapshot};
use sea_orm::DatabaseConnection;

use super::repository;
use crate::domain::a002_store;
use crate::shared::error::{AppError, AppResult};

/// Каталог товаров, из которого группа берёт цену и магазин
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn get_product(&self, product_id: &str) -> AppResult<Option<Product>>;

    async fn product_ref(&self, product_id: &str) -> AppResult<Option<ProductRef>>;

    async fn store_ref(&self, store_id: &str) -> AppResult<Option<StoreRef>>;
}

/// Снимок товара для группы.
///
/// `NotFound` для неизвестного товара, `BadRequest` если нет магазина или цена некорректна.
pub async fn resolve_snapshot(
    catalog: &dyn ProductCatalog,
    product_id: &str,
) -> AppResult<ProductSnapshot> {
    let product = catalog
        .get_product(product_id.trim())
        .await?
        .ok_or(AppError::NotFound("product.not_found"))?;

    if !product.price.is_finite() || product.price < 0.0 {
        return Err(AppError::BadRequest("product.invalid_price"));
    }
    let store_ref = product
        .store_ref
        .filter(|s| !s.trim().is_empty())
        .ok_or(AppError::BadRequest("product.store_missing"))?;

    Ok(ProductSnapshot {
        product_ref: product.id,
        price: product.price,
        store_ref,
    })
}

pub struct SqlProductCatalog {
    db: DatabaseConnection,
}

impl SqlProductCatalog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductCatalog for SqlProductCatalog {
    async fn get_product(&self, product_id: &str) -> AppResult<Option<Product>> {
        Ok(repository::get_by_id(&self.db, product_id).await?)
    }

    async fn product_ref(&self, product_id: &str) -> AppResult<Option<ProductRef>> {
        Ok(self.get_product(product_id).await?.map(|p| ProductRef {
            id: p.id,
            name: p.name,
            price: p.price,
            image: p.image,
        }))
    }

    async fn store_ref(&self, store_id: &str) -> AppResult<Option<StoreRef>> {
        let store = a002_store::repository::get_by_id(&self.db, store_id).await?;
        Ok(store.map(|s| StoreRef {
            id: s.id,
            name: s.name,
        }))
    }
}
