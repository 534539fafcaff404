use serde::{Deserialize, Serialize};

/// Товар магазина
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    /// ID магазина (ссылка на a002_store)
    #[serde(rename = "store")]
    pub store_ref: Option<String>,
    pub image: Option<String>,
}

impl Product {
    pub fn new_for_insert(
        name: impl Into<String>,
        price: f64,
        store_ref: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            price,
            store_ref,
            image: None,
        }
    }
}

/// Снимок товара на момент создания/смены товара группы.
///
/// Цена становится `targetAmount` группы и дальше не следит за товаром.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductSnapshot {
    pub product_ref: String,
    pub price: f64,
    pub store_ref: String,
}
