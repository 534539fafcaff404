use serde::{Deserialize, Serialize};

/// Магазин-владелец товаров (минимальная проекция, нужная группам)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub id: String,
    pub name: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

impl Store {
    pub fn new_for_insert(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            is_active: true,
        }
    }
}
