use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;

/// Трейт для типов идентификаторов агрегатов
pub trait AggregateId:
    Clone + Copy + PartialEq + Eq + Hash + Serialize + DeserializeOwned + std::fmt::Debug
{
    /// Преобразовать ID в строку (формат хранения в БД)
    fn as_string(&self) -> String;

    /// Создать ID из строки (path-параметр, колонка БД)
    fn from_string(s: &str) -> Result<Self, String>;
}

impl AggregateId for uuid::Uuid {
    fn as_string(&self) -> String {
        ToString::to_string(self)
    }

    fn from_string(s: &str) -> Result<Self, String> {
        uuid::Uuid::parse_str(s).map_err(|e| format!("Invalid UUID: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_round_trips_through_string_form() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(uuid::Uuid::from_string(&id.as_string()), Ok(id));
        assert!(uuid::Uuid::from_string("not-a-uuid").is_err());
    }
}
