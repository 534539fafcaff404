use serde::{Deserialize, Serialize};
use std::fmt;

/// Статус группы совместной покупки
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    #[default]
    Active,
    Closed,
    Deleted,
    Funded,
    Purchased,
}

impl GroupStatus {
    /// Код статуса, как он хранится в БД и передаётся в API
    pub fn code(&self) -> &'static str {
        match self {
            GroupStatus::Active => "active",
            GroupStatus::Closed => "closed",
            GroupStatus::Deleted => "deleted",
            GroupStatus::Funded => "funded",
            GroupStatus::Purchased => "purchased",
        }
    }

    /// Парсинг из строки
    pub fn from_code(code: &str) -> Option<Self> {
        Self::all().into_iter().find(|s| s.code() == code)
    }

    pub fn all() -> [GroupStatus; 5] {
        [
            GroupStatus::Active,
            GroupStatus::Closed,
            GroupStatus::Deleted,
            GroupStatus::Funded,
            GroupStatus::Purchased,
        ]
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for status in GroupStatus::all() {
            assert_eq!(GroupStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(GroupStatus::from_code("archived"), None);
    }

    #[test]
    fn serializes_as_lowercase_code() {
        let json = serde_json::to_string(&GroupStatus::Purchased).unwrap();
        assert_eq!(json, "\"purchased\"");
    }
}
