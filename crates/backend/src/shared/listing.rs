use crate::shared::error::{AppError, AppResult};

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 100;

/// Нормализованные параметры страницы
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// `page >= 1`, `limit` в `[1, MAX_LIMIT]`
    pub fn clamp(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p >= 1).unwrap_or(1) as u64;
        let limit = match limit {
            Some(l) if l >= 1 => (l as u64).min(MAX_LIMIT),
            _ => DEFAULT_LIMIT,
        };
        Self { page, limit }
    }

    /// Смещение строк. Огромная страница упирается в `i64::MAX` и даёт пустой результат.
    pub fn offset(&self) -> u64 {
        self.page
            .saturating_sub(1)
            .saturating_mul(self.limit)
            .min(i64::MAX as u64)
    }
}

/// Поле сортировки списка групп
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSortField {
    Name,
    CreatedAt,
    UpdatedAt,
    DeadLine,
    TargetAmount,
    CollectedAmount,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: GroupSortField,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: GroupSortField::CreatedAt,
            descending: true,
        }
    }
}

/// Разбор `sort=-createdAt`. Поле вне белого списка отклоняется.
pub fn parse_sort(raw: Option<&str>) -> AppResult<SortSpec> {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(SortSpec::default()),
    };
    let (descending, name) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let field = match name {
        "name" => GroupSortField::Name,
        "createdAt" => GroupSortField::CreatedAt,
        "updatedAt" => GroupSortField::UpdatedAt,
        "deadLine" => GroupSortField::DeadLine,
        "targetAmount" => GroupSortField::TargetAmount,
        "collectedAmount" => GroupSortField::CollectedAmount,
        "status" => GroupSortField::Status,
        _ => return Err(AppError::BadRequest("list.invalid_sort")),
    };
    Ok(SortSpec { field, descending })
}

/// Экранирование `%` и `_` для `LIKE ... ESCAPE '\'`
pub fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_is_clamped() {
        assert_eq!(PageRequest::clamp(None, None), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::clamp(Some(0), Some(0)), PageRequest { page: 1, limit: 10 });
        assert_eq!(PageRequest::clamp(Some(-3), Some(500)), PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::clamp(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn huge_page_offset_saturates() {
        let page = PageRequest::clamp(Some(i64::MAX), Some(100));
        assert_eq!(page.page, i64::MAX as u64);
        assert_eq!(page.offset(), i64::MAX as u64);
        assert_eq!(PageRequest { page: u64::MAX, limit: 100 }.offset(), i64::MAX as u64);
    }

    #[test]
    fn sort_parsing() {
        assert_eq!(parse_sort(None).unwrap(), SortSpec::default());
        let spec = parse_sort(Some("deadLine")).unwrap();
        assert_eq!(spec.field, GroupSortField::DeadLine);
        assert!(!spec.descending);
        let spec = parse_sort(Some("-collectedAmount")).unwrap();
        assert_eq!(spec.field, GroupSortField::CollectedAmount);
        assert!(spec.descending);
        assert!(matches!(
            parse_sort(Some("creator_id; DROP TABLE")),
            Err(AppError::BadRequest("list.invalid_sort"))
        ));
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
