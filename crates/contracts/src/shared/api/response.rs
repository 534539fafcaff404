use serde::{Deserialize, Serialize};

/// Единый конверт ответа API.
///
/// HTTP-статус ответа всегда совпадает с `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Ключ сообщения для локализации на клиенте
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl<T> ApiResponse<T> {
    pub fn ok(code: u16, result: T) -> Self {
        Self {
            success: true,
            code,
            result: Some(result),
            message: None,
            count: None,
            page: None,
            limit: None,
        }
    }

    pub fn page(result: T, count: u64, page: u64, limit: u64) -> Self {
        Self {
            count: Some(count),
            page: Some(page),
            limit: Some(limit),
            ..Self::ok(200, result)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiResponse<()> {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            result: None,
            message: Some(message.into()),
            count: None,
            page: None,
            limit: None,
        }
    }
}
