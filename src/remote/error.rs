// src/remote/error.rs

use serde::Deserialize;
use std::collections::BTreeMap;

/// Код ошибки валидации сервиса для нарушения уникальности
pub const DUPLICATE_CODE: &str = "validation_not_unique";

/// Ошибка валидации одного поля
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl FieldError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Ошибки удалённого сервиса данных
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Remote error {status}: {message}")]
    Api {
        status: u16,
        message: String,
        fields: BTreeMap<String, FieldError>,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        RemoteError::Api {
            status,
            message: message.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::api(404, "The requested resource wasn't found.")
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Сервис отверг запись из-за дубликата уникального поля
    pub fn is_duplicate(&self) -> bool {
        match self {
            RemoteError::Api { fields, .. } => fields.values().any(|f| f.code == DUPLICATE_CODE),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_bad_request(&self) -> bool {
        self.status() == Some(400)
    }
}

/// Тело ошибки в ответе сервиса
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, FieldError>,
}

impl ApiErrorBody {
    pub fn into_error(self, http_status: u16) -> RemoteError {
        RemoteError::Api {
            status: if self.status == 0 { http_status } else { self.status },
            message: self.message,
            fields: self.data,
        }
    }
}
