// src/models/organization.rs

use serde::{Deserialize, Serialize};

use crate::models::serde_helpers::empty_string_as_none;
use crate::remote::FileUpload;

pub const MIN_NAME_LEN: usize = 2;
pub const MAX_NAME_LEN: usize = 50;

/// Организация, граница арендатора (коллекция `Organisation`)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub name: String,
    /// Имя файла логотипа в хранилище сервиса
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub logo: Option<String>,
    #[serde(default)]
    pub created_by: String,

    /// Число активных участников, считается отдельным запросом
    #[serde(default)]
    pub member_count: u64,
}

impl Organization {
    /// Обрезает пробелы и проверяет длину имени
    pub fn normalize_name(raw: &str) -> Result<String, String> {
        let name = raw.trim();
        if name.is_empty() {
            return Err("Organization name must not be empty".to_string());
        }
        let len = name.chars().count();
        if len < MIN_NAME_LEN {
            return Err(format!(
                "Organization name must be at least {} characters long",
                MIN_NAME_LEN
            ));
        }
        if len > MAX_NAME_LEN {
            return Err(format!(
                "Organization name must be at most {} characters long",
                MAX_NAME_LEN
            ));
        }
        Ok(name.to_string())
    }

    /// Слить поля, вернувшиеся из сервиса после обновления.
    /// Счётчик участников сохраняется: сервис его не возвращает.
    pub fn merge_from(&mut self, updated: Organization) {
        self.name = updated.name;
        self.logo = updated.logo;
        if !updated.created_by.is_empty() {
            self.created_by = updated.created_by;
        }
    }
}

/// Частичное обновление организации
#[derive(Debug, Clone, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub logo: Option<FileUpload>,
}

impl OrganizationPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            logo: None,
        }
    }

    pub fn logo(upload: FileUpload) -> Self {
        Self {
            name: None,
            logo: Some(upload),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.logo.is_none()
    }
}
