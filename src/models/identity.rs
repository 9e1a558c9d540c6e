// src/models/identity.rs

use serde::{Deserialize, Serialize};

/// Учётная запись пользователя (коллекция `users`)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,

    /// Производное поле: организация по активному членству.
    /// Пустая строка = организации ещё нет.
    #[serde(default)]
    pub organisation_id: String,
}

impl Identity {
    pub fn has_organization(&self) -> bool {
        !self.organisation_id.is_empty()
    }

    /// Имя для отображения: `name`, иначе email
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}
