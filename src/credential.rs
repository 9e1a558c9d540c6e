// src/credential.rs

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Ключ учётных данных в локальном хранилище
pub const CREDENTIAL_KEY: &str = "nirikshan_auth";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Malformed credential: {0}")]
    Malformed(String),
    #[error("Credential expired")]
    Expired,
}

impl From<jsonwebtoken::errors::Error> for CredentialError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => CredentialError::Expired,
            _ => CredentialError::Malformed(e.to_string()),
        }
    }
}

// === Claims ===

/// Та часть полезной нагрузки токена, которую мы читаем
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub id: String,
    pub exp: usize,
}

/// Непрозрачные учётные данные, выданные сервисом
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    /// id записи пользователя, для которого выдан токен
    pub identity_id: String,
}

impl Credential {
    pub fn new(token: impl Into<String>, identity_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            identity_id: identity_id.into(),
        }
    }

    /// Прочитать claims без проверки подписи: ключа у клиента нет.
    /// Проверяются только структура и срок действия.
    pub fn claims(&self) -> Result<Claims, CredentialError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;
        let data = decode::<Claims>(&self.token, &DecodingKey::from_secret(&[]), &validation)?;
        Ok(data.claims)
    }

    pub fn is_structurally_valid(&self) -> bool {
        match self.claims() {
            Ok(claims) => !self.identity_id.is_empty() || !claims.id.is_empty(),
            Err(_) => false,
        }
    }

    /// id пользователя: из сохранённой записи, иначе из claims
    pub fn subject(&self) -> Option<String> {
        if !self.identity_id.is_empty() {
            return Some(self.identity_id.clone());
        }
        self.claims().ok().map(|c| c.id).filter(|id| !id.is_empty())
    }
}
