// src/remote/mod.rs

pub mod error;
pub mod filter;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use error::{FieldError, RemoteError};
pub use filter::Filter;
pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Размер страницы по умолчанию для выборок
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Запись коллекции в том виде, в каком её отдаёт сервис
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn id(&self) -> &str {
        self.get_str("id").unwrap_or_default()
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Разобрать запись в типизированную модель
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| RemoteError::Decode(format!("{} (record {})", e, self.id())))
    }
}

/// Параметры выборки
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filter: Option<Filter>,
    pub sort: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
            page: 1,
            per_page: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }
}

/// Страница результатов выборки
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
    pub items: Vec<Record>,
}

/// Файл, прикладываемый к записи
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub field: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Тело создания/обновления записи: поля + файлы
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBody {
    pub fields: Map<String, Value>,
    pub files: Vec<FileUpload>,
}

impl RecordBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn file(mut self, upload: FileUpload) -> Self {
        self.files.push(upload);
        self
    }
}

/// Результат успешной аутентификации
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub token: String,
    pub record: Record,
}

/// Провайдер OAuth2, включённый на стороне сервиса
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct OAuthProvider {
    pub name: String,
    #[serde(default, rename = "displayName")]
    pub display_name: String,
    pub state: String,
    #[serde(rename = "authURL")]
    pub auth_url: String,
    #[serde(rename = "codeVerifier")]
    pub code_verifier: String,
}

/// Данные обмена кода авторизации на учётные данные
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct OAuthCodeExchange {
    pub provider: String,
    pub code: String,
    #[serde(rename = "codeVerifier")]
    pub code_verifier: String,
    #[serde(rename = "redirectURL")]
    pub redirect_url: String,
    /// Поля новой записи, если пользователь входит впервые
    #[serde(rename = "createData", skip_serializing_if = "Option::is_none")]
    pub create_data: Option<Value>,
}

/// Удалённый сервис данных: записи коллекций, аутентификация, файлы.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Установить (или сбросить) токен, которым подписываются запросы
    fn set_auth_token(&self, token: Option<String>);

    /// Запросить одноразовый код на email; возвращает идентификатор вызова
    async fn request_otp(&self, email: &str) -> Result<String, RemoteError>;

    async fn auth_with_otp(&self, otp_id: &str, code: &str) -> Result<AuthResponse, RemoteError>;

    async fn auth_methods(&self) -> Result<Vec<OAuthProvider>, RemoteError>;

    async fn auth_with_oauth2(&self, exchange: &OAuthCodeExchange) -> Result<AuthResponse, RemoteError>;

    async fn get_record(&self, collection: &str, id: &str) -> Result<Record, RemoteError>;

    async fn list_records(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, RemoteError>;

    async fn create_record(&self, collection: &str, body: RecordBody) -> Result<Record, RemoteError>;

    async fn update_record(&self, collection: &str, id: &str, body: RecordBody) -> Result<Record, RemoteError>;

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Публичный URL файла записи; детерминирован, без подписи
    fn file_url(&self, collection: &str, record_id: &str, filename: &str) -> Option<String>;

    /// Все страницы выборки подряд
    async fn list_all(&self, collection: &str, query: &ListQuery) -> Result<Vec<Record>, RemoteError> {
        let mut query = query.clone();
        let mut items = Vec::new();
        loop {
            let page = self.list_records(collection, &query).await?;
            let fetched = page.items.len();
            items.extend(page.items);
            if fetched == 0 || query.page >= page.total_pages {
                break;
            }
            query.page += 1;
        }
        Ok(items)
    }
}

/// Общая сборка URL файла для обеих реализаций
pub(crate) fn build_file_url(base: &str, collection: &str, record_id: &str, filename: &str) -> Option<String> {
    if filename.is_empty() || record_id.is_empty() {
        return None;
    }
    Some(format!(
        "{}/api/files/{}/{}/{}",
        base.trim_end_matches('/'),
        collection,
        record_id,
        filename
    ))
}
