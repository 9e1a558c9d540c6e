// src/remote/memory.rs

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::models::collections;
use crate::models::serde_helpers::format_remote_datetime;
use crate::remote::error::{FieldError, DUPLICATE_CODE};
use crate::remote::{
    build_file_url, AuthResponse, ListQuery, OAuthCodeExchange, OAuthProvider, Record, RecordBody,
    RecordPage, RemoteDataService, RemoteError,
};

/// Точки, в которых можно заставить сервис отказать
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Отправка одноразового кода
    OtpDelivery,
    /// Любое создание записи в коллекции
    Create(String),
    /// Любое чтение записей коллекции
    Read(String),
    /// Обмен кода OAuth2
    OAuthExchange,
}

const TOKEN_TTL_SECS: i64 = 14 * 24 * 3600;

#[derive(Serialize)]
struct TokenClaims<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    exp: i64,
}

struct PendingOtp {
    email: String,
    code: String,
}

struct OAuthGrant {
    email: String,
    name: String,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Record>>,
    otps: HashMap<String, PendingOtp>,
    outbox: Vec<(String, String)>,
    providers: Vec<String>,
    oauth_states: HashMap<String, String>,
    oauth_grants: HashMap<String, OAuthGrant>,
    token: Option<String>,
    fail_points: HashSet<FailPoint>,
    unique: BTreeMap<String, Vec<String>>,
    calls: Vec<String>,
}

/// In-process реализация сервиса данных с той же семантикой ошибок,
/// что и у настоящего: дубликаты email, 404, отказ в коде.
pub struct MemoryRemote {
    base_url: String,
    secret: Vec<u8>,
    inner: Mutex<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner
            .unique
            .insert(collections::USERS.to_string(), vec!["email".to_string()]);
        Self {
            base_url: "http://memory.local".to_string(),
            secret: random_id(32).into_bytes(),
            inner: Mutex::new(inner),
        }
    }

    pub fn with_oauth_provider(self, name: &str) -> Self {
        self.lock().providers.push(name.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.lock().fail_points.insert(point);
    }

    pub fn clear_failures(&self) {
        self.lock().fail_points.clear();
    }

    /// Последний код, «отправленный» на email
    pub fn last_code_for(&self, email: &str) -> Option<String> {
        self.lock()
            .outbox
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
    }

    /// Провайдер OAuth2 «разрешил» вход пользователю; возвращает код авторизации
    pub fn grant_oauth(&self, email: &str, name: &str) -> String {
        let code = random_id(24);
        self.lock().oauth_grants.insert(
            code.clone(),
            OAuthGrant {
                email: email.to_string(),
                name: name.to_string(),
            },
        );
        code
    }

    pub fn auth_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Положить запись напрямую, минуя проверки
    pub fn seed(&self, collection: &str, fields: Value) -> Record {
        let mut inner = self.lock();
        let record = new_record(collection, fields.as_object().cloned().unwrap_or_default());
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock().collections.get(collection).cloned().unwrap_or_default()
    }

    /// Журнал вызовов вида `create:Organisation`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn issue_token(&self, identity_id: &str) -> Result<String, RemoteError> {
        let claims = TokenClaims {
            id: identity_id,
            kind: "auth",
            exp: Utc::now().timestamp() + TOKEN_TTL_SECS,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }
}

fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

fn new_record(collection: &str, mut fields: Map<String, Value>) -> Record {
    let now = format_remote_datetime(&Utc::now());
    let needs_id = fields
        .get("id")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty);
    if needs_id {
        fields.insert("id".to_string(), Value::String(random_id(15)));
    }
    fields.insert("collectionName".to_string(), Value::String(collection.to_string()));
    fields.entry("created").or_insert_with(|| Value::String(now.clone()));
    fields.insert("updated".to_string(), Value::String(now));
    Record(fields)
}

fn duplicate_error(field: &str) -> RemoteError {
    let mut fields = BTreeMap::new();
    fields.insert(field.to_string(), FieldError::new(DUPLICATE_CODE, "Value must be unique."));
    RemoteError::Api {
        status: 400,
        message: "Failed to create record.".to_string(),
        fields,
    }
}

fn sort_records(items: &mut [Record], sort: &str) {
    let (field, descending) = match sort.strip_prefix('-') {
        Some(field) => (field, true),
        None => (sort.trim_start_matches('+'), false),
    };
    let key = |r: &Record| r.0.get(field).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    if descending {
        // При равных ключах более поздние вставки идут первыми
        items.reverse();
        items.sort_by(|a, b| key(b).cmp(&key(a)));
    } else {
        items.sort_by(|a, b| key(a).cmp(&key(b)));
    }
}

impl Inner {
    fn check(&self, point: &FailPoint) -> Result<(), RemoteError> {
        if self.fail_points.contains(point) {
            return Err(RemoteError::Transport(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn find_user_by_email(&self, email: &str) -> Option<&Record> {
        self.collections
            .get(collections::USERS)?
            .iter()
            .find(|r| r.get_str("email") == Some(email))
    }

    fn insert(&mut self, collection: &str, body: RecordBody) -> Result<Record, RemoteError> {
        let mut fields = body.fields;
        for upload in body.files {
            fields.insert(upload.field, Value::String(upload.filename));
        }
        if let Some(unique_fields) = self.unique.get(collection) {
            let existing = self.collections.get(collection);
            for field in unique_fields {
                let Some(value) = fields.get(field) else { continue };
                let clash = existing
                    .map(|records| records.iter().any(|r| r.0.get(field) == Some(value)))
                    .unwrap_or(false);
                if clash {
                    return Err(duplicate_error(field));
                }
            }
        }
        // поля авторизации не хранятся
        fields.remove("password");
        fields.remove("passwordConfirm");

        let record = new_record(collection, fields);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn auth_response(&mut self, record: Record, token: String) -> AuthResponse {
        self.token = Some(token.clone());
        AuthResponse { token, record }
    }
}

#[async_trait]
impl RemoteDataService for MemoryRemote {
    fn set_auth_token(&self, token: Option<String>) {
        self.lock().token = token;
    }

    async fn request_otp(&self, email: &str) -> Result<String, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push("request_otp".to_string());
        inner.check(&FailPoint::OtpDelivery)?;
        let otp_id = random_id(15);
        // Для неизвестного email сервис тоже возвращает id, но письмо не уходит
        if inner.find_user_by_email(email).is_some() {
            let code: String = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
            inner.outbox.push((email.to_string(), code.clone()));
            inner.otps.insert(
                otp_id.clone(),
                PendingOtp {
                    email: email.to_string(),
                    code,
                },
            );
        }
        Ok(otp_id)
    }

    async fn auth_with_otp(&self, otp_id: &str, code: &str) -> Result<AuthResponse, RemoteError> {
        let email = {
            let mut inner = self.lock();
            inner.calls.push("auth_with_otp".to_string());
            let matches = inner
                .otps
                .get(otp_id)
                .map(|otp| otp.code == code)
                .unwrap_or(false);
            if !matches {
                return Err(RemoteError::api(400, "Failed to authenticate."));
            }
            match inner.otps.remove(otp_id) {
                Some(otp) => otp.email,
                None => return Err(RemoteError::api(400, "Failed to authenticate.")),
            }
        };
        let record = self
            .lock()
            .find_user_by_email(&email)
            .cloned()
            .ok_or_else(|| RemoteError::api(400, "Failed to authenticate."))?;
        let token = self.issue_token(record.id())?;
        Ok(self.lock().auth_response(record, token))
    }

    async fn auth_methods(&self) -> Result<Vec<OAuthProvider>, RemoteError> {
        let mut inner = self.lock();
        let names = inner.providers.clone();
        let mut providers = Vec::with_capacity(names.len());
        for name in names {
            let state = random_id(20);
            let code_verifier = random_id(43);
            inner.oauth_states.insert(state.clone(), code_verifier.clone());
            providers.push(OAuthProvider {
                auth_url: format!("https://{}.oauth.local/authorize?state={}&redirect_uri=", name, state),
                display_name: name.clone(),
                name,
                state,
                code_verifier,
            });
        }
        Ok(providers)
    }

    async fn auth_with_oauth2(&self, exchange: &OAuthCodeExchange) -> Result<AuthResponse, RemoteError> {
        let record = {
            let mut inner = self.lock();
            inner.calls.push("auth_with_oauth2".to_string());
            inner.check(&FailPoint::OAuthExchange)?;
            if !inner.providers.contains(&exchange.provider) {
                return Err(RemoteError::api(400, "Invalid OAuth2 provider."));
            }
            let verifier_known = inner
                .oauth_states
                .values()
                .any(|v| *v == exchange.code_verifier);
            if !verifier_known {
                return Err(RemoteError::api(400, "Failed to authenticate."));
            }
            let grant = inner
                .oauth_grants
                .remove(&exchange.code)
                .ok_or_else(|| RemoteError::api(400, "Failed to authenticate."))?;
            match inner.find_user_by_email(&grant.email).cloned() {
                Some(record) => record,
                None => {
                    let body = RecordBody::new()
                        .field("email", grant.email)
                        .field("name", grant.name);
                    inner.insert(collections::USERS, body)?
                }
            }
        };
        let token = self.issue_token(record.id())?;
        Ok(self.lock().auth_response(record, token))
    }

    async fn get_record(&self, collection: &str, id: &str) -> Result<Record, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(format!("get:{}", collection));
        inner.check(&FailPoint::Read(collection.to_string()))?;
        inner
            .collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| r.id() == id))
            .cloned()
            .ok_or_else(RemoteError::not_found)
    }

    async fn list_records(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(format!("list:{}", collection));
        inner.check(&FailPoint::Read(collection.to_string()))?;
        let mut items: Vec<Record> = inner
            .collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| query.filter.as_ref().map_or(true, |f| f.matches(&r.0)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(sort) = &query.sort {
            sort_records(&mut items, sort);
        }

        let per_page = query.per_page.max(1);
        let total_items = items.len() as u64;
        let total_pages = items.len().div_ceil(per_page as usize) as u32;
        let skip = (query.page.max(1) as usize - 1) * per_page as usize;
        let items = items.into_iter().skip(skip).take(per_page as usize).collect();
        Ok(RecordPage {
            page: query.page.max(1),
            per_page,
            total_items,
            total_pages,
            items,
        })
    }

    async fn create_record(&self, collection: &str, body: RecordBody) -> Result<Record, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(format!("create:{}", collection));
        inner.check(&FailPoint::Create(collection.to_string()))?;
        inner.insert(collection, body)
    }

    async fn update_record(&self, collection: &str, id: &str, body: RecordBody) -> Result<Record, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(format!("update:{}", collection));
        let record = inner
            .collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| r.id() == id))
            .ok_or_else(RemoteError::not_found)?;
        for (name, value) in body.fields {
            if name != "id" {
                record.0.insert(name, value);
            }
        }
        for upload in body.files {
            record.0.insert(upload.field, Value::String(upload.filename));
        }
        record.0.insert(
            "updated".to_string(),
            Value::String(format_remote_datetime(&Utc::now())),
        );
        Ok(record.clone())
    }

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(format!("delete:{}", collection));
        let records = inner
            .collections
            .get_mut(collection)
            .ok_or_else(RemoteError::not_found)?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Err(RemoteError::not_found());
        }
        Ok(())
    }

    fn file_url(&self, collection: &str, record_id: &str, filename: &str) -> Option<String> {
        build_file_url(&self.base_url, collection, record_id, filename)
    }
}
