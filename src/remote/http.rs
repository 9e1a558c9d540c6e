// src/remote/http.rs

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::RwLock;
use tracing::debug;

use crate::models::collections;
use crate::remote::error::ApiErrorBody;
use crate::remote::{
    build_file_url, AuthResponse, ListQuery, OAuthCodeExchange, OAuthProvider, Record, RecordBody,
    RecordPage, RemoteDataService, RemoteError,
};

/// Клиент удалённого сервиса данных по HTTPS.
///
/// Ни повторов, ни таймаутов: зависший запрос висит, пока его не отменит
/// вызывающий.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    token: RwLock<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtpResponse {
    otp_id: String,
}

#[derive(Deserialize, Default)]
struct AuthMethodsResponse {
    #[serde(default)]
    oauth2: OAuth2Methods,
}

#[derive(Deserialize, Default)]
struct OAuth2Methods {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    providers: Vec<OAuthProvider>,
}

impl HttpRemote {
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Transport(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Transport(format!("invalid base url {}", base_url)));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn current_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Transport("base url cannot hold a path".to_string()))?;
            path.pop_if_empty();
            path.push("api");
            path.extend(segments);
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, %url, "remote request");
        let builder = self.client.request(method, url);
        match self.current_token() {
            Some(token) => builder.header(AUTHORIZATION, token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, RemoteError> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        let text = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => body.into_error(code),
            Err(_) => RemoteError::api(code, text),
        };
        debug!(status = code, error = %err, "remote request failed");
        Err(err)
    }

    fn with_body(builder: RequestBuilder, body: RecordBody) -> Result<RequestBuilder, RemoteError> {
        if body.files.is_empty() {
            return Ok(builder.json(&Value::Object(body.fields)));
        }

        let mut form = Form::new();
        for (name, value) in body.fields {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            form = form.text(name, text);
        }
        for upload in body.files {
            let part = Part::bytes(upload.bytes)
                .file_name(upload.filename)
                .mime_str(&upload.content_type)
                .map_err(|e| RemoteError::Transport(format!("invalid content type: {}", e)))?;
            form = form.part(upload.field, part);
        }
        Ok(builder.multipart(form))
    }

    fn records_url(&self, collection: &str, id: Option<&str>) -> Result<Url, RemoteError> {
        match id {
            Some(id) => self.endpoint(&["collections", collection, "records", id]),
            None => self.endpoint(&["collections", collection, "records"]),
        }
    }
}

#[async_trait]
impl RemoteDataService for HttpRemote {
    fn set_auth_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    async fn request_otp(&self, email: &str) -> Result<String, RemoteError> {
        let url = self.endpoint(&["collections", collections::USERS, "request-otp"])?;
        let builder = self.request(Method::POST, url).json(&serde_json::json!({ "email": email }));
        let response: OtpResponse = self.send(builder).await?;
        Ok(response.otp_id)
    }

    async fn auth_with_otp(&self, otp_id: &str, code: &str) -> Result<AuthResponse, RemoteError> {
        let url = self.endpoint(&["collections", collections::USERS, "auth-with-otp"])?;
        let builder = self
            .request(Method::POST, url)
            .json(&serde_json::json!({ "otpId": otp_id, "password": code }));
        self.send(builder).await
    }

    async fn auth_methods(&self) -> Result<Vec<OAuthProvider>, RemoteError> {
        let url = self.endpoint(&["collections", collections::USERS, "auth-methods"])?;
        let response: AuthMethodsResponse = self.send(self.request(Method::GET, url)).await?;
        if !response.oauth2.enabled {
            return Ok(Vec::new());
        }
        Ok(response.oauth2.providers)
    }

    async fn auth_with_oauth2(&self, exchange: &OAuthCodeExchange) -> Result<AuthResponse, RemoteError> {
        let url = self.endpoint(&["collections", collections::USERS, "auth-with-oauth2"])?;
        let builder = self.request(Method::POST, url).json(exchange);
        self.send(builder).await
    }

    async fn get_record(&self, collection: &str, id: &str) -> Result<Record, RemoteError> {
        let url = self.records_url(collection, Some(id))?;
        self.send(self.request(Method::GET, url)).await
    }

    async fn list_records(&self, collection: &str, query: &ListQuery) -> Result<RecordPage, RemoteError> {
        let mut url = self.records_url(collection, None)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page", &query.page.to_string());
            pairs.append_pair("perPage", &query.per_page.to_string());
            if let Some(filter) = &query.filter {
                pairs.append_pair("filter", &filter.to_string());
            }
            if let Some(sort) = &query.sort {
                pairs.append_pair("sort", sort);
            }
        }
        self.send(self.request(Method::GET, url)).await
    }

    async fn create_record(&self, collection: &str, body: RecordBody) -> Result<Record, RemoteError> {
        let url = self.records_url(collection, None)?;
        let builder = Self::with_body(self.request(Method::POST, url), body)?;
        self.send(builder).await
    }

    async fn update_record(&self, collection: &str, id: &str, body: RecordBody) -> Result<Record, RemoteError> {
        let url = self.records_url(collection, Some(id))?;
        let builder = Self::with_body(self.request(Method::PATCH, url), body)?;
        self.send(builder).await
    }

    async fn delete_record(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let url = self.records_url(collection, Some(id))?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Self::check(response).await?;
        Ok(())
    }

    fn file_url(&self, collection: &str, record_id: &str, filename: &str) -> Option<String> {
        build_file_url(self.base_url.as_str(), collection, record_id, filename)
    }
}
