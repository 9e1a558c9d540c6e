// src/media.rs

use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use crate::models::collections::{CASES, CCTV_FOOTAGE, REFERENCE_PHOTO};
use crate::remote::{Filter, ListQuery, Record, RemoteDataService, RemoteError};

/// Коллекции с материалами организации
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaCollection {
    Cctv,
    Photos,
    Cases,
}

impl MediaCollection {
    pub fn collection(&self) -> &'static str {
        match self {
            MediaCollection::Cctv => CCTV_FOOTAGE,
            MediaCollection::Photos => REFERENCE_PHOTO,
            MediaCollection::Cases => CASES,
        }
    }
}

impl fmt::Display for MediaCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaCollection::Cctv => "cctv",
            MediaCollection::Photos => "photos",
            MediaCollection::Cases => "cases",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MediaCollection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cctv" | "cctvfootage" => Ok(MediaCollection::Cctv),
            "photos" | "referencephoto" => Ok(MediaCollection::Photos),
            "cases" => Ok(MediaCollection::Cases),
            other => Err(format!("Unknown media collection: {}", other)),
        }
    }
}

/// Чтение материалов организации в обход менеджера сессии
#[derive(Clone)]
pub struct MediaLibrary {
    remote: Arc<dyn RemoteDataService>,
}

impl MediaLibrary {
    pub fn new(remote: Arc<dyn RemoteDataService>) -> Self {
        Self { remote }
    }

    /// Все записи организации, новые первыми
    #[instrument(name = "media_list", skip(self))]
    pub async fn list(&self, kind: MediaCollection, organisation_id: &str) -> Result<Vec<Record>, RemoteError> {
        let query = ListQuery::filtered(Filter::eq("organisation", organisation_id)).sort("-created");
        self.remote.list_all(kind.collection(), &query).await
    }

    /// URL первого файла в поле записи
    pub fn file_url(&self, kind: MediaCollection, record: &Record, field: &str) -> Option<String> {
        self.file_urls(kind, record, field).into_iter().next()
    }

    /// URL файлов в поле записи; поле может хранить одно имя или список
    pub fn file_urls(&self, kind: MediaCollection, record: &Record, field: &str) -> Vec<String> {
        let names: Vec<&str> = match record.fields().get(field) {
            Some(Value::String(name)) => vec![name.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        names
            .into_iter()
            .filter(|name| !name.is_empty())
            .filter_map(|name| self.remote.file_url(kind.collection(), record.id(), name))
            .collect()
    }
}
