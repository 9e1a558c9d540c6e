// src/models/serde_helpers.rs

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Формат дат удалённого сервиса: `2024-05-01 10:20:30.123Z`
pub const REMOTE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3fZ";

pub fn format_remote_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(REMOTE_DATETIME_FORMAT).to_string()
}

pub fn parse_remote_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, REMOTE_DATETIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Пустая строка (так сервис отдаёт незаполненные поля) → `None`
pub fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

pub mod remote_datetime_opt {
    use super::*;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&format_remote_datetime(dt)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse_remote_datetime(&s)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("Invalid datetime: {}", s))),
        }
    }
}
