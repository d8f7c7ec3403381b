//! Field extraction for PATCH bodies, where an omitted key and an explicit
//! `null` mean different things.

use std::str::FromStr;

use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use super::time::parse_timestamp;
use crate::error::AppError;

/// `Json` whose rejections (malformed body, unknown enum value, missing
/// field) become `400 invalid_input` instead of axum's plain-text 422.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

pub enum NullableValue {
    Omitted,
    Null,
    String(String),
}

pub fn classify_nullable(optional_value: Option<&Value>) -> Result<NullableValue, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::String(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

/// `None` when omitted, `Some(None)` for null, `Some(Some(_))` otherwise.
pub fn nullable_string(body: &Value, key: &str) -> Result<Option<Option<String>>, String> {
    match classify_nullable(body.get(key)).map_err(|err| format!("{key}: {err}"))? {
        NullableValue::Omitted => Ok(None),
        NullableValue::Null => Ok(Some(None)),
        NullableValue::String(value) => Ok(Some(Some(value))),
    }
}

pub fn nullable_uuid(body: &Value, key: &str) -> Result<Option<Option<Uuid>>, String> {
    nullable_string(body, key)?
        .map(|value| value.map(|raw| parse_field::<Uuid>(key, &raw)).transpose())
        .transpose()
}

/// A field that may be omitted but never cleared.
pub fn required_string(body: &Value, key: &str) -> Result<Option<String>, String> {
    match nullable_string(body, key)? {
        None => Ok(None),
        Some(None) => Err(format!("{key} must not be null")),
        Some(Some(value)) => Ok(Some(value)),
    }
}

pub fn required_parsed<T>(body: &Value, key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
{
    required_string(body, key)?
        .map(|raw| parse_field(key, &raw))
        .transpose()
}

pub fn required_timestamp(body: &Value, key: &str) -> Result<Option<NaiveDateTime>, String> {
    required_string(body, key)?
        .map(|raw| parse_timestamp(&raw).map_err(|err| format!("{key}: {err}")))
        .transpose()
}

fn parse_field<T: FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("{key}: invalid value '{raw}'"))
}
