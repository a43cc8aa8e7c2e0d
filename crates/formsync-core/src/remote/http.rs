//! REST implementation of `RemoteClient` over `reqwest`.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};

use super::{RemoteClient, RemoteError, RemoteRecord, RemoteResult};
use crate::config::SyncConfig;
use crate::models::{Entity, Record, ServerId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP client for one entity type's REST collection.
pub struct HttpRemoteClient<T> {
    base_url: String,
    client: reqwest::Client,
    bearer_token: Option<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpRemoteClient<T> {
    fn clone(&self) -> Self {
        Self {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            bearer_token: self.bearer_token.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for HttpRemoteClient<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("HttpRemoteClient")
            .field("base_url", &self.base_url)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl<T: Entity> HttpRemoteClient<T> {
    /// Builds a client for an explicit API base URL.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                RemoteError::InvalidConfiguration(format!(
                    "failed to construct HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            base_url,
            client,
            bearer_token: None,
            _entity: PhantomData,
        })
    }

    /// Builds a client from engine configuration.
    pub fn from_config(config: &SyncConfig) -> RemoteResult<Self> {
        let base_url = config.api_base_url.clone().ok_or_else(|| {
            RemoteError::InvalidConfiguration("api_base_url is not configured".to_string())
        })?;
        let client = Self::new(base_url, config.http_timeout())?;
        Ok(match config.api_token.clone() {
            Some(token) => client.with_bearer_token(token),
            None => client,
        })
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = normalize_text_option(Some(token.into()));
        self
    }

    /// Returns the base URL this client was configured with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}{}", self.base_url, T::endpoint())
    }

    fn item_url(&self, server_id: &ServerId) -> String {
        format!(
            "{}{}{}/",
            self.base_url,
            T::endpoint(),
            urlencoding::encode(server_id.as_str())
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> RemoteResult<Response> {
        let response = request.send().await.map_err(|error| {
            RemoteError::Network(format!("{context} for {}: {error}", T::SCHEMA.name))
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response, context).await)
        }
    }

    async fn read_json(response: Response) -> RemoteResult<Option<Value>> {
        let body = response
            .text()
            .await
            .map_err(|error| RemoteError::Network(format!("failed to read response: {error}")))?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|error| RemoteError::InvalidPayload(format!("response is not JSON: {error}")))
    }
}

impl<T: Entity> RemoteClient<T> for HttpRemoteClient<T> {
    async fn search(&self, term: &str) -> RemoteResult<Vec<RemoteRecord<T>>> {
        let request = self
            .request(Method::GET, &self.collection_url())
            .query(&[("search", term)]);
        let response = self.send(request, "search").await?;
        let body = Self::read_json(response)
            .await?
            .ok_or_else(|| RemoteError::InvalidPayload("empty search response".to_string()))?;

        let items = list_items(body)?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match decode_item::<T>(item, None) {
                Ok(record) => records.push(record),
                Err(error) => {
                    tracing::warn!(
                        entity = T::SCHEMA.name,
                        %error,
                        "Skipping undecodable search result"
                    );
                }
            }
        }

        tracing::debug!(
            entity = T::SCHEMA.name,
            results = records.len(),
            "Remote search completed"
        );
        Ok(records)
    }

    async fn push(&self, record: &Record<T>) -> RemoteResult<RemoteRecord<T>> {
        let payload = record
            .fields
            .encode()
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;

        match &record.server_id {
            None => {
                let mut request = self
                    .request(Method::POST, &self.collection_url())
                    .json(&payload);
                if let Some(client_ref) = &record.client_ref {
                    request = request.header(IDEMPOTENCY_KEY_HEADER, client_ref);
                }
                let response = self.send(request, "create").await?;
                let body = Self::read_json(response).await?.ok_or_else(|| {
                    RemoteError::InvalidPayload("create response has no body".to_string())
                })?;
                decode_item(body, None)
            }
            Some(server_id) => {
                let request = self
                    .request(Method::PUT, &self.item_url(server_id))
                    .json(&payload);
                let response = self.send(request, "update").await?;
                match Self::read_json(response).await? {
                    Some(body) => decode_item(body, Some(server_id)),
                    None => Ok(RemoteRecord {
                        server_id: server_id.clone(),
                        fields: record.fields.clone(),
                    }),
                }
            }
        }
    }

    async fn fetch_by_id(&self, server_id: &ServerId) -> RemoteResult<RemoteRecord<T>> {
        let request = self.request(Method::GET, &self.item_url(server_id));
        let response = match self.send(request, "fetch").await {
            Err(RemoteError::Rejected { status: 404, .. }) => {
                return Err(RemoteError::NotFound(format!(
                    "{} {server_id}",
                    T::SCHEMA.name
                )))
            }
            other => other?,
        };
        let body = Self::read_json(response)
            .await?
            .ok_or_else(|| RemoteError::InvalidPayload("fetch response has no body".to_string()))?;
        decode_item(body, Some(server_id))
    }
}

/// Extract the result array from a bare or paginated list body
fn list_items(body: Value) -> RemoteResult<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(RemoteError::InvalidPayload(
                "list response has no results array".to_string(),
            )),
        },
        _ => Err(RemoteError::InvalidPayload(
            "list response is not an array or object".to_string(),
        )),
    }
}

/// Split a flat remote object into its `id` and the entity fields
fn decode_item<T: Entity>(
    item: Value,
    known_id: Option<&ServerId>,
) -> RemoteResult<RemoteRecord<T>> {
    let Value::Object(mut map) = item else {
        return Err(RemoteError::InvalidPayload(
            "remote record is not a JSON object".to_string(),
        ));
    };

    let server_id = match (map.remove("id"), known_id) {
        (Some(id), _) => serde_json::from_value::<ServerId>(id)
            .map_err(|error| RemoteError::InvalidPayload(format!("invalid id: {error}")))?,
        (None, Some(known)) => known.clone(),
        (None, None) => {
            return Err(RemoteError::InvalidPayload(
                "remote record has no id".to_string(),
            ))
        }
    };

    let fields =
        T::decode(map).map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
    Ok(RemoteRecord { server_id, fields })
}

async fn error_from_response(response: Response, context: &str) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(&body).unwrap_or_else(|| {
        let trimmed = compact_text(&body);
        if trimmed.is_empty() {
            format!("HTTP {}", status.as_u16())
        } else {
            trimmed
        }
    });

    if is_transient_status(status) {
        RemoteError::Network(format!("{context} failed with HTTP {}: {message}", status.as_u16()))
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Pull a readable message out of a JSON error body.
///
/// Understands `{"detail": ..}`, `{"message": ..}`, `{"error": ..}` and
/// field-error maps such as `{"area": ["This field is required."]}`.
fn parse_api_error(body: &str) -> Option<String> {
    let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(body) else {
        return None;
    };

    for key in ["detail", "message", "error"] {
        if let Some(Value::String(message)) = payload.get(key) {
            return Some(compact_text(message));
        }
    }

    let field_errors = field_error_lines(&payload);
    if field_errors.is_empty() {
        None
    } else {
        Some(compact_text(&field_errors.join("; ")))
    }
}

fn field_error_lines(payload: &Map<String, Value>) -> Vec<String> {
    payload
        .iter()
        .filter_map(|(field, value)| {
            let messages: Vec<&str> = match value {
                Value::String(message) => vec![message.as_str()],
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            if messages.is_empty() {
                None
            } else {
                Some(format!("{field}: {}", messages.join(" ")))
            }
        })
        .collect()
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
