//! HTTP transport for the document backend.
//!
//! [`DocumentApi`] is the seam the rest of the crate talks to; [`ApiClient`]
//! implements it over `reqwest`. Every response is expected in the envelope
//! `{ "statusCode": .., "message": .., "data": .. }`. Failures are turned
//! into [`ProofError::Network`] with the server's own messages, normalised
//! by [`normalize_error_messages`].
//!
//! Nothing is retried here.

use crate::error::{ProofError, ValidationCode};
use crate::models::{DocumentSubtypeConfig, SubtypeKey, UploadedDocumentRecord};
use crate::upload::{QrUploadRequest, UploadRequest};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Backend operations used by uploads, policy lookups and the document list.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Multipart upload of a prepared file. Returns the envelope's `data`.
    async fn upload_document(&self, request: UploadRequest) -> Result<Value, ProofError>;

    /// JSON upload of a scanned QR payload. Returns the envelope's `data`.
    async fn upload_qr_document(&self, request: &QrUploadRequest) -> Result<Value, ProofError>;

    /// Issuance policy for `key`, or `None` when the backend has none.
    async fn fetch_policy(
        &self,
        key: &SubtypeKey,
    ) -> Result<Option<DocumentSubtypeConfig>, ProofError>;

    /// The authoritative list of the user's documents.
    async fn list_documents(&self) -> Result<Vec<UploadedDocumentRecord>, ProofError>;

    async fn delete_document(&self, doc_id: &str) -> Result<(), ProofError>;

    /// Language for subsequent requests. Ignored by backends without one.
    fn set_locale(&self, _locale: &str) {}
}

/// Endpoint paths, relative to [`ClientConfig::base_url`].
///
/// `delete_document` must contain the `{doc_id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub upload: String,
    pub upload_qr: String,
    pub document_config: String,
    pub documents: String,
    pub delete_document: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            upload: "/user/upload-document".into(),
            upload_qr: "/user/upload-qr-document".into(),
            document_config: "/document-config".into(),
            documents: "/user/documents".into(),
            delete_document: "/user/documents/{doc_id}".into(),
        }
    }
}

/// Connection settings for [`ApiClient`].
#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer ..` when set.
    pub token: Option<String>,
    pub timeout: Duration,
    /// Sent as `Accept-Language` when set.
    pub locale: Option<String>,
    pub endpoints: Endpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            locale: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("locale", &self.locale)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read `PROOFDOC_API_URL`, `PROOFDOC_API_TOKEN` and
    /// `PROOFDOC_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Result<Self, ProofError> {
        let base_url = std::env::var("PROOFDOC_API_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let token = std::env::var("PROOFDOC_API_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let timeout = match std::env::var("PROOFDOC_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ProofError::InvalidConfig(format!("PROOFDOC_TIMEOUT_SECS is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            base_url,
            token,
            timeout: Duration::from_secs(timeout),
            ..Self::default()
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// `reqwest`-backed [`DocumentApi`].
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    /// Shared by clones; starts from `config.locale`.
    locale: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ProofError> {
        if !config.endpoints.delete_document.contains("{doc_id}") {
            return Err(ProofError::InvalidConfig(
                "delete endpoint must contain {doc_id}".into(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProofError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            locale: Arc::new(RwLock::new(config.locale.clone())),
            config: ClientConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    pub fn from_env() -> Result<Self, ProofError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Locale currently sent as `Accept-Language`.
    pub fn locale(&self) -> Option<String> {
        self.locale
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Delete URL for `doc_id`, with the id encoded as one path segment.
    fn delete_url(&self, doc_id: &str) -> Result<Url, ProofError> {
        let id = doc_id.trim();
        if id.is_empty() || id == "." || id == ".." {
            return Err(ProofError::Validation {
                code: ValidationCode::Id,
                message: format!("'{doc_id}' is not a valid document id."),
            });
        }

        let template = &self.config.endpoints.delete_document;
        let (prefix, suffix) = template
            .split_once("{doc_id}")
            .ok_or_else(|| ProofError::InvalidConfig("delete endpoint must contain {doc_id}".into()))?;
        let mut url = Url::parse(&self.url(prefix))
            .map_err(|e| ProofError::InvalidConfig(format!("invalid delete endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ProofError::InvalidConfig("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(id)
            .extend(suffix.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        if let Some(locale) = self.locale() {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, locale);
        }
        request
    }

    /// Send `request` and return the envelope's `data` (or the whole body
    /// when it has no envelope).
    async fn send(&self, request: RequestBuilder) -> Result<Value, ProofError> {
        let response = self.prepare(request).send().await.map_err(|e| {
            warn!("Request failed before a response arrived: {}", e);
            ProofError::from(e)
        })?;

        let status = response.status();
        let text = response.text().await?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) if !status.is_success() => Value::Null,
                Err(e) => return Err(ProofError::InvalidResponse(format!("body is not JSON: {e}"))),
            }
        };

        if !status.is_success() {
            let messages = normalize_error_messages(&body);
            warn!("HTTP {} from backend: {:?}", status.as_u16(), messages);
            return Err(ProofError::network(Some(status.as_u16()), messages));
        }

        // Some failures arrive as HTTP 200 with an error statusCode inside.
        if let Some(code) = body.get("statusCode").and_then(Value::as_u64) {
            if code >= 400 {
                let messages = normalize_error_messages(&body);
                warn!("Envelope status {} from backend: {:?}", code, messages);
                return Err(ProofError::network(u16::try_from(code).ok(), messages));
            }
        }

        Ok(match body {
            Value::Object(mut map) if map.contains_key("data") => {
                map.remove("data").unwrap_or(Value::Null)
            }
            other => other,
        })
    }
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T, ProofError> {
    serde_json::from_value(data)
        .map_err(|e| ProofError::InvalidResponse(format!("malformed {what}: {e}")))
}

#[async_trait]
impl DocumentApi for ApiClient {
    async fn upload_document(&self, request: UploadRequest) -> Result<Value, ProofError> {
        info!(
            "Uploading '{}' ({} bytes) as {}/{}",
            request.doc_name,
            request.file.size(),
            request.doc_type,
            request.doc_subtype
        );
        let form = request.into_form()?;
        let data = self
            .send(self.client.post(self.url(&self.config.endpoints.upload)).multipart(form))
            .await?;
        debug!("Upload acknowledged");
        Ok(data)
    }

    async fn upload_qr_document(&self, request: &QrUploadRequest) -> Result<Value, ProofError> {
        info!(
            "Uploading QR payload for {}/{}",
            request.doc_type, request.doc_subtype
        );
        self.send(
            self.client
                .post(self.url(&self.config.endpoints.upload_qr))
                .json(request),
        )
        .await
    }

    async fn fetch_policy(
        &self,
        key: &SubtypeKey,
    ) -> Result<Option<DocumentSubtypeConfig>, ProofError> {
        debug!("Fetching issuance policy for {}", key);
        let request = self
            .client
            .get(self.url(&self.config.endpoints.document_config))
            .query(&[
                ("doc_type", key.doc_type.as_str()),
                ("doc_subtype", key.doc_subtype.as_str()),
            ]);

        let data = match self.send(request).await {
            Ok(data) => data,
            Err(ProofError::Network {
                status: Some(404), ..
            }) => return Ok(None),
            Err(e) => return Err(e),
        };

        match data {
            Value::Null => Ok(None),
            // Some deployments answer with every subtype of the type.
            Value::Array(items) => {
                for item in items {
                    let config: DocumentSubtypeConfig = decode(item, "document config")?;
                    if config.key() == *key {
                        return Ok(Some(config));
                    }
                }
                Ok(None)
            }
            other => decode(other, "document config").map(Some),
        }
    }

    async fn list_documents(&self) -> Result<Vec<UploadedDocumentRecord>, ProofError> {
        let data = self
            .send(self.client.get(self.url(&self.config.endpoints.documents)))
            .await?;
        let docs: Vec<UploadedDocumentRecord> = match data {
            Value::Null => Vec::new(),
            Value::Object(mut map) if map.contains_key("documents") => {
                decode(map.remove("documents").unwrap_or(Value::Null), "document list")?
            }
            other => decode(other, "document list")?,
        };
        debug!("Fetched {} document(s)", docs.len());
        Ok(docs)
    }

    async fn delete_document(&self, doc_id: &str) -> Result<(), ProofError> {
        let url = self.delete_url(doc_id)?;
        info!("Deleting document {}", doc_id);
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    fn set_locale(&self, locale: &str) {
        debug!("Accept-Language set to {}", locale);
        *self.locale.write().unwrap_or_else(|p| p.into_inner()) = Some(locale.to_string());
    }
}

/// Flatten a backend error body into display strings, keeping server order.
///
/// Recognised shapes, in priority order:
/// * `errors: ["a", "b"]` or `errors: [{ "message": "a" }, ..]`
/// * `errors: { "field": "a" | ["a", ..] }`
/// * `message: "a"` or `message: ["a", "b"]`
///
/// Anything else yields an empty list; callers then show a generic message.
pub fn normalize_error_messages(body: &Value) -> Vec<String> {
    let mut out = Vec::new();
    match body.get("errors") {
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => push_message(&mut out, s),
                    Value::Object(obj) => {
                        if let Some(s) = ["message", "msg", "error"]
                            .iter()
                            .find_map(|k| obj.get(*k).and_then(Value::as_str))
                        {
                            push_message(&mut out, s);
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(Value::Object(fields)) => {
            for value in fields.values() {
                match value {
                    Value::String(s) => push_message(&mut out, s),
                    Value::Array(list) => list
                        .iter()
                        .filter_map(Value::as_str)
                        .for_each(|s| push_message(&mut out, s)),
                    _ => {}
                }
            }
        }
        _ => {}
    }
    if !out.is_empty() {
        return out;
    }

    match body.get("message") {
        Some(Value::String(s)) => push_message(&mut out, s),
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .for_each(|s| push_message(&mut out, s)),
        _ => {}
    }
    out
}

fn push_message(out: &mut Vec<String>, s: &str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn errors_array_of_strings_keeps_order() {
        let body = json!({ "statusCode": 422, "errors": ["docName is required", "file is required"] });
        assert_eq!(
            normalize_error_messages(&body),
            vec!["docName is required", "file is required"]
        );
    }

    #[test]
    fn errors_array_of_objects() {
        let body = json!({ "errors": [{ "field": "docType", "message": "unknown type" }, { "msg": "bad issuer" }] });
        assert_eq!(
            normalize_error_messages(&body),
            vec!["unknown type", "bad issuer"]
        );
    }

    #[test]
    fn single_message_fallback() {
        assert_eq!(
            normalize_error_messages(&json!({ "message": "Token expired" })),
            vec!["Token expired"]
        );
        assert_eq!(
            normalize_error_messages(&json!({ "message": ["a", "b"] })),
            vec!["a", "b"]
        );
    }

    #[test]
    fn unknown_shapes_yield_nothing() {
        assert!(normalize_error_messages(&Value::Null).is_empty());
        assert!(normalize_error_messages(&json!({ "message": "  " })).is_empty());
        assert!(normalize_error_messages(&json!("plain")).is_empty());
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = ClientConfig::new("https://api.example").with_token("s3cr3t");
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("s3cr3t"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn delete_endpoint_needs_placeholder() {
        let mut cfg = ClientConfig::default();
        cfg.endpoints.delete_document = "/user/documents".into();
        assert!(matches!(
            ApiClient::new(cfg),
            Err(ProofError::InvalidConfig(_))
        ));
    }

    #[test]
    fn delete_id_is_a_single_encoded_segment() {
        let client = ApiClient::new(ClientConfig::new("https://api.example/")).unwrap();
        let url = client.delete_url("../admin?x=1").unwrap();
        assert_eq!(url.as_str(), "https://api.example/user/documents/..%2Fadmin%3Fx=1");
        assert_eq!(url.query(), None);
        assert_eq!(
            client.delete_url("d-42").unwrap().as_str(),
            "https://api.example/user/documents/d-42"
        );
    }

    #[test]
    fn delete_template_may_continue_after_id() {
        let mut cfg = ClientConfig::new("https://api.example");
        cfg.endpoints.delete_document = "/v2/docs/{doc_id}/purge".into();
        let client = ApiClient::new(cfg).unwrap();
        assert_eq!(
            client.delete_url("a b").unwrap().as_str(),
            "https://api.example/v2/docs/a%20b/purge"
        );
    }

    #[test]
    fn blank_or_dot_ids_are_rejected() {
        let client = ApiClient::new(ClientConfig::default()).unwrap();
        for id in ["", "   ", ".", ".."] {
            assert!(matches!(
                client.delete_url(id),
                Err(ProofError::Validation {
                    code: ValidationCode::Id,
                    ..
                })
            ));
        }
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = ApiClient::new(ClientConfig::new("https://api.example/")).unwrap();
        assert_eq!(client.url("/user/documents"), "https://api.example/user/documents");
    }
}
