//! Submitting prepared artifacts and QR payloads to the backend.
//!
//! ## Issuer lookup
//!
//! The issuer comes from the subtype's issuance policy, read through the
//! shared [`PolicyCache`]. A missing policy or a failed lookup never blocks
//! the upload: it is logged as [`ProofError::ConfigMissing`] and the request
//! goes out without `issuer`.
//!
//! ## Responses
//!
//! A file upload answers with one of two shapes, told apart by the presence
//! of `issue_vc` in `data`:
//!
//! * a finalised record carrying `doc_id`, see [`UploadOutcome::Finalized`]
//! * a pending-issuance shape with `mapped_data` and no `doc_id` yet, see
//!   [`UploadOutcome::PendingIssuance`]
//!
//! A QR upload's answer is not authoritative. Callers refetch the document
//! list afterwards (see [`crate::library::DocumentLibrary::record_upload`]).
//!
//! Failures are terminal for the attempt; nothing is retried.

use crate::cache::PolicyCache;
use crate::client::DocumentApi;
use crate::error::{ProofError, ValidationCode};
use crate::models::{
    CapturedArtifact, DocumentFile, DocumentSubtypeConfig, QrContentKind, SourceMethod,
    SubtypeKey, UploadedDocumentRecord,
};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Multipart upload of one prepared file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub file: DocumentFile,
    pub doc_type: String,
    pub doc_subtype: String,
    pub doc_name: String,
    pub imported_from: String,
    pub issuer: Option<String>,
}

impl UploadRequest {
    /// The text fields of the form, in submission order.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("docType", self.doc_type.clone()),
            ("docSubtype", self.doc_subtype.clone()),
            ("docName", self.doc_name.clone()),
            ("importedFrom", self.imported_from.clone()),
        ];
        if let Some(issuer) = &self.issuer {
            fields.push(("issuer", issuer.clone()));
        }
        fields
    }

    pub fn into_form(self) -> Result<Form, ProofError> {
        let fields = self.fields();
        let DocumentFile {
            name,
            mime_type,
            bytes,
        } = self.file;
        let part = Part::bytes(bytes)
            .file_name(name)
            .mime_str(&mime_type)
            .map_err(|e| ProofError::Internal(format!("invalid MIME type {mime_type}: {e}")))?;

        Ok(fields
            .into_iter()
            .fold(Form::new().part("file", part), |form, (k, v)| form.text(k, v)))
    }
}

/// JSON body for a QR upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrUploadRequest {
    pub doc_type: String,
    #[serde(rename = "docSubType")]
    pub doc_subtype: String,
    pub doc_name: String,
    pub imported_from: String,
    pub qr_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Upload answered before credential issuance has completed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingIssuance {
    pub doc_type: String,
    pub doc_subtype: String,
    #[serde(default)]
    pub doc_name: Option<String>,
    /// Fields extracted for the credential; opaque to this crate.
    #[serde(default)]
    pub mapped_data: Value,
}

/// What the backend made of a file upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Finalized(UploadedDocumentRecord),
    PendingIssuance(PendingIssuance),
}

impl UploadOutcome {
    /// Interpret the envelope's `data`.
    pub fn from_data(data: Value) -> Result<Self, ProofError> {
        if !data.is_object() {
            return Err(ProofError::InvalidResponse(
                "upload response has no data".into(),
            ));
        }
        let parsed = if data.get("issue_vc").is_some() {
            serde_json::from_value(data).map(UploadOutcome::PendingIssuance)
        } else {
            serde_json::from_value(data).map(UploadOutcome::Finalized)
        };
        parsed.map_err(|e| ProofError::InvalidResponse(format!("malformed upload response: {e}")))
    }

    pub fn doc_id(&self) -> Option<&str> {
        match self {
            UploadOutcome::Finalized(record) => record.doc_id.as_deref(),
            UploadOutcome::PendingIssuance(_) => None,
        }
    }
}

/// Check a QR payload against the subtype's accepted content kind.
pub fn check_qr_content(kind: QrContentKind, payload: &str) -> Result<(), ProofError> {
    let ok = match kind {
        QrContentKind::Text => !payload.is_empty(),
        QrContentKind::Url => {
            let lower = payload.to_ascii_lowercase();
            (lower.starts_with("https://") || lower.starts_with("http://"))
                && !payload.contains(char::is_whitespace)
        }
        QrContentKind::Json => serde_json::from_str::<Value>(payload)
            .map(|v| v.is_object() || v.is_array())
            .unwrap_or(false),
    };
    if ok {
        return Ok(());
    }
    let expected = match kind {
        QrContentKind::Text => "text",
        QrContentKind::Url => "URL",
        QrContentKind::Json => "JSON",
    };
    Err(ProofError::Validation {
        code: ValidationCode::Content,
        message: format!("The scanned QR code does not contain a {expected} credential."),
    })
}

/// Sends artifacts and QR payloads, resolving the issuer on the way.
#[derive(Clone)]
pub struct UploadOrchestrator {
    api: Arc<dyn DocumentApi>,
    policies: PolicyCache,
}

impl UploadOrchestrator {
    pub fn new(api: Arc<dyn DocumentApi>, policies: PolicyCache) -> Self {
        Self { api, policies }
    }

    pub fn policies(&self) -> &PolicyCache {
        &self.policies
    }

    /// Issuance policy for `key`, through the shared cache.
    pub async fn policy(&self, key: &SubtypeKey) -> Result<Option<DocumentSubtypeConfig>, ProofError> {
        self.policies.policy(&self.api, key).await
    }

    /// Policy lookup that never fails: misses are logged and yield `None`.
    async fn policy_or_none(&self, key: &SubtypeKey) -> Option<DocumentSubtypeConfig> {
        match self.policy(key).await {
            Ok(Some(policy)) => Some(policy),
            Ok(None) => {
                let e = ProofError::ConfigMissing {
                    doc_type: key.doc_type.clone(),
                    doc_subtype: key.doc_subtype.clone(),
                };
                warn!("{}; uploading without issuer", e);
                None
            }
            Err(e) => {
                warn!("Policy lookup for {} failed ({}); uploading without issuer", key, e);
                None
            }
        }
    }

    /// Upload a prepared artifact as `doc_name` under `key`.
    pub async fn upload_raw(
        &self,
        artifact: &CapturedArtifact,
        key: &SubtypeKey,
        doc_name: &str,
    ) -> Result<UploadOutcome, ProofError> {
        let issuer = self.policy_or_none(key).await.and_then(|p| p.issuer);
        let request = UploadRequest {
            file: artifact.file.clone(),
            doc_type: key.doc_type.clone(),
            doc_subtype: key.doc_subtype.clone(),
            doc_name: doc_name.to_string(),
            imported_from: artifact.source.imported_from().to_string(),
            issuer,
        };
        debug!("Upload fields: {:?}", request.fields());

        let data = self.api.upload_document(request).await?;
        let outcome = UploadOutcome::from_data(data)?;
        match &outcome {
            UploadOutcome::Finalized(record) => info!(
                "Upload finalised as {}",
                record.doc_id.as_deref().unwrap_or("<no id>")
            ),
            UploadOutcome::PendingIssuance(p) => {
                info!("Upload of {}/{} awaiting issuance", p.doc_type, p.doc_subtype)
            }
        }
        Ok(outcome)
    }

    /// Submit a scanned QR payload as `doc_name` under `key`.
    ///
    /// The returned `data` is informational; refetch the document list.
    pub async fn upload_qr(
        &self,
        qr_content: &str,
        key: &SubtypeKey,
        doc_name: &str,
    ) -> Result<Value, ProofError> {
        let payload = qr_content.trim();
        if payload.is_empty() {
            return Err(ProofError::Validation {
                code: ValidationCode::Content,
                message: "The scanned QR code is empty.".into(),
            });
        }

        let policy = self.policy_or_none(key).await;
        let kind = policy
            .as_ref()
            .map(|p| p.accepted_qr_content_kind)
            .unwrap_or_default();
        check_qr_content(kind, payload)?;

        let request = QrUploadRequest {
            doc_type: key.doc_type.clone(),
            doc_subtype: key.doc_subtype.clone(),
            doc_name: doc_name.to_string(),
            imported_from: SourceMethod::Qr.imported_from().to_string(),
            qr_content: payload.to_string(),
            issuer: policy.and_then(|p| p.issuer),
        };
        let data = self.api.upload_qr_document(&request).await?;
        info!("QR upload for {} acknowledged", key);
        Ok(data)
    }
}

/// Tracks whether the view that started a request is still mounted.
///
/// Clones share the flag. Responses for an unmounted view are dropped.
#[derive(Debug, Clone)]
pub struct ViewLiveness {
    alive: Arc<AtomicBool>,
}

impl Default for ViewLiveness {
    fn default() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl ViewLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unmount(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Await `fut`; yield its output only if the view is still mounted.
    pub async fn deliver<F: Future>(&self, fut: F) -> Option<F::Output> {
        let out = fut.await;
        if self.is_alive() {
            Some(out)
        } else {
            debug!("View unmounted; discarding response");
            None
        }
    }
}
