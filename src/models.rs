//! Data model shared by every stage of the pipeline.
//!
//! Wire-facing types use the backend's snake_case field names. Request bodies
//! that the backend expects in camelCase are declared next to the code that
//! sends them, in [`crate::upload`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_JPEG: &str = "image/jpeg";
pub const MIME_PNG: &str = "image/png";

/// Bytes in one megabyte, as used for every size budget in this crate.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Cache key for issuance policy: `(docType, docSubtype)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtypeKey {
    pub doc_type: String,
    pub doc_subtype: String,
}

impl SubtypeKey {
    pub fn new(doc_type: impl Into<String>, doc_subtype: impl Into<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            doc_subtype: doc_subtype.into(),
        }
    }
}

impl fmt::Display for SubtypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doc_type, self.doc_subtype)
    }
}

/// What a scanned QR code is expected to contain for a subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrContentKind {
    /// Any non-empty text. (default)
    #[default]
    Text,
    /// An http(s) URL pointing at a verifiable credential.
    Url,
    /// An inline JSON credential.
    Json,
}

/// Issuance policy for one `(docType, docSubtype)`.
///
/// Fetched read-only from the configuration endpoint and cached per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSubtypeConfig {
    pub doc_type: String,
    pub doc_subtype: String,
    #[serde(default)]
    pub issuer: Option<String>,
    /// Whether uploads of this subtype are turned into verifiable credentials.
    ///
    /// The backend sends either a boolean or the strings `"yes"` / `"no"`.
    #[serde(default, deserialize_with = "de_yes_no")]
    pub issue_vc: bool,
    #[serde(default, alias = "accepted_qr_content")]
    pub accepted_qr_content_kind: QrContentKind,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default)]
    pub allowed_mime_types: Vec<String>,
    /// Credential field mapping; opaque to this crate.
    #[serde(default)]
    pub vc_fields: serde_json::Value,
}

fn default_max_file_size() -> u64 {
    5 * BYTES_PER_MB
}

impl DocumentSubtypeConfig {
    /// A policy that issues no credential and uses default limits.
    ///
    /// Stands in for a subtype with no configured policy.
    pub fn without_issuance(key: &SubtypeKey) -> Self {
        Self {
            doc_type: key.doc_type.clone(),
            doc_subtype: key.doc_subtype.clone(),
            issuer: None,
            issue_vc: false,
            accepted_qr_content_kind: QrContentKind::default(),
            max_file_size_bytes: default_max_file_size(),
            allowed_mime_types: Vec::new(),
            vc_fields: serde_json::Value::Null,
        }
    }

    pub fn key(&self) -> SubtypeKey {
        SubtypeKey::new(&self.doc_type, &self.doc_subtype)
    }
}

fn de_yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1"),
        None => false,
    })
}

/// An in-memory file: name, MIME type and bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(MIME_PDF)
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("image/")
    }

    /// The file name with its extension replaced, keeping the base name.
    pub fn renamed_with_extension(&self, extension: &str) -> String {
        let base = match self.name.rfind('.') {
            Some(dot) if dot > 0 => &self.name[..dot],
            _ => self.name.as_str(),
        };
        format!("{base}.{extension}")
    }
}

impl fmt::Debug for DocumentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Guess a MIME type from a file name's extension.
pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "jpg" | "jpeg" => MIME_JPEG,
        "png" => MIME_PNG,
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}

/// How a candidate artifact was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMethod {
    Camera,
    File,
    Qr,
}

impl SourceMethod {
    /// Value sent as `importedFrom`.
    pub fn imported_from(self) -> &'static str {
        match self {
            SourceMethod::Camera => "Camera",
            SourceMethod::File => "File Upload",
            SourceMethod::Qr => "QR Code",
        }
    }
}

/// The uploadable result of one capture attempt.
///
/// Exists only within that attempt: it is dropped on retake or cancel and
/// superseded by an [`UploadedDocumentRecord`] once the server acknowledges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedArtifact {
    pub file: DocumentFile,
    /// Name of the file the user picked, before any conversion.
    pub origin_name: String,
    pub source: SourceMethod,
    pub page_count: usize,
}

impl CapturedArtifact {
    pub fn size_bytes(&self) -> u64 {
        self.file.size()
    }

    pub fn mime_type(&self) -> &str {
        &self.file.mime_type
    }

    /// A `data:` URI for previewing the artifact before upload.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.file.mime_type,
            STANDARD.encode(&self.file.bytes)
        )
    }
}

/// Credential status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcStatus {
    Pending,
    Issued,
    Revoked,
    Deleted,
    /// No credential has been requested, or the backend sent something unknown.
    #[default]
    #[serde(other)]
    Absent,
}

/// Validity period embedded in a credential.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityWindow {
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

impl ValidityWindow {
    /// `true` once `valid_until` lies strictly before `now`.
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| until < now)
    }
}

/// A document as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedDocumentRecord {
    /// Absent until the server has confirmed the document.
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub doc_type: String,
    pub doc_subtype: String,
    #[serde(default)]
    pub doc_name: String,
    #[serde(default)]
    pub imported_from: Option<String>,
    #[serde(default)]
    pub doc_datatype: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_uploaded: Option<bool>,
    #[serde(default, alias = "is_verified")]
    pub doc_verified: bool,
    #[serde(default, deserialize_with = "de_vc_status")]
    pub vc_status: VcStatus,
    #[serde(default, alias = "doc_path")]
    pub download_url: Option<String>,
    #[serde(default, alias = "validity")]
    pub validity_window: Option<ValidityWindow>,
}

fn de_vc_status<'de, D>(deserializer: D) -> Result<VcStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<VcStatus>::deserialize(deserializer)?.unwrap_or_default())
}
