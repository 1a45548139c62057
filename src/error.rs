//! Error types for the edgequake-proofdoc library.
//!
//! Every stage of the capture → normalise → submit pipeline reports failure
//! through [`ProofError`]. The variants follow the way a failure is handled
//! rather than where it happened:
//!
//! * **Local** — [`ProofError::Validation`] and [`ProofError::CameraAccess`]
//!   are resolved and shown on the device; they never reach the network.
//! * **Transform** — [`ProofError::Conversion`] and
//!   [`ProofError::Compression`] discard the in-progress artifact. Nothing
//!   partial is ever uploaded.
//! * **Remote** — [`ProofError::Network`] carries the server's own messages
//!   when it sent any, so they can be shown verbatim.
//! * **Soft** — [`ProofError::ConfigMissing`] is logged and swallowed by the
//!   upload path: the upload continues without an issuer.
//!
//! Nothing here is retried automatically. Each failure ends the current
//! attempt.
//!
//! `ProofError` is `Clone` because a single configuration fetch may be shared
//! between several waiting callers (see [`crate::cache`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Generic text shown when the server gave no usable message.
pub const GENERIC_NETWORK_MESSAGE: &str = "Something went wrong. Please try again.";

/// All errors returned by the edgequake-proofdoc library.
#[derive(Debug, Clone, Error)]
pub enum ProofError {
    // ── Local errors ──────────────────────────────────────────────────────
    /// File type or size rejected before any heavier work ran.
    #[error("{message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },

    /// Camera permission denied, device missing, or no frame available.
    #[error("Camera unavailable: {0}")]
    CameraAccess(String),

    // ── Transform errors ──────────────────────────────────────────────────
    /// PDF could not be flattened into a single image.
    #[error("PDF conversion failed{}: {detail}", .page.map(|p| format!(" on page {p}")).unwrap_or_default())]
    Conversion { page: Option<usize>, detail: String },

    /// Image could not be brought under the byte budget.
    #[error(transparent)]
    Compression(#[from] CompressionError),

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Upload, delete, list or configuration request failed.
    ///
    /// `messages` holds the server's error strings in the order it sent them.
    /// It is empty when the server gave nothing usable.
    #[error("Request failed{}: {}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default(), summarise(.messages))]
    Network {
        status: Option<u16>,
        messages: Vec<String>,
    },

    /// The server answered but the body did not have the expected shape.
    #[error("Unexpected response from server: {0}")]
    InvalidResponse(String),

    /// No issuance policy is configured for this document subtype.
    #[error("No issuance policy configured for {doc_type}/{doc_subtype}")]
    ConfigMissing {
        doc_type: String,
        doc_subtype: String,
    },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProofError {
    /// Strings to show the user for this error.
    ///
    /// Network errors return the server's messages verbatim when there are
    /// any, else [`GENERIC_NETWORK_MESSAGE`]. Every other error returns its
    /// own display text.
    pub fn display_messages(&self) -> Vec<String> {
        match self {
            ProofError::Network { messages, .. } if !messages.is_empty() => messages.clone(),
            ProofError::Network { .. } | ProofError::InvalidResponse(_) => {
                vec![GENERIC_NETWORK_MESSAGE.to_string()]
            }
            other => vec![other.to_string()],
        }
    }

    /// `true` for errors that are resolved on the device and never reach
    /// the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ProofError::Validation { .. } | ProofError::CameraAccess(_)
        )
    }

    pub(crate) fn network(status: Option<u16>, messages: Vec<String>) -> Self {
        ProofError::Network { status, messages }
    }
}

impl From<reqwest::Error> for ProofError {
    fn from(e: reqwest::Error) -> Self {
        ProofError::Network {
            status: e.status().map(|s| s.as_u16()),
            messages: Vec::new(),
        }
    }
}

fn summarise(messages: &[String]) -> String {
    if messages.is_empty() {
        GENERIC_NETWORK_MESSAGE.to_string()
    } else {
        messages.join("; ")
    }
}

/// Machine-readable reason a file was rejected by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationCode {
    /// MIME type not accepted.
    Type,
    /// File larger than the allowed size.
    Size,
    /// QR payload does not match the accepted content kind.
    Content,
    /// Document id is empty or is a dot segment.
    Id,
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationCode::Type => "type",
            ValidationCode::Size => "size",
            ValidationCode::Content => "content",
            ValidationCode::Id => "id",
        })
    }
}

/// Failure while compressing an image under its byte budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    /// The codec could not decode or encode the image.
    #[error("Image codec failed: {0}")]
    Codec(String),

    /// Every compression step still produced an over-budget file.
    #[error("EXCEEDS_AFTER_COMPRESSION: {size} bytes after compression, budget is {budget} bytes")]
    ExceedsAfterCompression { size: u64, budget: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_display_joins_server_messages() {
        let e = ProofError::network(
            Some(422),
            vec!["docName is required".into(), "file is too large".into()],
        );
        let msg = e.to_string();
        assert!(msg.contains("HTTP 422"), "got: {msg}");
        assert!(msg.contains("docName is required; file is too large"));
    }

    #[test]
    fn network_display_messages_fall_back_to_generic() {
        let e = ProofError::network(None, vec![]);
        assert_eq!(e.display_messages(), vec![GENERIC_NETWORK_MESSAGE]);
    }

    #[test]
    fn network_display_messages_keep_server_order() {
        let e = ProofError::network(Some(400), vec!["b".into(), "a".into()]);
        assert_eq!(e.display_messages(), vec!["b", "a"]);
    }

    #[test]
    fn conversion_display_mentions_page() {
        let e = ProofError::Conversion {
            page: Some(3),
            detail: "bitmap allocation failed".into(),
        };
        assert!(e.to_string().contains("page 3"));
    }

    #[test]
    fn compression_error_carries_code() {
        let e: ProofError = CompressionError::ExceedsAfterCompression {
            size: 10,
            budget: 5,
        }
        .into();
        assert!(e.to_string().contains("EXCEEDS_AFTER_COMPRESSION"));
    }

    #[test]
    fn validation_and_camera_errors_are_local() {
        assert!(ProofError::CameraAccess("denied".into()).is_local());
        assert!(ProofError::Validation {
            code: ValidationCode::Type,
            message: "nope".into()
        }
        .is_local());
        assert!(!ProofError::network(None, vec![]).is_local());
    }
}
