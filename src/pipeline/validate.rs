//! File validation: cheap MIME-type and size checks that run before any
//! decoding, rendering or network work.

use crate::error::{ProofError, ValidationCode};
use crate::models::{DocumentFile, BYTES_PER_MB, MIME_PDF};
use serde::Serialize;
use tracing::debug;

/// Verdict of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ValidationCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            code: None,
            message: None,
        }
    }

    fn reject(code: ValidationCode, message: String) -> Self {
        Self {
            valid: false,
            code: Some(code),
            message: Some(message),
        }
    }

    /// Turn a rejection into [`ProofError::Validation`].
    pub fn into_result(self) -> Result<(), ProofError> {
        match (self.valid, self.code) {
            (true, _) => Ok(()),
            (false, code) => Err(ProofError::Validation {
                code: code.unwrap_or(ValidationCode::Type),
                message: self.message.unwrap_or_default(),
            }),
        }
    }
}

/// `true` for `image/*` and `application/pdf`.
pub fn is_accepted_type(mime_type: &str) -> bool {
    let mime = mime_type.trim().to_ascii_lowercase();
    mime.starts_with("image/") || mime == MIME_PDF
}

/// Check that only the MIME type is acceptable, ignoring size.
pub fn validate_type(file: &DocumentFile, allowed_mime_types: &[String]) -> ValidationResult {
    if !is_accepted_type(&file.mime_type) {
        return ValidationResult::reject(
            ValidationCode::Type,
            format!(
                "Unsupported file type '{}'. Please upload an image or a PDF.",
                file.mime_type
            ),
        );
    }

    if !allowed_mime_types.is_empty()
        && !allowed_mime_types
            .iter()
            .any(|m| m.eq_ignore_ascii_case(file.mime_type.trim()))
    {
        return ValidationResult::reject(
            ValidationCode::Type,
            format!(
                "File type '{}' is not accepted for this document. Allowed: {}.",
                file.mime_type,
                allowed_mime_types.join(", ")
            ),
        );
    }

    ValidationResult::ok()
}

/// Validate a file against the accepted types and `max_file_size_bytes`.
///
/// Pure and synchronous. `allowed_mime_types` narrows the accepted set further
/// when non-empty.
pub fn validate(
    file: &DocumentFile,
    max_file_size_bytes: u64,
    allowed_mime_types: &[String],
) -> ValidationResult {
    let by_type = validate_type(file, allowed_mime_types);
    if !by_type.valid {
        debug!("Rejected '{}': type {}", file.name, file.mime_type);
        return by_type;
    }

    let size = file.size();
    if size > max_file_size_bytes {
        debug!(
            "Rejected '{}': {} bytes > {} bytes",
            file.name, size, max_file_size_bytes
        );
        return ValidationResult::reject(
            ValidationCode::Size,
            format!(
                "File size ({:.2} MB) exceeds the maximum allowed size of {} MB.",
                size as f64 / BYTES_PER_MB as f64,
                format_mb(max_file_size_bytes)
            ),
        );
    }

    ValidationResult::ok()
}

/// Megabytes without trailing zeros: `5`, `2.5`, `0.75`.
fn format_mb(bytes: u64) -> String {
    let mb = bytes as f64 / BYTES_PER_MB as f64;
    let s = format!("{mb:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(mime: &str, size: u64) -> DocumentFile {
        DocumentFile::new("doc", mime, vec![0u8; size as usize])
    }

    #[test]
    fn accepts_small_jpeg() {
        let r = validate(&file("image/jpeg", BYTES_PER_MB), 2 * BYTES_PER_MB, &[]);
        assert!(r.valid);
        assert_eq!(r.code, None);
        assert_eq!(r.message, None);
    }

    #[test]
    fn rejects_oversized_pdf_with_sizes_in_message() {
        let r = validate(&file(MIME_PDF, 6 * BYTES_PER_MB), 5 * BYTES_PER_MB, &[]);
        assert!(!r.valid);
        assert_eq!(r.code, Some(ValidationCode::Size));
        let msg = r.message.unwrap();
        assert!(msg.contains("6.00"), "got: {msg}");
        assert!(msg.contains('5'), "got: {msg}");
    }

    #[test]
    fn size_exactly_at_limit_is_valid() {
        let r = validate(&file("image/png", 1024), 1024, &[]);
        assert!(r.valid);
    }

    #[test]
    fn rejects_non_image_non_pdf() {
        let r = validate(&file("text/plain", 10), BYTES_PER_MB, &[]);
        assert_eq!(r.code, Some(ValidationCode::Type));
        assert!(r.into_result().unwrap_err().is_local());
    }

    #[test]
    fn type_is_checked_before_size() {
        let r = validate(&file("application/zip", 10 * BYTES_PER_MB), BYTES_PER_MB, &[]);
        assert_eq!(r.code, Some(ValidationCode::Type));
    }

    #[test]
    fn subtype_allow_list_narrows_types() {
        let allowed = vec!["application/pdf".to_string()];
        let r = validate(&file("image/png", 10), BYTES_PER_MB, &allowed);
        assert_eq!(r.code, Some(ValidationCode::Type));
        let r = validate(&file("application/pdf", 10), BYTES_PER_MB, &allowed);
        assert!(r.valid);
    }

    #[test]
    fn format_mb_trims_zeros() {
        assert_eq!(format_mb(5 * BYTES_PER_MB), "5");
        assert_eq!(format_mb(BYTES_PER_MB / 2), "0.5");
    }
}
