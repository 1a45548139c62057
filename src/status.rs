//! Display state of a wanted document subtype.
//!
//! [`resolve`] is the only place that decides what a user's document
//! "is" (missing, expired, awaiting credential, issued, ...) and which
//! actions are allowed on it. It is pure: the same records, policy and clock
//! always give the same [`DocumentStatus`]. Presentation code only maps the
//! resulting [`DocumentDisplayState`] to a label and a badge.
//!
//! ## Priority
//!
//! ```text
//! no matching record           → Incomplete           (reupload only)
//! validity window has passed   → Expired              (reupload only)
//! policy issues credentials:
//!   vc pending                 → PendingVerification  (nothing)
//!   vc revoked                 → Revoked              (reupload only)
//!   vc deleted                 → Deleted              (reupload only)
//!   doc verified               → Issued               (everything)
//!   otherwise                  → Available            (everything)
//! policy issues no credentials:
//!   doc verified               → Verified             (everything)
//!   otherwise                  → Available            (everything)
//! ```
//!
//! While the policy is still loading, or could not be fetched, callers go
//! through [`resolve_with_policy`], which answers with every action disabled
//! instead of guessing.

use crate::models::{DocumentSubtypeConfig, SubtypeKey, UploadedDocumentRecord, VcStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// What the user sees for one document subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentDisplayState {
    Incomplete,
    Available,
    Verified,
    Issued,
    PendingVerification,
    Revoked,
    Deleted,
    Expired,
}

/// Visual tone for a state badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Badge {
    Neutral,
    Info,
    Success,
    Warning,
    Danger,
}

impl DocumentDisplayState {
    pub fn label(self) -> &'static str {
        match self {
            DocumentDisplayState::Incomplete => "Incomplete",
            DocumentDisplayState::Available => "Available",
            DocumentDisplayState::Verified => "Verified",
            DocumentDisplayState::Issued => "Issued",
            DocumentDisplayState::PendingVerification => "Pending verification",
            DocumentDisplayState::Revoked => "Revoked",
            DocumentDisplayState::Deleted => "Deleted",
            DocumentDisplayState::Expired => "Expired",
        }
    }

    pub fn badge(self) -> Badge {
        match self {
            DocumentDisplayState::Incomplete => Badge::Neutral,
            DocumentDisplayState::Available => Badge::Info,
            DocumentDisplayState::Verified | DocumentDisplayState::Issued => Badge::Success,
            DocumentDisplayState::PendingVerification => Badge::Warning,
            DocumentDisplayState::Revoked
            | DocumentDisplayState::Deleted
            | DocumentDisplayState::Expired => Badge::Danger,
        }
    }
}

impl fmt::Display for DocumentDisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A display state plus the actions it allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentStatus {
    pub state: DocumentDisplayState,
    pub can_preview: bool,
    pub can_delete: bool,
    pub can_reupload: bool,
    /// `true` when the policy was not available and every action is held back.
    pub provisional: bool,
}

impl DocumentStatus {
    fn new(state: DocumentDisplayState, preview: bool, delete: bool, reupload: bool) -> Self {
        Self {
            state,
            can_preview: preview,
            can_delete: delete,
            can_reupload: reupload,
            provisional: false,
        }
    }

    fn all(state: DocumentDisplayState) -> Self {
        Self::new(state, true, true, true)
    }

    fn reupload_only(state: DocumentDisplayState) -> Self {
        Self::new(state, false, false, true)
    }
}

/// The record for `wanted`, if any. The most recently uploaded one wins.
pub fn find_record<'a>(
    documents: &'a [UploadedDocumentRecord],
    wanted: &SubtypeKey,
) -> Option<&'a UploadedDocumentRecord> {
    documents
        .iter()
        .filter(|d| d.doc_subtype == wanted.doc_subtype && d.doc_type == wanted.doc_type)
        .max_by_key(|d| d.uploaded_at)
}

fn is_expired(record: &UploadedDocumentRecord, now: DateTime<Utc>) -> bool {
    record
        .validity_window
        .as_ref()
        .is_some_and(|w| w.has_passed(now))
}

/// Resolve the display state of `wanted` against a loaded `policy`.
pub fn resolve(
    documents: &[UploadedDocumentRecord],
    wanted: &SubtypeKey,
    policy: &DocumentSubtypeConfig,
    now: DateTime<Utc>,
) -> DocumentStatus {
    use DocumentDisplayState::*;

    let Some(record) = find_record(documents, wanted) else {
        return DocumentStatus::reupload_only(Incomplete);
    };
    if is_expired(record, now) {
        return DocumentStatus::reupload_only(Expired);
    }

    if policy.issue_vc {
        match record.vc_status {
            VcStatus::Pending => DocumentStatus::new(PendingVerification, false, false, false),
            VcStatus::Revoked => DocumentStatus::reupload_only(Revoked),
            VcStatus::Deleted => DocumentStatus::reupload_only(Deleted),
            VcStatus::Absent | VcStatus::Issued if record.doc_verified => {
                DocumentStatus::all(Issued)
            }
            VcStatus::Absent | VcStatus::Issued => DocumentStatus::all(Available),
        }
    } else if record.doc_verified {
        DocumentStatus::all(Verified)
    } else {
        DocumentStatus::all(Available)
    }
}

/// Where the issuance policy for a subtype currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyState {
    Loading,
    /// The fetch failed.
    Unavailable,
    Ready(DocumentSubtypeConfig),
}

/// [`resolve`] once the policy is `Ready`; a provisional status otherwise.
///
/// The provisional status uses only what does not depend on the policy
/// (match, expiry) and disables every action.
pub fn resolve_with_policy(
    documents: &[UploadedDocumentRecord],
    wanted: &SubtypeKey,
    policy: &PolicyState,
    now: DateTime<Utc>,
) -> DocumentStatus {
    if let PolicyState::Ready(policy) = policy {
        return resolve(documents, wanted, policy, now);
    }
    let state = match find_record(documents, wanted) {
        None => DocumentDisplayState::Incomplete,
        Some(r) if is_expired(r, now) => DocumentDisplayState::Expired,
        Some(_) => DocumentDisplayState::Available,
    };
    DocumentStatus {
        provisional: true,
        ..DocumentStatus::new(state, false, false, false)
    }
}
