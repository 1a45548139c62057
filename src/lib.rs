//! # edgequake-proofdoc
//!
//! Capture, normalise and submit citizen proof documents (marksheets,
//! identity cards, certificates), and work out what each one currently
//! counts as.
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera / file / QR
//!  │
//!  ├─ 1. Capture   camera still (capture) or QR payload (qr)
//!  ├─ 2. Validate  MIME type and size, local only
//!  ├─ 3. Flatten   multi-page PDF → one image via pdfium (spawn_blocking)
//!  ├─ 4. Compress  re-encode under the byte budget, or fail closed
//!  ├─ 5. Upload    multipart or QR JSON, issuer from the cached policy
//!  └─ 6. Resolve   refetch the list, derive a display state per subtype
//! ```
//!
//! Steps 2–4 are chained by [`ArtifactPreparer::prepare_artifact`]. Upload
//! lives in [`UploadOrchestrator`]; the list and its statuses in
//! [`DocumentLibrary`]; the pure state decision in [`status::resolve`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgequake_proofdoc::{
//!     ApiClient, ArtifactPreparer, DocumentFile, DocumentLibrary, PolicyCache,
//!     SourceMethod, SubtypeKey, UploadOrchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // PROOFDOC_API_URL / PROOFDOC_API_TOKEN
//!     let api = Arc::new(ApiClient::from_env()?);
//!     let policies = PolicyCache::new();
//!     let key = SubtypeKey::new("academic", "marksheet");
//!
//!     let bytes = std::fs::read("marksheet.pdf")?;
//!     let file = DocumentFile::new("marksheet.pdf", "application/pdf", bytes);
//!     let artifact = ArtifactPreparer::default()
//!         .prepare_artifact(file, SourceMethod::File, None)
//!         .await?;
//!
//!     let uploads = UploadOrchestrator::new(api.clone(), policies.clone());
//!     uploads.upload_raw(&artifact, &key, "Class X marksheet").await?;
//!
//!     let library = DocumentLibrary::new(api, policies);
//!     library.record_upload().await?;
//!     let status = library.status(&key, chrono::Utc::now()).await;
//!     println!("{}", status.state.label());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `proofdoc` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-proofdoc = { version = "0.1", default-features = false }
//! ```
//!
//! ## Capabilities
//!
//! Device and codec dependencies sit behind narrow traits so any conforming
//! implementation, including a test double, can be plugged in:
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`capture::CameraDevice`] | [`CaptureSession`], [`QrDecoder`] |
//! | [`qr::FrameDecoder`] | [`QrDecoder`] |
//! | [`pipeline::render::PageRenderer`] | [`DocumentConverter`] |
//! | [`pipeline::encode::ImageCodec`] | [`DocumentConverter`], [`ImageNormalizer`] |
//! | [`client::DocumentApi`] | [`UploadOrchestrator`], [`DocumentLibrary`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod library;
pub mod models;
pub mod pipeline;
pub mod prepare;
pub mod qr;
pub mod status;
pub mod upload;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CoalescingCache, PolicyCache};
pub use capture::{CaptureSession, CaptureState};
pub use client::{ApiClient, ClientConfig, DocumentApi, Endpoints};
pub use config::{CompressOptions, ConvertOptions, OutputFormat, PipelineConfig, PipelineConfigBuilder};
pub use error::{CompressionError, ProofError, ValidationCode};
pub use library::DocumentLibrary;
pub use models::{
    CapturedArtifact, DocumentFile, DocumentSubtypeConfig, QrContentKind, SourceMethod,
    SubtypeKey, UploadedDocumentRecord, VcStatus, ValidityWindow,
};
pub use pipeline::compress::{should_compress, ImageNormalizer};
pub use pipeline::render::DocumentConverter;
pub use pipeline::validate::{validate, ValidationResult};
pub use prepare::ArtifactPreparer;
pub use qr::{QrDecoder, ScannerState};
pub use status::{resolve, resolve_with_policy, DocumentDisplayState, DocumentStatus, PolicyState};
pub use upload::{UploadOrchestrator, UploadOutcome, ViewLiveness};
