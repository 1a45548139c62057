//! One capture attempt, from raw file to uploadable artifact.
//!
//! ```text
//! type check ─▶ size check ─▶ PDF → image ─▶ compress? ─▶ budget check
//!              (file only)    (PDF only)     (> 80 %)     (fail closed)
//! ```
//!
//! Camera stills skip the size check: they are compressed instead of being
//! rejected. Whatever the path, an artifact that still exceeds the subtype's
//! limit after compression is discarded and never returned.

use crate::config::PipelineConfig;
use crate::error::{CompressionError, ProofError};
use crate::models::{CapturedArtifact, DocumentFile, DocumentSubtypeConfig, SourceMethod};
use crate::pipeline::compress::{should_compress_at, ImageNormalizer};
use crate::pipeline::render::DocumentConverter;
use crate::pipeline::validate::{validate, validate_type};
use tracing::{debug, info, warn};

/// Runs the local pipeline stages for one file.
#[derive(Clone, Default)]
pub struct ArtifactPreparer {
    config: PipelineConfig,
    converter: DocumentConverter,
    normalizer: ImageNormalizer,
}

impl ArtifactPreparer {
    pub fn new(
        config: PipelineConfig,
        converter: DocumentConverter,
        normalizer: ImageNormalizer,
    ) -> Self {
        Self {
            config,
            converter,
            normalizer,
        }
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Byte limit for `policy`, or the configured default without one.
    pub fn limit_for(&self, policy: Option<&DocumentSubtypeConfig>) -> u64 {
        policy
            .map(|p| p.max_file_size_bytes)
            .filter(|&b| b > 0)
            .unwrap_or(self.config.default_max_file_size_bytes)
    }

    /// Turn `file` into an artifact that fits `policy`'s limits.
    pub async fn prepare_artifact(
        &self,
        file: DocumentFile,
        source: SourceMethod,
        policy: Option<&DocumentSubtypeConfig>,
    ) -> Result<CapturedArtifact, ProofError> {
        let limit = self.limit_for(policy);
        let allowed: &[String] = policy.map(|p| p.allowed_mime_types.as_slice()).unwrap_or(&[]);
        let origin_name = file.name.clone();

        validate_type(&file, allowed).into_result()?;
        if source == SourceMethod::File {
            validate(&file, limit, allowed).into_result()?;
        }

        let (mut file, page_count) = if file.is_pdf() {
            self.converter
                .convert_counted(&file, self.config.convert_options())
                .await?
        } else {
            (file, 1)
        };

        if should_compress_at(&file, limit, self.config.compress_threshold_ratio) {
            debug!(
                "'{}' is {} bytes, above {:.0}% of {}; compressing",
                file.name,
                file.size(),
                self.config.compress_threshold_ratio * 100.0,
                limit
            );
            file = self
                .normalizer
                .compress(&file, self.config.compress_options(limit))
                .await?;
        }

        if file.size() > limit {
            warn!("'{}' still {} bytes over a {} byte limit", file.name, file.size(), limit);
            return Err(CompressionError::ExceedsAfterCompression {
                size: file.size(),
                budget: limit,
            }
            .into());
        }

        info!(
            "Prepared '{}' → '{}' ({} bytes, {} page(s))",
            origin_name,
            file.name,
            file.size(),
            page_count
        );
        Ok(CapturedArtifact {
            file,
            origin_name,
            source,
            page_count,
        })
    }
}
