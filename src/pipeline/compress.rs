//! Image normalisation: bring an oversized image under a hard byte budget.
//!
//! ## Strategy
//!
//! Each attempt re-encodes the decoded image as JPEG. Quality steps down by
//! 10 from `initial_quality` to `min_quality`; once quality is exhausted the
//! pixel dimensions shrink by 20 % per attempt. The first encoding that fits
//! wins. After `max_iterations` attempts the compressor gives up with
//! [`CompressionError::ExceedsAfterCompression`]. An over-budget file is never
//! returned.
//!
//! The work is CPU-bound and runs on Tokio's blocking pool, the closest
//! equivalent of a background worker.

use crate::config::{CompressOptions, OutputFormat};
use crate::error::{CompressionError, ProofError};
use crate::models::DocumentFile;
use crate::pipeline::encode::{ImageCodec, ImageRsCodec};
use image::imageops::FilterType;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

const QUALITY_STEP: u8 = 10;
const SHRINK_FACTOR: f64 = 0.8;
const MIN_DIMENSION: u32 = 16;

/// `true` once `size` exceeds `ratio` of the budget.
///
/// Uses the default 0.8 ratio when called through [`should_compress`].
pub fn should_compress_at(file: &DocumentFile, max_size_bytes: u64, ratio: f64) -> bool {
    file.size() as f64 > max_size_bytes as f64 * ratio
}

/// `true` once the file exceeds 80 % of `max_size_bytes`.
pub fn should_compress(file: &DocumentFile, max_size_bytes: u64) -> bool {
    should_compress_at(file, max_size_bytes, 0.8)
}

/// Compresses images under a byte budget through an [`ImageCodec`].
#[derive(Clone)]
pub struct ImageNormalizer {
    codec: Arc<dyn ImageCodec>,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(Arc::new(ImageRsCodec))
    }
}

impl ImageNormalizer {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    /// Compress `file` so it fits in `opts.max_size_mb`.
    ///
    /// Returns an unchanged copy when the file already fits. The input is
    /// never modified.
    pub async fn compress(
        &self,
        file: &DocumentFile,
        opts: CompressOptions,
    ) -> Result<DocumentFile, ProofError> {
        if file.size() <= opts.budget_bytes() {
            debug!(
                "'{}' already within budget ({} ≤ {} bytes)",
                file.name,
                file.size(),
                opts.budget_bytes()
            );
            return Ok(file.clone());
        }

        let input = file.clone();
        let normalizer = self.clone();
        tokio::task::spawn_blocking(move || normalizer.compress_blocking(&input, opts))
            .await
            .map_err(|e| ProofError::Internal(format!("Compression task panicked: {}", e)))?
    }

    /// Blocking implementation of [`ImageNormalizer::compress`].
    pub fn compress_blocking(
        &self,
        file: &DocumentFile,
        opts: CompressOptions,
    ) -> Result<DocumentFile, ProofError> {
        let budget = opts.budget_bytes();
        if file.size() <= budget {
            return Ok(file.clone());
        }
        if !file.is_image() {
            return Err(CompressionError::Codec(format!(
                "cannot compress non-image type {}",
                file.mime_type
            ))
            .into());
        }

        let original = self
            .codec
            .decode(&file.bytes)
            .map_err(CompressionError::Codec)?;
        let mut current = fit_within(original, opts.max_dimension);
        let mut quality = opts.initial_quality.max(opts.min_quality);
        let mut smallest = u64::MAX;

        for attempt in 1..=opts.max_iterations {
            let bytes = self
                .codec
                .encode(&current, OutputFormat::Jpeg, quality)
                .map_err(CompressionError::Codec)?;
            let size = bytes.len() as u64;
            smallest = smallest.min(size);
            debug!(
                "Compression attempt {}: {}x{} q={} → {} bytes (budget {})",
                attempt,
                current.width(),
                current.height(),
                quality,
                size,
                budget
            );

            if size <= budget && size > 0 {
                info!(
                    "Compressed '{}' {} → {} bytes in {} attempt(s)",
                    file.name,
                    file.size(),
                    size,
                    attempt
                );
                return Ok(DocumentFile::new(
                    file.renamed_with_extension(OutputFormat::Jpeg.extension()),
                    OutputFormat::Jpeg.mime_type(),
                    bytes,
                ));
            }

            if quality >= opts.min_quality.saturating_add(QUALITY_STEP) {
                quality -= QUALITY_STEP;
            } else {
                quality = opts.min_quality;
                current = shrink(&current);
            }
        }

        warn!(
            "'{}' still {} bytes after {} attempts (budget {})",
            file.name, smallest, opts.max_iterations, budget
        );
        Err(CompressionError::ExceedsAfterCompression {
            size: smallest,
            budget,
        }
        .into())
    }
}

/// Downscale so neither edge exceeds `max_dimension`, preserving aspect ratio.
fn fit_within(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    if img.width() <= max_dimension && img.height() <= max_dimension {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::CatmullRom)
}

fn shrink(img: &DynamicImage) -> DynamicImage {
    let w = ((img.width() as f64 * SHRINK_FACTOR) as u32).max(MIN_DIMENSION);
    let h = ((img.height() as f64 * SHRINK_FACTOR) as u32).max(MIN_DIMENSION);
    if w >= img.width() && h >= img.height() {
        return img.clone();
    }
    img.resize_exact(w, h, FilterType::Triangle)
}
