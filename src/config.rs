//! Configuration for the capture → normalise → submit pipeline.
//!
//! Every local processing knob lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Network settings live separately in
//! [`crate::client::ClientConfig`] because they change per deployment, not
//! per device.
//!
//! # Design choice: builder over constructor
//! The pipeline has a dozen tunables and most callers only care about one or
//! two. The builder lets them set those and rely on documented defaults for
//! the rest, and `build()` is the single place where ranges are checked.

use crate::error::ProofError;
use crate::models::BYTES_PER_MB;
use serde::{Deserialize, Serialize};

/// Configuration for local document processing.
///
/// # Example
/// ```rust
/// use edgequake_proofdoc::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .pdf_scale(2.0)
///     .camera_quality(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.camera_quality, 90);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upload limit used when a subtype's policy does not set one. Default: 5 MB.
    pub default_max_file_size_bytes: u64,

    /// Fraction of the budget above which an image is compressed. Default: 0.8.
    ///
    /// Compressing at 80 % rather than 100 % leaves headroom for the multipart
    /// envelope and avoids a hard size failure on files that sit right at the
    /// limit.
    pub compress_threshold_ratio: f64,

    /// JPEG quality (1–100) for camera stills. Default: 92.
    pub camera_quality: u8,

    /// Render scale applied to every PDF page. Default: 1.5.
    ///
    /// 1.0 renders at the PDF's native 72 DPI, which makes small print on
    /// certificates unreadable. 1.5 keeps text legible without producing a
    /// combined image that immediately needs compressing.
    pub pdf_scale: f32,

    /// Encoding quality (1–100) of the flattened PDF image. Default: 92.
    pub pdf_quality: u8,

    /// Format of the flattened PDF image. Default: JPEG.
    pub pdf_format: OutputFormat,

    /// First quality tried when compressing. Default: 85.
    pub compress_initial_quality: u8,

    /// Lowest quality the compressor will go to before shrinking pixels. Default: 40.
    pub compress_min_quality: u8,

    /// Longest edge (px) a compressed image may keep. Default: 2560.
    pub compress_max_dimension: u32,

    /// Upper bound on encode attempts per compression. Default: 10.
    pub compress_max_iterations: u32,

    /// Frames examined per second while scanning for a QR code. Default: 10.
    pub qr_scan_fps: u32,

    /// Side (px) of the square scan region centred in the frame. Default: 250.
    pub qr_box_size: u32,

    /// User agent used to pick the preferred camera. Default: empty (desktop).
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_max_file_size_bytes: 5 * BYTES_PER_MB,
            compress_threshold_ratio: 0.8,
            camera_quality: 92,
            pdf_scale: 1.5,
            pdf_quality: 92,
            pdf_format: OutputFormat::Jpeg,
            compress_initial_quality: 85,
            compress_min_quality: 40,
            compress_max_dimension: 2560,
            compress_max_iterations: 10,
            qr_scan_fps: 10,
            qr_box_size: 250,
            user_agent: String::new(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Options for [`crate::pipeline::render::DocumentConverter::convert`].
    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            scale: self.pdf_scale,
            quality: self.pdf_quality,
            format: self.pdf_format,
        }
    }

    /// Options for [`crate::pipeline::compress::ImageNormalizer::compress`].
    pub fn compress_options(&self, max_size_bytes: u64) -> CompressOptions {
        CompressOptions {
            max_size_mb: max_size_bytes as f64 / BYTES_PER_MB as f64,
            initial_quality: self.compress_initial_quality,
            min_quality: self.compress_min_quality,
            max_dimension: self.compress_max_dimension,
            max_iterations: self.compress_max_iterations,
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn default_max_file_size_bytes(mut self, bytes: u64) -> Self {
        self.config.default_max_file_size_bytes = bytes;
        self
    }

    pub fn compress_threshold_ratio(mut self, ratio: f64) -> Self {
        self.config.compress_threshold_ratio = ratio.clamp(0.1, 1.0);
        self
    }

    pub fn camera_quality(mut self, q: u8) -> Self {
        self.config.camera_quality = q.clamp(1, 100);
        self
    }

    pub fn pdf_scale(mut self, scale: f32) -> Self {
        self.config.pdf_scale = scale.clamp(0.25, 4.0);
        self
    }

    pub fn pdf_quality(mut self, q: u8) -> Self {
        self.config.pdf_quality = q.clamp(1, 100);
        self
    }

    pub fn pdf_format(mut self, format: OutputFormat) -> Self {
        self.config.pdf_format = format;
        self
    }

    pub fn compress_initial_quality(mut self, q: u8) -> Self {
        self.config.compress_initial_quality = q.clamp(1, 100);
        self
    }

    pub fn compress_min_quality(mut self, q: u8) -> Self {
        self.config.compress_min_quality = q.clamp(1, 100);
        self
    }

    pub fn compress_max_dimension(mut self, px: u32) -> Self {
        self.config.compress_max_dimension = px.max(16);
        self
    }

    pub fn compress_max_iterations(mut self, n: u32) -> Self {
        self.config.compress_max_iterations = n.max(1);
        self
    }

    pub fn qr_scan_fps(mut self, fps: u32) -> Self {
        self.config.qr_scan_fps = fps.clamp(1, 60);
        self
    }

    pub fn qr_box_size(mut self, px: u32) -> Self {
        self.config.qr_box_size = px.max(50);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ProofError> {
        let c = &self.config;
        if c.default_max_file_size_bytes == 0 {
            return Err(ProofError::InvalidConfig(
                "Default max file size must be > 0".into(),
            ));
        }
        if c.compress_min_quality > c.compress_initial_quality {
            return Err(ProofError::InvalidConfig(format!(
                "Minimum compression quality ({}) exceeds initial quality ({})",
                c.compress_min_quality, c.compress_initial_quality
            )));
        }
        Ok(self.config)
    }
}

// ── Per-operation options ────────────────────────────────────────────────

/// Image encoding used for flattened PDFs and compressed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossy; honours the quality setting. (default)
    #[default]
    Jpeg,
    /// Lossless; quality is ignored.
    Png,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => crate::models::MIME_JPEG,
            OutputFormat::Png => crate::models::MIME_PNG,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Options for flattening a PDF into one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvertOptions {
    pub scale: f32,
    pub quality: u8,
    pub format: OutputFormat,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        PipelineConfig::default().convert_options()
    }
}

/// Options for compressing an image under a byte budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressOptions {
    pub max_size_mb: f64,
    pub initial_quality: u8,
    pub min_quality: u8,
    pub max_dimension: u32,
    pub max_iterations: u32,
}

impl CompressOptions {
    /// Budget in bytes.
    pub fn budget_bytes(&self) -> u64 {
        (self.max_size_mb * BYTES_PER_MB as f64) as u64
    }
}

impl Default for CompressOptions {
    fn default() -> Self {
        PipelineConfig::default().compress_options(5 * BYTES_PER_MB)
    }
}
