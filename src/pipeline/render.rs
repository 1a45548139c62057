//! PDF flattening: render every page and stack them into one image.
//!
//! Many backends accept only a single image per proof document, so a
//! multi-page PDF is rendered page by page and composited top to bottom
//! onto one white canvas of `(max page width, sum of page heights)`.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. The pdfium path therefore runs on Tokio's blocking
//! pool so async worker threads keep serving camera and network tasks.
//!
//! ## All or nothing
//!
//! If any page fails to render, or the final encode yields no bytes, the
//! whole conversion fails with [`ProofError::Conversion`]. A PDF missing a
//! page is never uploaded.

use crate::config::ConvertOptions;
use crate::error::ProofError;
use crate::models::DocumentFile;
use crate::pipeline::encode::{ImageCodec, ImageRsCodec};
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use pdfium_render::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

/// Page rasterisation capability.
///
/// Implemented for pdfium below; tests and other platforms supply their own.
pub trait PageRenderer {
    /// Number of pages in the loaded document.
    fn page_count(&self) -> usize;

    /// Render page `index` (0-based) at `scale` × its native size.
    fn render_page(&self, index: usize, scale: f32) -> Result<RgbaImage, String>;
}

/// Flattens PDFs into a single image file.
#[derive(Clone)]
pub struct DocumentConverter {
    codec: Arc<dyn ImageCodec>,
}

impl Default for DocumentConverter {
    fn default() -> Self {
        Self::new(Arc::new(ImageRsCodec))
    }
}

impl DocumentConverter {
    pub fn new(codec: Arc<dyn ImageCodec>) -> Self {
        Self { codec }
    }

    /// Convert a PDF file into one image using pdfium.
    ///
    /// The output keeps the input's base name with the extension of
    /// `opts.format`.
    pub async fn convert(
        &self,
        file: &DocumentFile,
        opts: ConvertOptions,
    ) -> Result<DocumentFile, ProofError> {
        self.convert_counted(file, opts).await.map(|(out, _)| out)
    }

    /// Like [`DocumentConverter::convert`], also returning the page count.
    pub async fn convert_counted(
        &self,
        file: &DocumentFile,
        opts: ConvertOptions,
    ) -> Result<(DocumentFile, usize), ProofError> {
        if !file.is_pdf() {
            return Err(ProofError::Conversion {
                page: None,
                detail: format!("expected application/pdf, got {}", file.mime_type),
            });
        }

        let input = file.clone();
        let converter = self.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&input.bytes, None)
                .map_err(|e| ProofError::Conversion {
                    page: None,
                    detail: describe_load_error(&e),
                })?;
            let renderer = PdfiumPages { document };
            let out = converter.convert_with(&renderer, &input, opts)?;
            Ok((out, renderer.page_count()))
        })
        .await
        .map_err(|e| ProofError::Internal(format!("Render task panicked: {}", e)))?
    }

    /// Convert using an arbitrary [`PageRenderer`]. Blocking.
    pub fn convert_with(
        &self,
        renderer: &dyn PageRenderer,
        file: &DocumentFile,
        opts: ConvertOptions,
    ) -> Result<DocumentFile, ProofError> {
        let combined = flatten_pages(renderer, opts.scale)?;

        let bytes = self
            .codec
            .encode(&DynamicImage::ImageRgba8(combined), opts.format, opts.quality)
            .map_err(|detail| ProofError::Conversion { page: None, detail })?;
        if bytes.is_empty() {
            return Err(ProofError::Conversion {
                page: None,
                detail: "encoder produced no data".into(),
            });
        }

        let name = file.renamed_with_extension(opts.format.extension());
        info!(
            "Converted '{}' ({} pages) → '{}' ({} bytes)",
            file.name,
            renderer.page_count(),
            name,
            bytes.len()
        );
        Ok(DocumentFile::new(name, opts.format.mime_type(), bytes))
    }
}

/// Render every page and stack them vertically over a white background.
///
/// Page order is preserved. The canvas is exactly `max(width)` wide and
/// `sum(height)` tall; narrower pages are left-aligned.
pub fn flatten_pages(renderer: &dyn PageRenderer, scale: f32) -> Result<RgbaImage, ProofError> {
    let total = renderer.page_count();
    if total == 0 {
        return Err(ProofError::Conversion {
            page: None,
            detail: "document has no pages".into(),
        });
    }

    let mut pages = Vec::with_capacity(total);
    for idx in 0..total {
        let page = renderer
            .render_page(idx, scale)
            .map_err(|detail| ProofError::Conversion {
                page: Some(idx + 1),
                detail,
            })?;
        if page.width() == 0 || page.height() == 0 {
            return Err(ProofError::Conversion {
                page: Some(idx + 1),
                detail: "rendered an empty bitmap".into(),
            });
        }
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            page.width(),
            page.height()
        );
        pages.push(page);
    }

    let width = pages.iter().map(|p| p.width()).max().unwrap_or(0);
    let height: u64 = pages.iter().map(|p| p.height() as u64).sum();
    let height = u32::try_from(height).map_err(|_| ProofError::Conversion {
        page: None,
        detail: format!("combined height {height} px is too large"),
    })?;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut y: i64 = 0;
    for page in &pages {
        imageops::overlay(&mut canvas, page, 0, y);
        y += page.height() as i64;
    }

    Ok(canvas)
}

/// A loaded pdfium document viewed as a [`PageRenderer`].
struct PdfiumPages<'a> {
    document: PdfDocument<'a>,
}

impl PageRenderer for PdfiumPages<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<RgbaImage, String> {
        let page = self
            .document
            .pages()
            .get(index as u16)
            .map_err(|e| format!("{:?}", e))?;

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("{:?}", e))?;

        Ok(bitmap.as_image().to_rgba8())
    }
}

/// Bind pdfium, preferring `PDFIUM_LIB_PATH` over the system library.
fn bind_pdfium() -> Result<Pdfium, ProofError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ProofError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

fn describe_load_error(e: &PdfiumError) -> String {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        "document is password protected".to_string()
    } else {
        format!("document is corrupt: {err_str}")
    }
}
