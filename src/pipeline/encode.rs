//! Image codec: decode uploaded bytes and encode rasters at a given quality.
//!
//! The compressor and the PDF flattener never call the `image` crate
//! directly; they go through [`ImageCodec`] so a platform codec (a hardware
//! JPEG encoder, a browser canvas) can be substituted without touching the
//! budget logic.

use crate::config::OutputFormat;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Decode/encode capability used by the pipeline.
pub trait ImageCodec: Send + Sync {
    /// Decode any supported image format.
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, String>;

    /// Encode `img` as `format`. `quality` (1–100) is ignored by lossless formats.
    fn encode(&self, img: &DynamicImage, format: OutputFormat, quality: u8)
        -> Result<Vec<u8>, String>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRsCodec;

impl ImageCodec for ImageRsCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DynamicImage, String> {
        image::load_from_memory(bytes).map_err(|e| e.to_string())
    }

    fn encode(
        &self,
        img: &DynamicImage,
        format: OutputFormat,
        quality: u8,
    ) -> Result<Vec<u8>, String> {
        encode_image(img, format, quality).map_err(|e| e.to_string())
    }
}

/// Encode a raster as JPEG (at `quality`) or PNG.
///
/// JPEG has no alpha channel, so transparent pixels are flattened to RGB first.
pub fn encode_image(
    img: &DynamicImage,
    format: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
        }
        OutputFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
        }
    }
    debug!(
        "Encoded {}x{} image as {:?} q={} → {} bytes",
        img.width(),
        img.height(),
        format,
        quality,
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image_as_jpeg() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 128])));
        let bytes = encode_image(&img, OutputFormat::Jpeg, 80).expect("encode should succeed");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
    }

    #[test]
    fn encode_small_image_as_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255])));
        let bytes = encode_image(&img, OutputFormat::Png, 10).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn codec_decodes_what_it_encodes() {
        let codec = ImageRsCodec;
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(7, 3, Rgba([1, 2, 3, 255])));
        let bytes = codec.encode(&img, OutputFormat::Png, 100).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!((back.width(), back.height()), (7, 3));
    }

    #[test]
    fn codec_rejects_garbage() {
        assert!(ImageRsCodec.decode(b"not an image").is_err());
    }
}
