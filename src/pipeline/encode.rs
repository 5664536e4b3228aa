//! Image encoding: preview bytes → capped PNG → base64 `ImageData`.
//!
//! VLM APIs accept images as base64 data-URIs embedded in the JSON request
//! body. Every preview is decoded, shrunk so its longest edge fits
//! `max_pixels`, and re-encoded as PNG: lossless, so small print survives,
//! and uniform, so collaborators only ever see one format.
//!
//! Decoding a 12-megapixel photo takes long enough to stall a Tokio worker,
//! so the work runs in `spawn_blocking`.

use crate::error::StageError;
use crate::queue::Preview;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Prepare a preview for a VLM request.
pub async fn encode_preview(preview: &Preview, max_pixels: u32) -> Result<ImageData, StageError> {
    let preview = preview.clone();
    tokio::task::spawn_blocking(move || encode_blocking(preview.bytes(), max_pixels))
        .await
        .map_err(|e| StageError::Encode {
            detail: format!("encode task panicked: {e}"),
        })?
}

fn encode_blocking(bytes: &[u8], max_pixels: u32) -> Result<ImageData, StageError> {
    let img = image::load_from_memory(bytes).map_err(|e| StageError::Encode {
        detail: e.to_string(),
    })?;
    let img = cap_size(img, max_pixels);
    let png = to_png(&img).map_err(|e| StageError::Encode {
        detail: e.to_string(),
    })?;

    let b64 = STANDARD.encode(&png);
    debug!(
        "Encoded {}x{} preview → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Shrink so the longest edge is at most `max_pixels`, keeping aspect ratio.
fn cap_size(img: DynamicImage, max_pixels: u32) -> DynamicImage {
    if img.width() <= max_pixels && img.height() <= max_pixels {
        img
    } else {
        img.resize(max_pixels, max_pixels, FilterType::Triangle)
    }
}

/// Encode an image as PNG bytes.
pub fn to_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_preview(w: u32, h: u32) -> Preview {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])));
        Preview::from_bytes(to_png(&img).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn encode_small_image() {
        let data = encode_preview(&png_preview(10, 10), 2000)
            .await
            .expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }

    #[tokio::test]
    async fn large_image_is_capped() {
        let data = encode_preview(&png_preview(400, 100), 200).await.unwrap();
        let decoded = STANDARD.decode(&data.data).unwrap();
        let img = image::load_from_memory(&decoded).unwrap();
        assert_eq!(img.width(), 200);
        assert_eq!(img.height(), 50);
    }

    #[tokio::test]
    async fn corrupt_bytes_are_a_stage_error() {
        // Sniffs as PNG but has no image data behind the signature.
        let preview = crate::queue::tests::fake_preview();
        let err = encode_preview(&preview, 2000).await.unwrap_err();
        assert!(matches!(err, StageError::Encode { .. }));
    }
}
