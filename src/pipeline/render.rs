//! PDF previews: rasterise the first page of an uploaded PDF via pdfium.
//!
//! Only compiled with the `pdf` feature. Operators draw fields on the first
//! page and the model reads the same image, so later pages never matter.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and is CPU-bound. The render runs on the blocking pool so Tokio
//! workers keep serving the rest of the batch.

use super::encode::to_png;
use crate::error::FieldScanError;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Render page 1 of a PDF to PNG bytes, longest edge ≤ `max_pixels`.
pub async fn render_first_page(
    name: &str,
    pdf: Vec<u8>,
    max_pixels: u32,
) -> Result<Vec<u8>, FieldScanError> {
    let owned_name = name.to_string();
    tokio::task::spawn_blocking(move || render_blocking(&owned_name, &pdf, max_pixels))
        .await
        .map_err(|e| FieldScanError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind to `PDFIUM_LIB_PATH` when it names an existing file, else to the
/// system library.
fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if Path::new(&p).exists() => Pdfium::bind_to_library(&p)?,
        _ => Pdfium::bind_to_system_library()?,
    };
    Ok(Pdfium::new(bindings))
}

fn render_blocking(name: &str, pdf: &[u8], max_pixels: u32) -> Result<Vec<u8>, FieldScanError> {
    let failed = |detail: String| FieldScanError::PreviewFailed {
        name: name.to_string(),
        detail,
    };

    let pdfium = bind_pdfium().map_err(|e| failed(format!("pdfium unavailable: {e}")))?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| failed(format!("{:?}", e)))?;

    let pages = document.pages();
    let page = pages
        .get(0)
        .map_err(|_| failed("document has no pages".to_string()))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| failed(format!("{:?}", e)))?;
    let image = bitmap.as_image();
    debug!(
        "Rendered '{}' page 1 → {}x{} px",
        name,
        image.width(),
        image.height()
    );

    to_png(&image).map_err(|e| failed(e.to_string()))
}
