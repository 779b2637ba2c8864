//! Photo normalisation for uploaded report and search images.
//!
//! Accepts JPEG or PNG, scales the longest side down to the configured
//! maximum and re-encodes as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;

use crate::config::PhotoConfig;
use crate::errors::CoreError;

const ALLOWED_MIME_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Result of photo normalisation
#[derive(Debug)]
pub struct NormalizedPhoto {
    /// JPEG bytes
    pub data: Vec<u8>,
    /// Original image dimensions (width, height)
    pub original_dimensions: (u32, u32),
    /// Dimensions after resize (width, height)
    pub dimensions: (u32, u32),
    pub was_resized: bool,
}

/// Scale `(width, height)` so the longest side is at most `max_dimension`.
fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32, bool) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height, false);
    }

    let scale = (max_dimension as f64) / (width.max(height) as f64);
    let new_w = ((width as f64) * scale).round() as u32;
    let new_h = ((height as f64) * scale).round() as u32;
    (new_w.max(1), new_h.max(1), true)
}

pub fn normalize_photo(data: &[u8], config: &PhotoConfig) -> Result<NormalizedPhoto, CoreError> {
    if data.is_empty() {
        return Err(CoreError::Validation("photo is empty".to_string()));
    }
    if data.len() > config.max_bytes {
        return Err(CoreError::Validation(format!(
            "photo is {} bytes, limit is {}",
            data.len(),
            config.max_bytes
        )));
    }

    let mime = infer::get(data).map(|kind| kind.mime_type());
    if !mime.is_some_and(|mime| ALLOWED_MIME_TYPES.contains(&mime)) {
        return Err(CoreError::Validation(format!(
            "unsupported photo type {}, expected jpg, jpeg or png",
            mime.unwrap_or("unknown")
        )));
    }

    let img = image::load_from_memory(data)
        .map_err(|e| CoreError::Validation(format!("failed to decode photo: {e}")))?;

    let (orig_w, orig_h) = img.dimensions();
    let (new_w, new_h, was_resized) = fit_within(orig_w, orig_h, config.max_dimension);

    let processed = if was_resized {
        img.resize_exact(new_w, new_h, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    let rgb = processed.to_rgb8();
    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, config.jpeg_quality))
        .map_err(|e| CoreError::Internal(format!("failed to encode photo: {e}")))?;

    Ok(NormalizedPhoto {
        data: jpeg,
        original_dimensions: (orig_w, orig_h),
        dimensions: rgb.dimensions(),
        was_resized,
    })
}
