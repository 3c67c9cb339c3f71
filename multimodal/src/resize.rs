//! Qwen2.5-VL pixel normalization.
//!
//! The vision encoder consumes 14px patches merged 2x2, so both sides of an
//! image must be multiples of 28 and the total pixel count must stay inside
//! the window the encoder was trained on.

use crate::{
    error::{MediaConnectorError, MultiModalResult},
    media::ImageLimits,
};

/// Computes the `(height, width)` an image should be resized to.
///
/// Each side is rounded to the nearest multiple of `limits.factor` (ties to
/// even), then both are scaled together, preserving the aspect ratio, until
/// the pixel count lies in `[limits.min_pixels, limits.max_pixels]`.
pub fn smart_resize(height: u32, width: u32, limits: &ImageLimits) -> MultiModalResult<(u32, u32)> {
    if height == 0 || width == 0 {
        return Err(MediaConnectorError::Decode(format!(
            "image has zero dimension ({width}x{height})"
        )));
    }

    let h = f64::from(height);
    let w = f64::from(width);
    let ratio = h.max(w) / h.min(w);
    if ratio > limits.max_aspect_ratio {
        return Err(MediaConnectorError::AspectRatio {
            ratio,
            limit: limits.max_aspect_ratio,
        });
    }

    let factor = f64::from(limits.factor);
    let min_pixels = limits.min_pixels as f64;
    let max_pixels = limits.max_pixels as f64;

    let mut h_bar = factor.max((h / factor).round_ties_even() * factor);
    let mut w_bar = factor.max((w / factor).round_ties_even() * factor);

    if h_bar * w_bar > max_pixels {
        let beta = (h * w / max_pixels).sqrt();
        h_bar = factor.max((h / beta / factor).floor() * factor);
        w_bar = factor.max((w / beta / factor).floor() * factor);
    } else if h_bar * w_bar < min_pixels {
        let beta = (min_pixels / (h * w)).sqrt();
        h_bar = (h * beta / factor).ceil() * factor;
        w_bar = (w * beta / factor).ceil() * factor;
    }

    Ok((h_bar as u32, w_bar as u32))
}
