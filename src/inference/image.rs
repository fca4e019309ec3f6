use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;

use crate::inference::task::answer::AnswerError;

/// Decodes a base64 payload into a 3 channel RGB buffer. Palette, grayscale
/// and alpha sources all end up as plain RGB.
pub fn decode_base64_image(data: &str) -> Result<RgbImage, AnswerError> {
    let bytes = STANDARD.decode(data)?;
    Ok(image::load_from_memory(&bytes)?.into_rgb8())
}
