use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::DynamicImage;

// Icons are written by Android's Base64.DEFAULT encoder, which wraps lines
// and may drop padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a base64 image blob. Anything undecodable yields `None`.
pub fn decode_icon(encoded: &str) -> Option<DynamicImage> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let bytes = match LENIENT.decode(compact.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::debug!("icon is not valid base64: {e}");
            return None;
        }
    };

    match image::load_from_memory(&bytes) {
        Ok(img) => Some(img),
        Err(e) => {
            log::debug!("icon bytes are not a readable image: {e}");
            None
        }
    }
}
