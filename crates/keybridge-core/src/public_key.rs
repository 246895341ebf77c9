use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

/// Standard alphabet; encodes with padding, decodes with or without it.
pub(crate) const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Extracts the key blob from OpenSSH public key text.
///
/// The text is split at the first space; the whitespace-delimited field
/// after it is decoded as standard base64, padded or not. Anything following that field,
/// such as a comment, is ignored. Returns `None` when there is no space, no
/// field after it, or the field is not valid base64.
pub fn key_blob_from_text(text: &str) -> Option<Vec<u8>> {
    let (_algorithm, rest) = text.split_once(' ')?;
    let encoded = rest.split_whitespace().next()?;
    BASE64.decode(encoded).ok()
}
