//! Decoding of `data:` URLs sent by the browser for pasted or drawn images.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::CoreError;

/// Mime type assumed when the header does not name one.
pub const DEFAULT_DATA_URL_MIME: &str = "image/png";

/// Raw bytes plus the mime type extracted from a data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decode `data:<mime>[;params],<base64 payload>`.
///
/// `mime_override`, when non-empty, replaces whatever the header says.
/// Whitespace inside the payload is ignored.
pub fn decode_data_url(data_url: &str, mime_override: Option<&str>) -> Result<DecodedDataUrl, CoreError> {
    let (header, encoded) = data_url
        .split_once(',')
        .ok_or_else(|| CoreError::Validation("Invalid image data URL".into()))?;

    let mut mime_type = header
        .strip_prefix("data:")
        .map(|section| section.split(';').next().unwrap_or_default())
        .filter(|mime| !mime.is_empty())
        .unwrap_or(DEFAULT_DATA_URL_MIME)
        .to_string();
    if let Some(mime) = mime_override.filter(|m| !m.is_empty()) {
        mime_type = mime.to_string();
    }

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact.as_bytes())
        .map_err(|e| CoreError::Validation(format!("Invalid base64 image content: {e}")))?;

    Ok(DecodedDataUrl { mime_type, bytes })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn decodes_mime_and_payload() {
        let decoded = decode_data_url("data:image/webp;base64,aGVsbG8=", None).unwrap();
        assert_eq!(decoded.mime_type, "image/webp");
        assert_eq!(decoded.bytes, b"hello");
    }

    #[test]
    fn override_wins_over_header() {
        let decoded = decode_data_url("data:image/webp;base64,aGVsbG8=", Some("image/jpeg")).unwrap();
        assert_eq!(decoded.mime_type, "image/jpeg");
    }

    #[test]
    fn missing_mime_defaults_to_png() {
        let decoded = decode_data_url("data:;base64,aGVsbG8=", None).unwrap();
        assert_eq!(decoded.mime_type, "image/png");
    }

    #[test]
    fn missing_comma_is_rejected() {
        assert_matches!(decode_data_url("data:image/png;base64", None), Err(CoreError::Validation(_)));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let err = decode_data_url("data:image/png;base64,@@@", None).unwrap_err();
        assert!(err.to_string().contains("Invalid base64"));
    }
}
