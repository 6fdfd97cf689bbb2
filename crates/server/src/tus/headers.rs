//! tus wire-contract constants and the `Upload-Metadata` codec (§4.C, §6).

use std::collections::BTreeMap;

use base64::Engine;

use crate::error::AppError;

pub const TUS_RESUMABLE: &str = "Tus-Resumable";
pub const TUS_VERSION: &str = "Tus-Version";
pub const TUS_EXTENSION: &str = "Tus-Extension";
pub const TUS_MAX_SIZE: &str = "Tus-Max-Size";
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const UPLOAD_LENGTH: &str = "Upload-Length";
pub const UPLOAD_DEFER_LENGTH: &str = "Upload-Defer-Length";
pub const UPLOAD_METADATA: &str = "Upload-Metadata";
pub const UPLOAD_EXPIRES: &str = "Upload-Expires";

pub const TUS_VERSION_VALUE: &str = "1.0.0";
pub const TUS_EXTENSIONS: &str = "creation,creation-defer-length,creation-with-upload,expiration,termination";

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Encode a metadata map the way `Upload-Metadata` expects: comma-separated
/// `key base64(value)` pairs.
pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(k, v)| format!("{k} {}", B64.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse `Upload-Metadata`: comma-separated entries, each `key[<sp>base64value]`. Entries
/// without a value map to the empty string.
pub fn decode_metadata(header_value: &str) -> Result<BTreeMap<String, String>, AppError> {
    let mut map = BTreeMap::new();
    for entry in header_value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = entry.splitn(2, ' ');
        let key = parts.next().unwrap_or_default().to_owned();
        if key.is_empty() {
            return Err(AppError::InvalidRequest(format!("empty metadata key in {header_value:?}")));
        }
        let value = match parts.next() {
            Some(encoded) => {
                let decoded = B64
                    .decode(encoded)
                    .map_err(|e| AppError::InvalidRequest(format!("bad base64 for metadata key {key:?}: {e}")))?;
                String::from_utf8(decoded)
                    .map_err(|e| AppError::InvalidRequest(format!("non-utf8 metadata value for {key:?}: {e}")))?
            },
            None => String::new(),
        };
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_metadata() {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_owned(), "test.txt".to_owned());
        metadata.insert("flag".to_owned(), String::new());
        let encoded = encode_metadata(&metadata);
        let decoded = decode_metadata(&encoded).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn decodes_literal_example() {
        let decoded = decode_metadata("filename dGVzdC50eHQ=").unwrap();
        assert_eq!(decoded.get("filename"), Some(&"test.txt".to_owned()));
    }

    #[test]
    fn entry_without_value_is_empty_string() {
        let decoded = decode_metadata("flag").unwrap();
        assert_eq!(decoded.get("flag"), Some(&String::new()));
    }
}
