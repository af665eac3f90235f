use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decode an `Upload-Metadata` header: comma-separated `key base64value`
/// pairs. A key without a value is allowed and maps to an empty string.
/// Keys must not repeat and must not contain spaces or commas.
pub fn parse_upload_metadata(header: &str) -> Result<BTreeMap<String, String>, String> {
    let mut metadata = BTreeMap::new();

    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            return Err("empty metadata pair".to_string());
        }

        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or_default();
        if key.is_empty() {
            return Err("metadata key must not be empty".to_string());
        }

        let value = match parts.next() {
            Some(encoded) => {
                let raw = BASE64
                    .decode(encoded)
                    .map_err(|e| format!("metadata value for '{key}' is not valid base64: {e}"))?;
                String::from_utf8(raw)
                    .map_err(|_| format!("metadata value for '{key}' is not valid UTF-8"))?
            }
            None => String::new(),
        };

        if metadata.insert(key.to_string(), value).is_some() {
            return Err(format!("duplicate metadata key '{key}'"));
        }
    }

    Ok(metadata)
}

/// Encode a metadata map back into `Upload-Metadata` form, for echoing on
/// HEAD responses.
pub fn encode_upload_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{key} {}", BASE64.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
