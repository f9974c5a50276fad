//! Binary-safe key encoding.
//!
//! Raw key bytes may contain `/` or anything else a node name cannot hold,
//! so every key is stored under its URL-safe, unpadded base64 form.
//! Decoding is strict (canonical trailing bits), which also means no key
//! can ever encode to the metadata node's name.

use super::error::{CodecError, TableError, TableResult};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

pub fn encode_key(raw: &[u8]) -> TableResult<String> {
    if raw.is_empty() {
        return Err(TableError::Configuration(
            "primary key must serialize to at least one byte".to_string(),
        ));
    }
    Ok(URL_SAFE_NO_PAD.encode(raw))
}

pub fn decode_key(encoded: &str) -> Result<Vec<u8>, CodecError> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CodecError::Key {
            key: encoded.to_string(),
            reason: e.to_string(),
        })
}
