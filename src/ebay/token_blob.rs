//! Decoder for the compressed `v^..#i^..#...#t^<payload>` token strings the
//! marketplace hands out in some developer tooling. Pure: no I/O.

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use thiserror::Error;

const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const MIN_PARTS: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenDecodeError {
    #[error("expected at least {MIN_PARTS} `#`-separated parts, got {0}")]
    TooFewParts(usize),
    #[error("seventh part must start with `t^`")]
    MissingPayload,
    #[error("payload is not valid base64: {0}")]
    Base64(String),
    #[error("payload is not gzip, zlib or deflate data")]
    Decompress,
    #[error("payload is not JSON: {0}")]
    Json(String),
    #[error("no access token in payload (keys: {0})")]
    NoAccessToken(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    pub version: String,
    pub inventory: String,
    pub format: String,
    pub permissions: String,
    pub decompressed_size: usize,
    pub has_access_token: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    pub access_token: String,
    pub metadata: TokenMetadata,
}

pub fn decode(raw: &str) -> Result<DecodedToken, TokenDecodeError> {
    let parts: Vec<&str> = raw.trim().split('#').collect();
    if parts.len() < MIN_PARTS {
        return Err(TokenDecodeError::TooFewParts(parts.len()));
    }
    let payload = parts[6]
        .strip_prefix("t^")
        .ok_or(TokenDecodeError::MissingPayload)?;
    let compressed = LENIENT
        .decode(payload)
        .map_err(|err| TokenDecodeError::Base64(err.to_string()))?;
    let text = decompress(&compressed).ok_or(TokenDecodeError::Decompress)?;
    let json: Value =
        serde_json::from_str(&text).map_err(|err| TokenDecodeError::Json(err.to_string()))?;

    let access_token = ["access_token", "token", "accessToken"]
        .iter()
        .find_map(|key| json.get(key).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            let keys = json
                .as_object()
                .map(|map| map.keys().cloned().collect::<Vec<_>>().join(","))
                .unwrap_or_default();
            TokenDecodeError::NoAccessToken(keys)
        })?
        .to_string();

    Ok(DecodedToken {
        access_token,
        metadata: TokenMetadata {
            version: parts[0].to_string(),
            inventory: parts[1].to_string(),
            format: parts[2].to_string(),
            permissions: parts[3].to_string(),
            decompressed_size: text.len(),
            has_access_token: true,
        },
    })
}

fn decompress(bytes: &[u8]) -> Option<String> {
    let attempts: [fn(&[u8]) -> std::io::Result<String>; 3] = [
        |b| read_all(GzDecoder::new(b)),
        |b| read_all(ZlibDecoder::new(b)),
        |b| read_all(DeflateDecoder::new(b)),
    ];
    attempts.iter().find_map(|attempt| attempt(bytes).ok())
}

fn read_all(mut reader: impl Read) -> std::io::Result<String> {
    let mut out = String::new();
    reader.read_to_string(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    fn token_with(payload: &[u8]) -> String {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();
        format!("v^1.1#i^1#f^0#p^3#I^3#r^0#t^{}", STANDARD.encode(compressed))
    }

    #[test]
    fn zlib_payload_yields_token_and_metadata() {
        let raw = token_with(br#"{"accessToken":"v^1.1#abc","ttl":7200}"#);
        let decoded = decode(&raw).expect("decodes");
        assert_eq!(decoded.access_token, "v^1.1#abc");
        assert_eq!(decoded.metadata.version, "v^1.1");
        assert_eq!(decoded.metadata.permissions, "p^3");
        assert!(decoded.metadata.has_access_token);
    }

    #[test]
    fn unpadded_base64_is_accepted() {
        let raw = token_with(br#"{"token":"x"}"#);
        let trimmed = raw.trim_end_matches('=');
        assert_eq!(decode(trimmed).unwrap().access_token, "x");
    }

    #[test]
    fn short_tokens_are_rejected() {
        assert_eq!(decode("v^1.1#i^1#f^0"), Err(TokenDecodeError::TooFewParts(3)));
        assert_eq!(
            decode("a#b#c#d#e#f#x^abc"),
            Err(TokenDecodeError::MissingPayload)
        );
    }

    #[test]
    fn plain_bytes_fail_to_decompress() {
        let raw = format!("a#b#c#d#e#f#t^{}", STANDARD.encode(b"not compressed at all"));
        assert_eq!(decode(&raw), Err(TokenDecodeError::Decompress));
    }

    #[test]
    fn json_without_token_lists_keys() {
        let raw = token_with(br#"{"scope":"x"}"#);
        assert_eq!(
            decode(&raw),
            Err(TokenDecodeError::NoAccessToken("scope".into()))
        );
    }
}
