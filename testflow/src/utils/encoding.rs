//! Base64 encoding of binary payloads in serialized requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encodes bytes as standard base64.
#[must_use]
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Serde adapter serializing `Vec<u8>` fields as a base64 string.
pub mod base64_bytes {
    use super::encode_base64;
    use crate::utils::decode_base64;
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serializes bytes as base64.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_base64(bytes))
    }

    /// Deserializes bytes from base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        decode_base64(&encoded).map_err(de::Error::custom)
    }
}
