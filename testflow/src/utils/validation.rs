//! Field validation helpers.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static C_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("C identifier pattern is valid")
});

/// Returns true if `name` is a valid C identifier (environment variable name).
#[must_use]
pub fn is_c_identifier(name: &str) -> bool {
    C_IDENTIFIER.is_match(name)
}

/// Decodes standard base64, ignoring surrounding whitespace.
pub fn decode_base64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(value.trim())
}
