//! Utility functions for timestamps, encoding and field validation.

pub mod encoding;
pub mod timestamps;
pub mod validation;

pub use encoding::{base64_bytes, encode_base64};
pub use timestamps::{duration_seconds, now_utc, Timestamp};
pub use validation::{decode_base64, is_c_identifier};
