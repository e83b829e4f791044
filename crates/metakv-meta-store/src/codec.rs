//! Empty-value placeholder codec
//!
//! Backends reject zero-length values, so a logical empty value is stored
//! as a reserved placeholder and mapped back to empty on read. Callers may
//! never write the placeholder themselves.

use metakv_common::{Error, Result};
use std::borrow::Cow;

/// Reserved value stored in place of a logical empty value
pub const EMPTY_VALUE_STRING: &str = "__metakv_empty_value_placeholder__";

const EMPTY_VALUE: &[u8] = EMPTY_VALUE_STRING.as_bytes();

/// Encode a value for the backend.
///
/// Fails with `InvalidValue` if the caller passes the placeholder itself.
pub fn encode<'a>(key: &str, value: &'a [u8]) -> Result<Cow<'a, [u8]>> {
    if value == EMPTY_VALUE {
        return Err(Error::InvalidValue {
            key: key.to_string(),
            reason: "value is the reserved empty-value placeholder".to_string(),
        });
    }
    if value.is_empty() {
        return Ok(Cow::Borrowed(EMPTY_VALUE));
    }
    Ok(Cow::Borrowed(value))
}

/// Decode a value read from the backend.
#[must_use]
pub fn decode(value: Vec<u8>) -> Vec<u8> {
    if value == EMPTY_VALUE {
        Vec::new()
    } else {
        value
    }
}

/// Decode a value and require it to be UTF-8.
pub fn decode_string(key: &str, value: Vec<u8>) -> Result<String> {
    String::from_utf8(decode(value)).map_err(|_| Error::InvalidUtf8 {
        key: key.to_string(),
    })
}
