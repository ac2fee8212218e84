//! Opaque pagination cursors for list endpoints.
//!
//! The cursor is a base64-encoded byte offset into the listing's ordering.
//! It carries no semantic meaning to callers; a malformed or tampered cursor
//! is treated the same as "start from the beginning" per spec.md §4.D/§8,
//! rather than surfaced as an error.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

pub fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

/// Decode a cursor, falling back to offset 0 for anything malformed.
pub fn decode_cursor(cursor: Option<&str>) -> usize {
    let Some(cursor) = cursor else {
        return 0;
    };
    URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_offset() {
        let cursor = encode_cursor(42);
        assert_eq!(decode_cursor(Some(&cursor)), 42);
    }

    #[test]
    fn malformed_cursor_resets_to_zero() {
        assert_eq!(decode_cursor(Some("not-valid-base64!!")), 0);
        assert_eq!(decode_cursor(Some("")), 0);
        assert_eq!(decode_cursor(None), 0);
    }
}
