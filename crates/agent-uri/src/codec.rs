// SPDX-License-Identifier: MIT OR Apache-2.0
//! Percent-encoding/decoding over the grammar's reserved/unreserved sets.

/// `unreserved = ALPHA / DIGIT / "-" / "." / "_" / "~"`
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

/// Characters a path segment may carry unescaped (`pchar` minus `/`).
fn is_path_safe(b: u8) -> bool {
    is_unreserved(b) || matches!(b, b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' | b':' | b'@')
}

/// Characters a query key/value may carry unescaped.
///
/// `&` and `=` are query delimiters (key/value and pair separators) and must
/// always be percent-encoded here even though they're safe in a path
/// segment — otherwise a decoded value containing either re-splits into the
/// wrong number of pairs on the next `parse`.
fn is_query_safe(b: u8) -> bool {
    (is_path_safe(b) && !matches!(b, b'&' | b'=')) || b == b'/' || b == b'?'
}

/// Characters a fragment may carry unescaped — identical set to query.
fn is_fragment_safe(b: u8) -> bool {
    is_query_safe(b)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-decode a byte string into a UTF-8 `String`.
///
/// Decodes every `%XX` triplet regardless of what character it represents —
/// callers re-encode reserved characters on serialization, so over-decoding
/// here is safe and keeps the decoded form canonical for comparisons.
pub fn decode(input: &str) -> Result<String, String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).copied().and_then(hex_val),
                bytes.get(i + 2).copied().and_then(hex_val),
            ) else {
                return Err(format!("invalid percent-encoding at offset {i}"));
            };
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| format!("invalid UTF-8 after decoding: {e}"))
}

fn encode_with(input: &str, safe: fn(u8) -> bool) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.as_bytes() {
        if safe(*b) {
            out.push(*b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Percent-encode a decoded path segment.
pub fn encode_path_segment(input: &str) -> String {
    encode_with(input, is_path_safe)
}

/// Percent-encode a decoded query key or value.
pub fn encode_query_part(input: &str) -> String {
    encode_with(input, is_query_safe)
}

/// Percent-encode a decoded fragment.
pub fn encode_fragment(input: &str) -> String {
    encode_with(input, is_fragment_safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_plain_ascii_is_identity() {
        assert_eq!(decode("planning").unwrap(), "planning");
    }

    #[test]
    fn decode_percent_triplet() {
        assert_eq!(decode("Paris%20Texas").unwrap(), "Paris Texas");
    }

    #[test]
    fn decode_percent_encoded_utf8() {
        assert_eq!(decode("caf%C3%A9").unwrap(), "café");
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert!(decode("bad%2").is_err());
        assert!(decode("bad%").is_err());
    }

    #[test]
    fn decode_rejects_non_hex_escape() {
        assert!(decode("bad%zz").is_err());
    }

    #[test]
    fn encode_path_segment_preserves_unreserved() {
        assert_eq!(encode_path_segment("gen-iti_1.0~a"), "gen-iti_1.0~a");
    }

    #[test]
    fn encode_path_segment_escapes_space_and_slash() {
        assert_eq!(encode_path_segment("a b"), "a%20b");
    }

    #[test]
    fn round_trip_through_encode_decode() {
        let original = "héllo wörld/segment";
        let encoded = encode_query_part(original);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_query_part_escapes_delimiters() {
        assert_eq!(encode_query_part("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn query_value_containing_ampersand_round_trips() {
        let original = "a&b";
        let encoded = encode_query_part(original);
        assert_eq!(decode(&encoded).unwrap(), original);
    }
}
