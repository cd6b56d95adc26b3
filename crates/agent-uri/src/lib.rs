// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tokenizer, parser, normalizer, and serializer for `agent://` and
//! `agent+<transport>://` URIs.
//!
//! ```text
//! agent-uri = "agent" [ "+" transport ] "://" authority [ "/" path ] [ "?" query ] [ "#" fragment ]
//! transport = 1*( ALPHA / DIGIT / "-" )
//! authority = [ userinfo "@" ] host [ ":" port ]
//! ```
//!
//! Hosts beginning with `did:` disable port parsing: the full remainder up
//! to the first `/`, `?`, or `#` is the host, colons included.
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;

use std::fmt;

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

/// Grammar violation encountered while parsing an agent URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid agent URI at byte {position}: {reason}")]
pub struct ParseError {
    /// Byte offset of the first offending character.
    pub position: usize,
    /// Human-readable description of the violation.
    pub reason: String,
}

impl ParseError {
    fn at(position: usize, reason: impl Into<String>) -> Self {
        Self {
            position,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// QueryValue
// ---------------------------------------------------------------------------

/// The value half of a query parameter.
///
/// Distinguishes a bare key (`?flag`) from a key with an explicit, possibly
/// empty, value (`?flag=`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    /// `?key` with no `=` at all.
    Present,
    /// `?key=value` (value may be the empty string).
    Value(String),
}

// ---------------------------------------------------------------------------
// AgentUri
// ---------------------------------------------------------------------------

/// An immutable, parsed `agent://` URI.
///
/// Values are produced only by [`parse`] or the `with_*` builder methods;
/// nothing here is ever mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentUri {
    transport: Option<String>,
    userinfo: Option<String>,
    host: String,
    port: Option<u16>,
    path_segments: Vec<String>,
    query: Vec<(String, QueryValue)>,
    fragment: Option<String>,
}

impl AgentUri {
    /// Optional transport tag (the token after `agent+`).
    pub fn transport(&self) -> Option<&str> {
        self.transport.as_deref()
    }

    /// Optional userinfo component.
    pub fn userinfo(&self) -> Option<&str> {
        self.userinfo.as_deref()
    }

    /// The host component — never empty (invariant I3).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Optional port, always in `1..=65535` when present.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Ordered, percent-decoded path segments. Empty means no path.
    pub fn path_segments(&self) -> &[String] {
        &self.path_segments
    }

    /// Ordered query entries; keys may repeat.
    pub fn query(&self) -> &[(String, QueryValue)] {
        &self.query
    }

    /// Look up the first value for `key`, if present.
    pub fn query_get(&self, key: &str) -> Option<&QueryValue> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Optional decoded fragment.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    /// Whether the host is a `did:` opaque identifier (port parsing was
    /// disabled for it).
    pub fn is_did_host(&self) -> bool {
        self.host.starts_with("did:")
    }

    // -- builder operations (return new values) -----------------------

    /// Return a copy with the path replaced.
    #[must_use]
    pub fn with_path(&self, segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut next = self.clone();
        next.path_segments = segments.into_iter().map(Into::into).collect();
        next
    }

    /// Return a copy with a query parameter appended (repeats are allowed).
    #[must_use]
    pub fn with_query_param(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.query.push((key.into(), QueryValue::Value(value.into())));
        next
    }

    /// Return a copy with a bare (no `=`) query key appended.
    #[must_use]
    pub fn with_query_flag(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.query.push((key.into(), QueryValue::Present));
        next
    }

    /// Return a copy with the fragment replaced.
    #[must_use]
    pub fn with_fragment(&self, fragment: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.fragment = Some(fragment.into());
        next
    }

    /// Return a copy with the fragment removed.
    #[must_use]
    pub fn without_fragment(&self) -> Self {
        let mut next = self.clone();
        next.fragment = None;
        next
    }

    /// Return a copy with the transport tag replaced.
    #[must_use]
    pub fn with_transport(&self, transport: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.transport = Some(transport.into());
        next
    }
}

impl fmt::Display for AgentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize(self))
    }
}

// ---------------------------------------------------------------------------
// is_valid
// ---------------------------------------------------------------------------

/// Check whether `input` parses as a conforming agent URI. Never fails.
pub fn is_valid(input: &str) -> bool {
    parse(input).is_ok()
}

// ---------------------------------------------------------------------------
// parse
// ---------------------------------------------------------------------------

fn is_transport_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

/// Parse an agent URI string into an [`AgentUri`].
pub fn parse(input: &str) -> Result<AgentUri, ParseError> {
    let bytes = input.as_bytes();

    let colon = input
        .find(':')
        .ok_or_else(|| ParseError::at(input.len(), "missing ':' after scheme"))?;

    let scheme_part = &input[..colon];
    let (scheme_literal, transport) = match scheme_part.split_once('+') {
        Some((s, t)) => (s, Some(t)),
        None => (scheme_part, None),
    };
    if !scheme_literal.eq_ignore_ascii_case("agent") {
        return Err(ParseError::at(0, "scheme must be 'agent'"));
    }
    if let Some(t) = transport {
        if t.is_empty() || !t.bytes().all(is_transport_char) {
            return Err(ParseError::at(
                scheme_literal.len() + 1,
                "transport tag must be alphanumeric/dash",
            ));
        }
    }

    if !input[colon + 1..].starts_with("//") {
        return Err(ParseError::at(colon + 1, "expected '//' after scheme"));
    }
    let rest = &input[colon + 3..];
    let rest_offset = colon + 3;

    let authority_end = rest
        .find(['/', '?', '#'])
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let after_authority = &rest[authority_end..];
    let after_authority_offset = rest_offset + authority_end;

    if authority.is_empty() {
        return Err(ParseError::at(rest_offset, "host must not be empty"));
    }

    let (userinfo_raw, host_port) = match authority.find('@') {
        Some(idx) => (Some(&authority[..idx]), &authority[idx + 1..]),
        None => (None, authority),
    };
    if host_port.is_empty() {
        return Err(ParseError::at(rest_offset, "host must not be empty"));
    }

    let userinfo = userinfo_raw
        .map(codec::decode)
        .transpose()
        .map_err(|e| ParseError::at(rest_offset, e))?;

    let (host, port) = parse_host_port(host_port, rest_offset)?;

    let mut pos = after_authority_offset;
    let mut remainder = after_authority;

    let mut path_segments = Vec::new();
    if let Some(stripped) = remainder.strip_prefix('/') {
        let path_end = stripped.find(['?', '#']).unwrap_or(stripped.len());
        let raw_path = &stripped[..path_end];
        if !raw_path.is_empty() {
            for seg in raw_path.split('/') {
                path_segments
                    .push(codec::decode(seg).map_err(|e| ParseError::at(pos, e))?);
            }
        }
        pos += 1 + path_end;
        remainder = &stripped[path_end..];
    }

    let mut query = Vec::new();
    if let Some(stripped) = remainder.strip_prefix('?') {
        let query_end = stripped.find('#').unwrap_or(stripped.len());
        let raw_query = &stripped[..query_end];
        if !raw_query.is_empty() {
            for pair in raw_query.split('&') {
                if pair.is_empty() {
                    continue;
                }
                match pair.split_once('=') {
                    Some((k, v)) => {
                        let key = codec::decode(k).map_err(|e| ParseError::at(pos, e))?;
                        let val = codec::decode(v).map_err(|e| ParseError::at(pos, e))?;
                        query.push((key, QueryValue::Value(val)));
                    }
                    None => {
                        let key = codec::decode(pair).map_err(|e| ParseError::at(pos, e))?;
                        query.push((key, QueryValue::Present));
                    }
                }
            }
        }
        pos += 1 + query_end;
        remainder = &stripped[query_end..];
    }

    let fragment = remainder.strip_prefix('#').map(|raw| {
        let _ = pos; // fragment runs to end of string; no further offsets needed.
        codec::decode(raw)
    });
    let fragment = match fragment {
        Some(r) => Some(r.map_err(|e| ParseError::at(pos, e))?),
        None => None,
    };

    let _ = bytes; // silence unused when all slicing above is str-based

    Ok(AgentUri {
        transport: transport.map(|t| t.to_ascii_lowercase()),
        userinfo,
        host,
        port,
        path_segments,
        query,
        fragment,
    })
}

fn parse_host_port(host_port: &str, offset: usize) -> Result<(String, Option<u16>), ParseError> {
    if host_port.len() >= 4 && host_port[..4].eq_ignore_ascii_case("did:") {
        return Ok((host_port.to_string(), None));
    }

    if let Some(rest) = host_port.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| ParseError::at(offset, "unterminated IPv6 literal"))?;
        let literal = format!("[{}]", &rest[..close]);
        let after = &rest[close + 1..];
        let port = if let Some(p) = after.strip_prefix(':') {
            Some(parse_port(p, offset)?)
        } else if after.is_empty() {
            None
        } else {
            return Err(ParseError::at(offset, "unexpected characters after IPv6 literal"));
        };
        return Ok((literal, port));
    }

    match host_port.rsplit_once(':') {
        Some((h, p)) if !h.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) && !p.is_empty() => {
            let decoded_host =
                codec::decode(h).map_err(|e| ParseError::at(offset, e))?;
            Ok((decoded_host.to_ascii_lowercase(), Some(parse_port(p, offset)?)))
        }
        _ => {
            let decoded_host =
                codec::decode(host_port).map_err(|e| ParseError::at(offset, e))?;
            Ok((decoded_host.to_ascii_lowercase(), None))
        }
    }
}

fn parse_port(raw: &str, offset: usize) -> Result<u16, ParseError> {
    let value: u32 = raw
        .parse()
        .map_err(|_| ParseError::at(offset, "port is not numeric"))?;
    if value == 0 || value > 65535 {
        return Err(ParseError::at(offset, "port out of range 1..65535"));
    }
    Ok(value as u16)
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

/// The default port for a transport tag, per the endpoint-synthesis scheme
/// table (§4.3) — a port equal to its tag's default carries no information
/// and normalization drops it.
fn default_port_for(transport: Option<&str>) -> Option<u16> {
    match transport {
        Some("https") | Some("wss") => Some(443),
        Some("http") | Some("ws") => Some(80),
        _ => None,
    }
}

/// Normalize an [`AgentUri`]: lowercase scheme/transport/DNS-host, remove a
/// port equal to its transport's default, drop an empty fragment, and leave
/// everything else byte-stable for [`serialize`].
///
/// Idempotent: `normalize(normalize(u)) == normalize(u)` (P2).
pub fn normalize(uri: &AgentUri) -> AgentUri {
    let mut next = uri.clone();
    if let Some(t) = &next.transport {
        next.transport = Some(t.to_ascii_lowercase());
    }
    if !next.host.starts_with("did:") && !next.host.starts_with('[') {
        next.host = next.host.to_ascii_lowercase();
    }
    if next.port == default_port_for(next.transport.as_deref()) {
        next.port = None;
    }
    if matches!(&next.fragment, Some(f) if f.is_empty()) {
        next.fragment = None;
    }
    next
}

// ---------------------------------------------------------------------------
// serialize
// ---------------------------------------------------------------------------

/// Serialize an [`AgentUri`] back to its string form.
///
/// For any `u` that has passed through [`normalize`],
/// `parse(serialize(u)) == u` (P1, combined with [`normalize`]'s
/// idempotence).
pub fn serialize(uri: &AgentUri) -> String {
    let mut out = String::from("agent");
    if let Some(t) = &uri.transport {
        out.push('+');
        out.push_str(t);
    }
    out.push_str("://");
    if let Some(ui) = &uri.userinfo {
        out.push_str(&codec::encode_path_segment(ui));
        out.push('@');
    }
    out.push_str(&uri.host);
    if let Some(p) = uri.port {
        out.push(':');
        out.push_str(&p.to_string());
    }
    for seg in &uri.path_segments {
        out.push('/');
        out.push_str(&codec::encode_path_segment(seg));
    }
    if !uri.query.is_empty() {
        out.push('?');
        for (i, (k, v)) in uri.query.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(&codec::encode_query_part(k));
            if let QueryValue::Value(val) = v {
                out.push('=');
                out.push_str(&codec::encode_query_part(val));
            }
        }
    }
    if let Some(f) = &uri.fragment {
        if !f.is_empty() {
            out.push('#');
            out.push_str(&codec::encode_fragment(f));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Scenario 1 from the spec's end-to-end fixture list -------------

    #[test]
    fn scenario_1_parse_and_round_trip() {
        let uri = parse("agent://acme.ai/planning/gen-iti?city=Paris&days=3#section").unwrap();
        assert_eq!(uri.transport(), None);
        assert_eq!(uri.host(), "acme.ai");
        assert_eq!(uri.path_segments(), ["planning", "gen-iti"]);
        assert_eq!(
            uri.query_get("city"),
            Some(&QueryValue::Value("Paris".into()))
        );
        assert_eq!(
            uri.query_get("days"),
            Some(&QueryValue::Value("3".into()))
        );
        assert_eq!(uri.fragment(), Some("section"));

        let normalized = normalize(&uri);
        assert_eq!(
            serialize(&normalized),
            "agent://acme.ai/planning/gen-iti?city=Paris&days=3#section"
        );
    }

    // -- Scenario 2 -------------------------------------------------------

    #[test]
    fn scenario_2_explicit_transport_with_port() {
        let uri = parse("agent+wss://planner.example.com:8443/chat").unwrap();
        assert_eq!(uri.transport(), Some("wss"));
        assert_eq!(uri.host(), "planner.example.com");
        assert_eq!(uri.port(), Some(8443));
        assert_eq!(uri.path_segments(), ["chat"]);
    }

    #[test]
    fn normalize_drops_default_port_for_transport() {
        let uri = parse("agent+https://acme.ai:443/x").unwrap();
        assert_eq!(serialize(&normalize(&uri)), "agent+https://acme.ai/x");
    }

    #[test]
    fn normalize_keeps_non_default_port() {
        let uri = parse("agent+https://acme.ai:8443/x").unwrap();
        assert_eq!(serialize(&normalize(&uri)), "agent+https://acme.ai:8443/x");
    }

    // -- Grammar rejections ------------------------------------------------

    #[test]
    fn rejects_empty_host() {
        assert!(parse("agent:///path").is_err());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(parse("http://acme.ai").is_err());
    }

    #[test]
    fn rejects_bare_scheme_without_slashes() {
        assert!(parse("agent:acme.ai").is_err());
    }

    #[test]
    fn rejects_port_zero() {
        assert!(parse("agent://acme.ai:0").is_err());
    }

    #[test]
    fn rejects_port_out_of_range() {
        assert!(parse("agent://acme.ai:65536").is_err());
    }

    #[test]
    fn rejects_non_grammar_transport_tag() {
        assert!(parse("agent+w s://acme.ai").is_err());
    }

    #[test]
    fn parse_error_position_points_at_offending_byte() {
        let err = parse("http://acme.ai").unwrap_err();
        assert_eq!(err.position, 0);
    }

    // -- Boundary behaviors --------------------------------------------

    #[test]
    fn accepts_port_boundaries() {
        assert!(parse("agent://acme.ai:1").is_ok());
        assert!(parse("agent://acme.ai:65535").is_ok());
    }

    #[test]
    fn accepts_empty_path() {
        let uri = parse("agent://acme.ai").unwrap();
        assert!(uri.path_segments().is_empty());
    }

    #[test]
    fn accepts_path_with_single_slash() {
        let uri = parse("agent://acme.ai/").unwrap();
        assert!(uri.path_segments().is_empty());
    }

    #[test]
    fn accepts_query_key_with_no_value() {
        let uri = parse("agent://acme.ai?flag").unwrap();
        assert_eq!(uri.query_get("flag"), Some(&QueryValue::Present));
    }

    #[test]
    fn accepts_query_key_with_equals_and_empty_value() {
        let uri = parse("agent://acme.ai?flag=").unwrap();
        assert_eq!(uri.query_get("flag"), Some(&QueryValue::Value(String::new())));
    }

    #[test]
    fn present_and_empty_value_are_distinguishable() {
        assert_ne!(QueryValue::Present, QueryValue::Value(String::new()));
    }

    #[test]
    fn repeated_query_keys_preserve_insertion_order() {
        let uri = parse("agent://acme.ai?tag=a&tag=b&tag=c").unwrap();
        let values: Vec<_> = uri
            .query()
            .iter()
            .filter(|(k, _)| k == "tag")
            .map(|(_, v)| v.clone())
            .collect();
        assert_eq!(
            values,
            vec![
                QueryValue::Value("a".into()),
                QueryValue::Value("b".into()),
                QueryValue::Value("c".into()),
            ]
        );
    }

    #[test]
    fn did_hosts_do_not_split_on_colon() {
        let uri = parse("agent://did:example:123456/profile").unwrap();
        assert_eq!(uri.host(), "did:example:123456");
        assert_eq!(uri.port(), None);
        assert!(uri.is_did_host());
        assert_eq!(uri.path_segments(), ["profile"]);
    }

    #[test]
    fn ipv6_literal_parses() {
        let uri = parse("agent://[::1]:9000/chat").unwrap();
        assert_eq!(uri.host(), "[::1]");
        assert_eq!(uri.port(), Some(9000));
    }

    #[test]
    fn percent_encoded_reserved_chars_round_trip() {
        let uri = parse("agent://acme.ai/a%2Fb").unwrap();
        assert_eq!(uri.path_segments(), ["a/b"]);
        let normalized = normalize(&uri);
        assert_eq!(serialize(&normalized), "agent://acme.ai/a%2Fb");
    }

    // -- normalize idempotence (P2) --------------------------------------

    #[test]
    fn normalize_is_idempotent() {
        let uri = parse("AGENT+WSS://Acme.AI:443/Chat#").unwrap();
        let once = normalize(&uri);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_lowercases_scheme_transport_and_host() {
        let uri = parse("AGENT+WSS://Planner.Example.COM:8443/Chat").unwrap();
        let n = normalize(&uri);
        assert_eq!(n.transport(), Some("wss"));
        assert_eq!(n.host(), "planner.example.com");
    }

    #[test]
    fn normalize_drops_empty_fragment() {
        let uri = parse("agent://acme.ai#").unwrap();
        let n = normalize(&uri);
        assert_eq!(n.fragment(), None);
        assert_eq!(serialize(&n), "agent://acme.ai");
    }

    #[test]
    fn normalize_does_not_lowercase_did_host() {
        let uri = parse("agent://did:example:ABC123").unwrap();
        let n = normalize(&uri);
        assert_eq!(n.host(), "did:example:ABC123");
    }

    // -- is_valid ----------------------------------------------------------

    #[test]
    fn is_valid_never_panics_on_garbage() {
        assert!(!is_valid(""));
        assert!(!is_valid("not a uri"));
        assert!(is_valid("agent://acme.ai"));
    }

    // -- builder operations ------------------------------------------------

    #[test]
    fn builder_operations_return_new_values() {
        let base = parse("agent://acme.ai").unwrap();
        let with_path = base.with_path(["a", "b"]);
        assert!(base.path_segments().is_empty());
        assert_eq!(with_path.path_segments(), ["a", "b"]);

        let with_query = with_path.with_query_param("k", "v");
        assert!(with_path.query().is_empty());
        assert_eq!(with_query.query_get("k"), Some(&QueryValue::Value("v".into())));

        let with_frag = with_query.with_fragment("top");
        assert_eq!(with_frag.fragment(), Some("top"));
        let without_frag = with_frag.without_fragment();
        assert_eq!(without_frag.fragment(), None);
    }

    #[test]
    fn display_matches_serialize() {
        let uri = parse("agent://acme.ai/x").unwrap();
        assert_eq!(uri.to_string(), serialize(&uri));
    }

    // -- proptest: round-trip over a constrained valid grammar subset ----

    proptest::proptest! {
        #[test]
        fn prop_round_trip_host_and_single_segment(
            host in "[a-z]{2,10}\\.[a-z]{2,6}",
            seg in "[a-z]{1,10}",
        ) {
            let s = format!("agent://{host}/{seg}");
            let parsed = parse(&s).unwrap();
            let normalized = normalize(&parsed);
            let reserialized = serialize(&normalized);
            let reparsed = parse(&reserialized).unwrap();
            let renormalized = normalize(&reparsed);
            proptest::prop_assert_eq!(normalized, renormalized);
        }

        #[test]
        fn prop_normalize_is_idempotent(
            host in "[A-Za-z]{2,10}\\.[a-z]{2,6}",
        ) {
            let s = format!("agent://{host}");
            let parsed = parse(&s).unwrap();
            let once = normalize(&parsed);
            let twice = normalize(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
