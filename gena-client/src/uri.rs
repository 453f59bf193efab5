//! URI parsing, relative resolution and percent-unescaping.
//!
//! Covers exactly what the eventing engine needs: absolute HTTP event
//! URLs, callback-URL resolution and the header/escaping helpers. Host
//! names are resolved eagerly so the engine can pick a local interface for
//! the destination before any request is made.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};

use crate::error::{GenaError, Result};

/// Whether the URI carried a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UriKind {
    Absolute,
    #[default]
    Relative,
}

/// Shape of the path component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathKind {
    /// Path beginning with `/`
    AbsPath,
    /// Path not beginning with `/`
    #[default]
    RelPath,
    /// Everything after the scheme of a non-hierarchical URI
    OpaquePart,
}

/// Authority component: the literal `host[:port]` text plus the resolved
/// socket address. Port defaults to 80 when absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostPort {
    pub text: String,
    pub addr: Option<SocketAddr>,
}

/// A parsed URI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Uri {
    pub scheme: String,
    pub kind: UriKind,
    pub path_kind: PathKind,
    pub hostport: HostPort,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

/// Parse a scheme at the start of `input`: an alphabetic character
/// followed by alphanumerics, `+`, `-` or `.`, terminated by `:`.
/// Returns the scheme length, or 0 when there is none.
fn parse_scheme(input: &str) -> usize {
    let bytes = input.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return 0;
    }
    let Some(colon) = input.find(':') else {
        return 0;
    };
    for &b in &bytes[..colon] {
        if !(b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.') {
            return 0;
        }
    }
    colon
}

/// Parse `host[:port]` at the start of `input`.
///
/// Accepts a bracketed IPv6 literal, a dotted IPv4 literal, or a host name
/// which is resolved through the name service (the first IPv4 or IPv6
/// result is kept). Returns the parsed authority and the number of bytes
/// consumed.
fn parse_hostport(input: &str) -> Result<(HostPort, usize)> {
    let invalid = || GenaError::InvalidUrl(input.to_string());
    let bytes = input.as_bytes();

    if bytes.first() == Some(&b'[') {
        // IPv6 literals are enclosed in square brackets
        let close = input.find(']').ok_or_else(invalid)?;
        let host = &input[1..close];
        let mut consumed = close + 1;
        let port = if bytes.get(consumed) == Some(&b':') {
            consumed += 1;
            let digits_start = consumed;
            while bytes.get(consumed).is_some_and(u8::is_ascii_digit) {
                consumed += 1;
            }
            let port: u16 = input[digits_start..consumed].parse().map_err(|_| invalid())?;
            if port == 0 {
                return Err(invalid());
            }
            port
        } else {
            80
        };
        let addr: Ipv6Addr = host.parse().map_err(|_| invalid())?;
        return Ok((
            HostPort {
                text: input[..consumed].to_string(),
                addr: Some(SocketAddr::V6(SocketAddrV6::new(addr, port, 0, 0))),
            },
            consumed,
        ));
    }

    // IPv4 literal or host name
    let mut end = 0;
    let mut last_dot = None;
    while let Some(&b) = bytes.get(end) {
        if !(b.is_ascii_alphanumeric() || b == b'.' || b == b'-') {
            break;
        }
        if b == b'.' {
            last_dot = Some(end);
        }
        end += 1;
    }
    if end == 0 {
        return Err(invalid());
    }
    let host = &input[..end];

    let has_port = bytes.get(end) == Some(&b':');
    let mut consumed = end;
    let port = if has_port {
        consumed += 1;
        let digits_start = consumed;
        while bytes.get(consumed).is_some_and(u8::is_ascii_digit) {
            consumed += 1;
        }
        let port: u16 = input[digits_start..consumed].parse().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        port
    } else {
        80
    };

    let looks_numeric = last_dot
        .and_then(|dot| bytes.get(dot + 1))
        .is_some_and(u8::is_ascii_digit);
    let addr = if looks_numeric {
        let v4: Ipv4Addr = host.parse().map_err(|_| invalid())?;
        SocketAddr::V4(SocketAddrV4::new(v4, port))
    } else {
        (host, port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)?
    };

    Ok((
        HostPort {
            text: input[..consumed].to_string(),
            addr: Some(addr),
        },
        consumed,
    ))
}

/// Parse a URI into its components.
pub fn parse_uri(input: &str) -> Result<Uri> {
    let mut out = Uri::default();

    let scheme_len = parse_scheme(input);
    let mut cursor = if scheme_len > 0 {
        out.scheme = input[..scheme_len].to_string();
        out.kind = UriKind::Absolute;
        out.path_kind = PathKind::OpaquePart;
        scheme_len + 1 // skip ':'
    } else {
        out.kind = UriKind::Relative;
        out.path_kind = PathKind::RelPath;
        0
    };

    if input[cursor..].starts_with("//") {
        cursor += 2;
        let (hostport, consumed) = parse_hostport(&input[cursor..])?;
        out.hostport = hostport;
        cursor += consumed;
    }

    let rest = &input[cursor..];
    let question = rest.find('?');
    let hash = rest.find('#');
    match (question, hash) {
        (None, None) => out.path = rest.to_string(),
        (Some(q), None) => {
            out.path = rest[..q].to_string();
            out.query = rest[q + 1..].to_string();
        }
        (None, Some(h)) => {
            out.path = rest[..h].to_string();
            out.fragment = rest[h + 1..].to_string();
        }
        (Some(q), Some(h)) if h < q => {
            // a '?' inside the fragment is fragment text
            out.path = rest[..h].to_string();
            out.fragment = rest[h + 1..].to_string();
        }
        (Some(q), Some(h)) => {
            out.path = rest[..q].to_string();
            out.query = rest[q + 1..h].to_string();
            out.fragment = rest[h + 1..].to_string();
        }
    }

    if out.path.starts_with('/') {
        out.path_kind = PathKind::AbsPath;
    }
    Ok(out)
}

/// Reassemble a parsed URI into URL form.
pub fn as_url_string(uri: &Uri) -> String {
    let mut out = String::new();
    if !uri.scheme.is_empty() {
        out.push_str(&uri.scheme);
        out.push(':');
    }
    if !uri.hostport.text.is_empty() {
        out.push_str("//");
        out.push_str(&uri.hostport.text);
    }
    out.push_str(&uri.path);
    if !uri.query.is_empty() {
        out.push('?');
        out.push_str(&uri.query);
    }
    if !uri.fragment.is_empty() {
        out.push('#');
        out.push_str(&uri.fragment);
    }
    out
}

/// Normalize `.` and `..` segments out of a path.
///
/// Returns the empty string when `..` would climb past the root.
pub fn remove_dots(input: &str) -> String {
    normalize_segments(input).unwrap_or_default()
}

/// Like [`remove_dots`] but reports underflow as `None` so callers can
/// tell it apart from a path that legitimately normalizes to nothing.
fn normalize_segments(input: &str) -> Option<String> {
    if input.is_empty() {
        return Some(String::new());
    }
    let is_abs = input.starts_with('/');
    let end_slash = input.ends_with('/');
    let bytes = input.as_bytes();

    let mut segments: Vec<&str> = Vec::new();
    let mut pos = Some(0usize);
    while let Some(p) = pos {
        let elt_end = input[p..]
            .find(['/', '?'])
            .map(|offset| offset + p)
            // a query terminates segment splitting; the remainder is one element
            .filter(|&e| bytes[e] != b'?');
        if elt_end == Some(p) {
            pos = Some(p + 1);
            continue;
        }
        let elt = match elt_end {
            Some(e) => &input[p..e],
            None => &input[p..],
        };
        if elt.is_empty() || elt == "." {
            // nothing: "//" and "/./" collapse
        } else if elt == ".." {
            if segments.is_empty() {
                return None;
            }
            segments.pop();
        } else {
            segments.push(elt);
        }
        pos = elt_end;
    }

    let mut out = String::from(if is_abs { "/" } else { "" });
    for elt in &segments {
        out.push_str(elt);
        out.push('/');
    }
    if !end_slash && out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    Some(out)
}

/// Resolve `rel_url` against an absolute `base_url`.
///
/// Implements the subset of RFC 3986 resolution the callback machinery
/// needs. Returns the empty string when the base is not an absolute URI or
/// either input fails to parse.
pub fn resolve_rel_url(base_url: &str, rel_url: &str) -> String {
    if base_url.is_empty() {
        return String::new();
    }
    let Ok(base) = parse_uri(base_url) else {
        return String::new();
    };
    if base.kind != UriKind::Absolute {
        return String::new();
    }
    if rel_url.is_empty() {
        return base_url.to_string();
    }
    let Ok(mut rel) = parse_uri(rel_url) else {
        return String::new();
    };

    match normalize_segments(&rel.path) {
        Some(path) => rel.path = path,
        // ".." climbing past the root is unresolvable
        None => return String::new(),
    }

    if rel.kind == UriKind::Absolute {
        return as_url_string(&rel);
    }

    let mut url = Uri {
        scheme: base.scheme.clone(),
        fragment: rel.fragment.clone(),
        ..Uri::default()
    };

    if !rel.hostport.text.is_empty() {
        url.hostport = rel.hostport;
        url.path = rel.path;
        url.query = rel.query;
        return as_url_string(&url);
    }

    url.hostport = base.hostport.clone();

    if rel.path.is_empty() {
        url.path = base.path.clone();
        url.query = if !rel.query.is_empty() {
            rel.query
        } else {
            base.query.clone()
        };
    } else if rel.path.starts_with('/') {
        url.path = rel.path;
    } else if base.path.is_empty() {
        url.path = format!("/{}", rel.path);
    } else {
        if base.path == "/" {
            url.path = format!("/{}", rel.path);
        } else {
            let mut base_path = base.path.clone();
            if base_path.ends_with('/') {
                base_path.pop();
            }
            let cut = base_path.rfind('/').map_or(0, |p| p + 1);
            url.path = format!("{}{}", &base_path[..cut], rel.path);
        }
        url.query = rel.query;
    }
    as_url_string(&url)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(10 + b - b'A'),
        b'a'..=b'f' => Some(10 + b - b'a'),
        _ => None,
    }
}

/// Decode percent-escaped triples, leaving malformed ones verbatim.
pub fn remove_escaped_chars(input: &[u8]) -> Vec<u8> {
    if input.len() <= 2 {
        return input.to_vec();
    }
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() - 2 {
        if input[i] == b'%' {
            match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                (Some(hi), Some(lo)) => out.push((hi << 4) | lo),
                _ => {
                    out.push(b'%');
                    out.push(input[i + 1]);
                    out.push(input[i + 2]);
                }
            }
            i += 3;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    while i < input.len() {
        out.push(input[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_http_url() {
        let uri = parse_uri("http://192.168.1.100:1400/evt/RenderingControl?a=1#frag").unwrap();
        assert_eq!(uri.scheme, "http");
        assert_eq!(uri.kind, UriKind::Absolute);
        assert_eq!(uri.path_kind, PathKind::AbsPath);
        assert_eq!(uri.hostport.text, "192.168.1.100:1400");
        assert_eq!(
            uri.hostport.addr,
            Some("192.168.1.100:1400".parse().unwrap())
        );
        assert_eq!(uri.path, "/evt/RenderingControl");
        assert_eq!(uri.query, "a=1");
        assert_eq!(uri.fragment, "frag");
    }

    #[test]
    fn test_parse_defaults_port_to_80() {
        let uri = parse_uri("http://10.0.0.1/evt").unwrap();
        assert_eq!(uri.hostport.addr.unwrap().port(), 80);
        assert_eq!(uri.hostport.text, "10.0.0.1");
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let uri = parse_uri("http://[fe80::1]:1400/evt").unwrap();
        assert_eq!(uri.hostport.text, "[fe80::1]:1400");
        let addr = uri.hostport.addr.unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 1400);
    }

    #[test]
    fn test_parse_relative_uri() {
        let uri = parse_uri("evt/path?q").unwrap();
        assert_eq!(uri.kind, UriKind::Relative);
        assert_eq!(uri.path_kind, PathKind::RelPath);
        assert_eq!(uri.path, "evt/path");
        assert_eq!(uri.query, "q");
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(parse_uri("http://10.0.0.1:0/evt").is_err());
        assert!(parse_uri("http://[fe80::1/evt").is_err());
    }

    #[test]
    fn test_fragment_before_query_is_all_fragment() {
        let uri = parse_uri("http://10.0.0.1/p#frag?notquery").unwrap();
        assert_eq!(uri.path, "/p");
        assert_eq!(uri.query, "");
        assert_eq!(uri.fragment, "frag?notquery");
    }

    #[test]
    fn test_round_trip_law() {
        for input in [
            "http://192.168.1.100:1400/evt",
            "http://10.0.0.1/a/b?x=1",
            "http://[fe80::1]:49153/",
        ] {
            let parsed = parse_uri(input).unwrap();
            let rebuilt = as_url_string(&parsed);
            assert_eq!(parse_uri(&rebuilt).unwrap(), parsed, "input: {input}");
        }
    }

    #[test]
    fn test_remove_dots() {
        assert_eq!(remove_dots("/a/b/../c"), "/a/c");
        assert_eq!(remove_dots("/a/./b/"), "/a/b/");
        assert_eq!(remove_dots("a//b"), "a/b");
        assert_eq!(remove_dots("/.."), "");
        assert_eq!(remove_dots("/"), "/");
        assert_eq!(remove_dots(""), "");
    }

    #[test]
    fn test_resolve_rel_url_laws() {
        let base = "http://10.0.0.1:1400/dev/svc/desc.xml";
        // empty relative yields the base
        assert_eq!(resolve_rel_url(base, ""), base);
        // absolute relative wins outright
        assert_eq!(
            resolve_rel_url(base, "http://10.0.0.2/evt"),
            "http://10.0.0.2/evt"
        );
    }

    #[test]
    fn test_resolve_rel_url_merges_paths() {
        let base = "http://10.0.0.1:1400/dev/svc/desc.xml";
        assert_eq!(
            resolve_rel_url(base, "evt"),
            "http://10.0.0.1:1400/dev/svc/evt"
        );
        assert_eq!(resolve_rel_url(base, "/evt"), "http://10.0.0.1:1400/evt");
        assert_eq!(
            resolve_rel_url(base, "a/./b/../evt"),
            "http://10.0.0.1:1400/dev/svc/a/evt"
        );
    }

    #[test]
    fn test_resolve_rel_url_underflow_is_empty() {
        let base = "http://10.0.0.1:1400/dev/svc/desc.xml";
        assert_eq!(resolve_rel_url(base, "../../../../evt"), "");
    }

    #[test]
    fn test_resolve_rel_url_invalid_base() {
        assert_eq!(resolve_rel_url("", "evt"), "");
        assert_eq!(resolve_rel_url("no-scheme/path", "evt"), "");
    }

    #[test]
    fn test_remove_escaped_chars() {
        assert_eq!(remove_escaped_chars(b"a%20b"), b"a b".to_vec());
        assert_eq!(remove_escaped_chars(b"%41%42"), b"AB".to_vec());
        assert_eq!(remove_escaped_chars(b"%2fx"), b"/x".to_vec());
        // malformed triples stay verbatim
        assert_eq!(remove_escaped_chars(b"%zz1"), b"%zz1".to_vec());
        assert_eq!(remove_escaped_chars(b"ab%4"), b"ab%4".to_vec());
        assert_eq!(remove_escaped_chars(b"%"), b"%".to_vec());
    }

    #[test]
    fn test_percent_encode_round_trip() {
        fn percent_encode(bytes: &[u8]) -> String {
            bytes.iter().map(|b| format!("%{b:02X}")).collect()
        }
        let samples: [&[u8]; 3] = [b"hello world", b"\x00\xff\x10", b"/evt?x=1"];
        for sample in samples {
            let encoded = percent_encode(sample);
            assert_eq!(remove_escaped_chars(encoded.as_bytes()), sample.to_vec());
        }
    }
}
