//! Path of a logged request url.
//!
//! Parsing follows Go's `net/url`, which is what produces the `requestUrl`
//! field: the path is percent-decoded but otherwise left alone, so dot
//! segments survive and a bare host has an empty path.

use percent_encoding::percent_decode_str;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid control character in url")]
    ControlCharacter,
    #[error("missing protocol scheme")]
    MissingScheme,
    #[error("first path segment in url cannot contain colon")]
    ColonInFirstSegment,
    #[error("invalid url escape {0:?}")]
    InvalidEscape(String),
    #[error("missing ']' in host")]
    UnclosedBracket,
    #[error("invalid port {0:?} after host")]
    InvalidPort(String),
    #[error("invalid character {0:?} in host name")]
    InvalidHost(String),
    #[error("invalid userinfo")]
    InvalidUserinfo,
}

/// Decoded path of `raw`, empty for urls without one.
pub fn path(raw: &str) -> Result<String, UrlError> {
    let (raw, fragment) = raw.split_once('#').unwrap_or((raw, ""));
    if raw.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(UrlError::ControlCharacter);
    }

    let (scheme, rest) = split_scheme(raw)?;
    let rest = rest.split_once('?').map_or(rest, |(path, _query)| path);

    let path = if !rest.starts_with('/') {
        if !scheme.is_empty() {
            // opaque, like `mailto:me@example.com`
            ""
        } else {
            let first = rest.split_once('/').map_or(rest, |(segment, _)| segment);
            if first.contains(':') {
                return Err(UrlError::ColonInFirstSegment);
            }
            rest
        }
    } else if rest.starts_with("//") && (!scheme.is_empty() || !rest.starts_with("///")) {
        let authority = &rest[2..];
        let (authority, path) = match authority.find('/') {
            Some(i) => authority.split_at(i),
            None => (authority, ""),
        };
        check_authority(authority)?;
        path
    } else {
        rest
    };

    check_escapes(fragment)?;
    decode(path)
}

/// Split off `scheme:`, the scheme is empty if there is none.
fn split_scheme(raw: &str) -> Result<(&str, &str), UrlError> {
    for (i, b) in raw.bytes().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' => {}
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {}
            b':' if i == 0 => return Err(UrlError::MissingScheme),
            b':' => return Ok((&raw[..i], &raw[i + 1..])),
            _ => return Ok(("", raw)),
        }
    }
    Ok(("", raw))
}

fn check_authority(authority: &str) -> Result<(), UrlError> {
    let (userinfo, host) = match authority.rfind('@') {
        Some(i) => (Some(&authority[..i]), &authority[i + 1..]),
        None => (None, authority),
    };
    check_host(host)?;

    if let Some(userinfo) = userinfo {
        let valid = userinfo.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"-._:~!$&'()*+,;=%@".contains(&b)
        });
        if !valid {
            return Err(UrlError::InvalidUserinfo);
        }
        check_escapes(userinfo)?;
    }
    Ok(())
}

fn check_host(host: &str) -> Result<(), UrlError> {
    let port = if host.starts_with('[') {
        let end = host.rfind(']').ok_or(UrlError::UnclosedBracket)?;
        &host[end + 1..]
    } else {
        host.rfind(':').map_or("", |i| &host[i..])
    };
    let valid_port = port.is_empty()
        || port
            .strip_prefix(':')
            .map_or(false, |digits| digits.bytes().all(|b| b.is_ascii_digit()));
    if !valid_port {
        return Err(UrlError::InvalidPort(port.to_string()));
    }

    let bytes = host.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let escape = escape_at(host, i)?;
                // only non-ascii bytes and `%25` may be escaped in a host
                if escape.as_bytes()[1] < b'8' && escape != "%25" {
                    return Err(UrlError::InvalidEscape(escape.to_string()));
                }
                i += 3;
            }
            b if b.is_ascii() && !is_host_byte(b) => {
                return Err(UrlError::InvalidHost((b as char).to_string()));
            }
            _ => i += 1,
        }
    }
    Ok(())
}

fn is_host_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-_.~!$&'()*+,;=:[]<>\"".contains(&b)
}

/// The three byte escape starting at `i`.
fn escape_at(s: &str, i: usize) -> Result<&str, UrlError> {
    let valid = s.len() >= i + 3
        && s.as_bytes()[i + 1].is_ascii_hexdigit()
        && s.as_bytes()[i + 2].is_ascii_hexdigit();
    if !valid {
        let end = s.len().min(i + 3);
        // stay on a char boundary for the error message
        let end = (end..=s.len()).find(|&e| s.is_char_boundary(e)).unwrap_or(s.len());
        return Err(UrlError::InvalidEscape(s[i..end].to_string()));
    }
    Ok(&s[i..i + 3])
}

fn check_escapes(s: &str) -> Result<(), UrlError> {
    for (i, _) in s.match_indices('%') {
        escape_at(s, i)?;
    }
    Ok(())
}

/// Percent-decode `path`. Escapes that don't form valid utf-8 become U+FFFD.
fn decode(path: &str) -> Result<String, UrlError> {
    check_escapes(path)?;
    Ok(percent_decode_str(path).decode_utf8_lossy().into_owned())
}
