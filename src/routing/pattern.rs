//! Path normalization and route pattern compilation.
//!
//! # Responsibilities
//! - Normalize request paths (percent-decoding, slash collapsing)
//! - Compile route patterns into deterministic segment matchers
//! - Extract and validate path parameters
//!
//! # Design Decisions
//! - Segment matching instead of regex to guarantee O(segments) matching
//! - Only escapes of unreserved characters are decoded, so normalization
//!   is idempotent and `%2F` can never introduce a new segment boundary
//! - Captured values are fully decoded before validation, so traversal
//!   attempts hidden behind `%2e%2e%2f` are still caught

use std::collections::HashMap;

/// A single compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact segment text.
    Literal(String),
    /// `{name}` capture matching one segment.
    Capture(String),
    /// Trailing `*` or `{name*}` greedy tail; None when unnamed.
    Wildcard(Option<String>),
}

/// Error produced when a pattern cannot be compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternError(pub String);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid route pattern: {}", self.0)
    }
}

impl std::error::Error for PatternError {}

/// A deterministic matcher compiled from a route path pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// Original pattern text.
    pub pattern: String,
    /// Compiled segments.
    pub segments: Vec<Segment>,
    /// Declared parameter names, in order.
    pub param_names: Vec<String>,
}

impl CompiledPattern {
    /// Compile a pattern of `/`-separated segments. A segment is a
    /// literal, a `{name}` capture, or (only as the last segment) a `*`
    /// or `{name*}` greedy tail.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError(format!(
                "pattern '{}' must start with '/'",
                pattern
            )));
        }

        let raw_segments: Vec<&str> = pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut param_names = Vec::new();

        for (i, raw) in raw_segments.iter().enumerate() {
            let last = i == raw_segments.len() - 1;

            if *raw == "*" {
                if !last {
                    return Err(PatternError(format!(
                        "wildcard must be the last segment in '{}'",
                        pattern
                    )));
                }
                segments.push(Segment::Wildcard(None));
            } else if let Some(inner) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                if let Some(name) = inner.strip_suffix('*') {
                    if !last {
                        return Err(PatternError(format!(
                            "wildcard must be the last segment in '{}'",
                            pattern
                        )));
                    }
                    validate_param_name(name, pattern)?;
                    param_names.push(name.to_string());
                    segments.push(Segment::Wildcard(Some(name.to_string())));
                } else {
                    validate_param_name(inner, pattern)?;
                    if param_names.iter().any(|n| n == inner) {
                        return Err(PatternError(format!(
                            "duplicate parameter '{}' in '{}'",
                            inner, pattern
                        )));
                    }
                    param_names.push(inner.to_string());
                    segments.push(Segment::Capture(inner.to_string()));
                }
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
            param_names,
        })
    }

    /// Match a normalized path, extracting parameters on success.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        let has_wildcard = matches!(self.segments.last(), Some(Segment::Wildcard(_)));
        let fixed = if has_wildcard {
            self.segments.len() - 1
        } else {
            self.segments.len()
        };

        if has_wildcard {
            if path_segments.len() < fixed {
                return None;
            }
        } else if path_segments.len() != fixed {
            return None;
        }

        for (segment, value) in self.segments.iter().take(fixed).zip(&path_segments) {
            match segment {
                Segment::Literal(text) => {
                    if text != value {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Wildcard(_) => unreachable!("wildcard is always last"),
            }
        }

        if let Some(Segment::Wildcard(name)) = self.segments.last() {
            if has_wildcard {
                let tail = path_segments[fixed..].join("/");
                if let Some(name) = name {
                    params.insert(name.clone(), tail);
                }
            }
        }

        Some(params)
    }

    /// Number of literal segments, used for specificity ordering.
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Whether the pattern ends in a greedy tail.
    pub fn has_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Wildcard(_)))
    }

    /// Structural equality ignoring parameter names, for conflict checks.
    pub fn shape_eq(&self, other: &CompiledPattern) -> bool {
        if self.segments.len() != other.segments.len() {
            return false;
        }
        self.segments.iter().zip(&other.segments).all(|(a, b)| {
            matches!(
                (a, b),
                (Segment::Literal(x), Segment::Literal(y)) if x == y
            ) || matches!((a, b), (Segment::Capture(_), Segment::Capture(_)))
                || matches!((a, b), (Segment::Wildcard(_), Segment::Wildcard(_)))
        })
    }
}

fn validate_param_name(name: &str, pattern: &str) -> Result<(), PatternError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(PatternError(format!(
            "invalid parameter name '{}' in '{}'",
            name, pattern
        )));
    }
    Ok(())
}

/// Normalize a request path.
///
/// Applied in order: percent-decode escapes of unreserved octets,
/// collapse repeated `/`, strip a single trailing `/` except on root.
/// Case is preserved. The result is idempotent under re-normalization.
pub fn normalize_path(path: &str) -> String {
    let decoded = decode_unreserved(path);

    let mut collapsed = String::with_capacity(decoded.len() + 1);
    if !decoded.starts_with('/') {
        collapsed.push('/');
    }
    let mut prev_slash = false;
    for c in decoded.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        collapsed.push(c);
    }

    if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.pop();
    }

    collapsed
}

/// Percent-decode only escapes of unreserved characters
/// (ALPHA / DIGIT / `-` / `.` / `_` / `~`). Everything else, including
/// `%2F` and `%25`, is left encoded.
fn decode_unreserved(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                let octet = (hi * 16 + lo) as u8;
                if octet.is_ascii_alphanumeric() || matches!(octet, b'-' | b'.' | b'_' | b'~') {
                    out.push(octet);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    // Input was valid UTF-8 and decoded octets are ASCII.
    String::from_utf8(out).unwrap_or_else(|_| path.to_string())
}

/// Fully percent-decode a captured value for validation purposes.
pub fn decode_full(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reject captured values that could smuggle traversal or header tricks
/// past the gateway: control characters, newlines, or a `..` segment.
pub fn param_value_ok(value: &str) -> bool {
    let decoded = decode_full(value);
    if decoded.chars().any(|c| (c as u32) < 0x20) {
        return false;
    }
    if decoded.split('/').any(|seg| seg == "..") {
        return false;
    }
    true
}
