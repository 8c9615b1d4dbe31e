//! Shared helpers: text decoding, XML names and entities, EPUB paths and hrefs.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use percent_encoding::percent_decode_str;
use quick_xml::events::BytesStart;

use crate::error::Result;

// ============================================================================
// Text Decoding
// ============================================================================

/// Decode bytes to a string, handling various encodings.
///
/// This function:
/// 1. First tries UTF-8 (handles BOM automatically via encoding_rs)
/// 2. If malformed, tries the hint encoding (from `<?xml encoding="..."?>`)
/// 3. Falls back to Windows-1252 (common in old ebooks)
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Extract the encoding name from an XML declaration.
///
/// Only the first 100 bytes are inspected.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let check_len = bytes.len().min(100);
    let prefix = &bytes[..check_len];

    let xml_start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Read a markup file from disk and decode it to a string.
pub fn read_text_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let text = decode_text(&bytes, extract_xml_encoding(&bytes));
    Ok(text.into_owned())
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &data[3..]
    } else {
        data
    }
}

// ============================================================================
// XML Names and Entities
// ============================================================================

/// Extract local name from namespaced XML name (e.g., "dc:title" -> "title").
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Resolve an entity reference name (the part between `&` and `;`).
///
/// Covers the XML built-ins, numeric references, and the handful of HTML
/// named entities that show up in navigation documents written without a DTD.
pub fn resolve_entity(entity: &str) -> Option<String> {
    let named = match entity {
        "apos" => "'",
        "quot" => "\"",
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "nbsp" => "\u{a0}",
        "ndash" => "\u{2013}",
        "mdash" => "\u{2014}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        _ => "",
    };
    if !named.is_empty() {
        return Some(named.to_string());
    }

    let code = if let Some(hex) = entity
        .strip_prefix("#x")
        .or_else(|| entity.strip_prefix("#X"))
    {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse::<u32>().ok()?
    };
    char::from_u32(code).map(|c| c.to_string())
}

/// Escape XML special characters for text and attribute values.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Collapse runs of whitespace into single spaces and trim both ends.
pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Start-tag Attributes
// ============================================================================

/// Attributes of one start tag, unescaped, in document order.
pub struct Attrs(Vec<(String, String)>);

impl Attrs {
    pub fn parse(e: &BytesStart<'_>) -> Result<Self> {
        let mut pairs = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let raw = String::from_utf8_lossy(&attr.value);
            let value = quick_xml::escape::unescape(&raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            pairs.push((key, value));
        }
        Ok(Self(pairs))
    }

    /// Value of the attribute whose qualified name is exactly `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed, non-empty value.
    pub fn get_trimmed(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// Manifest Properties
// ============================================================================

/// Whether a space-separated property list contains `target` as a whole token.
pub fn has_property(props: &str, target: &str) -> bool {
    props.split_whitespace().any(|token| token == target)
}

/// Add `target` to a property list unless it is already present.
pub fn add_property(props: &str, target: &str) -> String {
    if has_property(props, target) {
        return props.to_string();
    }
    let trimmed = props.trim();
    if trimmed.is_empty() {
        target.to_string()
    } else {
        format!("{trimmed} {target}")
    }
}

/// Remove every occurrence of `target` from a property list.
pub fn remove_property(props: &str, target: &str) -> String {
    props
        .split_whitespace()
        .filter(|token| *token != target)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// EPUB Paths and Hrefs
// ============================================================================

/// Normalize an archive path: forward slashes, no `.` segments, `..` folded.
///
/// Mirrors lexical path cleaning, so it never touches the filesystem and is
/// idempotent.
pub fn normalize_epub_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let rooted = path.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Whether an href points outside the book (has a URL scheme).
pub fn is_absolute_href(href: &str) -> bool {
    href.contains("://")
}

/// Rebase a relative href under `prefix`, preserving any fragment.
///
/// Fragment-only and absolute hrefs pass through unchanged.
pub fn join_href(prefix: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with('#') || is_absolute_href(href) {
        return href.to_string();
    }

    let (base, fragment) = match href.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (href, None),
    };

    let joined = normalize_epub_path(&format!("{prefix}/{base}"));
    match fragment {
        Some(fragment) => format!("{joined}#{fragment}"),
        None => joined,
    }
}

/// Convert a manifest href into a relative filesystem path string.
///
/// Drops the fragment and percent-decodes, since hrefs are URLs while archive
/// entries are stored under their decoded names.
pub fn href_to_path(href: &str) -> String {
    let base = href.split('#').next().unwrap_or(href);
    let decoded = percent_decode_str(base).decode_utf8_lossy();
    normalize_epub_path(&decoded)
}

// ============================================================================
// Tests
// ============================================================================
