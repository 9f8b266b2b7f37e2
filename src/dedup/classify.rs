//! Content type classification
//!
//! Sniffs the real content type from the first bytes of a payload and
//! reconciles it with the type the client declared. A mismatch is not an
//! error: it becomes a per-file `rejected` outcome carrying both values.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

/// Number of leading bytes considered when sniffing
pub const SNIFF_LEN: usize = 512;

/// Outcome of reconciling declared and detected types
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub accepted: bool,
    pub declared: String,
    pub detected: String,
}

/// Equivalence policy between generic declared types and specific detected ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePolicy {
    equivalents: BTreeMap<String, Vec<String>>,
}

impl Default for TypePolicy {
    fn default() -> Self {
        Self::strict()
            .with_equivalent("application/octet-stream", "application/zip")
            .with_equivalent("application/octet-stream", "application/x-zip-compressed")
    }
}

impl TypePolicy {
    /// Policy with no generic-type equivalences
    pub fn strict() -> Self {
        Self {
            equivalents: BTreeMap::new(),
        }
    }

    /// Parse `generic=specific|specific;generic=specific`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut policy = Self::strict();

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (generic, specifics) = entry
                .split_once('=')
                .ok_or_else(|| format!("missing '=' in {:?}", entry))?;

            let generic = essence(generic);
            if !is_mime_like(&generic) {
                return Err(format!("not a content type: {:?}", generic));
            }

            let specifics: Vec<String> = specifics
                .split('|')
                .map(essence)
                .filter(|s| !s.is_empty())
                .collect();
            if let Some(bad) = specifics.iter().find(|s| !is_mime_like(s)) {
                return Err(format!("not a content type: {:?}", bad));
            }
            if specifics.is_empty() {
                return Err(format!("no equivalents listed for {:?}", generic));
            }

            for specific in &specifics {
                policy = policy.with_equivalent(&generic, specific);
            }
        }

        Ok(policy)
    }

    /// Accept `specific` content under the declared `generic` type
    pub fn with_equivalent(mut self, generic: &str, specific: &str) -> Self {
        let specific = essence(specific);
        let specifics = self.equivalents.entry(essence(generic)).or_default();
        if !specifics.contains(&specific) {
            specifics.push(specific);
        }
        self
    }

    /// Sniff the sample and reconcile it with the declared type
    pub fn classify(&self, declared: Option<&str>, sample: &[u8]) -> Classification {
        let declared = declared.unwrap_or("").to_string();
        let detected = sniff(sample).to_string();
        let accepted = self.reconcile(&declared, &detected);

        Classification {
            accepted,
            declared,
            detected,
        }
    }

    /// Decide whether a declared type is compatible with a detected one
    pub fn reconcile(&self, declared: &str, detected: &str) -> bool {
        if declared.trim().is_empty() || detected.trim().is_empty() {
            return true;
        }

        let decl = essence(declared);
        let det = essence(detected);

        if decl == det {
            return true;
        }

        // Text subtypes are interchangeable
        if decl.starts_with("text/") && det.starts_with("text/") {
            return true;
        }

        if let Some(specifics) = self.equivalents.get(&decl) {
            if specifics.iter().any(|s| *s == det) {
                return true;
            }
        }

        if let Some(major) = decl.strip_suffix("/*") {
            return det.starts_with(&format!("{}/", major));
        }

        false
    }
}

/// Strip parameters (`; charset=...`), trim and lowercase a content type
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn is_mime_like(s: &str) -> bool {
    matches!(s.split_once('/'), Some((major, minor)) if !major.is_empty() && !minor.is_empty())
}

/// Read up to [`SNIFF_LEN`] leading bytes of a file
pub async fn read_sample(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let mut filled = 0;

    while filled < SNIFF_LEN {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    buf.truncate(filled);
    Ok(buf)
}

// ============================================================================
// Sniffing
// ============================================================================

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

const EXACT_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "application/pdf"),
    (b"%!PS-Adobe-", "application/postscript"),
    (b"\xFE\xFF", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF", "text/plain; charset=utf-8"),
    (b"\x00\x00\x01\x00", "image/x-icon"),
    (b"\x00\x00\x02\x00", "image/x-icon"),
    (b"BM", "image/bmp"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
    (b"\x89PNG\r\n\x1A\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"ID3", "audio/mpeg"),
    (b"OggS\x00", "application/ogg"),
    (b"MThd\x00\x00\x00\x06", "audio/midi"),
    (b"\x1A\x45\xDF\xA3", "video/webm"),
    (b"wOFF", "font/woff"),
    (b"wOF2", "font/woff2"),
    (b"OTTO", "font/otf"),
    (b"\x00\x01\x00\x00", "font/ttf"),
    (b"\x1F\x8B\x08", "application/x-gzip"),
    (b"PK\x03\x04", "application/zip"),
    (b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    (b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    (b"\x00asm", "application/wasm"),
];

/// Sniff a content type from leading bytes
///
/// Falls back to `text/plain; charset=utf-8` when the sample contains no
/// control bytes and `application/octet-stream` otherwise.
pub fn sniff(sample: &[u8]) -> &'static str {
    let data = &sample[..sample.len().min(SNIFF_LEN)];

    let first_non_ws = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' '))
        .unwrap_or(data.len());
    let trimmed = &data[first_non_ws..];

    if HTML_TAGS.iter().any(|tag| html_tag_matches(trimmed, tag)) {
        return "text/html; charset=utf-8";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some(&(_, mime)) = EXACT_SIGNATURES.iter().find(|(sig, _)| data.starts_with(sig)) {
        return mime;
    }

    if let Some(mime) = riff_or_form(data) {
        return mime;
    }
    if is_mp4(data) {
        return "video/mp4";
    }

    if data.iter().any(|&b| is_binary_byte(b)) {
        "application/octet-stream"
    } else {
        "text/plain; charset=utf-8"
    }
}

fn html_tag_matches(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    let head_matches = data
        .iter()
        .zip(tag)
        .all(|(d, t)| d.to_ascii_uppercase() == *t);
    head_matches && matches!(data[tag.len()], b' ' | b'>')
}

fn riff_or_form(data: &[u8]) -> Option<&'static str> {
    if data.len() < 12 {
        return None;
    }
    match (&data[0..4], &data[8..12]) {
        (b"RIFF", b"WAVE") => Some("audio/wave"),
        (b"RIFF", b"AVI ") => Some("video/avi"),
        (b"RIFF", b"WEBP") if data.len() >= 14 && &data[12..14] == b"VP" => Some("image/webp"),
        (b"FORM", b"AIFF") => Some("audio/aiff"),
        _ => None,
    }
}

fn is_mp4(data: &[u8]) -> bool {
    if data.len() < 12 {
        return false;
    }
    let box_size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if box_size < 12 || data.len() < box_size || box_size % 4 != 0 {
        return false;
    }
    if &data[4..8] != b"ftyp" {
        return false;
    }
    // Major brand at 8, minor version at 12, compatible brands after
    (8..box_size)
        .step_by(4)
        .filter(|&st| st != 12)
        .any(|st| st + 3 <= data.len() && &data[st..st + 3] == b"mp4")
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1A\n\x00\x00\x00\rIHDR";

    #[test]
    fn test_charset_parameter_ignored() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("text/plain; charset=utf-8", "text/plain"));
    }

    #[test]
    fn test_pdf_declared_png_detected_rejected() {
        let policy = TypePolicy::default();
        let result = policy.classify(Some("application/pdf"), PNG_HEADER);
        assert!(!result.accepted);
        assert_eq!(result.declared, "application/pdf");
        assert_eq!(result.detected, "image/png");
    }

    #[test]
    fn test_missing_type_is_permissive() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("", "image/png"));
        assert!(policy.reconcile("application/pdf", ""));
        assert!(policy.classify(None, PNG_HEADER).accepted);
    }

    #[test]
    fn test_text_subtypes_interchangeable() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("text/csv", "text/plain; charset=utf-8"));
        assert!(policy.reconcile("text/markdown", "text/html"));
    }

    #[test]
    fn test_generic_container_equivalents() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("application/octet-stream", "application/zip"));
        assert!(!policy.reconcile("application/octet-stream", "image/png"));
        assert!(!TypePolicy::strict().reconcile("application/octet-stream", "application/zip"));
    }

    #[test]
    fn test_wildcard_major_type() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("image/*", "image/png"));
        assert!(!policy.reconcile("image/*", "application/pdf"));
    }

    #[test]
    fn test_exact_match_is_case_insensitive() {
        let policy = TypePolicy::default();
        assert!(policy.reconcile("Image/PNG", "image/png"));
    }

    #[test]
    fn test_parse_policy() {
        let policy =
            TypePolicy::parse("application/octet-stream=application/zip|application/gzip; text/x-any=text/plain")
                .unwrap();
        assert!(policy.reconcile("application/octet-stream", "application/gzip"));
        assert!(TypePolicy::parse("nonsense").is_err());
        assert!(TypePolicy::parse("a/b=").is_err());
        assert!(TypePolicy::parse("a=b/c").is_err());
        assert_eq!(TypePolicy::parse("").unwrap(), TypePolicy::strict());
    }

    #[test]
    fn test_with_equivalent() {
        let policy = TypePolicy::strict().with_equivalent("application/octet-stream", "application/pdf");
        assert!(policy.reconcile("application/octet-stream", "application/pdf"));
        assert!(!policy.reconcile("application/octet-stream", "application/zip"));

        // Entries for one generic type accumulate; repeats are ignored
        let parsed = TypePolicy::parse("application/octet-stream=application/zip; application/octet-stream=application/zip|application/x-zip-compressed").unwrap();
        assert_eq!(parsed, TypePolicy::default());
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff(PNG_HEADER), "image/png");
        assert_eq!(sniff(b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(sniff(b"\xFF\xD8\xFF\xE0\x00\x10JFIF"), "image/jpeg");
        assert_eq!(sniff(b"GIF89a\x01\x00"), "image/gif");
        assert_eq!(sniff(b"PK\x03\x04\x14\x00"), "application/zip");
        assert_eq!(sniff(b"\x1F\x8B\x08\x00"), "application/x-gzip");
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00WEBPVP8 "), "image/webp");
        assert_eq!(sniff(b"RIFF\x24\x00\x00\x00WAVEfmt "), "audio/wave");
    }

    #[test]
    fn test_sniff_markup() {
        assert_eq!(sniff(b"  <!doctype html><html>"), "text/html; charset=utf-8");
        assert_eq!(sniff(b"<p>hello</p>"), "text/html; charset=utf-8");
        assert_eq!(sniff(b"<?xml version=\"1.0\"?>"), "text/xml; charset=utf-8");
        // <PRE is not a recognised opener, falls through to plain text
        assert_eq!(sniff(b"<pre>x</pre>"), "text/plain; charset=utf-8");
    }

    #[test]
    fn test_sniff_mp4() {
        let mut data = vec![0x00, 0x00, 0x00, 0x1C];
        data.extend_from_slice(b"ftypisom");
        data.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
        data.extend_from_slice(b"isomiso2mp41");
        assert_eq!(sniff(&data), "video/mp4");
    }

    #[test]
    fn test_sniff_fallbacks() {
        assert_eq!(sniff(b"just some words\n"), "text/plain; charset=utf-8");
        assert_eq!(sniff(b""), "text/plain; charset=utf-8");
        assert_eq!(sniff(b"\x00\x01\x02binary"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_read_sample_caps_length() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        tokio::fs::write(&path, vec![b'a'; 4096]).await.unwrap();

        let sample = read_sample(&path).await.unwrap();
        assert_eq!(sample.len(), SNIFF_LEN);

        let small = temp_dir.path().join("small.bin");
        tokio::fs::write(&small, b"tiny").await.unwrap();
        assert_eq!(read_sample(&small).await.unwrap(), b"tiny");
    }
}
