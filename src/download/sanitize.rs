//! Filename sanitization.
//!
//! Attachment names come from untrusted headers. Before one touches the disk
//! it is decoded, stripped of line breaks and path-unsafe characters, and cut
//! to a length every common filesystem accepts.

use crate::parser::header::decode_encoded_words;

/// Characters that are unsafe in a path component on at least one platform.
const UNSAFE_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Lower bound for any configured maximum name length.
pub const MIN_NAME_LEN: usize = 16;

/// Name used when nothing usable survives sanitization.
const FALLBACK_NAME: &str = "attachment";

/// Turn a header-supplied filename into a safe logical filename of at most
/// `max_len` bytes, keeping the extension when truncating.
pub fn sanitize_filename(raw: &str, max_len: usize) -> String {
    let decoded = decode_encoded_words(raw);
    let cleaned = clean(&decoded);
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return FALLBACK_NAME.to_string();
    }
    truncate_name(cleaned, max_len)
}

/// Sanitize a single directory component (sender, domain, …).
///
/// Returns `fallback` when nothing usable is left.
pub fn sanitize_component(raw: &str, fallback: &str) -> String {
    let cleaned = clean(raw);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        truncate_name(cleaned, 100)
    }
}

/// Name for an attachment that arrived without one: `attachment{n}.{subtype}`.
pub fn synthetic_name(n: u32, subtype: &str) -> String {
    let subtype = sanitize_component(subtype, "bin").to_lowercase();
    format!("{FALLBACK_NAME}{n}.{subtype}")
}

/// Drop line breaks, replace unsafe and control characters with `_`.
fn clean(s: &str) -> String {
    s.chars()
        .filter(|&c| c != '\r' && c != '\n')
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Split `name` into stem and extension (the extension keeps its dot).
///
/// `"report.final.pdf"` → (`"report.final"`, `".pdf"`); `".profile"` has no extension.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && !name[..pos].chars().all(|c| c == '.') => {
            (&name[..pos], &name[pos..])
        }
        _ => (name, ""),
    }
}

/// Cut `name` to at most `max_len` bytes, shortening the stem first.
pub fn truncate_name(name: &str, max_len: usize) -> String {
    let max_len = max_len.max(MIN_NAME_LEN);
    if name.len() <= max_len {
        return name.to_string();
    }

    let (stem, ext) = split_extension(name);
    if ext.len() >= max_len / 2 {
        return name[..floor_char_boundary(name, max_len)].to_string();
    }
    let stem_len = floor_char_boundary(stem, max_len - ext.len());
    format!("{}{ext}", &stem[..stem_len])
}

/// Versioned name `{stem}(v.{count}){ext}`, shortened to fit `max_len` bytes.
pub fn versioned_name(logical: &str, count: u32, max_len: usize) -> String {
    let max_len = max_len.max(MIN_NAME_LEN);
    let (stem, ext) = split_extension(logical);
    let tag = format!("(v.{count})");
    let budget = max_len.saturating_sub(tag.len() + ext.len());
    let stem = &stem[..floor_char_boundary(stem, budget)];
    format!("{stem}{tag}{ext}")
}

/// Largest index `<= max` that falls on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_unsafe_characters() {
        let name = sanitize_filename("a/b\\c:d*e?f\"g<h>i|j.txt", 150);
        assert_eq!(name, "a_b_c_d_e_f_g_h_i_j.txt");
    }

    #[test]
    fn test_strips_line_breaks() {
        assert_eq!(sanitize_filename("long\r\n name.pdf", 150), "long name.pdf");
    }

    #[test]
    fn test_decodes_encoded_words() {
        assert_eq!(
            sanitize_filename("=?UTF-8?Q?r=C3=A9sum=C3=A9.pdf?=", 150),
            "résumé.pdf"
        );
    }

    #[test]
    fn test_dot_names_fall_back() {
        assert_eq!(sanitize_filename("..", 150), "attachment");
        assert_eq!(sanitize_filename("   ", 150), "attachment");
    }

    #[test]
    fn test_truncation_keeps_extension() {
        let long = format!("{}.pdf", "x".repeat(300));
        let name = sanitize_filename(&long, 150);
        assert_eq!(name.len(), 150);
        assert!(name.ends_with(".pdf"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = format!("{}.txt", "é".repeat(100));
        let name = truncate_name(&long, 51);
        assert!(name.len() <= 51);
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("invoice.pdf"), ("invoice", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".profile"), (".profile", ""));
        assert_eq!(split_extension("README"), ("README", ""));
    }

    #[test]
    fn test_versioned_name() {
        assert_eq!(versioned_name("invoice.pdf", 2, 150), "invoice(v.2).pdf");
        assert_eq!(versioned_name("README", 3, 150), "README(v.3)");

        let long = format!("{}.pdf", "y".repeat(146));
        let name = versioned_name(&long, 12, 150);
        assert!(name.len() <= 150);
        assert!(name.ends_with("(v.12).pdf"));
    }

    #[test]
    fn test_synthetic_name() {
        assert_eq!(synthetic_name(3, "PDF"), "attachment3.pdf");
        assert_eq!(synthetic_name(1, "x/y"), "attachment1.x_y");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("bob@example.com", "unknown"), "bob@example.com");
        assert_eq!(sanitize_component("..", "unknown"), "unknown");
        assert_eq!(sanitize_component("a/b", "unknown"), "a_b");
    }
}
