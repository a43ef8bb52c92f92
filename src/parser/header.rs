//! RFC 5322 header handling: unfolding, encoded-words (RFC 2047) and dates.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use mail_parser::MessageParser;
use tracing::debug;

use crate::model::message::MessageMeta;

/// Extract the headers the sort policies need from a raw message.
///
/// Only the top-level header block is read; the body is never touched.
pub fn extract_meta(raw_message: &[u8]) -> MessageMeta {
    let header_bytes = &raw_message[..find_header_end(raw_message).unwrap_or(raw_message.len())];
    let headers = unfold_headers(&decode_header_bytes(header_bytes));

    MessageMeta {
        date: get_header(&headers, "date"),
        from: get_header(&headers, "from").map(|v| decode_encoded_words(&v)),
        subject: get_header(&headers, "subject").map(|v| decode_encoded_words(&v)),
    }
}

/// Find the byte offset where headers end (the first blank line).
fn find_header_end(data: &[u8]) -> Option<usize> {
    let lf = data.windows(2).position(|w| w == b"\n\n");
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Join continuation lines and return `(lowercase_name, value)` pairs.
fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some((name, value)) = line.split_once(':') {
            result.push((name.trim().to_lowercase(), value.trim().to_string()));
        }
    }

    result
}

/// First non-empty value for a header name.
fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.clone())
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// The value is handed to `mail-parser` as an unstructured header, so every
/// charset it knows is supported. Undecodable input is returned unchanged.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let single_line: String = input.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    let fake_msg = format!("Subject: {single_line}\r\n\r\n");
    MessageParser::default()
        .parse(fake_msg.as_bytes())
        .and_then(|msg| msg.subject().map(str::to_string))
        .unwrap_or_else(|| input.to_string())
}

/// Parse an email date string, keeping the sender's UTC offset.
///
/// The offset matters: a message sent at 23:30 -0500 belongs on the sender's
/// calendar day, not the next UTC day.
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Trailing comments such as "(CEST)" or "(UTC)"
    let uncommented = match trimmed.find('(') {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    };

    for candidate in [trimmed, uncommented] {
        if let Ok(dt) = DateTime::parse_from_rfc2822(candidate) {
            return Some(dt);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt);
        }
    }

    let no_dow = strip_day_of_week(uncommented);
    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%z",
    ];
    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(no_dow, fmt) {
            return Some(dt);
        }
    }

    // No offset at all: read it as UTC.
    for fmt in ["%d %b %Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(no_dow, fmt) {
            return Some(ndt.and_utc().fixed_offset());
        }
    }

    if let Some(dt) = mail_parser_date(uncommented) {
        return Some(dt);
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: let `mail-parser`'s lenient date parser have a go.
fn mail_parser_date(input: &str) -> Option<DateTime<FixedOffset>> {
    // mail-parser is happy to build a date out of very little; require digits.
    if !input.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }

    let fake_msg = format!("Date: {input}\r\n\r\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt).ok()
}

/// Strip a leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> &str {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim_start();
        }
    }
    s
}
