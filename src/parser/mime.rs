//! MIME walking: turn a raw RFC 822 message into a flat list of candidate parts.

use mail_parser::{MessageParser, MimeHeaders, PartType};

use crate::error::{GrabError, Result};
use crate::model::message::ParsedMessage;
use crate::model::part::Part;

use super::header;

/// Subtype used when a part carries no `Content-Type`.
const FALLBACK_SUBTYPE: &str = "bin";

/// Parse a raw message into its metadata and candidate attachment parts.
///
/// A leaf part is a candidate when it carries a `Content-Disposition` header.
/// Parts without a filename are kept only when their disposition is
/// `attachment`; nameless `inline` parts are message bodies.
pub fn parse_message(raw_message: &[u8]) -> Result<ParsedMessage> {
    if raw_message.iter().all(u8::is_ascii_whitespace) {
        return Err(GrabError::Mime("empty message".into()));
    }

    let msg = MessageParser::default()
        .parse(raw_message)
        .ok_or_else(|| GrabError::Mime("mail-parser could not parse the message".into()))?;

    let mut parts = Vec::new();
    for part in &msg.parts {
        if matches!(part.body, PartType::Multipart(_)) {
            continue;
        }
        let Some(disposition) = part.content_disposition() else {
            continue;
        };

        let filename = part
            .attachment_name()
            .map(|name| header::decode_encoded_words(name.trim()))
            .filter(|name| !name.is_empty());

        if filename.is_none() && !disposition.ctype().eq_ignore_ascii_case("attachment") {
            continue;
        }

        let content_subtype = part
            .content_type()
            .and_then(|ct| ct.subtype())
            .map(str::to_lowercase)
            .unwrap_or_else(|| FALLBACK_SUBTYPE.to_string());

        parts.push(Part {
            filename,
            payload: part.contents().to_vec(),
            content_subtype,
        });
    }

    Ok(ParsedMessage {
        meta: header::extract_meta(raw_message),
        parts,
    })
}
