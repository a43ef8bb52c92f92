//! Candidate attachment parts.
//!
//! A [`Part`] lives only while its message is being processed; nothing here
//! is persisted.

/// One binary unit extracted from a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// Filename from `Content-Disposition` / `Content-Type`, if any.
    pub filename: Option<String>,

    /// Decoded payload bytes.
    pub payload: Vec<u8>,

    /// Lowercased MIME subtype (e.g. `"pdf"`, `"jpeg"`), used to name
    /// attachments that arrive without a filename.
    pub content_subtype: String,
}
