//! Message identity and the metadata the sort policies need.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::part::Part;

/// Opaque, stable identifier the mailbox assigns to a message.
///
/// Ids carry no ordering meaning; they are only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u32> for MessageId {
    fn from(uid: u32) -> Self {
        Self(uid.to_string())
    }
}

/// Top-level headers of a message, with RFC 2047 encoded-words resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMeta {
    /// Raw `Date:` header value.
    pub date: Option<String>,
    /// Decoded `From:` header value.
    pub from: Option<String>,
    /// Decoded `Subject:` header value.
    pub subject: Option<String>,
}

/// A message reduced to what the pipeline needs: headers and candidate parts.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub meta: MessageMeta,
    pub parts: Vec<Part>,
}
