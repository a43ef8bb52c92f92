//! Sender identity extracted from a `From:` header.

/// The sender of a message, as far as folder naming is concerned.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → identity `juan@ejemplo.com`, domain `ejemplo.com`
/// - `"user@example.com"` → identity `user@example.com`, domain `example.com`
/// - `"Billing Department"` → identity `Billing Department`, no domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// Address inside the angle brackets, or the whole header when there are none.
    pub address: String,
}

impl Sender {
    /// Parse a decoded `From:` header value.
    ///
    /// Returns `None` for a blank header.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(open) = trimmed.find('<') {
            let inner = &trimmed[open + 1..];
            let address = match inner.find('>') {
                Some(close) => &inner[..close],
                None => inner,
            };
            return Some(Self {
                display_name: strip_quotes(&trimmed[..open]),
                address: address.trim().to_string(),
            });
        }

        Some(Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        })
    }

    /// Domain part of the address (text after the last `@`).
    pub fn domain(&self) -> Option<&str> {
        let (_, domain) = self.address.rsplit_once('@')?;
        let domain = domain.trim_end_matches('>').trim();
        if domain.is_empty() {
            None
        } else {
            Some(domain)
        }
    }

    /// The component used to name the per-sender folder.
    ///
    /// Falls back to the display name for headers like `"Support <>"`.
    pub fn identity(&self) -> Option<&str> {
        if !self.address.is_empty() {
            Some(&self.address)
        } else if !self.display_name.is_empty() {
            Some(&self.display_name)
        } else {
            None
        }
    }
}

fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}
