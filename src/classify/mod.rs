//! Classification policies: where under the destination root a file goes.
//!
//! A policy is picked once per run and maps either the message's headers
//! (date, sender) or the file itself (extension, size, guessed MIME type) to
//! a relative subdirectory.

pub mod organize;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::download::sanitize::{sanitize_component, split_extension};
use crate::model::address::Sender;
use crate::model::message::MessageMeta;
use crate::parser::header::parse_date;

/// Folder for files without an extension or a known MIME type.
pub const OTHER_DIR: &str = "other";
/// Folder for messages whose `Date:` header cannot be parsed.
pub const UNKNOWN_DATE_DIR: &str = "unknown_date";
/// Folder for messages with a missing or unusable `From:` header.
pub const UNKNOWN_SENDER_DIR: &str = "unknown_sender";

/// How downloaded attachments are sorted into subdirectories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortPolicy {
    /// Everything directly in the destination root.
    #[default]
    None,
    /// `pdf/`, `jpg/`, … or `other/`.
    Extension,
    /// `tiny/` … `huge/`.
    Size,
    /// `application/pdf/`, `image/jpeg/`, … or `other/`.
    MimeType,
    /// `2024/Jan/5/` from the `Date:` header.
    Date,
    /// `example.com/alice@example.com/` from the `From:` header.
    Sender,
    /// `example.com/` from the `From:` header.
    Domain,
}

/// Everything a policy may look at for one file.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    /// Headers of the message the file came from, if any.
    pub message: Option<&'a MessageMeta>,
    /// Sanitized filename.
    pub file_name: &'a str,
    /// Size in bytes.
    pub size: u64,
}

impl SortPolicy {
    /// All policies, in menu order.
    pub const ALL: [SortPolicy; 7] = [
        SortPolicy::Extension,
        SortPolicy::Size,
        SortPolicy::MimeType,
        SortPolicy::Date,
        SortPolicy::Sender,
        SortPolicy::Domain,
        SortPolicy::None,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Extension => "extension",
            Self::Size => "size",
            Self::MimeType => "mimetype",
            Self::Date => "date",
            Self::Sender => "sender",
            Self::Domain => "domain",
        }
    }

    /// One-line description for prompts and help text.
    pub fn describe(self) -> &'static str {
        match self {
            Self::None => "No sorting (flat directory)",
            Self::Extension => "File extension",
            Self::Size => "File size (tiny, small, medium, large, huge)",
            Self::MimeType => "File type (guessed MIME type)",
            Self::Date => "Message date (year/month/day)",
            Self::Sender => "Sender (domain/address)",
            Self::Domain => "Sender domain",
        }
    }

    /// Whether the policy only needs the file, not its message.
    pub fn is_file_based(self) -> bool {
        matches!(self, Self::None | Self::Extension | Self::Size | Self::MimeType)
    }

    /// Relative subdirectory for a file. Pure: touches no disk.
    pub fn subdir(self, input: &ClassifyInput<'_>) -> PathBuf {
        match self {
            Self::None => PathBuf::new(),
            Self::Extension => PathBuf::from(by_extension(input.file_name)),
            Self::Size => PathBuf::from(SizeCategory::of(input.size).dir_name()),
            Self::MimeType => by_mime_type(input.file_name),
            Self::Date => by_date(input.message.and_then(|m| m.date.as_deref())),
            Self::Sender => by_sender(input.message.and_then(|m| m.from.as_deref())),
            Self::Domain => by_domain(input.message.and_then(|m| m.from.as_deref())),
        }
    }

    /// Resolve the absolute target directory under `base`, creating it (and
    /// its parents) if needed. Idempotent.
    pub fn resolve(self, base: &Path, input: &ClassifyInput<'_>) -> std::io::Result<PathBuf> {
        let dir = base.join(self.subdir(input));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SortPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "flat" => Ok(Self::None),
            "extension" | "ext" => Ok(Self::Extension),
            "size" => Ok(Self::Size),
            "mimetype" | "mime" | "type" => Ok(Self::MimeType),
            "date" => Ok(Self::Date),
            "sender" | "from" => Ok(Self::Sender),
            "domain" => Ok(Self::Domain),
            other => Err(format!(
                "unknown sort policy '{other}' (expected one of: extension, size, mimetype, date, sender, domain, none)"
            )),
        }
    }
}

/// Size buckets. Each upper bound is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCategory {
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
}

impl SizeCategory {
    const TINY_MAX: u64 = 10 * 1024;
    const SMALL_MAX: u64 = 100 * 1024;
    const MEDIUM_MAX: u64 = 1000 * 1024;
    const LARGE_MAX: u64 = 10_000 * 1024;

    pub fn of(size: u64) -> Self {
        match size {
            s if s < Self::TINY_MAX => Self::Tiny,
            s if s < Self::SMALL_MAX => Self::Small,
            s if s < Self::MEDIUM_MAX => Self::Medium,
            s if s < Self::LARGE_MAX => Self::Large,
            _ => Self::Huge,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Huge => "huge",
        }
    }
}

fn by_extension(file_name: &str) -> String {
    let (_, ext) = split_extension(file_name);
    let ext = ext.trim_start_matches('.').to_lowercase();
    if ext.is_empty() {
        OTHER_DIR.to_string()
    } else {
        sanitize_component(&ext, OTHER_DIR)
    }
}

fn by_mime_type(file_name: &str) -> PathBuf {
    match mime_guess::from_path(file_name).first() {
        Some(mime) => Path::new(mime.type_().as_str()).join(mime.subtype().as_str()),
        None => PathBuf::from(OTHER_DIR),
    }
}

fn by_date(date: Option<&str>) -> PathBuf {
    match date.and_then(parse_date) {
        Some(dt) => Path::new(&dt.year().to_string())
            .join(dt.format("%b").to_string())
            .join(dt.day().to_string()),
        None => PathBuf::from(UNKNOWN_DATE_DIR),
    }
}

fn sender_parts(from: Option<&str>) -> Option<(String, String)> {
    let sender = Sender::parse(from?)?;
    let domain = sender
        .domain()
        .map(|d| sanitize_component(d, UNKNOWN_SENDER_DIR))
        .unwrap_or_else(|| UNKNOWN_SENDER_DIR.to_string());
    let identity = sanitize_component(sender.identity()?, UNKNOWN_SENDER_DIR);
    Some((domain, identity))
}

fn by_sender(from: Option<&str>) -> PathBuf {
    match sender_parts(from) {
        Some((domain, identity)) => Path::new(&domain).join(identity),
        None => Path::new(UNKNOWN_SENDER_DIR).join(UNKNOWN_SENDER_DIR),
    }
}

fn by_domain(from: Option<&str>) -> PathBuf {
    match sender_parts(from) {
        Some((domain, _)) => PathBuf::from(domain),
        None => PathBuf::from(UNKNOWN_SENDER_DIR),
    }
}
