//! Progress journal: which messages are fully processed.
//!
//! ```text
//! 4711<TAB>0
//! 4712<TAB>2
//! ```
//!
//! One line per finished message: its id and the nameless-attachment counter
//! after it. A line only counts once its newline is on disk, so a write torn
//! by a crash is discarded on the next open.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{GrabError, Result};
use crate::model::message::MessageId;

/// Journal file name inside the state directory.
pub const JOURNAL_FILE: &str = "journal.txt";

/// Append-only record of processed message ids.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    done: HashSet<MessageId>,
    nameless_mark: u32,
}

impl Journal {
    /// Open an existing journal (resume) or create an empty one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (done, nameless_mark) = if path.exists() {
            load_entries(path)?
        } else {
            (HashSet::new(), 0)
        };

        if !done.is_empty() {
            info!(
                path = %path.display(),
                entries = done.len(),
                "Resuming from journal"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| GrabError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            done,
            nameless_mark,
        })
    }

    /// Start a fresh journal, discarding any previous entries.
    pub fn reset(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| GrabError::io(path, e))?;
        }
        Self::open(path)
    }

    /// Whether `id` fits on one journal line.
    pub fn accepts(id: &MessageId) -> bool {
        let id = id.as_str();
        !id.is_empty() && !id.contains(['\t', '\n', '\r'])
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.done.contains(id)
    }

    /// Durably record a message as processed.
    ///
    /// Returns only after the line has been synced to disk.
    pub fn mark_done(&mut self, id: &MessageId, nameless_mark: u32) -> Result<()> {
        if !Self::accepts(id) {
            return Err(GrabError::InvalidState {
                path: self.path.clone(),
                reason: format!("message id {:?} cannot be journaled", id.as_str()),
            });
        }

        let line = format!("{id}\t{nameless_mark}\n");
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| GrabError::io(&self.path, e))?;

        self.done.insert(id.clone());
        self.nameless_mark = self.nameless_mark.max(nameless_mark);
        debug!(id = %id, "Journaled message");
        Ok(())
    }

    /// Nameless-attachment counter as of the last journaled message.
    pub fn nameless_mark(&self) -> u32 {
        self.nameless_mark
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    /// Delete the journal file (end of a completed run).
    pub fn remove(self) -> Result<()> {
        let Self { path, file, .. } = self;
        drop(file);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GrabError::io(&path, e)),
        }
    }
}

/// Read complete lines; cut off a torn trailing line so later appends start clean.
fn load_entries(path: &Path) -> Result<(HashSet<MessageId>, u32)> {
    let data = std::fs::read(path).map_err(|e| GrabError::io(path, e))?;
    let complete_len = data.iter().rposition(|&b| b == b'\n').map_or(0, |p| p + 1);

    if complete_len < data.len() {
        warn!(
            path = %path.display(),
            discarded = data.len() - complete_len,
            "Discarding torn journal line"
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| GrabError::io(path, e))?;
        file.set_len(complete_len as u64)
            .and_then(|()| file.sync_data())
            .map_err(|e| GrabError::io(path, e))?;
    }

    let text = String::from_utf8_lossy(&data[..complete_len]);
    let mut done = HashSet::new();
    let mut nameless_mark = 0;
    for line in text.lines() {
        let mut fields = line.split('\t');
        let id = fields.next().unwrap_or("").trim();
        if id.is_empty() {
            continue;
        }
        if let Some(mark) = fields.next().and_then(|m| m.trim().parse::<u32>().ok()) {
            nameless_mark = nameless_mark.max(mark);
        }
        done.insert(MessageId::new(id));
    }
    Ok((done, nameless_mark))
}
