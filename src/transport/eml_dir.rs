//! A directory of `.eml` files posing as a mailbox.
//!
//! Each file is one message and its file name is the message id. Handy for
//! exported mail and for exercising the pipeline without a server.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{GrabError, Result};
use crate::model::message::MessageId;

use super::Transport;

pub struct EmlDirTransport {
    dir: PathBuf,
}

impl EmlDirTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn is_eml(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("eml"))
}

impl Transport for EmlDirTransport {
    fn authenticate(&mut self, _username: &str, _secret: &str) -> Result<()> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(GrabError::Auth(format!(
                "{} is not a readable directory",
                self.dir.display()
            )))
        }
    }

    /// Every `.eml` file, sorted by name. The query is ignored.
    fn search(&mut self, _query: &str) -> Result<Vec<MessageId>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| GrabError::Search(format!("{}: {e}", self.dir.display())))?;

        let mut ids: Vec<MessageId> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_eml(path))
            .filter_map(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(MessageId::from)
            })
            .collect();
        ids.sort();
        info!(dir = %self.dir.display(), found = ids.len(), "Listed .eml files");
        Ok(ids)
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        let name = id.as_str();
        if name.contains(['/', '\\']) || name == ".." {
            return Err(GrabError::Fetch {
                id: name.to_string(),
                reason: "not a file name".into(),
            });
        }
        std::fs::read(self.dir.join(name)).map_err(|e| GrabError::Fetch {
            id: name.to_string(),
            reason: e.to_string(),
        })
    }
}
