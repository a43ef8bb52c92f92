//! The session driver: search, fetch, extract, allocate, store, journal.
//!
//! Life of a run:
//!
//! ```text
//! Init ──▶ Authenticated ──▶ Searched ──▶ (per message: fetch → extract →
//!                                          allocate+store per part → journal)*
//!                                     ──▶ Done
//! ```
//!
//! Nothing is written before the search succeeds, so a failed login leaves
//! the previous resume state exactly as it was. From then on every piece of
//! progress is on disk before the next step starts: an attachment's bytes
//! before its fingerprint, every fingerprint of a message before the
//! message's journal line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::classify::ClassifyInput;
use crate::config::Config;
use crate::error::{GrabError, Result};
use crate::model::message::{MessageId, MessageMeta, ParsedMessage};
use crate::model::part::Part;
use crate::parser::mime;
use crate::store::atomic;
use crate::store::fingerprint::Fingerprint;
use crate::store::journal::Journal;
use crate::store::manifest::Manifest;
use crate::store::run_state::RunState;
use crate::store::StatePaths;
use crate::transport::Transport;

use super::allocator::{Allocation, NameAllocator};
use super::sanitize::{sanitize_filename, synthetic_name, truncate_name};

/// Tunables of a run.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Search criteria handed to the transport.
    pub query: String,
    /// Attempts per message fetch before the message is skipped.
    pub max_fetch_attempts: u32,
    /// Pause between fetch attempts.
    pub retry_delay: Duration,
    /// Maximum stored filename length in bytes.
    pub max_filename_len: usize,
    /// Accept a recorded run with different parameters, discarding its journal.
    pub override_resume: bool,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            query: config.imap.search_query.clone(),
            max_fetch_attempts: config.download.max_fetch_attempts,
            retry_delay: Duration::from_millis(config.download.retry_delay_ms),
            max_filename_len: config.download.max_filename_len,
            override_resume: false,
        }
    }
}

/// Where the driver is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Authenticated,
    Searched,
    Done,
}

/// Terminal (or failed) state of one attachment.
#[derive(Debug, Clone, PartialEq)]
pub enum PartOutcome {
    /// Written to `path`; `version > 1` means it was renamed.
    Stored {
        path: PathBuf,
        version: u32,
        bytes: u64,
    },
    /// Same content already stored under this name.
    Duplicate { name: String },
    /// Zero-length payload.
    Empty { name: String },
    /// Something already occupies the target path. `same_content` tells
    /// whether the file on disk holds these exact bytes.
    PreExists { path: PathBuf, same_content: bool },
    /// The filesystem refused the write.
    WriteFailed { path: PathBuf, error: String },
}

impl PartOutcome {
    /// Whether the part needs no further work.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::WriteFailed { .. })
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Already in the journal; not fetched.
    AlreadyDone,
    /// Every fetch attempt failed; left for the next run.
    FetchFailed,
    /// Fetched, but not a message we could read; left for the next run.
    ParseFailed,
    /// Parts were processed. `journaled` is false when a part failed to write.
    Processed {
        parts: Vec<PartOutcome>,
        journaled: bool,
    },
}

/// Counters for the end-of-run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages_found: usize,
    pub already_done: usize,
    pub messages_processed: usize,
    pub messages_failed: usize,
    pub stored: usize,
    pub renamed: usize,
    pub duplicates: usize,
    pub empty: usize,
    pub pre_existing: usize,
    pub write_failures: usize,
    pub bytes_written: u64,
    /// Search results dropped because their id cannot be journaled.
    pub ids_rejected: usize,
}

impl RunSummary {
    /// Whether some message still needs another run.
    pub fn resume_pending(&self) -> bool {
        self.messages_failed > 0
    }

    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::AlreadyDone => self.already_done += 1,
            MessageOutcome::FetchFailed | MessageOutcome::ParseFailed => {
                self.messages_failed += 1
            }
            MessageOutcome::Processed { parts, journaled } => {
                if *journaled {
                    self.messages_processed += 1;
                } else {
                    self.messages_failed += 1;
                }
                for part in parts {
                    match part {
                        PartOutcome::Stored { version, bytes, .. } => {
                            self.stored += 1;
                            if *version > 1 {
                                self.renamed += 1;
                            }
                            self.bytes_written += bytes;
                        }
                        PartOutcome::Duplicate { .. } => self.duplicates += 1,
                        PartOutcome::Empty { .. } => self.empty += 1,
                        PartOutcome::PreExists { .. } => self.pre_existing += 1,
                        PartOutcome::WriteFailed { .. } => self.write_failures += 1,
                    }
                }
            }
        }
    }
}

/// One run against one transport.
pub struct Session<'t> {
    transport: &'t mut dyn Transport,
    run: RunState,
    resuming: bool,
    paths: StatePaths,
    options: SessionOptions,
    manifest: Manifest,
    journal: Option<Journal>,
    allocator: NameAllocator,
    nameless: u32,
    phase: Phase,
    summary: RunSummary,
}

impl<'t> Session<'t> {
    /// Load persisted state and decide whether this is a resume.
    ///
    /// Reads only; nothing is written until [`Session::search`] succeeds.
    pub fn open(
        transport: &'t mut dyn Transport,
        request: RunState,
        paths: StatePaths,
        options: SessionOptions,
    ) -> Result<Self> {
        let (run, resuming) = match RunState::load(&paths.run_state)? {
            Some(recorded) => match recorded.check_resumable(&request) {
                Ok(()) => {
                    info!(
                        user = %recorded.username,
                        destination = %recorded.destination_root.display(),
                        policy = %recorded.policy,
                        started_at = %recorded.started_at,
                        "Resuming interrupted run"
                    );
                    (recorded, true)
                }
                Err(mismatch) if options.override_resume => {
                    warn!(reason = %mismatch, "Discarding interrupted run");
                    (request, false)
                }
                Err(mismatch) => return Err(mismatch),
            },
            None => (request, false),
        };

        let manifest = Manifest::load(Manifest::path_in(&run.destination_root))?;
        let allocator = NameAllocator::new(options.max_filename_len);

        Ok(Self {
            transport,
            run,
            resuming,
            paths,
            options,
            manifest,
            journal: None,
            allocator,
            nameless: 0,
            phase: Phase::Init,
            summary: RunSummary::default(),
        })
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Log in as the run's user.
    pub fn authenticate(&mut self, secret: &str) -> Result<()> {
        self.transport.authenticate(&self.run.username, secret)?;
        self.phase = Phase::Authenticated;
        Ok(())
    }

    /// Search for candidate messages, then persist the run state and open
    /// the journal.
    pub fn search(&mut self) -> Result<Vec<MessageId>> {
        if self.phase != Phase::Authenticated {
            return Err(GrabError::Search("search before authentication".into()));
        }
        let mut ids = self.transport.search(&self.options.query)?;
        self.summary.messages_found = ids.len();
        ids.retain(|id| {
            let usable = Journal::accepts(id);
            if !usable {
                warn!(id = ?id.as_str(), "Message id cannot be journaled, skipping");
            }
            usable
        });
        self.summary.ids_rejected = self.summary.messages_found - ids.len();
        self.begin()?;
        self.phase = Phase::Searched;
        Ok(ids)
    }

    /// First writes of the run.
    fn begin(&mut self) -> Result<()> {
        let root = &self.run.destination_root;
        std::fs::create_dir_all(root).map_err(|e| GrabError::io(root, e))?;
        std::fs::create_dir_all(&self.paths.dir).map_err(|e| GrabError::io(&self.paths.dir, e))?;

        self.run.save(&self.paths.run_state)?;
        let journal = if self.resuming {
            Journal::open(&self.paths.journal)?
        } else {
            Journal::reset(&self.paths.journal)?
        };
        self.nameless = journal.nameless_mark();
        self.journal = Some(journal);
        Ok(())
    }

    fn journal(&mut self) -> Result<&mut Journal> {
        let path = self.paths.journal.clone();
        self.journal.as_mut().ok_or(GrabError::InvalidState {
            path,
            reason: "journal used before the run started".into(),
        })
    }

    /// Process one message end to end.
    ///
    /// Per-message and per-part failures are reported in the outcome; an
    /// `Err` means state could not be persisted and the run must stop.
    pub fn process_message(&mut self, id: &MessageId) -> Result<MessageOutcome> {
        if self.journal()?.contains(id) {
            debug!(id = %id, "Already processed, skipping");
            let outcome = MessageOutcome::AlreadyDone;
            self.summary.record(&outcome);
            return Ok(outcome);
        }

        let outcome = self.fetch_and_store(id)?;
        if let MessageOutcome::Processed {
            journaled: true, ..
        } = outcome
        {
            let nameless = self.nameless;
            self.journal()?.mark_done(id, nameless)?;
        }
        self.summary.record(&outcome);
        Ok(outcome)
    }

    fn fetch_and_store(&mut self, id: &MessageId) -> Result<MessageOutcome> {
        let Some(raw) = self.fetch_with_retry(id)? else {
            return Ok(MessageOutcome::FetchFailed);
        };

        let ParsedMessage { meta, parts } = match mime::parse_message(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(id = %id, error = %e, "Could not parse message, skipping");
                return Ok(MessageOutcome::ParseFailed);
            }
        };
        debug!(
            id = %id,
            subject = meta.subject.as_deref().unwrap_or(""),
            parts = parts.len(),
            "Extracted parts"
        );

        let mut outcomes = Vec::with_capacity(parts.len());
        for part in parts {
            outcomes.push(self.process_part(&meta, part)?);
        }

        let journaled = outcomes.iter().all(PartOutcome::is_terminal);
        if !journaled {
            warn!(id = %id, "Some attachments could not be written; message will be retried");
        }
        Ok(MessageOutcome::Processed {
            parts: outcomes,
            journaled,
        })
    }

    /// Bounded retry loop around the transport's fetch.
    ///
    /// `Ok(None)` means the message is skipped for this run; fatal transport
    /// errors end the run.
    fn fetch_with_retry(&mut self, id: &MessageId) -> Result<Option<Vec<u8>>> {
        let attempts = self.options.max_fetch_attempts.max(1);
        for attempt in 1..=attempts {
            match self.transport.fetch(id) {
                Ok(raw) => return Ok(Some(raw)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(id = %id, attempt, attempts, error = %e, "Fetch failed");
                    if attempt < attempts && !self.options.retry_delay.is_zero() {
                        std::thread::sleep(self.options.retry_delay);
                    }
                }
            }
        }
        error!(id = %id, attempts, "Giving up on message until the next run");
        Ok(None)
    }

    fn process_part(&mut self, meta: &MessageMeta, part: Part) -> Result<PartOutcome> {
        let max_len = self.options.max_filename_len;
        let logical = match part.filename.as_deref() {
            Some(name) => sanitize_filename(name, max_len),
            None => {
                self.nameless += 1;
                truncate_name(&synthetic_name(self.nameless, &part.content_subtype), max_len)
            }
        };

        match self
            .allocator
            .allocate(&mut self.manifest, &logical, &part.payload)
        {
            Allocation::Empty => {
                info!(file = %logical, "Attachment is empty, skipping");
                Ok(PartOutcome::Empty { name: logical })
            }
            Allocation::Duplicate { fingerprint } => {
                info!(file = %logical, fingerprint = fingerprint.short(), "Skipping duplicate file");
                Ok(PartOutcome::Duplicate { name: logical })
            }
            Allocation::Fresh {
                final_name,
                version,
                fingerprint,
            } => self.store_part(meta, &logical, &final_name, version, fingerprint, &part.payload),
        }
    }

    fn store_part(
        &mut self,
        meta: &MessageMeta,
        logical: &str,
        final_name: &str,
        version: u32,
        fingerprint: Fingerprint,
        payload: &[u8],
    ) -> Result<PartOutcome> {
        let input = ClassifyInput {
            message: Some(meta),
            file_name: logical,
            size: payload.len() as u64,
        };
        let root = &self.run.destination_root;

        let outcome = match self.run.policy.resolve(root, &input) {
            Ok(dir) => {
                let path = dir.join(final_name);
                self.write_part(logical, &path, version, fingerprint, payload)
            }
            Err(e) => {
                let path = root.join(self.run.policy.subdir(&input)).join(final_name);
                write_failed(path, e)
            }
        };

        // The version counter moved even if nothing was written.
        self.manifest.flush()?;
        Ok(outcome)
    }

    fn write_part(
        &mut self,
        logical: &str,
        path: &Path,
        version: u32,
        fingerprint: Fingerprint,
        payload: &[u8],
    ) -> PartOutcome {
        if path.exists() {
            return self.pre_existing(logical, path, fingerprint);
        }

        match atomic::create_new(path, payload) {
            Ok(()) => {
                self.allocator.commit(&mut self.manifest, logical, fingerprint);
                if version > 1 {
                    info!(file = %logical, stored_as = %path.display(), "Renamed and stored");
                } else {
                    info!(path = %path.display(), "Stored");
                }
                PartOutcome::Stored {
                    path: path.to_path_buf(),
                    version,
                    bytes: payload.len() as u64,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                self.pre_existing(logical, path, fingerprint)
            }
            Err(e) => write_failed(path.to_path_buf(), e),
        }
    }

    /// The target path is taken. Its fingerprint is recorded only when the
    /// file there holds the same bytes, e.g. a write that landed just before
    /// a crash.
    fn pre_existing(&mut self, logical: &str, path: &Path, fingerprint: Fingerprint) -> PartOutcome {
        let same_content = match std::fs::read(path) {
            Ok(existing) => Fingerprint::of(&existing) == fingerprint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read existing file");
                false
            }
        };
        if same_content {
            info!(path = %path.display(), "Exists in destination");
            self.allocator.commit(&mut self.manifest, logical, fingerprint);
        } else {
            warn!(
                path = %path.display(),
                fingerprint = fingerprint.short(),
                "A different file occupies the target path; attachment not stored"
            );
        }
        PartOutcome::PreExists {
            path: path.to_path_buf(),
            same_content,
        }
    }

    /// End of the run: flush and log out. The resume files are deleted only
    /// when every message made it into the journal.
    pub fn finish(mut self) -> Result<RunSummary> {
        self.manifest.flush()?;
        if let Err(e) = self.transport.logout() {
            warn!(error = %e, "Logout failed at the end of the run");
        }
        if self.summary.resume_pending() {
            warn!(
                failed = self.summary.messages_failed,
                journal = %self.paths.journal.display(),
                "Some messages were not processed; run again to resume"
            );
        } else {
            if let Some(journal) = self.journal.take() {
                journal.remove()?;
            }
            RunState::remove(&self.paths.run_state)?;
        }
        self.phase = Phase::Done;

        let s = &self.summary;
        info!(
            found = s.messages_found,
            skipped = s.already_done,
            processed = s.messages_processed,
            failed = s.messages_failed,
            stored = s.stored,
            renamed = s.renamed,
            duplicates = s.duplicates,
            "Run complete"
        );
        Ok(self.summary)
    }
}

fn write_failed(path: PathBuf, e: std::io::Error) -> PartOutcome {
    error!(
        path = %path.display(),
        os = std::env::consts::OS,
        error = %e,
        "Could not store attachment: invalid file name or path for this platform"
    );
    PartOutcome::WriteFailed {
        path,
        error: e.to_string(),
    }
}

/// Drive a whole run: open, authenticate, search, process every message, finish.
///
/// The progress callback receives `(current, total)` message counts.
pub fn run(
    transport: &mut dyn Transport,
    request: RunState,
    secret: &str,
    paths: StatePaths,
    options: SessionOptions,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<RunSummary> {
    let mut session = Session::open(transport, request, paths, options)?;
    session.authenticate(secret)?;
    let ids = session.search()?;

    let total = ids.len();
    for (i, id) in ids.iter().enumerate() {
        if let Some(cb) = progress {
            cb(i, total);
        }
        session.process_message(id)?;
    }
    if let Some(cb) = progress {
        cb(total, total);
    }

    session.finish()
}
