//! End-to-end runs of the session driver against an in-memory mailbox.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_fs::prelude::*;
use assert_fs::fixture::ChildPath;
use assert_fs::TempDir;
use predicates::prelude::*;

use attachgrab::classify::SortPolicy;
use attachgrab::download::session::{MessageOutcome, PartOutcome, Session, SessionOptions};
use attachgrab::download::{self, RunSummary};
use attachgrab::error::{GrabError, Result};
use attachgrab::model::message::MessageId;
use attachgrab::store::manifest::Manifest;
use attachgrab::store::run_state::RunState;
use attachgrab::store::StatePaths;
use attachgrab::transport::Transport;

// ─── Fixtures ───────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryTransport {
    messages: BTreeMap<String, Vec<u8>>,
    failures_left: HashMap<String, u32>,
    fetch_calls: HashMap<String, u32>,
    reject_login: bool,
    session_expired: bool,
    logged_out: bool,
}

impl MemoryTransport {
    fn with(messages: &[(&str, Vec<u8>)]) -> Self {
        Self {
            messages: messages
                .iter()
                .map(|(id, raw)| (id.to_string(), raw.clone()))
                .collect(),
            ..Self::default()
        }
    }

    fn fail_fetch(mut self, id: &str, times: u32) -> Self {
        self.failures_left.insert(id.to_string(), times);
        self
    }

    fn calls(&self, id: &str) -> u32 {
        self.fetch_calls.get(id).copied().unwrap_or(0)
    }
}

impl Transport for MemoryTransport {
    fn authenticate(&mut self, _username: &str, _secret: &str) -> Result<()> {
        if self.reject_login {
            return Err(GrabError::Auth("invalid credentials".into()));
        }
        Ok(())
    }

    fn search(&mut self, _query: &str) -> Result<Vec<MessageId>> {
        Ok(self.messages.keys().map(|id| MessageId::from(id.as_str())).collect())
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        *self.fetch_calls.entry(id.to_string()).or_default() += 1;
        if self.session_expired {
            return Err(GrabError::Auth("session expired".into()));
        }
        if let Some(left) = self.failures_left.get_mut(id.as_str()) {
            if *left > 0 {
                *left -= 1;
                return Err(GrabError::Fetch {
                    id: id.to_string(),
                    reason: "connection reset".into(),
                });
            }
        }
        self.messages.get(id.as_str()).cloned().ok_or(GrabError::Fetch {
            id: id.to_string(),
            reason: "no such message".into(),
        })
    }

    fn logout(&mut self) -> Result<()> {
        self.logged_out = true;
        Ok(())
    }
}

/// A message with one `application/octet-stream` attachment per entry.
/// `None` filenames become nameless `attachment` parts.
fn message(from: &str, date: &str, attachments: &[(Option<&str>, &str)]) -> Vec<u8> {
    let mut raw = format!(
        "From: {from}\r\n\
Date: {date}\r\n\
Subject: files\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"SEP\"\r\n\
\r\n\
--SEP\r\n\
Content-Type: text/plain\r\n\
Content-Disposition: inline\r\n\
\r\n\
Body text.\r\n"
    );
    for (name, payload) in attachments {
        raw.push_str("--SEP\r\nContent-Type: application/octet-stream\r\n");
        match name {
            Some(name) => raw.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{name}\"\r\n"
            )),
            None => raw.push_str("Content-Disposition: attachment\r\n"),
        }
        raw.push_str(&format!("\r\n{payload}\r\n"));
    }
    raw.push_str("--SEP--\r\n");
    raw.into_bytes()
}

fn simple(attachments: &[(Option<&str>, &str)]) -> Vec<u8> {
    message(
        "Alice <alice@example.com>",
        "Thu, 04 Jan 2024 10:00:00 +0000",
        attachments,
    )
}

fn options() -> SessionOptions {
    SessionOptions {
        query: "ALL".into(),
        max_fetch_attempts: 3,
        retry_delay: Duration::ZERO,
        max_filename_len: 150,
        override_resume: false,
    }
}

struct Dirs {
    _temp: TempDir,
    dest: PathBuf,
    state: StatePaths,
}

fn dirs() -> Dirs {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("downloads");
    let state = StatePaths::new(temp.path().join("state"));
    Dirs {
        _temp: temp,
        dest,
        state,
    }
}

fn request(dirs: &Dirs, policy: SortPolicy) -> RunState {
    RunState::new("alice@example.com", dirs.dest.clone(), policy)
}

fn run(transport: &mut MemoryTransport, dirs: &Dirs, policy: SortPolicy) -> Result<RunSummary> {
    download::run(
        transport,
        request(dirs, policy),
        "secret",
        dirs.state.clone(),
        options(),
        None,
    )
}

fn at(path: impl Into<PathBuf>) -> ChildPath {
    ChildPath::new(path)
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ─── Naming and deduplication ───────────────────────────────────────

#[test]
fn test_same_name_different_content_gets_version_suffix() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("invoice.pdf"), "january")])),
        ("2", simple(&[(Some("invoice.pdf"), "february")])),
    ]);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 2);
    assert_eq!(summary.renamed, 1);
    assert_eq!(read(&d.dest.join("invoice.pdf")), "january");
    assert_eq!(read(&d.dest.join("invoice(v.2).pdf")), "february");
    assert!(transport.logged_out);
}

#[test]
fn test_identical_content_is_stored_once() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("photo.jpg"), "pixels")])),
        ("2", simple(&[(Some("photo.jpg"), "pixels")])),
    ]);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.duplicates, 1);
    at(d.dest.join("photo.jpg")).assert(predicate::path::is_file());
    at(d.dest.join("photo(v.2).jpg")).assert(predicate::path::missing());

    let manifest = Manifest::load(Manifest::path_in(&d.dest)).unwrap();
    assert_eq!(manifest.counters.get("photo.jpg"), 1);
}

#[test]
fn test_rerun_after_completion_stores_nothing_new() {
    let d = dirs();
    let messages = [
        ("1", simple(&[(Some("a.txt"), "one"), (Some("b.txt"), "two")])),
        ("2", simple(&[(Some("a.txt"), "three")])),
    ];

    let mut first = MemoryTransport::with(&messages);
    let summary = run(&mut first, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 3);
    at(&d.state.journal).assert(predicate::path::missing());
    at(&d.state.run_state).assert(predicate::path::missing());

    let mut second = MemoryTransport::with(&messages);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 0);
    assert_eq!(summary.duplicates, 3);

    let mut names: Vec<String> = std::fs::read_dir(&d.dest)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    assert_eq!(names, ["a(v.2).txt", "a.txt", "b.txt"]);
}

#[test]
fn test_existing_file_is_left_alone() {
    let d = dirs();
    std::fs::create_dir_all(&d.dest).unwrap();
    std::fs::write(d.dest.join("report.pdf"), "mine").unwrap();

    let mut transport = MemoryTransport::with(&[("1", simple(&[(Some("report.pdf"), "theirs")]))]);
    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();

    assert_eq!(summary.pre_existing, 1);
    assert_eq!(summary.stored, 0);
    assert_eq!(read(&d.dest.join("report.pdf")), "mine");
}

#[test]
fn test_foreign_file_at_target_does_not_mark_content_stored() {
    let d = dirs();
    std::fs::create_dir_all(&d.dest).unwrap();
    std::fs::write(d.dest.join("report.pdf"), "mine").unwrap();
    let messages = [("1", simple(&[(Some("report.pdf"), "theirs")]))];

    let mut first = MemoryTransport::with(&messages);
    run(&mut first, &d, SortPolicy::None).unwrap();
    let manifest = Manifest::load(Manifest::path_in(&d.dest)).unwrap();
    assert_eq!(manifest.fingerprints.count_for("report.pdf"), 0);

    let mut second = MemoryTransport::with(&messages);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.stored, 1);
    assert_eq!(read(&d.dest.join("report.pdf")), "mine");
    assert_eq!(read(&d.dest.join("report(v.2).pdf")), "theirs");
}

#[test]
fn test_versions_keep_counting_across_runs() {
    let d = dirs();
    let mut first = MemoryTransport::with(&[
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("a.txt"), "two")])),
    ]);
    run(&mut first, &d, SortPolicy::None).unwrap();
    assert_eq!(read(&d.dest.join("a.txt")), "one");
    assert_eq!(read(&d.dest.join("a(v.2).txt")), "two");

    let mut second = MemoryTransport::with(&[
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("a.txt"), "two")])),
        ("3", simple(&[(Some("a.txt"), "three")])),
    ]);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 1);
    assert_eq!(summary.duplicates, 2);
    assert_eq!(read(&d.dest.join("a(v.3).txt")), "three");

    let manifest = Manifest::load(Manifest::path_in(&d.dest)).unwrap();
    assert_eq!(manifest.counters.get("a.txt"), 3);
}

#[test]
fn test_nameless_attachments_get_synthetic_names() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(None, "first")])),
        ("2", simple(&[(None, "second")])),
    ]);

    run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(read(&d.dest.join("attachment1.octet-stream")), "first");
    assert_eq!(read(&d.dest.join("attachment2.octet-stream")), "second");
}

#[test]
fn test_hostile_filename_stays_inside_destination() {
    let d = dirs();
    let mut transport =
        MemoryTransport::with(&[("1", simple(&[(Some("../../etc/passwd"), "root:x:0")]))]);

    run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(read(&d.dest.join(".._.._etc_passwd")), "root:x:0");
    at(d.dest.parent().unwrap().join("etc")).assert(predicate::path::missing());
}

// ─── Classification ─────────────────────────────────────────────────

#[test]
fn test_date_policy_files_by_message_date() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("notes.txt"), "dated")])),
        ("2", message("Bob <bob@example.org>", "not a date", &[(Some("x.txt"), "undated")])),
    ]);

    run(&mut transport, &d, SortPolicy::Date).unwrap();
    assert_eq!(read(&d.dest.join("2024").join("Jan").join("4").join("notes.txt")), "dated");
    assert_eq!(read(&d.dest.join("unknown_date").join("x.txt")), "undated");
}

#[test]
fn test_sender_policy_files_by_domain_and_address() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[("1", simple(&[(Some("cv.pdf"), "resume")]))]);

    run(&mut transport, &d, SortPolicy::Sender).unwrap();
    at(d.dest.join("example.com").join("alice@example.com").join("cv.pdf"))
        .assert(predicate::path::is_file());
}

#[test]
fn test_size_policy_uses_payload_size() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[("1", simple(&[(Some("small.bin"), "tiny payload")]))]);

    run(&mut transport, &d, SortPolicy::Size).unwrap();
    at(d.dest.join("tiny").join("small.bin")).assert(predicate::path::is_file());
}

// ─── Resume ─────────────────────────────────────────────────────────

#[test]
fn test_interrupted_run_resumes_where_it_stopped() {
    let d = dirs();
    let messages = [
        ("1", simple(&[(Some("a.txt"), "one"), (None, "nameless one")])),
        ("2", simple(&[(Some("b.txt"), "two"), (None, "nameless two")])),
    ];

    // Process only the first message, then "crash" by dropping the session.
    let mut first = MemoryTransport::with(&messages);
    {
        let mut session =
            Session::open(&mut first, request(&d, SortPolicy::None), d.state.clone(), options())
                .unwrap();
        session.authenticate("secret").unwrap();
        let ids = session.search().unwrap();
        let outcome = session.process_message(&ids[0]).unwrap();
        assert!(matches!(outcome, MessageOutcome::Processed { journaled: true, .. }));
    }
    assert!(read(&d.state.journal).contains("1\t1\n"));
    at(&d.state.run_state).assert(predicate::path::is_file());

    let mut second = MemoryTransport::with(&messages);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.already_done, 1);
    assert_eq!(summary.messages_processed, 1);
    assert_eq!(second.calls("1"), 0, "journaled message must not be fetched again");

    assert_eq!(read(&d.dest.join("attachment1.octet-stream")), "nameless one");
    assert_eq!(read(&d.dest.join("attachment2.octet-stream")), "nameless two");
    at(&d.state.journal).assert(predicate::path::missing());
}

#[test]
fn test_crash_before_journaling_does_not_duplicate() {
    let d = dirs();
    let messages = [("1", simple(&[(Some("a.txt"), "one")]))];

    // Bytes and manifest are on disk but the message never made the journal.
    let mut first = MemoryTransport::with(&messages);
    {
        let mut session =
            Session::open(&mut first, request(&d, SortPolicy::None), d.state.clone(), options())
                .unwrap();
        session.authenticate("secret").unwrap();
        session.search().unwrap();
    }
    std::fs::create_dir_all(&d.dest).unwrap();
    std::fs::write(d.dest.join("a.txt"), "one").unwrap();

    let mut second = MemoryTransport::with(&messages);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.stored, 0);
    assert_eq!(summary.pre_existing, 1);
    at(d.dest.join("a(v.2).txt")).assert(predicate::path::missing());

    let manifest = Manifest::load(Manifest::path_in(&d.dest)).unwrap();
    assert_eq!(manifest.fingerprints.count_for("a.txt"), 1);
}

#[test]
fn test_resume_with_different_parameters_is_refused() {
    let d = dirs();
    let messages = [("1", simple(&[(Some("a.txt"), "one")]))];

    let mut first = MemoryTransport::with(&messages);
    {
        let mut session =
            Session::open(&mut first, request(&d, SortPolicy::None), d.state.clone(), options())
                .unwrap();
        session.authenticate("secret").unwrap();
        session.search().unwrap();
    }

    let mut second = MemoryTransport::with(&messages);
    let err = run(&mut second, &d, SortPolicy::Extension).unwrap_err();
    assert!(matches!(err, GrabError::ResumeMismatch { field: "sort policy", .. }));

    let mut opts = options();
    opts.override_resume = true;
    let summary = download::run(
        &mut second,
        request(&d, SortPolicy::Extension),
        "secret",
        d.state.clone(),
        opts,
        None,
    )
    .unwrap();
    assert_eq!(summary.stored, 1);
    at(d.dest.join("txt").join("a.txt")).assert(predicate::path::is_file());
}

// ─── Failures ───────────────────────────────────────────────────────

#[test]
fn test_failed_fetch_skips_message_and_continues() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("b.txt"), "two")])),
    ])
    .fail_fetch("1", u32::MAX);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.messages_failed, 1);
    assert_eq!(summary.messages_processed, 1);
    assert_eq!(transport.calls("1"), 3);
    at(d.dest.join("a.txt")).assert(predicate::path::missing());
    at(d.dest.join("b.txt")).assert(predicate::path::is_file());
}

#[test]
fn test_failed_message_keeps_resume_state() {
    let d = dirs();
    let messages = [
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("b.txt"), "two")])),
    ];

    let mut first = MemoryTransport::with(&messages).fail_fetch("1", u32::MAX);
    let summary = run(&mut first, &d, SortPolicy::None).unwrap();
    assert!(summary.resume_pending());
    at(&d.state.run_state).assert(predicate::path::is_file());
    assert!(read(&d.state.journal).lines().any(|line| line.starts_with("2\t")));

    let mut second = MemoryTransport::with(&messages);
    let summary = run(&mut second, &d, SortPolicy::None).unwrap();
    assert!(!summary.resume_pending());
    assert_eq!(summary.already_done, 1);
    assert_eq!(second.calls("2"), 0);
    assert_eq!(read(&d.dest.join("a.txt")), "one");
    at(&d.state.journal).assert(predicate::path::missing());
    at(&d.state.run_state).assert(predicate::path::missing());
}

#[test]
fn test_fatal_fetch_error_stops_the_run() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("b.txt"), "two")])),
    ]);
    transport.session_expired = true;

    let err = run(&mut transport, &d, SortPolicy::None).unwrap_err();
    assert!(matches!(err, GrabError::Auth(_)));
    assert_eq!(transport.calls("1"), 1);
    assert_eq!(transport.calls("2"), 0);
    at(&d.state.run_state).assert(predicate::path::is_file());
}

#[test]
fn test_unjournalable_ids_are_skipped() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("bad\tname.eml", simple(&[(Some("a.txt"), "one")])),
        ("good.eml", simple(&[(Some("b.txt"), "two")])),
    ]);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.messages_found, 2);
    assert_eq!(summary.ids_rejected, 1);
    assert_eq!(summary.messages_processed, 1);
    assert!(!summary.resume_pending());
    assert_eq!(transport.calls("bad\tname.eml"), 0);
    at(d.dest.join("b.txt")).assert(predicate::path::is_file());
}

#[test]
fn test_transient_fetch_failure_is_retried() {
    let d = dirs();
    let mut transport =
        MemoryTransport::with(&[("1", simple(&[(Some("a.txt"), "one")]))]).fail_fetch("1", 2);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.messages_failed, 0);
    assert_eq!(summary.stored, 1);
    assert_eq!(transport.calls("1"), 3);
}

#[test]
fn test_unparseable_message_is_skipped() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", b"   \r\n".to_vec()),
        ("2", simple(&[(Some("b.txt"), "two")])),
    ]);

    let summary = run(&mut transport, &d, SortPolicy::None).unwrap();
    assert_eq!(summary.messages_failed, 1);
    assert_eq!(summary.stored, 1);
}

#[test]
fn test_login_failure_is_fatal_and_writes_nothing() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[("1", simple(&[(Some("a.txt"), "one")]))]);
    transport.reject_login = true;

    let err = run(&mut transport, &d, SortPolicy::None).unwrap_err();
    assert!(matches!(err, GrabError::Auth(_)));
    assert!(err.is_fatal());
    at(&d.state.run_state).assert(predicate::path::missing());
    at(&d.state.journal).assert(predicate::path::missing());
    assert_eq!(transport.calls("1"), 0);
}

#[test]
fn test_write_failure_leaves_message_unjournaled() {
    let d = dirs();
    std::fs::create_dir_all(&d.dest).unwrap();
    // A file where the extension folder should be makes the write fail.
    std::fs::write(d.dest.join("txt"), "in the way").unwrap();

    let mut transport = MemoryTransport::with(&[("1", simple(&[(Some("a.txt"), "one")]))]);
    let mut session =
        Session::open(&mut transport, request(&d, SortPolicy::Extension), d.state.clone(), options())
            .unwrap();
    session.authenticate("secret").unwrap();
    let ids = session.search().unwrap();

    let outcome = session.process_message(&ids[0]).unwrap();
    let MessageOutcome::Processed { parts, journaled } = outcome else {
        panic!("expected processed outcome");
    };
    assert!(!journaled);
    assert!(matches!(parts[0], PartOutcome::WriteFailed { .. }));
    assert_eq!(session.summary().write_failures, 1);
}

#[test]
fn test_progress_callback_reaches_total() {
    let d = dirs();
    let mut transport = MemoryTransport::with(&[
        ("1", simple(&[(Some("a.txt"), "one")])),
        ("2", simple(&[(Some("b.txt"), "two")])),
    ]);
    let last = Cell::new((0, 0));

    download::run(
        &mut transport,
        request(&d, SortPolicy::None),
        "secret",
        d.state.clone(),
        options(),
        Some(&|current, total| last.set((current, total))),
    )
    .unwrap();
    assert_eq!(last.get(), (2, 2));
}
