//! `attachgrab`: download every attachment in a mailbox, exactly once.
//!
//! The library holds the pieces of a resumable download run: transports that
//! search and fetch raw messages, a MIME extractor, the fingerprint and
//! version-counter manifest kept next to the downloads, a crash-safe progress
//! journal, and the classification policies that pick each file's
//! subdirectory.

pub mod classify;
pub mod config;
pub mod download;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;
pub mod transport;
