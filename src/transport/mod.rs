//! Mailbox transports.
//!
//! The session driver only sees the [`Transport`] trait: authenticate, search,
//! fetch raw bytes, log out. Retrying a failed fetch is the driver's call.

pub mod eml_dir;
pub mod imap_tls;

use crate::error::Result;
use crate::model::message::MessageId;

/// A source of raw RFC 822 messages.
pub trait Transport {
    /// Log in. Any failure is fatal for the run.
    fn authenticate(&mut self, username: &str, secret: &str) -> Result<()>;

    /// Return the ids of the messages matching `query`.
    fn search(&mut self, query: &str) -> Result<Vec<MessageId>>;

    /// Fetch the raw bytes of one message.
    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>>;

    /// End the session. Errors are reported but never undo finished work.
    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn authenticate(&mut self, username: &str, secret: &str) -> Result<()> {
        (**self).authenticate(username, secret)
    }

    fn search(&mut self, query: &str) -> Result<Vec<MessageId>> {
        (**self).search(query)
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        (**self).fetch(id)
    }

    fn logout(&mut self) -> Result<()> {
        (**self).logout()
    }
}
