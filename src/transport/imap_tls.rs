//! IMAP over TLS.
//!
//! Messages are addressed by UID so ids stay valid across sessions, and
//! fetched with `BODY.PEEK[]` so downloading does not mark them as read.
//! A fetch that loses the connection drops the session; the next fetch logs
//! in again with the same credentials.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::{debug, info, warn};

use crate::config::ImapConfig;
use crate::error::{GrabError, Result};
use crate::model::message::MessageId;

use super::Transport;

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// A single authenticated IMAP session.
pub struct ImapTransport {
    server: String,
    port: u16,
    mailbox: String,
    timeout: Duration,
    session: Option<ImapSession>,
    credentials: Option<(String, String)>,
}

impl ImapTransport {
    pub fn new(config: &ImapConfig) -> Self {
        Self {
            server: config.server.clone(),
            port: config.port,
            mailbox: config.mailbox.clone(),
            timeout: config.timeout(),
            session: None,
            credentials: None,
        }
    }

    /// Open the TCP connection with timeouts and complete the TLS handshake.
    fn connect(&self) -> Result<imap::Client<TlsStream<TcpStream>>> {
        let addr = (self.server.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| GrabError::Connection(format!("{}: {e}", self.server)))?
            .next()
            .ok_or_else(|| {
                GrabError::Connection(format!("{}: no address found", self.server))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| GrabError::Connection(format!("{addr}: {e}")))?;
        tcp.set_read_timeout(Some(self.timeout))
            .and_then(|()| tcp.set_write_timeout(Some(self.timeout)))
            .map_err(|e| GrabError::Connection(e.to_string()))?;

        let tls = TlsConnector::new().map_err(|e| GrabError::Connection(e.to_string()))?;
        let stream = tls
            .connect(&self.server, tcp)
            .map_err(|e| GrabError::Connection(format!("TLS handshake: {e}")))?;

        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| GrabError::Connection(format!("greeting: {e}")))?;
        debug!(server = %self.server, port = self.port, "Connected");
        Ok(client)
    }

    fn session(&mut self) -> Result<&mut ImapSession> {
        self.session
            .as_mut()
            .ok_or_else(|| GrabError::Connection("not logged in".into()))
    }

    /// Connect, log in and select the mailbox.
    fn open_session(&mut self, username: &str, secret: &str) -> Result<()> {
        let client = self.connect()?;
        let mut session = client
            .login(username, secret)
            .map_err(|(e, _client)| GrabError::Auth(e.to_string()))?;
        info!(user = username, server = %self.server, "Logged in");

        let mailbox = session
            .select(&self.mailbox)
            .map_err(|e| GrabError::Search(format!("select '{}': {e}", self.mailbox)))?;
        info!(
            mailbox = %self.mailbox,
            messages = mailbox.exists,
            "Selected mailbox"
        );

        self.session = Some(session);
        Ok(())
    }
}

/// Errors after which the session cannot be used again.
fn connection_lost(e: &imap::Error) -> bool {
    matches!(e, imap::Error::Io(_) | imap::Error::ConnectionLost)
}

impl Transport for ImapTransport {
    fn authenticate(&mut self, username: &str, secret: &str) -> Result<()> {
        self.open_session(username, secret)?;
        self.credentials = Some((username.to_string(), secret.to_string()));
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<MessageId>> {
        let uids = self
            .session()?
            .uid_search(query)
            .map_err(|e| GrabError::Search(e.to_string()))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        info!(query, found = uids.len(), "Search complete");
        Ok(uids.into_iter().map(MessageId::from).collect())
    }

    fn fetch(&mut self, id: &MessageId) -> Result<Vec<u8>> {
        let fetch_err = |reason: String| GrabError::Fetch {
            id: id.to_string(),
            reason,
        };

        if self.session.is_none() {
            if let Some((username, secret)) = self.credentials.clone() {
                info!(server = %self.server, "Reconnecting");
                self.open_session(&username, &secret)
                    .map_err(|e| fetch_err(format!("reconnect: {e}")))?;
            }
        }

        let result = self.session()?.uid_fetch(id.as_str(), "BODY.PEEK[]");
        let fetches = match result {
            Ok(fetches) => fetches,
            Err(e) => {
                if connection_lost(&e) {
                    warn!(id = %id, error = %e, "Connection lost");
                    self.session = None;
                }
                return Err(fetch_err(e.to_string()));
            }
        };
        let body = fetches
            .iter()
            .find_map(|f| f.body())
            .ok_or_else(|| fetch_err("server returned no body".into()))?;
        Ok(body.to_vec())
    }

    fn logout(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!(error = %e, "Logout failed");
                return Err(GrabError::Connection(e.to_string()));
            }
            debug!("Logged out");
        }
        Ok(())
    }
}
