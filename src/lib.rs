//! # mailcatch
//!
//! mailcatch is an embedded SMTP server that captures mail for tests.
//!
//! Point the code under test at it, then inspect what was sent, without
//! mocking the mail transport.
//!
//! ## Quick Start
//!
//! ```rust
//! use mailcatch::SmtpServer;
//! use std::io::{BufRead, BufReader, Write};
//! use std::net::TcpStream;
//! use std::time::Duration;
//!
//! let server = SmtpServer::new("test.local");
//! let addr = server.spawn("127.0.0.1:0").unwrap();
//! let subscription = server.subscribe();
//!
//! // The code under test would normally do this part
//! let mut stream = TcpStream::connect(addr).unwrap();
//! let mut replies = BufReader::new(stream.try_clone().unwrap());
//! let mut reply = String::new();
//! replies.read_line(&mut reply).unwrap(); // 220 greeting
//! for line in [
//!     "HELO app.local",
//!     "MAIL FROM:<app@example.com>",
//!     "RCPT TO:<user@example.com>",
//!     "DATA",
//!     "From: app@example.com\r\nTo: user@example.com\r\nSubject: Welcome\r\n\r\nHello!\r\n.",
//!     "QUIT",
//! ] {
//!     write!(stream, "{line}\r\n").unwrap();
//!     reply.clear();
//!     replies.read_line(&mut reply).unwrap();
//! }
//!
//! let email = subscription.recv_timeout(Duration::from_secs(1)).unwrap();
//! assert_eq!(email.subject, "Welcome");
//! assert_eq!(email.from, vec!["app@example.com"]);
//! assert_eq!(email.to, vec!["user@example.com"]);
//! assert_eq!(email.body, vec!["Hello!"]);
//! assert_eq!(server.get_emails(), vec![email]);
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` / `EHLO` - Identify the client
//! - `MAIL FROM` - Start a transaction with the sender's address
//! - `RCPT TO` - Add a recipient (multiple recipients are supported)
//! - `DATA` - Send the message
//! - `RSET` - Abort the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close the connection
//!
//! A connection may send any number of messages before `QUIT`.
//!
//! ## Received emails
//!
//! Each message is parsed into an [`Email`] with its subject, the addresses
//! of its From and To headers, every header line and the body lines. Only the
//! header block can set those fields; body text that looks like a header stays
//! body text.
//!
//! - [`SmtpServer::get_emails`] returns the received emails, newest first.
//! - [`SmtpServer::get_emails_and_reset`] does the same and empties the store.
//! - [`SmtpServer::subscribe`] yields every email received afterwards.
//!
//! The reply to `DATA` is sent only after the email was stored and published,
//! so once a client finished sending, the email is visible without polling.
//!
//! ## Forwarding
//!
//! A server built with [`SmtpServer::with_forwarding`] stores nothing: it
//! relays every message to the configured upstream server and answers the
//! client with `451` when that fails.
//!
//! ## Limitations
//!
//! Everything lives in memory. There is no authentication, TLS or pipelining.
//!
//! ## Limits
//!
//! | Item | Maximum |
//! |---|---|
//! | Local part of an address | 64 characters |
//! | Domain | 64 characters |
//! | Path | 256 characters |
//! | Command line | 512 characters |
//! | Message line | 1000 characters |
//! | Recipients per message | 100 |
//! | Message size | 10 MiB |
//!
//! Going over a limit rejects the command or message, never the connection.

mod smtp;

pub use smtp::{
    Email, EmailStore, ForwardConfig, MailTransaction, Notifier, SmtpError, SmtpLimits,
    SmtpResponse, SmtpServer, SmtpSession, SmtpState, Subscription,
};

/// Parsing of raw DATA payloads into [`Email`] records
pub mod parser {
    pub use crate::smtp::parser::{parse, parse_message, split_payload};
}
