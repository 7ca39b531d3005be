//! SMTP server implementation

use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::email::Email;
use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::notifier::{Notifier, Subscription};
use crate::smtp::parser;
use crate::smtp::relay::{ForwardConfig, Relay};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{MailTransaction, SmtpSession};
use crate::smtp::store::EmailStore;

use log::{debug, error, info, warn};

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

/// SMTP server capturing every message it receives
///
/// Clones share the same store and subscribers, so a clone can run the accept
/// loop while another one is queried.
#[derive(Debug, Clone)]
pub struct SmtpServer {
    /// Server hostname
    hostname: String,
    store: Arc<EmailStore>,
    notifier: Arc<Notifier>,
    /// Set when messages are relayed instead of stored
    relay: Option<Relay>,
}

impl SmtpServer {
    /// Create a new SMTP server
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_owned(),
            store: Arc::new(EmailStore::new()),
            notifier: Arc::new(Notifier::new()),
            relay: None,
        }
    }

    /// Relay every received message to an upstream server instead of storing it
    pub fn with_forwarding(mut self, config: ForwardConfig) -> Self {
        self.relay = Some(Relay::new(config, &self.hostname));
        self
    }

    /// Name announced in the greeting and in relay sessions
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Upstream target, when messages are relayed instead of stored
    pub fn forward_config(&self) -> Option<&ForwardConfig> {
        self.relay.as_ref().map(Relay::config)
    }

    /// Received emails, newest first
    pub fn get_emails(&self) -> Vec<Email> {
        self.store.get_emails()
    }

    /// Received emails, newest first, emptying the store
    pub fn get_emails_and_reset(&self) -> Vec<Email> {
        self.store.get_emails_and_reset()
    }

    /// Subscribe to emails received from now on
    pub fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }

    /// Start the server on the specified address (blocking)
    pub fn start<A: ToSocketAddrs>(&self, addr: A) -> Result<(), SmtpError> {
        let listener = TcpListener::bind(addr)?;
        self.start_with_listener(listener)
    }

    /// Start the server with an existing listener (blocking)
    pub fn start_with_listener(&self, listener: TcpListener) -> Result<(), SmtpError> {
        info!("SMTP server listening on {}", listener.local_addr()?);
        self.accept_loop(listener);
        Ok(())
    }

    /// Bind `addr` and accept connections on a background thread
    ///
    /// The socket is bound when this returns, so clients may connect right
    /// away. Returns the bound address, useful with port 0.
    pub fn spawn<A: ToSocketAddrs>(&self, addr: A) -> Result<SocketAddr, SmtpError> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        info!("SMTP server listening on {local_addr}");

        let server = self.clone();
        thread::Builder::new()
            .name(format!("smtp-accept-{}", local_addr.port()))
            .spawn(move || server.accept_loop(listener))?;

        Ok(local_addr)
    }

    fn accept_loop(&self, listener: TcpListener) {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => self.spawn_client(stream),
                Err(e) => error!("Error accepting connection: {e}"),
            }
        }
    }

    /// Serve one connection on its own thread
    fn spawn_client(&self, stream: TcpStream) {
        let server = self.clone();
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown peer".to_string(), |addr| addr.to_string());

        let worker = thread::Builder::new()
            .name(format!("smtp-client-{peer}"))
            .spawn(move || {
                debug!("[{peer}] connected");
                match server.handle_client(stream) {
                    Ok(()) => debug!("[{peer}] disconnected"),
                    Err(e) => warn!("[{peer}] connection ended with error: {e}"),
                }
            });

        if let Err(e) = worker {
            error!("Failed to spawn connection worker: {e}");
        }
    }

    /// Handle a client connection
    fn handle_client(&self, mut stream: TcpStream) -> Result<(), SmtpError> {
        let command_handler = SmtpCommandHandler::new(&self.hostname);
        let mut session = SmtpSession::new();
        let mut reader = BufReader::new(stream.try_clone()?);

        self.send_response(&mut stream, &SmtpResponse::greeting(&self.hostname))?;

        let mut line_buffer = Vec::new();
        loop {
            let limit = if session.in_data_mode() {
                SmtpLimits::TEXT_LINE_MAX_LENGTH
            } else {
                SmtpLimits::COMMAND_LINE_MAX_LENGTH
            };

            match read_line_capped(&mut reader, &mut line_buffer, limit)? {
                // Connection closed, possibly mid-transaction
                LineRead::Closed => break,
                LineRead::Line => {}
                LineRead::TooLong if session.in_data_mode() => {
                    session.reject_oversized_line();
                    continue;
                }
                LineRead::TooLong => {
                    let error = SmtpError::LineTooLong { max: limit };
                    self.send_response(&mut stream, &SmtpResponse::from_error(&error))?;
                    continue;
                }
            }

            // Invalid UTF-8 is replaced rather than rejected
            let decoded = String::from_utf8_lossy(&line_buffer);
            let line = decoded
                .strip_suffix('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l))
                .unwrap_or(&*decoded);

            if session.in_data_mode() {
                if let Some(response) = self.handle_data_line(line, &mut session) {
                    self.send_response(&mut stream, &response)?;
                }
                continue;
            }

            if line.trim().is_empty() {
                continue;
            }

            let response = command_handler
                .process_command(line, &mut session)
                .unwrap_or_else(|e| SmtpResponse::from_error(&e));
            self.send_response(&mut stream, &response)?;
            if response.code == 221 {
                break;
            }
        }

        Ok(())
    }

    /// Handle a line of data during DATA mode
    ///
    /// Returns the reply to send once the terminating `.` arrived.
    fn handle_data_line(&self, line: &str, session: &mut SmtpSession) -> Option<SmtpResponse> {
        if line != "." {
            session.add_data_line(line);
            return None;
        }

        let outcome = session
            .finish_data_collection()
            .and_then(|transaction| self.deliver(transaction));
        Some(match outcome {
            Ok(()) => SmtpResponse::queued(),
            Err(e) => {
                warn!("Message rejected: {e}");
                SmtpResponse::from_error(&e)
            }
        })
    }

    /// Parse a finished transaction, then store or relay it and notify
    fn deliver(&self, transaction: MailTransaction) -> Result<(), SmtpError> {
        let email = parser::parse_message(&transaction.data);

        match &self.relay {
            Some(relay) => relay.forward(&transaction)?,
            None => self.store.add(email.clone()),
        }
        info!(
            "Received email from {:?} to {:?} (subject {:?})",
            email.from, email.to, email.subject
        );

        self.notifier.publish(&email);
        Ok(())
    }

    /// Send a response to the client
    fn send_response(
        &self,
        stream: &mut TcpStream,
        response: &SmtpResponse,
    ) -> Result<(), SmtpError> {
        let formatted = response.format();
        if response.extra_lines.is_empty() && formatted.len() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
            let truncated_response = SmtpResponse::new(response.code, "Response too long (truncated)");
            stream.write_all(truncated_response.format().as_bytes())?;
        } else {
            stream.write_all(formatted.as_bytes())?;
        }
        stream.flush()?;
        Ok(())
    }
}

/// Outcome of reading one line from a client
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Closed,
    Line,
    /// The line went over the limit and was skipped up to its end
    TooLong,
}

/// Read one line into `buf`, buffering at most `limit` bytes plus CRLF
///
/// The rest of an over-long line is consumed and dropped without being kept
/// in memory.
fn read_line_capped<R: BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<LineRead> {
    let cap = limit + 2;
    buf.clear();

    if reader.by_ref().take(cap as u64 + 1).read_until(b'\n', buf)? == 0 {
        return Ok(LineRead::Closed);
    }
    if buf.ends_with(b"\n") || buf.len() <= cap {
        return Ok(LineRead::Line);
    }

    buf.clear();
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(LineRead::TooLong)
}
