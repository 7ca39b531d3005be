//! Per-connection envelope state machine

use crate::smtp::commands::Command;
use crate::smtp::error::{SmtpError, SmtpLimits};

/// Where a connection stands in the SMTP dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Greeting sent, HELO/EHLO not received yet
    Connected,
    /// Ready for MAIL
    Ready,
    /// MAIL FROM received, waiting for RCPT
    SenderSet,
    /// At least one RCPT TO received, ready for DATA or more RCPT
    RecipientSet,
    /// DATA accepted, collecting message lines
    CollectingData,
}

/// A completed mail transaction: envelope plus unstuffed DATA lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailTransaction {
    /// Reverse path, empty for the null sender `<>`
    pub sender: String,
    pub recipients: Vec<String>,
    pub data: Vec<String>,
}

/// State and envelope of a single SMTP connection
#[derive(Debug)]
pub struct SmtpSession {
    /// Current state of the session
    pub state: SmtpState,
    /// Client domain from HELO/EHLO
    pub client_domain: Option<String>,
    /// Reverse path from MAIL FROM
    pub sender: Option<String>,
    /// Forward paths from RCPT TO
    pub recipients: Vec<String>,
    /// Message lines collected during DATA, dot-unstuffed
    pub data: Vec<String>,
    /// Bytes collected during DATA, counting CRLF
    pub data_size: usize,
    /// First limit violation seen during DATA, reported at the terminator
    data_error: Option<SmtpError>,
}

impl SmtpSession {
    /// Create a session for a freshly accepted connection
    pub fn new() -> Self {
        Self {
            state: SmtpState::Connected,
            client_domain: None,
            sender: None,
            recipients: Vec::new(),
            data: Vec::new(),
            data_size: 0,
            data_error: None,
        }
    }

    /// Whether incoming lines are message content rather than commands
    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::CollectingData
    }

    /// Abort the current transaction, keeping the HELO identity
    pub fn reset(&mut self) {
        self.state = if self.client_domain.is_some() {
            SmtpState::Ready
        } else {
            SmtpState::Connected
        };
        self.sender = None;
        self.recipients.clear();
        self.data.clear();
        self.data_size = 0;
        self.data_error = None;
    }

    /// Record the client domain from HELO/EHLO and start over
    pub fn set_client_domain(&mut self, domain: String) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain);
        self.reset();
        Ok(())
    }

    /// Start a new envelope with the given reverse path
    ///
    /// A transaction in progress is discarded.
    pub fn set_sender(&mut self, sender: String) -> Result<(), SmtpError> {
        check_path(&sender)?;
        self.reset();
        self.sender = Some(sender);
        self.state = SmtpState::SenderSet;
        Ok(())
    }

    /// Add a forward path to the envelope
    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        check_path(&recipient)?;
        if self.recipients.len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        self.recipients.push(recipient);
        self.state = SmtpState::RecipientSet;
        Ok(())
    }

    /// Switch to DATA collection
    pub fn start_data_mode(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RecipientSet {
            return Err(SmtpError::InvalidState(
                "DATA requires at least one RCPT".to_string(),
            ));
        }

        self.data.clear();
        self.data_size = 0;
        self.data_error = None;
        self.state = SmtpState::CollectingData;
        Ok(())
    }

    /// Collect one line of message content, without its line ending
    ///
    /// A leading `.` added by the client's dot-stuffing is removed. Once a
    /// limit is exceeded the rest of the message is read but not kept.
    pub fn add_data_line(&mut self, line: &str) {
        if self.data_error.is_some() {
            return;
        }

        let line = line.strip_prefix('.').unwrap_or(line);
        let wire_len = line.len() + 2;

        let violation = if wire_len > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            Some(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            })
        } else if self.data_size + wire_len > SmtpLimits::MAX_DATA_SIZE {
            Some(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            })
        } else {
            None
        };

        match violation {
            Some(error) => self.discard_data(error),
            None => {
                self.data.push(line.to_owned());
                self.data_size += wire_len;
            }
        }
    }

    /// Record a DATA line that was too long to be read in full
    pub fn reject_oversized_line(&mut self) {
        if self.data_error.is_none() {
            self.discard_data(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
        }
    }

    fn discard_data(&mut self, error: SmtpError) {
        self.data = Vec::new();
        self.data_error = Some(error);
    }

    /// End DATA collection and hand out the finished transaction
    ///
    /// The session is ready for the next MAIL afterwards, whether the
    /// message was within limits or not.
    pub fn finish_data_collection(&mut self) -> Result<MailTransaction, SmtpError> {
        if !self.in_data_mode() {
            return Err(SmtpError::InvalidState("no DATA in progress".to_string()));
        }

        let sender = self.sender.take().unwrap_or_default();
        let recipients = std::mem::take(&mut self.recipients);
        let data = std::mem::take(&mut self.data);
        let error = self.data_error.take();
        self.reset();

        match error {
            Some(error) => Err(error),
            None => Ok(MailTransaction {
                sender,
                recipients,
                data,
            }),
        }
    }

    /// Whether `command` is valid in the current state
    pub fn accepts(&self, command: &Command) -> bool {
        match (self.state, command) {
            (SmtpState::CollectingData, _) => false,
            (SmtpState::SenderSet | SmtpState::RecipientSet, Command::Rcpt(_)) => true,
            (_, Command::Rcpt(_)) => false,
            (state, Command::Data) => state == SmtpState::RecipientSet,
            _ => true,
        }
    }
}

fn check_path(path: &str) -> Result<(), SmtpError> {
    if path.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }
    Ok(())
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}
