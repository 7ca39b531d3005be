//! SMTP replies sent to clients

use crate::smtp::error::{SmtpError, SmtpLimits};

/// A reply line (or multiline reply) sent to an SMTP client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// The three digit reply code (e.g. 250, 354, 500)
    pub code: u16,
    /// The human-readable text of the first line
    pub message: String,
    /// Continuation lines of a multiline reply, such as EHLO capabilities
    pub extra_lines: Vec<String>,
}

impl SmtpResponse {
    /// Create a single line reply
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra_lines: Vec::new(),
        }
    }

    /// Create a multiline reply
    pub fn new_multiline(code: u16, message: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extra_lines: lines,
        }
    }

    /// 250 OK
    pub fn ok() -> Self {
        Self::new(250, "OK")
    }

    /// 250 reply acknowledging a delivered message
    pub fn queued() -> Self {
        Self::new(250, "OK: message accepted")
    }

    /// 220 greeting sent on connect
    pub fn greeting(hostname: &str) -> Self {
        Self::new(220, format!("{hostname} ESMTP mailcatch ready"))
    }

    /// 250 reply to HELO
    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new(250, format!("{hostname} Hello {client_domain}"))
    }

    /// 250 reply to EHLO, listing the supported extensions
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        Self::new_multiline(
            250,
            format!("{hostname} Hello {client_domain}"),
            vec![format!("SIZE {}", SmtpLimits::MAX_DATA_SIZE)],
        )
    }

    /// 354 reply to DATA
    pub fn data_start() -> Self {
        Self::new(354, "End data with <CR><LF>.<CR><LF>")
    }

    /// 221 reply to QUIT
    pub fn quit() -> Self {
        Self::new(221, "Bye")
    }

    /// The reply reporting `error` to the client
    pub fn from_error(error: &SmtpError) -> Self {
        Self::new(error.to_response_code(), error.to_response_message())
    }

    /// Format the reply for the wire, CRLF terminated
    pub fn format(&self) -> String {
        let mut lines = std::iter::once(&self.message)
            .chain(&self.extra_lines)
            .peekable();
        let mut result = String::new();

        while let Some(line) = lines.next() {
            let separator = if lines.peek().is_some() { '-' } else { ' ' };
            result.push_str(&format!("{}{separator}{line}\r\n", self.code));
        }
        result
    }

    /// Whether this is a 2xx reply
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Whether this is a 4xx or 5xx reply
    pub fn is_error(&self) -> bool {
        (400..600).contains(&self.code)
    }
}
