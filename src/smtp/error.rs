//! Error types for the SMTP server

use thiserror::Error;

/// Everything that can go wrong while serving a client
///
/// The `Display` text of protocol errors doubles as the reply text.
#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error, command unrecognized")]
    InvalidCommand,

    #[error("Bad sequence of commands: {0}")]
    InvalidState(String),

    #[error("Syntax error: {0}")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("relay session failed: {0}")]
    Relay(#[from] lettre::transport::smtp::Error),

    #[error("relay envelope rejected: {0}")]
    RelayEnvelope(#[from] lettre::error::Error),

    #[error("relay address rejected: {0}")]
    RelayAddress(#[from] lettre::address::AddressError),
}

/// Size limits from RFC 821 section 4.5.3
pub struct SmtpLimits;

impl SmtpLimits {
    /// Local part of a mailbox
    pub const USER_MAX_LENGTH: usize = 64;
    /// Domain of a mailbox or of HELO/EHLO
    pub const DOMAIN_MAX_LENGTH: usize = 64;
    /// Whole reverse or forward path
    pub const PATH_MAX_LENGTH: usize = 256;
    /// Command line, CRLF included
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;
    /// Reply line, CRLF included
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;
    /// DATA line, CRLF included
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;
    pub const MAX_RECIPIENTS: usize = 100;
    /// Whole message held in memory, CRLFs included
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
}

impl SmtpError {
    /// Reply code reported to the client
    pub fn to_response_code(&self) -> u16 {
        match self {
            SmtpError::Io(_) => 421,
            SmtpError::InvalidCommand | SmtpError::LineTooLong { .. } => 500,
            SmtpError::InvalidSyntax(_)
            | SmtpError::PathTooLong { .. }
            | SmtpError::DomainTooLong { .. }
            | SmtpError::UserTooLong { .. } => 501,
            SmtpError::InvalidState(_) => 503,
            SmtpError::TooManyRecipients { .. } | SmtpError::TooMuchData { .. } => 552,
            SmtpError::Relay(_) | SmtpError::RelayEnvelope(_) | SmtpError::RelayAddress(_) => {
                451
            }
        }
    }

    /// Reply text reported to the client
    ///
    /// Transport and relay details stay in the server log.
    pub fn to_response_message(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::Relay(_) | SmtpError::RelayEnvelope(_) | SmtpError::RelayAddress(_) => {
                "Requested action aborted: forwarding failed".to_string()
            }
            other => other.to_string(),
        }
    }
}
