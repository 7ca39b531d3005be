//! SMTP command parsing and execution against a session

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

/// A syntactically valid command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// Reverse path, empty for the null sender `<>`
    Mail(String),
    Rcpt(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl Command {
    /// Parse one command line, without its CRLF
    ///
    /// Only syntax is checked here; whether the command fits the session
    /// state is decided by [`SmtpCommandHandler::execute`].
    pub fn parse(line: &str) -> Result<Self, SmtpError> {
        if line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let line = line.trim();
        let (verb, args) = match line.split_once(char::is_whitespace) {
            Some((verb, args)) => (verb, args.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => greeting_domain(verb, args).map(Self::Helo),
            "EHLO" => greeting_domain(verb, args).map(Self::Ehlo),
            "MAIL" => {
                let sender = parse_path(args, "FROM:")?;
                if !sender.is_empty() {
                    check_address(sender)?;
                }
                Ok(Self::Mail(sender.to_owned()))
            }
            "RCPT" => match parse_path(args, "TO:")? {
                "" => Err(SmtpError::InvalidSyntax(
                    "recipient address cannot be empty".to_string(),
                )),
                recipient => {
                    check_address(recipient)?;
                    Ok(Self::Rcpt(recipient.to_owned()))
                }
            },
            "DATA" => no_argument(Self::Data, args),
            "RSET" => no_argument(Self::Rset, args),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            _ => Err(SmtpError::InvalidCommand),
        }
    }

    /// Upper-case command keyword
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Helo(_) => "HELO",
            Self::Ehlo(_) => "EHLO",
            Self::Mail(_) => "MAIL",
            Self::Rcpt(_) => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }
}

fn greeting_domain(verb: &str, args: &str) -> Result<String, SmtpError> {
    args.split_whitespace()
        .next()
        .map(str::to_owned)
        .ok_or_else(|| {
            SmtpError::InvalidSyntax(format!("{} requires a domain", verb.to_ascii_uppercase()))
        })
}

fn no_argument(command: Command, args: &str) -> Result<Command, SmtpError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(SmtpError::InvalidSyntax(format!(
            "{} takes no arguments",
            command.verb()
        )))
    }
}

/// Extract the address between angle brackets after `keyword`
///
/// ESMTP parameters following the closing bracket are ignored.
fn parse_path<'l>(args: &'l str, keyword: &str) -> Result<&'l str, SmtpError> {
    let rest = args
        .get(..keyword.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(keyword))
        .map(|_| args[keyword.len()..].trim_start())
        .ok_or_else(|| SmtpError::InvalidSyntax(format!("expected '{keyword}<address>'")))?;

    rest.strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .map(|(addr, _params)| addr.trim())
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("address must be enclosed in angle brackets".to_string())
        })
}

/// Check the shape of a mailbox and the RFC 821 length limits of its parts
fn check_address(addr: &str) -> Result<(), SmtpError> {
    if addr.len() > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    let (local, domain) = addr
        .rsplit_once('@')
        .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
        .ok_or_else(|| SmtpError::InvalidSyntax(format!("malformed address '{addr}'")))?;

    if local.len() > SmtpLimits::USER_MAX_LENGTH {
        Err(SmtpError::UserTooLong {
            max: SmtpLimits::USER_MAX_LENGTH,
        })
    } else if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        })
    } else {
        Ok(())
    }
}

/// Applies commands to a session and builds the replies
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    /// Handler replying as `hostname`
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    /// Parse then execute one command line
    pub fn process_command(
        &self,
        line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let command = Command::parse(line)?;
        self.execute(command, session)
    }

    /// Apply `command` to the session, or fail with 503 when it is out of order
    pub fn execute(
        &self,
        command: Command,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        if !session.accepts(&command) {
            let reason = match command {
                Command::Rcpt(_) => "RCPT requires MAIL first",
                Command::Data => "DATA requires at least one RCPT",
                _ => "command not allowed while receiving data",
            };
            return Err(SmtpError::InvalidState(reason.to_string()));
        }

        match command {
            Command::Helo(domain) => {
                session.set_client_domain(domain.clone())?;
                Ok(SmtpResponse::helo(self.hostname, &domain))
            }
            Command::Ehlo(domain) => {
                session.set_client_domain(domain.clone())?;
                Ok(SmtpResponse::ehlo(self.hostname, &domain))
            }
            Command::Mail(sender) => {
                session.set_sender(sender)?;
                Ok(SmtpResponse::ok())
            }
            Command::Rcpt(recipient) => {
                session.add_recipient(recipient)?;
                Ok(SmtpResponse::ok())
            }
            Command::Data => {
                session.start_data_mode()?;
                Ok(SmtpResponse::data_start())
            }
            Command::Rset => {
                session.reset();
                Ok(SmtpResponse::ok())
            }
            Command::Noop => Ok(SmtpResponse::ok()),
            Command::Quit => Ok(SmtpResponse::quit()),
        }
    }
}
