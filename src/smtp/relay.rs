//! Forwarding of received messages to an upstream SMTP server

use crate::smtp::error::SmtpError;
use crate::smtp::session::MailTransaction;

use lettre::address::Envelope;
use lettre::transport::smtp::extension::ClientId;
use lettre::{Address, SmtpTransport, Transport};
use log::debug;

use std::time::Duration;

/// Where a forwarding server relays its messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Upstream host name or IP address
    pub host: String,
    /// Upstream SMTP port
    pub port: u16,
    /// Limit for each network operation of the upstream session
    pub timeout: Duration,
}

impl ForwardConfig {
    /// Default limit for upstream network operations
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Forward to `host:port` with the default timeout
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Use another timeout for upstream network operations
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Replays mail transactions against the configured upstream server
#[derive(Debug, Clone)]
pub struct Relay {
    config: ForwardConfig,
    /// Name announced in the upstream EHLO
    hello_name: String,
}

impl Relay {
    pub fn new(config: ForwardConfig, hello_name: &str) -> Self {
        Self {
            config,
            hello_name: hello_name.to_owned(),
        }
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Send `transaction` upstream in a fresh SMTP session
    ///
    /// The session is closed before this returns. Connection failures and
    /// non-2xx upstream replies are errors; nothing is retried.
    pub fn forward(&self, transaction: &MailTransaction) -> Result<(), SmtpError> {
        let envelope = envelope(transaction)?;
        let payload = transaction.data.join("\r\n");

        let transport = SmtpTransport::builder_dangerous(self.config.host.as_str())
            .port(self.config.port)
            .hello_name(ClientId::Domain(self.hello_name.clone()))
            .timeout(Some(self.config.timeout))
            .build();

        let response = transport.send_raw(&envelope, payload.as_bytes())?;
        debug!(
            "forwarded message to {}:{}: {:?}",
            self.config.host,
            self.config.port,
            response.code()
        );
        Ok(())
    }
}

/// Build the upstream envelope, mapping the null sender to no sender
fn envelope(transaction: &MailTransaction) -> Result<Envelope, SmtpError> {
    let sender = match transaction.sender.as_str() {
        "" => None,
        addr => Some(addr.parse::<Address>()?),
    };
    let recipients = transaction
        .recipients
        .iter()
        .map(|addr| addr.parse::<Address>())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Envelope::new(sender, recipients)?)
}
