//! SMTP server implementation

pub mod commands;
pub mod email;
pub mod error;
pub mod notifier;
pub mod parser;
pub mod relay;
pub mod response;
pub mod server;
pub mod session;
pub mod store;

pub use email::Email;
pub use error::{SmtpError, SmtpLimits};
pub use notifier::{Notifier, Subscription};
pub use relay::ForwardConfig;
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use session::{MailTransaction, SmtpSession, SmtpState};
pub use store::EmailStore;
