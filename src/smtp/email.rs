//! Email data structures and functionality

/// A message received by the SMTP server, parsed into its parts
///
/// Records are produced by [`crate::parser::parse_message`] once the
/// DATA phase of a transaction completes and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Email {
    /// Body text lines, empty when the message had no non-blank content
    pub body: Vec<String>,

    /// Value of the Subject header, `""` when absent
    pub subject: String,

    /// Addresses listed in the From header, in order
    pub from: Vec<String>,

    /// Addresses listed in the To header, in order
    pub to: Vec<String>,

    /// Every header of the message and of its MIME parts, as `Name: Value`
    pub headers: Vec<String>,
}

impl Email {
    /// Create a new email
    pub fn new(
        body: Vec<String>,
        subject: String,
        from: Vec<String>,
        to: Vec<String>,
        headers: Vec<String>,
    ) -> Self {
        Self {
            body,
            subject,
            from,
            to,
            headers,
        }
    }

    /// Check if this email was addressed to a specific recipient
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.to.iter().any(|addr| addr == recipient)
    }

    /// Check if this email was sent from a specific sender
    pub fn is_from_sender(&self, sender: &str) -> bool {
        self.from.iter().any(|addr| addr == sender)
    }

    /// Get the value of the first header with the given name
    ///
    /// Names are compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|header| {
            let (field, value) = header.split_once(':')?;
            field
                .trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim_start())
        })
    }

    /// Get the body lines joined with `\n`
    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }

    /// Check if the email contains a specific text in headers or body
    pub fn contains_text(&self, text: &str) -> bool {
        self.headers.iter().any(|h| h.contains(text)) || self.body.iter().any(|l| l.contains(text))
    }
}
