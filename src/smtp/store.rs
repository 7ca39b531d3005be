//! In-memory storage of received emails

use crate::smtp::email::Email;

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe store of received emails, newest first
#[derive(Debug, Default)]
pub struct EmailStore {
    emails: Mutex<VecDeque<Email>>,
}

impl EmailStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an email in front of all previously stored ones
    pub fn add(&self, email: Email) {
        self.lock().push_front(email);
    }

    /// Get a snapshot of the stored emails, newest first
    pub fn get_emails(&self) -> Vec<Email> {
        self.lock().iter().cloned().collect()
    }

    /// Take every stored email, newest first, leaving the store empty
    pub fn get_emails_and_reset(&self) -> Vec<Email> {
        std::mem::take(&mut *self.lock()).into()
    }

    /// Number of stored emails
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no email
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the deque half-updated.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Email>> {
        self.emails.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn email(subject: &str) -> Email {
        Email {
            subject: subject.to_string(),
            ..Email::default()
        }
    }

    fn subjects(emails: &[Email]) -> Vec<&str> {
        emails.iter().map(|e| e.subject.as_str()).collect()
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = EmailStore::new();
        assert!(store.is_empty());
        assert!(store.get_emails().is_empty());
        assert!(store.get_emails_and_reset().is_empty());
    }

    #[test]
    fn test_newest_first() {
        let store = EmailStore::new();
        store.add(email("a"));
        store.add(email("b"));
        store.add(email("c"));

        assert_eq!(subjects(&store.get_emails()), vec!["c", "b", "a"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_get_emails_does_not_mutate() {
        let store = EmailStore::new();
        store.add(email("a"));

        assert_eq!(store.get_emails().len(), 1);
        assert_eq!(store.get_emails().len(), 1);
    }

    #[test]
    fn test_reset_drains() {
        let store = EmailStore::new();
        store.add(email("a"));
        store.add(email("b"));

        assert_eq!(subjects(&store.get_emails_and_reset()), vec!["b", "a"]);
        assert!(store.get_emails().is_empty());

        store.add(email("c"));
        assert_eq!(subjects(&store.get_emails()), vec!["c"]);
    }

    #[test]
    fn test_concurrent_add_and_reset_lose_nothing() {
        let store = Arc::new(EmailStore::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        store.add(email(&format!("{w}-{i}")));
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        for _ in 0..50 {
            drained.extend(store.get_emails_and_reset());
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained.extend(store.get_emails_and_reset());

        assert_eq!(drained.len(), 1000);
        let mut seen: Vec<_> = subjects(&drained);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 1000);
    }
}
