//! Broadcast of received emails to subscribers

use crate::smtp::email::Email;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvError, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Email>,
}

/// Publishes every delivered email to all live subscriptions
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Notifier {
    /// Create a notifier without subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription
    ///
    /// It receives every email published from now on, and nothing that was
    /// published before.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push(Subscriber { id, sender });

        Subscription {
            id,
            receiver,
            notifier: Arc::clone(self),
        }
    }

    /// Send an email to every subscription
    ///
    /// Returns once the email has been handed to all of them.
    pub fn publish(&self, email: &Email) {
        self.lock()
            .retain(|subscriber| subscriber.sender.send(email.clone()).is_ok());
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().retain(|subscriber| subscriber.id != id);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle on a stream of received emails
///
/// Dropping the handle unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Email>,
    notifier: Arc<Notifier>,
}

impl Subscription {
    /// Block until the next email arrives
    pub fn recv(&self) -> Result<Email, RecvError> {
        self.receiver.recv()
    }

    /// Get the next email if one is already waiting
    pub fn try_recv(&self) -> Result<Email, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block until the next email arrives or the timeout expires
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Email, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Block until `count` emails arrived, in arrival order
    ///
    /// Returns what arrived so far once `timeout` has elapsed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Email> {
        let deadline = Instant::now() + timeout;
        let mut emails = Vec::with_capacity(count);

        while emails.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(email) => emails.push(email),
                Err(_) => break,
            }
        }

        emails
    }

    /// Stop receiving emails
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.id);
    }
}
