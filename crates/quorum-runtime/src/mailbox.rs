use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use quorum_core::Envelope;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 10_000;

struct Inner {
    queue: VecDeque<Envelope>,
    closed: bool,
}

/// Bounded FIFO of messages for one agent.
///
/// `push` never blocks: a full or closed mailbox rejects the message.
/// `pop` waits up to the given timeout for a message. Closing puts the
/// mailbox into a drained state: the queue is emptied, pops return `None`
/// immediately, and pushes are rejected.
pub struct Mailbox {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue. Returns false when the mailbox is full or closed.
    pub fn push(&self, msg: Envelope) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed || inner.queue.len() >= self.capacity {
                return false;
            }
            inner.queue.push_back(msg);
        }
        self.notify.notify_one();
        true
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Envelope> {
        self.inner.lock().queue.pop_front()
    }

    /// Pop, waiting up to `timeout`. A zero timeout is a non-blocking pop.
    /// Returns `None` on timeout or when the mailbox is closed.
    pub async fn pop(&self, timeout: Duration) -> Option<Envelope> {
        if timeout.is_zero() {
            return self.try_pop();
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(msg) = inner.queue.pop_front() {
                    return Some(msg);
                }
                if inner.closed {
                    return None;
                }
            }
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.try_pop(),
            }
        }
    }

    /// Drain and close: pending messages are dropped, waiters wake up.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.queue.clear();
        }
        self.notify.notify_waiters();
    }

    /// Wake any waiter without delivering a message (used on stop so a
    /// blocked worker re-checks its stop flag promptly).
    pub fn nudge(&self) {
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
