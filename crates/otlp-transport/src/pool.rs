//! Bounded cache of idle connections.
//!
//! The pool is not an admission gate. When it is empty, `acquire` waits a
//! short, bounded time for a concurrent release and then hands out a fresh
//! connection; when it is full, `release` waits the same bounded time for
//! room and then closes the connection instead of growing.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::pin;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

/// How long `acquire` and `release` wait on each other before giving up.
pub(crate) const POOL_WAIT: Duration = Duration::from_millis(50);

/// Something the pool can hold.
pub(crate) trait Poolable: Send {
    /// Whether the item can still be used.
    fn is_open(&self) -> bool;

    /// Closes the item, releasing its resources.
    fn close(self);
}

struct Idle<C> {
    queue: VecDeque<C>,
    closed: bool,
}

enum Rejected<C> {
    Full(C),
    Closed(C),
}

pub(crate) struct ConnectionPool<C> {
    idle: Mutex<Idle<C>>,
    capacity: usize,
    wait: Duration,
    returned: Notify,
    vacated: Notify,
}

impl<C: Poolable> ConnectionPool<C> {
    /// Creates an empty pool holding at most `capacity` idle items
    /// (at least one).
    pub(crate) fn new(capacity: usize, wait: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            idle: Mutex::new(Idle {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            wait,
            returned: Notify::new(),
            vacated: Notify::new(),
        }
    }

    /// Takes an idle item, or builds a new one with `create` when none turns
    /// up within the wait window. Never fails.
    pub(crate) async fn acquire(&self, create: impl FnOnce() -> C) -> C {
        if let Some(conn) = self.try_pop() {
            return conn;
        }

        let mut returned = pin!(self.returned.notified());
        returned.as_mut().enable();

        if let Some(conn) = self.try_pop() {
            return conn;
        }

        if timeout(self.wait, returned).await.is_ok()
            && let Some(conn) = self.try_pop()
        {
            return conn;
        }

        create()
    }

    /// Returns an item to the pool, or closes it when `force_close` is set,
    /// the item is no longer open, the pool is closed, or no room frees up
    /// within the wait window.
    pub(crate) async fn release(&self, conn: C, force_close: bool) {
        if force_close || !conn.is_open() {
            conn.close();
            return;
        }

        let conn = match self.try_push(conn) {
            Ok(()) => return,
            Err(Rejected::Closed(conn)) => {
                conn.close();
                return;
            }
            Err(Rejected::Full(conn)) => conn,
        };

        let mut vacated = pin!(self.vacated.notified());
        vacated.as_mut().enable();

        let conn = match self.try_push(conn) {
            Ok(()) => return,
            Err(Rejected::Closed(conn)) => {
                conn.close();
                return;
            }
            Err(Rejected::Full(conn)) => conn,
        };

        let _ = timeout(self.wait, vacated).await;

        match self.try_push(conn) {
            Ok(()) => {}
            Err(Rejected::Full(conn)) => {
                tracing::debug!(capacity = self.capacity, "Pool full, closing connection");
                conn.close();
            }
            Err(Rejected::Closed(conn)) => conn.close(),
        }
    }

    /// Closes every idle item and refuses further pushes. Returns how many
    /// items were closed. Idempotent.
    pub(crate) fn drain_and_close(&self) -> usize {
        let drained: Vec<C> = {
            let mut idle = self.idle.lock();
            idle.closed = true;
            idle.queue.drain(..).collect()
        };

        let count = drained.len();
        for conn in drained {
            conn.close();
        }

        self.returned.notify_waiters();
        self.vacated.notify_waiters();
        count
    }

    /// Number of idle items currently held.
    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().queue.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `drain_and_close` has run.
    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.idle.lock().closed
    }

    fn try_pop(&self) -> Option<C> {
        loop {
            let conn = self.idle.lock().queue.pop_front()?;
            self.vacated.notify_one();

            if conn.is_open() {
                return Some(conn);
            }
            conn.close();
        }
    }

    fn try_push(&self, conn: C) -> Result<(), Rejected<C>> {
        {
            let mut idle = self.idle.lock();
            if idle.closed {
                return Err(Rejected::Closed(conn));
            }
            if idle.queue.len() >= self.capacity {
                return Err(Rejected::Full(conn));
            }
            idle.queue.push_back(conn);
        }

        self.returned.notify_one();
        Ok(())
    }
}
