//! Single-producer/single-consumer bounded handoff channel with
//! close+fail semantics.
//!
//! Failures are a closed, message-carrying type rather than an ad-hoc error
//! object — the queue itself never needs to know the concrete transport
//! error type, only its message.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;

/// A queue failure, carrying only the message text of whatever transport
/// error triggered it.
#[derive(Debug, Clone)]
pub struct QueueFailure(Arc<str>);

impl QueueFailure {
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for QueueFailure {}

/// Outcome of [`AsyncQueue::next`].
#[derive(Debug)]
pub enum Next<T> {
    /// An item was available.
    Item(T),
    /// The queue is drained and was closed normally.
    End,
    /// The queue is drained (or was never populated) and failed.
    Failed(QueueFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Failed,
}

struct Inner<T> {
    items: VecDeque<T>,
    status: Status,
    failure: Option<QueueFailure>,
}

/// A single-producer/single-consumer handoff channel.
///
/// `push` always enqueues; direct hand-off is just what happens when a
/// parked reader is woken immediately afterwards. The distinction from an
/// unbounded buffer is the close/fail contract, not the storage strategy.
pub struct AsyncQueue<T> {
    inner: std::sync::Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AsyncQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(Inner {
                items: VecDeque::new(),
                status: Status::Open,
                failure: None,
            }),
            notify: Notify::new(),
        }
    }

    /// Pushes an item. Fails if the queue is closed or failed.
    pub fn push(&self, value: T) -> Result<(), QueueFailure> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        match inner.status {
            Status::Open => {
                inner.items.push_back(value);
                drop(inner);
                self.notify.notify_one();
                Ok(())
            }
            Status::Closed => Err(QueueFailure::new("queue is closed")),
            Status::Failed => Err(inner
                .failure
                .clone()
                .unwrap_or_else(|| QueueFailure::new("queue has failed"))),
        }
    }

    /// Non-blocking variant of [`AsyncQueue::next`]: returns `None` only
    /// when the queue is open and currently empty.
    pub fn try_next(&self) -> Option<Next<T>> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if let Some(item) = inner.items.pop_front() {
            return Some(Next::Item(item));
        }
        match inner.status {
            Status::Open => None,
            Status::Closed => Some(Next::End),
            Status::Failed => Some(Next::Failed(
                inner
                    .failure
                    .take()
                    .unwrap_or_else(|| QueueFailure::new("queue has failed")),
            )),
        }
    }

    /// Returns the next item, awaiting one if none is queued yet.
    pub async fn next(&self) -> Next<T> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if let Some(item) = inner.items.pop_front() {
                    return Next::Item(item);
                }
                match inner.status {
                    Status::Open => {}
                    Status::Closed => return Next::End,
                    Status::Failed => {
                        return Next::Failed(
                            inner
                                .failure
                                .take()
                                .unwrap_or_else(|| QueueFailure::new("queue has failed")),
                        )
                    }
                }
            }
            self.notify.notified().await;
        }
    }

    /// Idempotent. Items already queued are still delivered; no new items
    /// may be pushed. Wakes all blocked readers.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.status == Status::Open {
            inner.status = Status::Closed;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Latches the first failure. After a `fail`, no further items are
    /// delivered — unlike `close`, queued-but-undelivered items are
    /// dropped.
    pub fn fail(&self, failure: QueueFailure) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.status == Status::Open {
            inner.status = Status::Failed;
            inner.failure = Some(failure);
            inner.items.clear();
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn is_closed_or_failed(&self) -> bool {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner.status != Status::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn delivers_pushed_items_in_fifo_order() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        for expected in [1, 2, 3] {
            match q.next().await {
                Next::Item(v) => assert_eq!(v, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        q.push(1).unwrap();
        q.close();
        assert!(matches!(q.next().await, Next::Item(1)));
        assert!(matches!(q.next().await, Next::End));
        // push after close is rejected
        assert!(q.push(2).is_err());
    }

    #[tokio::test]
    async fn fail_drops_queued_items() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        q.push(1).unwrap();
        q.fail(QueueFailure::new("boom"));
        match q.next().await {
            Next::Failed(f) => assert_eq!(f.message(), "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn waiting_reader_is_woken_by_push() {
        let q = StdArc::new(AsyncQueue::<u32>::new());
        let q2 = q.clone();
        let reader = tokio::spawn(async move { q2.next().await });
        tokio::task::yield_now().await;
        q.push(7).unwrap();
        match reader.await.unwrap() {
            Next::Item(v) => assert_eq!(v, 7),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn waiting_reader_is_woken_by_close() {
        let q = StdArc::new(AsyncQueue::<u32>::new());
        let q2 = q.clone();
        let reader = tokio::spawn(async move { q2.next().await });
        tokio::task::yield_now().await;
        q.close();
        assert!(matches!(reader.await.unwrap(), Next::End));
    }

    #[tokio::test]
    async fn try_next_is_none_on_empty_open_queue() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        assert!(q.try_next().is_none());
    }

    #[tokio::test]
    async fn try_next_returns_item_without_blocking() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        q.push(1).unwrap();
        assert!(matches!(q.try_next(), Some(Next::Item(1))));
        assert!(q.try_next().is_none());
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let q: AsyncQueue<u32> = AsyncQueue::new();
        q.close();
        q.close();
        assert!(matches!(q.next().await, Next::End));
    }
}
