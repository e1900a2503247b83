//! Bounded, close-able blocking queue shared by worker inboxes and the coordinator event queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Why a non-blocking push did not enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError<T> {
    /// The queue is at capacity.
    Full(T),
    /// The queue was closed.
    Closed(T),
}

impl<T> PushError<T> {
    /// Returns the rejected item.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

/// Result of a pop bounded by a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped<T> {
    /// One item was dequeued.
    Item(T),
    /// Nothing arrived before the timeout.
    TimedOut,
    /// The queue is closed and empty.
    Closed,
}

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// FIFO queue with a capacity bound; consumers block on a condition variable.
///
/// Closing wakes every waiter. Items already queued remain poppable after close, so a consumer
/// sees `None` only once the queue is both closed and empty.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            changed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Creates a queue without a practical capacity bound.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::bounded(usize::MAX)
    }

    fn guard(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues without blocking.
    ///
    /// # Errors
    ///
    /// Hands the item back when the queue is full or closed.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.guard();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Enqueues, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Hands the item back when the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let state = self.guard();
        let mut state = self
            .changed
            .wait_while(state, |state| {
                !state.closed && state.items.len() >= self.capacity
            })
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Dequeues, waiting until an item arrives or the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let state = self.guard();
        let mut state = self
            .changed
            .wait_while(state, |state| !state.closed && state.items.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.changed.notify_all();
        }
        item
    }

    /// Dequeues without waiting; `TimedOut` means the queue is open but empty.
    pub fn try_pop(&self) -> Popped<T> {
        self.pop_timeout(Duration::ZERO)
    }

    /// Dequeues, waiting at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.guard();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.changed.notify_all();
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Popped::TimedOut;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Rejects further pushes and wakes every waiter.
    pub fn close(&self) {
        self.guard().closed = true;
        self.changed.notify_all();
    }

    /// Removes and returns every queued item.
    pub fn drain(&self) -> Vec<T> {
        let items = self.guard().items.drain(..).collect::<Vec<_>>();
        self.changed.notify_all();
        items
    }

}

#[cfg(test)]
mod tests {
    use super::{BlockingQueue, Popped, PushError};
    use googletest::prelude::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[rstest]
    fn try_push_respects_capacity_and_close() {
        let queue = BlockingQueue::bounded(2);
        assert_that!(&queue.try_push(1), eq(&Ok(())));
        assert_that!(&queue.try_push(2), eq(&Ok(())));
        assert_that!(&queue.try_push(3), eq(&Err(PushError::Full(3))));

        queue.close();
        assert_that!(&queue.try_push(4), eq(&Err(PushError::Closed(4))));
        assert_that!(queue.push(5), eq(Err(5)));
    }

    #[rstest]
    fn queued_items_survive_close_until_popped() {
        let queue = BlockingQueue::bounded(4);
        let _ = queue.try_push("a");
        queue.close();

        assert_that!(queue.pop(), eq(Some("a")));
        assert_that!(queue.pop(), eq(None));
        assert_that!(&queue.pop_timeout(Duration::from_millis(5)), eq(&Popped::Closed));
    }

    #[rstest]
    fn try_pop_distinguishes_empty_from_closed() {
        let queue = BlockingQueue::bounded(2);
        assert_that!(&queue.try_pop(), eq(&Popped::TimedOut));
        let _ = queue.try_push(7);
        assert_that!(&queue.try_pop(), eq(&Popped::Item(7)));
        queue.close();
        assert_that!(&queue.try_pop(), eq(&Popped::Closed));
    }

    #[rstest]
    fn pop_timeout_reports_timeout_on_empty_queue() {
        let queue = BlockingQueue::<u8>::unbounded();
        assert_that!(
            &queue.pop_timeout(Duration::from_millis(10)),
            eq(&Popped::TimedOut)
        );
    }

    #[rstest]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(BlockingQueue::<u8>::bounded(1));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        let popped = consumer.join().expect("consumer thread must not panic");
        assert_that!(popped, eq(None));
    }

    #[rstest]
    fn blocked_producer_resumes_after_pop() {
        let queue = Arc::new(BlockingQueue::bounded(1));
        let _ = queue.try_push(1);
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2))
        };
        assert_that!(queue.pop(), eq(Some(1)));
        assert_that!(
            producer.join().expect("producer thread must not panic"),
            eq(Ok(()))
        );
        assert_that!(&queue.drain(), eq(&vec![2]));
        assert_that!(&queue.try_pop(), eq(&Popped::TimedOut));
    }
}
