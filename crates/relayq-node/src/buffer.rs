//! Fixed-capacity FIFO buffer shared between admission and a worker.
//!
//! Producers never wait: [`BoundedBuffer::try_push`] fails immediately when
//! the buffer is full, pushing the pressure back to the caller. The consumer
//! suspends in [`BoundedBuffer::pop`] until something arrives.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Returned by [`BoundedBuffer::try_push`] when the buffer is full.
#[derive(Debug)]
pub struct BufferFull<T> {
    /// The rejected item, handed back to the caller.
    pub item: T,
    /// Number of resident items observed at rejection.
    pub len: usize,
}

/// A bounded FIFO queue.
///
/// The capacity check and the insert happen under the same lock, so the
/// number of resident items never exceeds the capacity even under concurrent
/// producers.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    available: Notify,
}

impl<T> BoundedBuffer<T> {
    /// Create an empty buffer holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident items right now.
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `item` unless the buffer is full. Never blocks.
    pub fn try_push(&self, item: T) -> Result<(), BufferFull<T>> {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.capacity {
                return Err(BufferFull {
                    len: queue.len(),
                    item,
                });
            }
            queue.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Remove the head item if there is one.
    pub fn try_pop(&self) -> Option<T> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Remove the head item, waiting until one is available.
    ///
    /// Cancel safe: dropping the future never loses an item.
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Remove every resident item.
    pub fn drain(&self) -> Vec<T> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_push_until_full() {
        let buffer = BoundedBuffer::new(2);
        assert!(buffer.try_push(1).is_ok());
        assert!(buffer.try_push(2).is_ok());

        let full = buffer.try_push(3).unwrap_err();
        assert_eq!(full.item, 3);
        assert_eq!(full.len, 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let buffer = BoundedBuffer::new(4);
        for i in 0..4 {
            buffer.try_push(i).unwrap();
        }
        let popped: Vec<_> = std::iter::from_fn(|| buffer.try_pop()).collect();
        assert_eq!(popped, vec![0, 1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_space_frees_after_pop() {
        let buffer = BoundedBuffer::new(1);
        buffer.try_push("a").unwrap();
        assert!(buffer.try_push("b").is_err());
        assert_eq!(buffer.try_pop(), Some("a"));
        assert!(buffer.try_push("b").is_ok());
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = BoundedBuffer::new(3);
        buffer.try_push('x').unwrap();
        buffer.try_push('y').unwrap();
        assert_eq!(buffer.drain(), vec!['x', 'y']);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let buffer = Arc::new(BoundedBuffer::new(1));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move { buffer.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        buffer.try_push(42).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn test_concurrent_producers_never_exceed_capacity() {
        let buffer = Arc::new(BoundedBuffer::new(10));
        let mut handles = Vec::new();
        for i in 0..50 {
            let buffer = Arc::clone(&buffer);
            handles.push(tokio::spawn(async move { buffer.try_push(i).is_ok() }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(buffer.len(), 10);
    }
}
