//! Deduplicating work queue.
//!
//! A key that is already waiting is not queued twice; once a worker takes
//! it, the key may be queued again. Workers always read the latest cached
//! object, so collapsing pending duplicates loses nothing.

use futures::Stream;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Producer half of a work queue
#[derive(Debug)]
pub struct WorkQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    pending: Arc<Mutex<HashSet<T>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Consumer half of a work queue
#[derive(Debug)]
pub struct WorkReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    pending: Arc<Mutex<HashSet<T>>>,
}

/// Creates a connected queue pair.
pub fn work_queue<T>() -> (WorkQueue<T>, WorkReceiver<T>)
where
    T: Eq + Hash + Clone,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(Mutex::new(HashSet::new()));
    (
        WorkQueue {
            tx,
            pending: Arc::clone(&pending),
        },
        WorkReceiver { rx, pending },
    )
}

impl<T> WorkQueue<T>
where
    T: Eq + Hash + Clone,
{
    /// Queues `item` unless it is already waiting. Returns true if queued.
    pub fn add(&self, item: T) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.contains(&item) {
            return false;
        }
        if self.tx.send(item.clone()).is_err() {
            return false;
        }
        pending.insert(item);
        true
    }

    /// Number of items waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> WorkReceiver<T>
where
    T: Eq + Hash + Clone,
{
    /// Takes the next item. Returns `None` once every producer is dropped
    /// and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        let item = self.rx.recv().await?;
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&item);
        Some(item)
    }

    /// Yields keys as they are dequeued.
    pub fn into_stream(self) -> impl Stream<Item = T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut rx| async move {
            let item = rx.next().await?;
            Some((item, rx))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_pending_duplicates_collapse() {
        let (queue, mut rx) = work_queue();
        assert!(queue.add("a"));
        assert!(!queue.add("a"));
        assert!(queue.add("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(rx.next().await, Some("a"));
        assert_eq!(rx.next().await, Some("b"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_after_take() {
        let (queue, mut rx) = work_queue();
        queue.add(1);
        assert_eq!(rx.next().await, Some(1));
        assert!(queue.add(1));
        assert_eq!(rx.next().await, Some(1));
    }

    #[tokio::test]
    async fn test_stream_ends_when_producers_drop() {
        let (queue, rx) = work_queue();
        queue.add("x");
        queue.add("y");
        drop(queue);

        let items: Vec<_> = rx.into_stream().collect().await;
        assert_eq!(items, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_add_after_receiver_dropped() {
        let (queue, rx) = work_queue();
        drop(rx);
        assert!(!queue.add("a"));
        assert!(queue.is_empty());
    }
}
