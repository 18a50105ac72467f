//! Message Queue: a bounded FIFO between ingress and the Egress Worker,
//! with an explicit close operation used to coordinate shutdown drain.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flume::{bounded, Receiver, Sender};

use crate::{Error, Message};

/// Bounded FIFO shared by ingress producers and the single Egress Worker
/// consumer. `offer` blocks the caller under backpressure; `close` is
/// idempotent and, combined with the channel being drained, lets the
/// worker finish without blocking indefinitely.
pub struct MessageQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    closed: Arc<AtomicBool>,
}

impl MessageQueue {
    /// Creates a queue with room for `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        MessageQueue {
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current number of messages waiting to be received.
    pub fn depth(&self) -> usize {
        self.rx.len()
    }

    /// Offers `message`, blocking (asynchronously) until space is
    /// available. Returns [`Error::QueueClosed`] if the queue has already
    /// been closed.
    pub async fn offer(&self, message: Message) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::QueueClosed);
        }
        self.tx
            .send_async(message)
            .await
            .map_err(|_| Error::QueueClosed)
    }

    /// Receives the next message, waiting if none are available yet.
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn receive(&self) -> Option<Message> {
        self.rx.recv_async().await.ok()
    }

    /// Drains every message currently buffered without waiting, for use
    /// during shutdown after [`MessageQueue::close`].
    pub fn drain(&self) -> Vec<Message> {
        self.rx.try_iter().collect()
    }

    /// Marks the queue closed: further `offer` calls fail immediately.
    /// Already-queued messages remain available to `receive`/`drain`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`MessageQueue::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(data: &str) -> Message {
        Message {
            data: Some(data.into()),
            msg_type: "publish".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn offer_then_receive_preserves_order() {
        let queue = MessageQueue::new(10);
        queue.offer(msg("a")).await.unwrap();
        queue.offer(msg("b")).await.unwrap();
        assert_eq!(queue.receive().await.unwrap().data.unwrap(), "a");
        assert_eq!(queue.receive().await.unwrap().data.unwrap(), "b");
    }

    #[tokio::test]
    async fn closed_queue_rejects_new_offers() {
        let queue = MessageQueue::new(10);
        queue.close();
        let err = queue.offer(msg("a")).await.unwrap_err();
        assert!(matches!(err, Error::QueueClosed));
    }

    #[tokio::test]
    async fn close_does_not_discard_already_queued_messages() {
        let queue = MessageQueue::new(10);
        queue.offer(msg("a")).await.unwrap();
        queue.close();
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].data.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn depth_reflects_buffered_count() {
        let queue = MessageQueue::new(10);
        assert_eq!(queue.depth(), 0);
        queue.offer(msg("a")).await.unwrap();
        assert_eq!(queue.depth(), 1);
        let _ = queue.receive().await;
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn offer_blocks_until_space_is_available() {
        let queue = Arc::new(MessageQueue::new(1));
        queue.offer(msg("a")).await.unwrap();

        let producer_queue = queue.clone();
        let producer = tokio::spawn(async move { producer_queue.offer(msg("b")).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        let _ = queue.receive().await;
        producer.await.unwrap().unwrap();
    }
}
