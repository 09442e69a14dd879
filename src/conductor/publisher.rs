// src/conductor/publisher.rs

//! Publisher pool.
//!
//! One hand-off channel and one background publishing task per destination
//! queue, created on first use and cached for the conductor's lifetime. The
//! task owns a dedicated broker channel, so publish order to a destination is
//! the order payloads were handed off.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_error,
    ConductorError,
    ConnectionPtr,
    Publishing,
    QueueOptions,
    Result,
};

pub(crate) struct PublisherPool {
    // ---
    connection: ConnectionPtr,
    root: CancellationToken,
    buffer: usize,
    publishers: Mutex<HashMap<String, mpsc::Sender<Bytes>>>,
}

impl PublisherPool {
    // ---

    pub fn new(connection: ConnectionPtr, root: CancellationToken, buffer: usize) -> Self {
        // ---
        Self {
            connection,
            root,
            buffer,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Hand-off channel for `queue`, starting its publisher on first use.
    pub fn publisher(&self, queue: &str) -> mpsc::Sender<Bytes> {
        // ---
        let mut publishers = lock_ignore_poison(&self.publishers);

        if let Some(tx) = publishers.get(queue) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        publishers.insert(queue.to_string(), tx.clone());

        tokio::spawn(run_publisher(
            self.connection.clone(),
            self.root.clone(),
            queue.to_string(),
            rx,
        ));

        tx
    }

    /// Hand `payload` to the publisher for `queue`.
    ///
    /// # Errors
    ///
    /// - [`ConductorError::Cancelled`] if `ctx` is cancelled first
    /// - [`ConductorError::Closed`] if the conductor shuts down first
    /// - [`ConductorError::PublisherClosed`] if the destination's publisher
    ///   has stopped
    pub async fn publish(&self, ctx: &CancellationToken, queue: &str, payload: Bytes) -> Result<()> {
        // ---
        let tx = self.publisher(queue);

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ConductorError::Cancelled),
            _ = self.root.cancelled() => Err(ConductorError::Closed),
            sent = tx.send(payload) => {
                sent.map_err(|_| ConductorError::PublisherClosed(queue.to_string()))
            }
        }
    }

    /// Number of destinations with a running (or once started) publisher.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.publishers).len()
    }
}

async fn run_publisher(
    connection: ConnectionPtr,
    root: CancellationToken,
    queue: String,
    mut rx: mpsc::Receiver<Bytes>,
) {
    // ---
    let channel = match connection.open_channel().await {
        Ok(channel) => channel,
        Err(e) => {
            log_error!("publisher for {queue} could not open a channel: {e}");
            return;
        }
    };

    if let Err(e) = channel.declare_queue(&queue, QueueOptions::durable()).await {
        log_error!("publisher for {queue} could not declare the queue: {e}");
    }

    log_debug!("publisher started for {queue}");

    loop {
        let payload = tokio::select! {
            _ = root.cancelled() => break,
            payload = rx.recv() => payload,
        };

        let Some(payload) = payload else {
            break;
        };

        // A failed publish loses that message only; keep serving the queue.
        if let Err(e) = channel.publish(&queue, Publishing::json(payload)).await {
            log_error!("publish to {queue} failed: {e}");
        }
    }

    let _ = channel.close().await;
    log_debug!("publisher stopped for {queue}");
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{ConsumeOptions, MemoryHub, JSON_CONTENT_TYPE};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn consumer(hub: &Arc<MemoryHub>, queue: &str) -> crate::Deliveries {
        let channel = hub.connect().unwrap().open_channel().await.unwrap();
        channel.declare_queue(queue, QueueOptions::durable()).await.unwrap();
        channel.consume(queue, ConsumeOptions::auto_ack()).await.unwrap()
    }

    #[tokio::test]
    async fn test_publisher_is_cached_per_queue() {
        // ---
        let hub = MemoryHub::new();
        let pool = PublisherPool::new(hub.connect().unwrap(), CancellationToken::new(), 4);

        let a = pool.publisher("alpha");
        let b = pool.publisher("alpha");
        let _c = pool.publisher("beta");

        assert!(a.same_channel(&b));
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_publish_preserves_order_and_content_type() {
        // ---
        let hub = MemoryHub::new();
        let mut deliveries = consumer(&hub, "alpha").await;
        let pool = PublisherPool::new(hub.connect().unwrap(), CancellationToken::new(), 4);
        let ctx = CancellationToken::new();

        for n in 0..10 {
            pool.publish(&ctx, "alpha", Bytes::from(format!("{n}"))).await.unwrap();
        }

        for n in 0..10 {
            let d = timeout(Duration::from_secs(1), deliveries.inbox.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(d.body, Bytes::from(format!("{n}")));
            assert_eq!(d.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        }
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_stop_publisher() {
        // ---
        let hub = MemoryHub::new();
        let mut deliveries = consumer(&hub, "alpha").await;
        let pool = PublisherPool::new(hub.connect().unwrap(), CancellationToken::new(), 4);
        let ctx = CancellationToken::new();

        hub.fail_next_publishes(1);
        pool.publish(&ctx, "alpha", Bytes::from("lost")).await.unwrap();
        pool.publish(&ctx, "alpha", Bytes::from("kept")).await.unwrap();

        let d = timeout(Duration::from_secs(1), deliveries.inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.body, Bytes::from("kept"));
    }

    #[tokio::test]
    async fn test_publish_respects_cancellation() {
        // ---
        let hub = MemoryHub::new();
        let root = CancellationToken::new();
        let pool = PublisherPool::new(hub.connect().unwrap(), root.clone(), 1);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let res = pool.publish(&ctx, "alpha", Bytes::from("x")).await;
        assert!(matches!(res, Err(ConductorError::Cancelled)));

        root.cancel();
        let res = pool.publish(&CancellationToken::new(), "alpha", Bytes::from("x")).await;
        assert!(matches!(res, Err(ConductorError::Closed)));
    }

    #[tokio::test]
    async fn test_publisher_without_channel_reports_closed() {
        // ---
        let hub = MemoryHub::new();
        let connection = hub.connect().unwrap();
        connection.close().await.unwrap();
        let pool = PublisherPool::new(connection, CancellationToken::new(), 1);
        let ctx = CancellationToken::new();

        // The first payload may still fit in the buffer before the task exits.
        let _ = pool.publish(&ctx, "alpha", Bytes::from("x")).await;
        let res = timeout(Duration::from_secs(1), async {
            loop {
                if let Err(e) = pool.publish(&ctx, "alpha", Bytes::from("x")).await {
                    return e;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(res, ConductorError::PublisherClosed(q) if q == "alpha"));
    }
}
