// src/transport/memory/hub.rs

//! In-memory broker implementation.
//!
//! This file contains the concrete implementation of the domain-level
//! `BrokerConnection` and `BrokerChannel` traits using in-process data
//! structures only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    BrokerChannel,
    BrokerConnection,
    ChannelPtr,
    ConductorError,
    ConnectionPtr,
    ConsumeOptions,
    Deliveries,
    Delivery,
    Publishing,
    QueueOptions,
    Result,
    JSON_CONTENT_TYPE,
};

/// Shared message bus for the in-memory transport.
///
/// Simulates a broker within a single process. Every connection obtained from
/// the same hub sees the same queues, exactly as clients of one real broker
/// would.
///
/// # Semantics
///
/// - Queues keep a FIFO backlog while nobody consumes them.
/// - Consumers on the same queue compete; deliveries are handed out
///   round-robin.
/// - Closing a channel or connection closes the inboxes of its consumers.
/// - Publishing to a queue nobody declared drops the message, as the AMQP
///   default exchange does for non-mandatory publishes.
///
/// The hub also exposes a handful of fault-injection knobs used by tests.
///
/// # Example
///
/// ```
/// # use amqp_conductor::MemoryHub;
/// # async fn example() -> amqp_conductor::Result<()> {
/// let hub = MemoryHub::new();
/// let connection = hub.connect()?;
/// let channel = connection.open_channel().await?;
/// # Ok(())
/// # }
/// ```
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct HubState {
    queues: HashMap<String, QueueState>,
    closed_connections: HashSet<u64>,
    refuse_connections: bool,
    failing_publishes: usize,
    connection_closes: usize,
}

#[derive(Default)]
struct QueueState {
    options: Option<QueueOptions>,
    backlog: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
    cursor: usize,
}

struct Consumer {
    connection_id: u64,
    channel_id: u64,
    settings: ConsumerSettings,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Parameters a consumer was registered with, as seen by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Options passed to `consume`.
    pub options: ConsumeOptions,
    /// Prefetch limit of the consuming channel at registration time.
    /// Zero means unlimited.
    pub prefetch: u16,
}

impl QueueState {
    fn route(&mut self, mut delivery: Delivery) {
        // ---
        while !self.consumers.is_empty() {
            let idx = self.cursor % self.consumers.len();
            match self.consumers[idx].tx.send(delivery) {
                Ok(()) => {
                    self.cursor = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Inbox dropped; forget the consumer and try the next one.
                    self.consumers.remove(idx);
                    delivery = returned;
                }
            }
        }
        self.backlog.push_back(delivery);
    }

    fn attach(&mut self, consumer: Consumer) {
        // ---
        self.consumers.push(consumer);
        let pending: Vec<Delivery> = self.backlog.drain(..).collect();
        for delivery in pending {
            self.route(delivery);
        }
    }

    fn detach(&mut self, keep: impl Fn(&Consumer) -> bool) {
        self.consumers.retain(keep);
        self.cursor = 0;
    }
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        // ---
        Arc::new(Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Open a connection to this hub.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::Connection`] while the hub refuses
    /// connections (see [`refuse_connections`](Self::refuse_connections)).
    pub fn connect(self: &Arc<Self>) -> Result<ConnectionPtr> {
        // ---
        if self.lock().refuse_connections {
            return Err(ConductorError::Connection(
                "memory: connection refused".into(),
            ));
        }

        let id = self.next_id();
        log_debug!("memory: connection {id} opened");

        Ok(Arc::new(MemoryConnection {
            hub: Arc::clone(self),
            id,
            closed: AtomicBool::new(false),
        }))
    }

    /// Deliver `body` to `queue` as if another client had published it.
    ///
    /// The queue is created if it does not exist yet.
    pub fn inject(&self, queue: &str, body: impl Into<Bytes>) {
        // ---
        let delivery = Delivery {
            body: body.into(),
            content_type: Some(Arc::from(JSON_CONTENT_TYPE)),
        };
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .route(delivery);
    }

    /// Number of messages waiting in `queue` for a consumer.
    pub fn backlog_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.backlog.len())
    }

    /// Number of live consumers on `queue`.
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| {
            q.consumers.iter().filter(|c| !c.tx.is_closed()).count()
        })
    }

    /// Settings of every live consumer on `queue`, in registration order.
    pub fn consumer_settings(&self, queue: &str) -> Vec<ConsumerSettings> {
        self.lock().queues.get(queue).map_or_else(Vec::new, |q| {
            q.consumers
                .iter()
                .filter(|c| !c.tx.is_closed())
                .map(|c| c.settings)
                .collect()
        })
    }

    /// Options `queue` was declared with, if it has been declared.
    pub fn queue_options(&self, queue: &str) -> Option<QueueOptions> {
        self.lock().queues.get(queue).and_then(|q| q.options)
    }

    /// Cancel every consumer on `queue` from the broker side.
    pub fn drop_consumers(&self, queue: &str) {
        // ---
        if let Some(q) = self.lock().queues.get_mut(queue) {
            q.detach(|_| false);
        }
    }

    /// Make subsequent [`connect`](Self::connect) calls fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Reject the next `count` channel publishes with a broker error.
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Total number of `close()` calls made on connections of this hub.
    pub fn connection_closes(&self) -> usize {
        self.lock().connection_closes
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        lock_ignore_poison(&self.state)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct MemoryConnection {
    // ---
    hub: Arc<MemoryHub>,
    id: u64,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl BrokerConnection for MemoryConnection {
    // ---
    async fn open_channel(&self) -> Result<ChannelPtr> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(ConductorError::Broker("memory: connection closed".into()));
        }

        Ok(Arc::new(MemoryChannel {
            hub: Arc::clone(&self.hub),
            id: self.hub.next_id(),
            connection_id: self.id,
            closed: AtomicBool::new(false),
            prefetch: AtomicU16::new(0),
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        let mut state = self.hub.lock();
        state.connection_closes += 1;

        if !self.closed.swap(true, Ordering::AcqRel) {
            state.closed_connections.insert(self.id);
            for queue in state.queues.values_mut() {
                queue.detach(|c| c.connection_id != self.id);
            }
            log_debug!("memory: connection {} closed", self.id);
        }
        Ok(())
    }
}

struct MemoryChannel {
    // ---
    hub: Arc<MemoryHub>,
    id: u64,
    connection_id: u64,
    closed: AtomicBool,
    prefetch: AtomicU16,
}

impl MemoryChannel {
    fn ensure_open(&self, state: &HubState) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(ConductorError::Broker("memory: channel closed".into()));
        }
        if state.closed_connections.contains(&self.connection_id) {
            return Err(ConductorError::Broker("memory: connection closed".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerChannel for MemoryChannel {
    // ---
    async fn declare_queue(&self, queue: &str, opts: QueueOptions) -> Result<()> {
        // ---
        let mut state = self.hub.lock();
        self.ensure_open(&state)?;

        let entry = state.queues.entry(queue.to_string()).or_default();
        match entry.options {
            Some(existing) if existing != opts => Err(ConductorError::Broker(format!(
                "memory: queue {queue} redeclared with different options"
            ))),
            _ => {
                entry.options = Some(opts);
                Ok(())
            }
        }
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        // ---
        let state = self.hub.lock();
        self.ensure_open(&state)?;
        self.prefetch.store(count, Ordering::Relaxed);
        Ok(())
    }

    async fn consume(&self, queue: &str, opts: ConsumeOptions) -> Result<Deliveries> {
        // ---
        let mut state = self.hub.lock();
        self.ensure_open(&state)?;

        let entry = state
            .queues
            .get_mut(queue)
            .filter(|q| q.options.is_some())
            .ok_or_else(|| ConductorError::Broker(format!("memory: no queue {queue}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let settings = ConsumerSettings {
            options: opts,
            prefetch: self.prefetch.load(Ordering::Relaxed),
        };
        entry.attach(Consumer {
            connection_id: self.connection_id,
            channel_id: self.id,
            settings,
            tx,
        });

        log_debug!(
            "memory: channel {} consuming {queue} ({settings:?})",
            self.id
        );
        Ok(Deliveries { inbox: rx })
    }

    async fn publish(&self, queue: &str, msg: Publishing) -> Result<()> {
        // ---
        let mut state = self.hub.lock();
        self.ensure_open(&state)?;

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(ConductorError::Broker(format!(
                "memory: publish to {queue} rejected"
            )));
        }

        match state.queues.get_mut(queue) {
            Some(q) => q.route(Delivery {
                body: msg.body,
                content_type: Some(msg.content_type),
            }),
            None => log_debug!("memory: dropped message for undeclared queue {queue}"),
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.hub.lock();
            for queue in state.queues.values_mut() {
                queue.detach(|c| c.channel_id != self.id);
            }
        }
        Ok(())
    }
}
