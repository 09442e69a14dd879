//! Broker-backed conductor.
//!
//! Turns fire-and-forget queue publishing into correlated request/response:
//!
//! - `receive` streams electrons from the shared inbound queue and remembers
//!   who sent each one.
//! - `send` registers a result slot, stamps the electron with this
//!   conductor's private reply queue, and publishes it to the inbound queue.
//! - `complete` publishes a result back to the reply queue of the electron's
//!   sender.
//! - A dispatch loop started at construction matches results arriving on the
//!   private reply queue with their slots.
//!
//! All background tasks observe one root cancellation token. `close` cancels
//! it; the connection is then closed exactly once and every outstanding slot
//! is released.

mod correlation;
mod dispatch;
mod inbound;
mod lifecycle;
mod publisher;
mod senders;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sync::linked_token;
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Conductor,
    ConductorConfig,
    ConductorError,
    ConnectionPtr,
    Electron,
    ElectronStream,
    Properties,
    Result,
    ResultSlot,
};

use correlation::CorrelationTable;
use dispatch::Dispatcher;
use inbound::{open_inbound, try_open_inbound};
use lifecycle::ConnectionLifecycle;
use publisher::PublisherPool;
use senders::SenderRegistry;

/// Conductor over a single broker connection.
///
/// Cheap to clone; all clones share the same connection and tables. The root
/// context is cancelled when [`close`](Conductor::close) is called or when
/// the last clone is dropped.
///
/// # Example
///
/// ```no_run
/// use amqp_conductor::{Conductor, Electron};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> amqp_conductor::Result<()> {
/// let conductor = amqp_conductor::connect("amqp://localhost:5672/%2f", "work").await?;
/// let ctx = CancellationToken::new();
///
/// let slot = conductor.send(&ctx, Electron::new("a1")).await?;
/// if let Ok(properties) = slot.await {
///     println!("{} finished: {:?}", properties.electron_id, properties.fields);
/// }
/// conductor.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrokerConductor {
    inner: Arc<Inner>,
}

struct Inner {
    conductor_id: String,
    inbound_queue: String,
    root: CancellationToken,
    fatal: Arc<AtomicBool>,

    lifecycle: ConnectionLifecycle,
    publishers: PublisherPool,
    correlations: Arc<CorrelationTable>,
    senders: Arc<SenderRegistry>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl BrokerConductor {
    /// Build a conductor on an already established connection.
    ///
    /// Starts the connection lifecycle task, opens the consumer on the
    /// private reply queue and starts the result dispatch loop before
    /// returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the reply queue
    /// consumer cannot be set up. The connection is closed in that case.
    pub async fn start(connection: ConnectionPtr, config: ConductorConfig) -> Result<Self> {
        // ---
        config.validate()?;

        let conductor_id = config
            .conductor_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let root = CancellationToken::new();
        let lifecycle =
            ConnectionLifecycle::start(connection.clone(), root.clone(), conductor_id.clone());

        let results = match try_open_inbound(&connection, root.clone(), &conductor_id).await {
            Ok(results) => results,
            Err(e) => {
                log_error!("[{conductor_id}] unable to consume reply queue: {e}");
                lifecycle.shutdown().await;
                return Err(e);
            }
        };

        let correlations = Arc::new(CorrelationTable::new());
        let fatal = Arc::new(AtomicBool::new(false));

        let dispatcher = Dispatcher {
            label: conductor_id.clone(),
            correlations: correlations.clone(),
            root: root.clone(),
            fatal: fatal.clone(),
            limit: config.max_concurrent_results,
        };
        tokio::spawn(dispatcher.run(results));

        log_info!(
            "[{conductor_id}] conductor started on inbound queue {}",
            config.inbound_queue
        );

        Ok(Self {
            inner: Arc::new(Inner {
                publishers: PublisherPool::new(connection, root.clone(), config.publisher_buffer),
                senders: Arc::new(SenderRegistry::new(config.sender_capacity)),
                conductor_id,
                inbound_queue: config.inbound_queue,
                root,
                fatal,
                lifecycle,
                correlations,
            }),
        })
    }

    /// Identifier of this conductor; also the name of its private reply queue.
    pub fn conductor_id(&self) -> &str {
        &self.inner.conductor_id
    }

    /// Shared queue electrons are sent to and received from.
    pub fn inbound_queue(&self) -> &str {
        &self.inner.inbound_queue
    }

    /// Number of sent electrons still waiting for a result.
    pub fn pending_results(&self) -> usize {
        self.inner.correlations.len()
    }

    /// Number of received electrons whose sender is remembered.
    pub fn known_senders(&self) -> usize {
        self.inner.senders.len()
    }

    /// Number of destination queues with a publisher.
    pub fn publisher_count(&self) -> usize {
        self.inner.publishers.len()
    }

    /// True once the root context has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// True once the broker connection has been closed.
    pub fn is_connection_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Close the conductor and wait until the broker connection is closed.
    pub async fn shutdown(&self) {
        self.inner.lifecycle.shutdown().await;
    }

    fn ensure_running(&self) -> Result<()> {
        // ---
        if self.inner.fatal.load(Ordering::Acquire) {
            return Err(ConductorError::ResultStreamClosed);
        }
        if self.inner.root.is_cancelled() {
            return Err(ConductorError::Closed);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Conductor for BrokerConductor {
    // ---
    async fn receive(&self, ctx: &CancellationToken) -> ElectronStream {
        // ---
        let inner = &self.inner;
        let scope = linked_token(&inner.root, ctx);
        let (tx, rx) = mpsc::channel(1);

        if scope.is_cancelled() {
            return rx;
        }

        let connection = inner.lifecycle.connection();
        let mut inbound = open_inbound(connection, scope.clone(), &inner.inbound_queue).await;
        let senders = inner.senders.clone();
        let label = inner.conductor_id.clone();

        tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    _ = scope.cancelled() => break,
                    raw = inbound.recv() => raw,
                };
                let Some(raw) = raw else {
                    break;
                };

                let electron = match decode_electron(&raw) {
                    Ok(electron) => electron,
                    Err(e) => {
                        log_error!("[{label}] unable to parse electron: {e}");
                        continue;
                    }
                };

                if electron.sender_id.is_empty() {
                    log_warn!("[{label}] electron [{}] carries no sender", electron.id);
                } else {
                    senders.record(&electron.id, &electron.sender_id);
                }

                let _id = electron.id.clone();
                tokio::select! {
                    _ = scope.cancelled() => break,
                    sent = tx.send(electron) => {
                        if sent.is_err() {
                            break;
                        }
                        log_debug!("[{label}] electron [{_id}] received by conductor");
                    }
                }
            }

            // Stops the inbound bridge if the reader went away first.
            scope.cancel();
        });

        rx
    }

    async fn send(&self, ctx: &CancellationToken, mut electron: Electron) -> Result<ResultSlot> {
        // ---
        self.ensure_running()?;
        let inner = &self.inner;

        electron.sender_id = inner.conductor_id.clone();
        let payload = Bytes::from(serde_json::to_vec(&electron)?);

        // Register before publishing so a fast reply always finds its slot.
        let (slot, ticket) = inner.correlations.register(&electron.id)?;

        if let Err(e) = inner.publishers.publish(ctx, &inner.inbound_queue, payload).await {
            inner.correlations.remove(&electron.id);
            log_error!(
                "[{}] error sending electron [{}] for processing: {e}",
                inner.conductor_id,
                electron.id
            );
            return Err(e);
        }

        log_debug!(
            "[{}] sent electron [{}] for processing",
            inner.conductor_id,
            electron.id
        );

        // The slot belongs to the caller's context: release it when that
        // context ends before a result does.
        let correlations = inner.correlations.clone();
        let ctx = ctx.clone();
        let _label = inner.conductor_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = ticket.settled.cancelled() => {}
                _ = ctx.cancelled() => {
                    if correlations.release(&electron.id, &ticket) {
                        log_debug!("[{_label}] electron [{}] abandoned by caller", electron.id);
                    }
                }
            }
        });

        Ok(slot)
    }

    async fn complete(&self, ctx: &CancellationToken, properties: &Properties) -> Result<()> {
        // ---
        let inner = &self.inner;

        let Some(sender_id) = inner.senders.lookup(&properties.electron_id) else {
            log_debug!(
                "[{}] no sender known for electron [{}]",
                inner.conductor_id,
                properties.electron_id
            );
            return Ok(());
        };

        let payload = Bytes::from(serde_json::to_vec(properties)?);

        match inner.publishers.publish(ctx, &sender_id, payload).await {
            Ok(()) => {
                log_debug!(
                    "[{}] sent results for electron [{}] to sender [{sender_id}]",
                    inner.conductor_id,
                    properties.electron_id
                );
                Ok(())
            }
            Err(e) => {
                log_error!(
                    "[{}] error publishing results for electron [{}]: {e}",
                    inner.conductor_id,
                    properties.electron_id
                );
                Err(e)
            }
        }
    }

    fn close(&self) {
        self.inner.lifecycle.cancel();
    }
}

fn decode_electron(raw: &[u8]) -> Result<Electron> {
    Ok(serde_json::from_slice(raw)?)
}
