//! Correlated request/response over fire-and-forget message queues.
//!
//! This library adapts a publish/subscribe broker into a conductor for a task
//! dispatch framework: electrons (units of work) are published to a shared
//! inbound queue, and their results (properties) are matched back to the
//! caller through a private reply queue owned by each conductor.
//!
//! ```no_run
//! use amqp_conductor::{Conductor, Electron, Properties};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> amqp_conductor::Result<()> {
//! let conductor = amqp_conductor::connect("amqp://localhost:5672/%2f", "work").await?;
//! let ctx = CancellationToken::new();
//!
//! // Worker side: execute electrons and report their results.
//! let mut electrons = conductor.receive(&ctx).await;
//! while let Some(electron) = electrons.recv().await {
//!     let result = Properties::new(&electron.id).with_field("status", "ok");
//!     conductor.complete(&ctx, &result).await?;
//! }
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;
pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

mod conductor;
mod domain;
mod sync;
mod transport;

mod conductor_builder;
mod conductor_config;

mod error;

// Re-export main types
pub use conductor::BrokerConductor;
pub use conductor_builder::ConductorBuilder;
pub use conductor_config::{
    //
    ConductorConfig,
    DEFAULT_ADDRESS,
    DEFAULT_MAX_CONCURRENT_RESULTS,
    DEFAULT_PUBLISHER_BUFFER,
    ENV_CONDUCTOR_ID,
    ENV_INBOUND_QUEUE,
    ENV_URI,
};

pub use error::{ConductorError, Result};

pub use transport::{dial, ConsumerSettings, MemoryHub, MEMORY_SCHEME};

#[cfg(feature = "transport_lapin")]
pub use transport::connect_lapin;

// --- public re-exports
pub use domain::{
    //
    BrokerChannel,
    BrokerConnection,
    ChannelPtr,
    Conductor,
    ConductorPtr,
    ConnectionPtr,
    ConsumeOptions,
    Deliveries,
    Delivery,
    Electron,
    ElectronStream,
    Properties,
    Publishing,
    QueueOptions,
    ResultSlot,
    JSON_CONTENT_TYPE,
};

/// Connect to `connection_target` and start a conductor on `inbound_queue`.
///
/// # Errors
///
/// Returns [`ConductorError::Connection`] if the target is empty or the broker
/// cannot be dialed.
pub async fn connect(connection_target: &str, inbound_queue: &str) -> Result<BrokerConductor> {
    // ---
    ConductorBuilder::new()
        .uri(connection_target)
        .inbound_queue(inbound_queue)
        .build()
        .await
}
