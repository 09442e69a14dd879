//! Broker implementations.
//!
//! This module provides concrete implementations of the domain-level broker
//! traits and the URI-driven [`dial`] entry point used by the conductor.
//!
//! Domain code must not depend on broker-specific types.

mod amqp;
mod memory;

use std::sync::Arc;

use crate::{ConductorError, ConnectionPtr, Result};

pub use memory::{ConsumerSettings, MemoryHub};

#[cfg(feature = "transport_lapin")]
pub use amqp::connect_lapin;

/// URI scheme selecting the in-process broker.
pub const MEMORY_SCHEME: &str = "memory://";

/// Dial the broker named by `uri`.
///
/// - `memory://...` connects to `hub`, or to a fresh private hub if none is
///   given.
/// - `amqp://...` and `amqps://...` dial a real broker (requires the
///   `transport_lapin` feature).
///
/// # Errors
///
/// Returns [`ConductorError::Connection`] for an empty URI, an unrecognized
/// scheme, or a failed dial.
pub async fn dial(uri: &str, hub: Option<Arc<MemoryHub>>) -> Result<ConnectionPtr> {
    // ---
    if uri.trim().is_empty() {
        return Err(ConductorError::Connection("empty connection target".into()));
    }

    if uri.starts_with(MEMORY_SCHEME) {
        return hub.unwrap_or_else(MemoryHub::new).connect();
    }

    if uri.starts_with("amqp://") || uri.starts_with("amqps://") {
        #[cfg(feature = "transport_lapin")]
        {
            return connect_lapin(uri).await;
        }

        #[cfg(not(feature = "transport_lapin"))]
        {
            return Err(ConductorError::Connection(
                "AMQP support requires the transport_lapin feature".into(),
            ));
        }
    }

    Err(ConductorError::Connection(format!(
        "unrecognized connection scheme: {uri}, valid schemes: memory://, amqp://, amqps://"
    )))
}
