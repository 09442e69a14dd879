// src/domain/conductor.rs

//! The conductor contract consumed by the orchestration framework.

use crate::{Electron, Properties, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Stream of electrons received from a conductor's inbound queue.
pub type ElectronStream = mpsc::Receiver<Electron>;

/// Single-use handle to the result of a sent electron.
///
/// Resolves to `Ok(properties)` once the matching result arrives. Resolves to
/// an error if the conductor shuts down before that happens.
pub type ResultSlot = oneshot::Receiver<Properties>;

/// Request/response capability set for dispatching electrons.
///
/// Every operation takes the caller's cancellation token. Cancelling it ends
/// that call (or, for `receive`, the returned stream) without affecting other
/// callers. `close` tears down the whole conductor.
#[async_trait::async_trait]
pub trait Conductor: Send + Sync {
    // ---
    /// Open a fresh consumer on the inbound queue and stream decoded electrons.
    ///
    /// The stream ends when `ctx` or the conductor is cancelled, or when the
    /// broker closes the consumer.
    async fn receive(&self, ctx: &CancellationToken) -> ElectronStream;

    /// Dispatch an electron for processing and return a handle to its result.
    async fn send(&self, ctx: &CancellationToken, electron: Electron) -> Result<ResultSlot>;

    /// Route a finished electron's result back to whoever sent it.
    ///
    /// Completing an electron this conductor never received is a no-op.
    async fn complete(&self, ctx: &CancellationToken, properties: &Properties) -> Result<()>;

    /// Cancel the conductor's root context. Idempotent.
    fn close(&self);
}

/// Shared conductor pointer.
pub type ConductorPtr = Arc<dyn Conductor>;
