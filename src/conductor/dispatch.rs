// src/conductor/dispatch.rs

//! Result dispatch loop.
//!
//! Consumes the conductor's private reply queue and hands each result to the
//! slot registered for its electron. Every result is decoded and delivered in
//! its own task, bounded by a semaphore, so one slow delivery never holds up
//! the rest of the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::correlation::CorrelationTable;
use super::inbound::PayloadStream;
use crate::{log_debug, log_error, Properties};

pub(crate) struct Dispatcher {
    // ---
    pub label: String,
    pub correlations: Arc<CorrelationTable>,
    pub root: CancellationToken,
    pub fatal: Arc<AtomicBool>,
    pub limit: usize,
}

impl Dispatcher {
    /// Drive `results` until the root context ends or the stream is exhausted.
    ///
    /// Exhaustion without cancellation means no result can ever be matched
    /// again: it is logged as an error, recorded as fatal, and the whole
    /// conductor is cancelled. Either way every outstanding slot is released
    /// on exit.
    pub async fn run(self, mut results: PayloadStream) {
        // ---
        let label = self.label;
        let limiter = Arc::new(Semaphore::new(self.limit));

        log_debug!("[{label}] result dispatch started");

        loop {
            let raw = tokio::select! {
                _ = self.root.cancelled() => break,
                raw = results.recv() => raw,
            };

            let Some(raw) = raw else {
                if !self.root.is_cancelled() {
                    log_error!("[{label}] result stream closed; no further results can be delivered");
                    self.fatal.store(true, Ordering::Release);
                    self.root.cancel();
                }
                break;
            };

            let permit = tokio::select! {
                _ = self.root.cancelled() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let correlations = self.correlations.clone();
            let label = label.clone();
            tokio::spawn(async move {
                let _permit = permit;
                deliver(&label, &correlations, raw);
            });
        }

        let _released = self.correlations.close_all();
        log_debug!("[{label}] result dispatch stopped, {_released} pending results released");
    }
}

fn deliver(label: &str, correlations: &CorrelationTable, raw: Bytes) {
    // ---
    let properties: Properties = match serde_json::from_slice(&raw) {
        Ok(properties) => properties,
        Err(e) => {
            log_error!("[{label}] unable to parse result: {e}");
            return;
        }
    };

    let electron_id = properties.electron_id.clone();
    if correlations.fulfill(properties) {
        log_debug!("[{label}] delivered result for electron [{electron_id}]");
    } else {
        log_debug!("[{label}] no pending electron [{electron_id}], result dropped");
    }
}
