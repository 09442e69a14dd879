//! Crate-internal logging macros.
//!
//! With the `logging` feature every level goes to `tracing` under the
//! `amqp_conductor` target. Without it, errors and warnings are written to
//! stderr and the chattier levels compile to nothing.

#![allow(unused_macros)]

#[cfg(feature = "logging")]
mod imp {
    // ---
    macro_rules! log_error {
        ($($arg:tt)*) => { tracing::error!(target: "amqp_conductor", $($arg)*) };
    }

    macro_rules! log_warn {
        ($($arg:tt)*) => { tracing::warn!(target: "amqp_conductor", $($arg)*) };
    }

    macro_rules! log_info {
        ($($arg:tt)*) => { tracing::info!(target: "amqp_conductor", $($arg)*) };
    }

    macro_rules! log_debug {
        ($($arg:tt)*) => { tracing::debug!(target: "amqp_conductor", $($arg)*) };
    }

    pub(crate) use {log_debug, log_error, log_info, log_warn};
}

#[cfg(not(feature = "logging"))]
mod imp {
    // ---
    macro_rules! log_error {
        ($($arg:tt)*) => { eprintln!("amqp_conductor error: {}", format_args!($($arg)*)) };
    }

    macro_rules! log_warn {
        ($($arg:tt)*) => { eprintln!("amqp_conductor warning: {}", format_args!($($arg)*)) };
    }

    macro_rules! log_info {
        ($($arg:tt)*) => {};
    }

    macro_rules! log_debug {
        ($($arg:tt)*) => {};
    }

    pub(crate) use {log_debug, log_error, log_info, log_warn};
}

pub(crate) use imp::{log_debug, log_error, log_info, log_warn};
