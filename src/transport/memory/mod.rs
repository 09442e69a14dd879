// src/transport/memory/mod.rs

//! In-memory broker.
//!
//! This module provides a pure in-process implementation of the domain-level
//! broker traits. It is intended primarily for testing, local execution,
//! and as a reference for broker semantics.
//!
//! ## Reference Semantics
//!
//! The in-memory broker establishes the expectations the conductor relies on:
//!
//! - Publishes to one queue are delivered in the order they were made.
//! - Messages published before anyone consumes a declared queue are kept and
//!   handed to the first consumer.
//! - Closing a connection ends every consumer opened through it.
//!
//! ## Non-Goals
//!
//! This broker does not attempt to emulate persistence, redelivery, exchanges
//! or the failure modes of any specific product.

mod hub;

pub use hub::{ConsumerSettings, MemoryHub};
