//! Domain layer public interface.
//!
//! This module defines domain-level abstractions that are independent of
//! broker client libraries and of the conductor implementation.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod broker;
mod conductor;
mod electron;

// --- Broker capability re-exports ---

pub use broker::{
    //
    BrokerChannel,
    BrokerConnection,
    ChannelPtr,
    ConnectionPtr,
    ConsumeOptions,
    Deliveries,
    Delivery,
    Publishing,
    QueueOptions,
    JSON_CONTENT_TYPE,
};

// --- Conductor contract re-exports ---

pub use conductor::{
    //
    Conductor,
    ConductorPtr,
    ElectronStream,
    ResultSlot,
};

pub use electron::{Electron, Properties};
