//! Client side of the shared-memory audio bridge.
//!
//! The [`connection`] aggregate bundles the IPC endpoints, the hardware
//! constraints, the ring-buffer handle and the signalling machinery of one
//! device; the [`connector`] drives it from the host framework's callback
//! contract; [`entry`] exposes the C-linkage plugin entry point.

pub mod connection;
pub mod connector;
pub mod constraints;
pub mod entry;
pub mod host;

pub use connection::{ConnectionError, ShmConnection};
pub use connector::Connector;
pub use constraints::{HwConstraints, ShmVec};
pub use host::{ConstraintPublisher, HostChannelArea, HwParam, IoPlugData, PluginState};
