//! Application core: link orchestration with zero direct I/O.
//!
//! The [`Controller`](service::Controller) owns the FSM and the session.
//! All interaction with storage, the IP stack and the broker happens
//! through **port traits** defined in [`ports`], keeping this layer fully
//! testable without a network.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
