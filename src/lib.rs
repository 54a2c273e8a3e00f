//! CloudLink connectivity controller library.
//!
//! Takes a device from power-on to a live, authenticated broker session:
//! credential commissioning in NVM, IP bring-up, name resolution, TLS
//! connect, protocol connect and subscribe, then a steady-state loop with
//! keep-alives and bounded recovery.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; the default build runs on the host.

#![deny(unused_must_use)]

pub mod app;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod diagnostics;
pub mod error;
pub mod fsm;
pub mod provisioning;
pub mod timer;

pub mod adapters;
