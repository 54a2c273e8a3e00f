//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter      | Implements                  | Connects to                 |
//! |--------------|-----------------------------|-----------------------------|
//! | `log_sink`   | EventSink, DebugSink        | Serial log output           |
//! | `nvs`        | ConfigPort, CredentialStore | NVS / in-memory store       |
//! | `time`       | Clock                       | ESP32 system timer          |
//! | `sim`        | every network port          | Scripted network, host only |
//! | `device_id`  | -                           | eFuse MAC                   |

pub mod device_id;
pub mod log_sink;
pub mod nvs;
pub mod sim;
pub mod time;
pub(crate) mod utils;
