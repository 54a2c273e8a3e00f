//! Outbound link events.
//!
//! The [`Controller`](super::service::Controller) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, forward to the
//! application, count them in a test.

use core::net::IpAddr;

use crate::error::AppCode;
use crate::fsm::LinkState;

/// Structured events emitted by the controller.
///
/// Borrowed payloads live only for the duration of the `emit` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent<'a> {
    /// The controller has started (carries the initial state).
    Started(LinkState),

    /// The FSM moved between states.
    StateChanged { from: LinkState, to: LinkState },

    /// A recoverable failure sent the link to TCPIP_ERROR.
    Failure { code: AppCode, consecutive: u8 },

    /// The link stopped for good until an external reset.
    Fatal(AppCode),

    /// Broker session established and subscriptions acknowledged.
    Connected { broker: Option<IpAddr> },

    /// Application message from a subscribed topic.
    MessageReceived { topic: &'a str, payload: &'a [u8] },

    KeepAliveSent,

    Published { topic: &'a str },
}
