//! Log-based sink adapters.
//!
//! [`LogEventSink`] implements [`EventSink`] by writing structured link
//! events to the logger (UART / USB-CDC in production, stderr in the
//! simulation).  [`LogDebugSink`] does the same for debug codes.

use log::{debug, error, info, warn};

use crate::app::events::LinkEvent;
use crate::app::ports::{DebugSink, EventSink};
use crate::error::AppCode;

/// Adapter that logs every [`LinkEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &LinkEvent<'_>) {
        match event {
            LinkEvent::Started(state) => {
                info!("START | initial_state={}", state);
            }
            LinkEvent::StateChanged { from, to } => {
                info!("STATE | {} -> {}", from, to);
            }
            LinkEvent::Failure { code, consecutive } => {
                warn!("FAIL  | {} | consecutive={}", code, consecutive);
            }
            LinkEvent::Fatal(code) => {
                error!("FATAL | {}", code);
            }
            LinkEvent::Connected { broker } => match broker {
                Some(addr) => info!("LINK  | connected to {}", addr),
                None => info!("LINK  | connected"),
            },
            LinkEvent::MessageReceived { topic, payload } => {
                info!("RECV  | {} | {} bytes", topic, payload.len());
            }
            LinkEvent::KeepAliveSent => {
                debug!("PING  | keep-alive sent");
            }
            LinkEvent::Published { topic } => {
                info!("SEND  | {}", topic);
            }
        }
    }
}

/// Debug collaborator that renders codes as log lines.
#[derive(Debug, Default)]
pub struct LogDebugSink;

impl DebugSink for LogDebugSink {
    fn post_debug_code(&mut self, code: i32) {
        match AppCode::from_code(code) {
            Some(app) if code < 0 => debug!("DBG   | {}", app),
            _ => debug!("DBG   | {}", code),
        }
    }
}
