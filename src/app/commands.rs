//! Inbound commands to the controller.
//!
//! These represent actions requested by the outside world (console,
//! provisioning tool, application code) that the
//! [`Controller`](super::service::Controller) interprets and acts upon.

use crate::app::ports::MAX_PAYLOAD;
use crate::config::{LinkConfig, TopicName};
use crate::credentials::Credentials;

/// Commands that external adapters can send into the controller.
#[derive(Debug, Clone)]
pub enum LinkCommand {
    /// Queue credentials for the next NVM_WRITE_CONFIGURATION.
    StageCredentials(Credentials),

    /// Erase stored credentials and restart from INIT.
    Recommission,

    /// Queue an outbound message for the steady-state loop.
    Publish {
        topic: TopicName,
        payload: heapless::Vec<u8, MAX_PAYLOAD>,
    },

    /// Tear everything down and restart from INIT.
    Reset,

    /// Replace the live configuration.  Takes effect on the next state
    /// entry; persisted by [`Controller::save_config_if_dirty`].
    ///
    /// [`Controller::save_config_if_dirty`]: super::service::Controller::save_config_if_dirty
    UpdateConfig(LinkConfig),
}
