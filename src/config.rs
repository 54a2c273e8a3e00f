//! Connectivity configuration parameters
//!
//! All tunable timeouts, limits and broker settings for the link controller.
//! Values can be overridden from a stored postcard blob (NVS) or a JSON file.

use serde::{Deserialize, Serialize};

/// Topic name with a fixed upper bound.
pub type TopicName = heapless::String<64>;

/// Maximum number of subscription topics.
pub const MAX_TOPICS: usize = 4;

/// Core connectivity configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    // --- Broker ---
    /// TLS port of the broker
    pub broker_port: u16,
    /// Protocol client identifier; empty means "derive from the MAC"
    pub client_id: heapless::String<32>,
    /// Topics subscribed after the protocol connect is acknowledged
    pub subscribe_topics: heapless::Vec<TopicName, MAX_TOPICS>,
    /// Default topic for outbound status messages
    pub publish_topic: TopicName,
    /// Keep-alive ping interval (seconds)
    pub keep_alive_secs: u16,

    // --- Storage ---
    /// Wait for outstanding store operations (seconds)
    pub store_timeout_secs: u32,
    /// Failed store operations tolerated before FATAL
    pub store_failure_threshold: u8,
    /// Extra write attempts after the first failed one
    pub write_retry_budget: u8,
    /// Erase stored credentials on the next boot
    pub force_recommission: bool,

    // --- Network waits ---
    /// Wait for the IP stack to come up (seconds)
    pub stack_init_timeout_secs: u32,
    /// Wait for an address (seconds)
    pub ip_timeout_secs: u32,
    /// Link settle time after an address is acquired (seconds)
    pub settle_secs: u32,
    /// Wait for name resolution (seconds)
    pub dns_timeout_secs: u32,
    /// Wait for socket connect plus TLS handshake (seconds)
    pub connect_timeout_secs: u32,
    /// Wait for a protocol acknowledgement (milliseconds)
    pub command_timeout_ms: u32,

    // --- Recovery ---
    /// Pause in TCPIP_ERROR before retrying (seconds)
    pub backoff_secs: u32,
    /// Consecutive failed attempts before FATAL
    pub max_consecutive_failures: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut subscribe_topics = heapless::Vec::new();
        let _ = subscribe_topics.push(topic("device/commands"));

        Self {
            // Broker
            broker_port: 8883,
            client_id: heapless::String::new(),
            subscribe_topics,
            publish_topic: topic("device/status"),
            keep_alive_secs: 60,

            // Storage
            store_timeout_secs: 5,
            store_failure_threshold: 3,
            write_retry_budget: 2,
            force_recommission: false,

            // Network waits
            stack_init_timeout_secs: 30,
            ip_timeout_secs: 30,
            settle_secs: 2,
            dns_timeout_secs: 10,
            connect_timeout_secs: 15,
            command_timeout_ms: 5000,

            // Recovery
            backoff_secs: 5,
            max_consecutive_failures: 5,
        }
    }
}

fn topic(name: &str) -> TopicName {
    let mut t = TopicName::new();
    let _ = t.push_str(name);
    t
}

impl LinkConfig {
    /// Range-check every field.  Returns the first offending field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.broker_port == 0 {
            return Err("broker_port must be non-zero");
        }
        if self.subscribe_topics.is_empty() {
            return Err("subscribe_topics must name at least one topic");
        }
        if self.subscribe_topics.iter().any(|t| t.is_empty()) {
            return Err("subscribe_topics must not contain empty names");
        }
        if !(5..=3600).contains(&self.keep_alive_secs) {
            return Err("keep_alive_secs must be 5–3600");
        }
        if !(1..=120).contains(&self.store_timeout_secs) {
            return Err("store_timeout_secs must be 1–120");
        }
        if self.store_failure_threshold == 0 {
            return Err("store_failure_threshold must be ≥ 1");
        }
        if !(1..=600).contains(&self.stack_init_timeout_secs) {
            return Err("stack_init_timeout_secs must be 1–600");
        }
        if !(1..=600).contains(&self.ip_timeout_secs) {
            return Err("ip_timeout_secs must be 1–600");
        }
        if self.settle_secs > 60 {
            return Err("settle_secs must be 0–60");
        }
        if !(1..=300).contains(&self.dns_timeout_secs) {
            return Err("dns_timeout_secs must be 1–300");
        }
        if !(1..=300).contains(&self.connect_timeout_secs) {
            return Err("connect_timeout_secs must be 1–300");
        }
        if !(100..=60_000).contains(&self.command_timeout_ms) {
            return Err("command_timeout_ms must be 100–60000");
        }
        if !(1..=3600).contains(&self.backoff_secs) {
            return Err("backoff_secs must be 1–3600");
        }
        if self.max_consecutive_failures == 0 {
            return Err("max_consecutive_failures must be ≥ 1");
        }
        Ok(())
    }

    /// Upper bound on the time from boot to the steady-state loop when
    /// every step succeeds just before its own timeout.
    pub fn happy_path_budget_ms(&self) -> u64 {
        let secs = u64::from(self.store_timeout_secs) * 2
            + u64::from(self.stack_init_timeout_secs)
            + u64::from(self.ip_timeout_secs)
            + u64::from(self.settle_secs)
            + u64::from(self.dns_timeout_secs)
            + u64::from(self.connect_timeout_secs);
        secs * 1000 + u64::from(self.command_timeout_ms) * 2
    }
}
