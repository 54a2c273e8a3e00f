//! Port traits: the hexagonal boundary between the controller and its collaborators.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Controller (domain)
//! ```
//!
//! Driven adapters (store, network stack, resolver, TLS transport, messaging
//! client, debug and event sinks) implement these traits.  The
//! [`Controller`](super::service::Controller) consumes them via generics, so
//! the state machine never touches a driver directly.
//!
//! Every method is non-blocking.  Long-running work is started by one call
//! and observed through a `poll_*` call on a later tick.
//!
//! Method names are distinct across traits so that one platform value can
//! implement all of them (see [`Platform`]).

use core::net::IpAddr;

use crate::config::{LinkConfig, TopicName};
use crate::credentials::Region;
use crate::error::{LinkError, StoreError};

// ───────────────────────────────────────────────────────────────
// Handles and poll results
// ───────────────────────────────────────────────────────────────

/// Outstanding credential-store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreHandle(pub u16);

/// Outstanding name resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolveHandle(pub u16);

/// Transport connection, from open request until close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Pending,
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStatus {
    Pending,
    Resolved(IpAddr),
    Failed(LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    Pending,
    /// Socket connected and TLS handshake finished.
    Established,
    Failed(LinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Pending,
    Accepted,
    Failed(LinkError),
}

/// Identity material lent to the transport for one `open` call.
#[derive(Debug, Clone, Copy)]
pub struct TlsIdentity<'a> {
    pub certificate: &'a [u8],
    pub private_key: &'a [u8],
    /// SNI / certificate name check.
    pub server_name: &'a str,
}

/// Parameters of a protocol-level connect.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

/// Maximum payload carried in one message, either direction.
pub const MAX_PAYLOAD: usize = 512;

/// Receive buffer the messaging client fills in place.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub topic: TopicName,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl InboundMessage {
    pub fn clear(&mut self) {
        self.topic.clear();
        self.payload.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Time and debug (driven adapters)
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Best-effort sink for small integer debug codes.
///
/// Implementations must not block and must not fail; they may drop or
/// buffer codes as they see fit.
pub trait DebugSink {
    fn post_debug_code(&mut self, code: i32);
}

// ───────────────────────────────────────────────────────────────
// Credential store (driven adapter: domain ↔ NVM)
// ───────────────────────────────────────────────────────────────

/// Asynchronous persistent store with one fixed region per credential.
///
/// # Contract
///
/// - `erase_region`, `load_region` and `write_region` start an operation and
///   return a handle immediately; an `Err` means it was never started.
/// - `poll_store` reports `Success`/`Failure` once per handle; after that
///   report the handle is retired.
/// - `write_region` MUST reject data larger than [`Region::budget`] before
///   touching the region.
/// - `read_region` copies the last loaded contents of `region`.
pub trait CredentialStore {
    fn erase_region(&mut self, region: Region) -> Result<StoreHandle, StoreError>;
    fn load_region(&mut self, region: Region) -> Result<StoreHandle, StoreError>;
    fn write_region(&mut self, region: Region, data: &[u8]) -> Result<StoreHandle, StoreError>;
    fn poll_store(&mut self, handle: StoreHandle) -> StoreStatus;
    fn read_region(&self, region: Region, out: &mut [u8]) -> Result<usize, StoreError>;
}

// ───────────────────────────────────────────────────────────────
// Network collaborators
// ───────────────────────────────────────────────────────────────

/// IP stack state.
pub trait NetworkReadiness {
    fn is_stack_ready(&mut self) -> bool;
    fn current_address(&mut self) -> Option<IpAddr>;
}

/// Hostname resolution, one request in flight.
pub trait NameResolver {
    fn resolve(&mut self, host: &str) -> Result<ResolveHandle, LinkError>;
    fn poll_resolve(&mut self, handle: ResolveHandle) -> ResolveStatus;
    /// Abandon a request.  Unknown handles are ignored.
    fn cancel_resolve(&mut self, handle: ResolveHandle);
}

/// Socket plus TLS in one capability.
pub trait SecureTransport {
    fn open(
        &mut self,
        addr: IpAddr,
        port: u16,
        identity: &TlsIdentity<'_>,
    ) -> Result<TransportHandle, LinkError>;
    fn poll_open(&mut self, handle: TransportHandle) -> OpenStatus;
    /// Release the connection.  Unknown handles are ignored.
    fn close(&mut self, handle: TransportHandle);
}

/// Publish/subscribe client riding on an open transport.
pub trait MessagingClient {
    fn send_connect(
        &mut self,
        transport: TransportHandle,
        options: &ConnectOptions<'_>,
    ) -> Result<(), LinkError>;
    fn send_subscribe(&mut self, topics: &[TopicName]) -> Result<(), LinkError>;
    /// Outcome of the last connect or subscribe request.
    fn poll_ack(&mut self) -> AckStatus;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError>;
    /// Fill `into` with the next message.  `Ok(false)` when none is waiting.
    fn poll_receive(&mut self, into: &mut InboundMessage) -> Result<bool, LinkError>;
    fn ping(&mut self) -> Result<(), LinkError>;
    fn disconnect(&mut self);
}

/// Everything the controller needs from one platform value.
pub trait Platform:
    Clock + DebugSink + CredentialStore + NetworkReadiness + NameResolver + SecureTransport + MessagingClient
{
}

impl<T> Platform for T where
    T: Clock
        + DebugSink
        + CredentialStore
        + NetworkReadiness
        + NameResolver
        + SecureTransport
        + MessagingClient
{
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The controller emits structured [`LinkEvent`](super::events::LinkEvent)s
/// through this port.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::LinkEvent<'_>);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists link configuration.
///
/// Implementations MUST validate before persisting and after loading, and
/// reject invalid ranges with [`ConfigError::ValidationFailed`], never clamp
/// them.
pub trait ConfigPort {
    /// Returns [`LinkConfig::default()`] if no stored config exists.
    fn load(&self) -> Result<LinkConfig, ConfigError>;
    fn save(&self, config: &LinkConfig) -> Result<(), ConfigError>;
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl std::error::Error for ConfigError {}
