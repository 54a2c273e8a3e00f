//! Simulated network collaborators for host runs.
//!
//! [`SimNetwork`] stands in for the IP stack, resolver, TLS transport and
//! messaging client.  Every operation completes after a configurable number
//! of polls, and a [`FaultPlan`] injects the failures the controller must
//! recover from.  [`SimPlatform`] bundles it with a clock, the NVS adapter
//! and a buffered debug sink so one value satisfies
//! [`Platform`](crate::app::ports::Platform).

use core::cell::Cell;
use core::net::{IpAddr, Ipv4Addr};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::nvs::{NvsAdapter, StoreFaults};
use super::time::SystemClock;
use crate::app::ports::{
    AckStatus, Clock, ConnectOptions, CredentialStore, DebugSink, InboundMessage,
    MessagingClient, NameResolver, NetworkReadiness, OpenStatus, ResolveHandle, ResolveStatus,
    SecureTransport, StoreHandle, StoreStatus, TlsIdentity, TransportHandle,
};
use crate::config::TopicName;
use crate::credentials::Region;
use crate::diagnostics::BufferedDebugSink;
use crate::error::{LinkError, StoreError};

/// CONNACK return code "not authorized".
const CONNACK_NOT_AUTHORIZED: u8 = 5;
/// SUBACK failure return code.
const SUBACK_FAILURE: u8 = 0x80;

/// Timing and failure script for one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultPlan {
    /// Polls of `is_stack_ready` answered `false` before the stack is up.
    pub stack_ready_after_polls: u16,
    /// Polls of `current_address` answered `None` before an address.
    pub address_after_polls: u16,
    pub resolve_polls: u16,
    /// Upcoming resolutions that fail.
    pub dns_failures: u8,
    pub handshake_polls: u16,
    /// Upcoming transport opens that fail the TLS handshake.
    pub handshake_failures: u8,
    /// Polls before the broker answers a CONNECT.
    pub connect_ack_polls: u16,
    /// Upcoming protocol connects the broker rejects.
    pub connect_rejections: u8,
    pub subscribe_ack_polls: u16,
    pub subscribe_rejections: u8,
    /// Connection drops after this many receive polls (once).
    pub drop_after_polls: Option<u32>,
    /// Deliver a command message every N receive polls; 0 disables.
    pub inbound_every_polls: u32,
    pub broker_address: Ipv4Addr,
    pub store: StoreFaults,
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self {
            stack_ready_after_polls: 2,
            address_after_polls: 2,
            resolve_polls: 1,
            dns_failures: 0,
            handshake_polls: 2,
            handshake_failures: 0,
            connect_ack_polls: 1,
            connect_rejections: 0,
            subscribe_ack_polls: 1,
            subscribe_rejections: 0,
            drop_after_polls: None,
            inbound_every_polls: 0,
            broker_address: Ipv4Addr::new(203, 0, 113, 10),
            store: StoreFaults::default(),
        }
    }
}

fn take(counter: &mut u8) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    handle: u16,
    polls_left: u16,
    fail: bool,
}

#[derive(Debug, Clone, Copy)]
struct AckWait {
    polls_left: u16,
    rejection: Option<u8>,
}

/// IP stack, resolver, transport and messaging client in one value.
#[derive(Debug)]
pub struct SimNetwork {
    plan: FaultPlan,
    next_handle: u16,
    stack_polls: u16,
    address_polls: u16,
    resolving: Option<Pending>,
    opening: Option<Pending>,
    established: Option<TransportHandle>,
    ack: Option<AckWait>,
    session_up: bool,
    receive_polls: u32,
    pub published: u32,
    pub pings: u32,
}

impl SimNetwork {
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            next_handle: 0,
            stack_polls: 0,
            address_polls: 0,
            resolving: None,
            opening: None,
            established: None,
            ack: None,
            session_up: false,
            receive_polls: 0,
            published: 0,
            pings: 0,
        }
    }

    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }

    pub fn is_session_up(&self) -> bool {
        self.session_up
    }

    fn alloc_handle(&mut self) -> u16 {
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.next_handle
    }

    fn require_session(&self) -> Result<(), LinkError> {
        if self.session_up && self.established.is_some() {
            Ok(())
        } else {
            Err(LinkError::InvalidSocket)
        }
    }
}

impl NetworkReadiness for SimNetwork {
    fn is_stack_ready(&mut self) -> bool {
        self.stack_polls = self.stack_polls.saturating_add(1);
        self.stack_polls > self.plan.stack_ready_after_polls
    }

    fn current_address(&mut self) -> Option<IpAddr> {
        self.address_polls = self.address_polls.saturating_add(1);
        (self.address_polls > self.plan.address_after_polls)
            .then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)))
    }
}

impl NameResolver for SimNetwork {
    fn resolve(&mut self, host: &str) -> Result<ResolveHandle, LinkError> {
        if host.is_empty() {
            return Err(LinkError::DnsStartFailed);
        }
        let handle = self.alloc_handle();
        let fail = take(&mut self.plan.dns_failures);
        debug!("sim: resolving {} (handle {})", host, handle);
        self.resolving = Some(Pending {
            handle,
            polls_left: self.plan.resolve_polls,
            fail,
        });
        Ok(ResolveHandle(handle))
    }

    fn poll_resolve(&mut self, handle: ResolveHandle) -> ResolveStatus {
        let Some(pending) = self.resolving.as_mut().filter(|p| p.handle == handle.0) else {
            return ResolveStatus::Failed(LinkError::BadArgument);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return ResolveStatus::Pending;
        }
        let fail = pending.fail;
        self.resolving = None;
        if fail {
            ResolveStatus::Failed(LinkError::DnsFailed)
        } else {
            ResolveStatus::Resolved(IpAddr::V4(self.plan.broker_address))
        }
    }

    fn cancel_resolve(&mut self, handle: ResolveHandle) {
        if self.resolving.is_some_and(|p| p.handle == handle.0) {
            self.resolving = None;
        }
    }
}

impl SecureTransport for SimNetwork {
    fn open(
        &mut self,
        addr: IpAddr,
        port: u16,
        identity: &TlsIdentity<'_>,
    ) -> Result<TransportHandle, LinkError> {
        if identity.certificate.is_empty() || identity.private_key.is_empty() {
            return Err(LinkError::BadArgument);
        }
        if self.opening.is_some() || self.established.is_some() {
            return Err(LinkError::OutOfBuffer);
        }
        let handle = self.alloc_handle();
        let fail = take(&mut self.plan.handshake_failures);
        debug!(
            "sim: opening {}:{} for {} (handle {})",
            addr, port, identity.server_name, handle
        );
        self.opening = Some(Pending {
            handle,
            polls_left: self.plan.handshake_polls,
            fail,
        });
        Ok(TransportHandle(handle))
    }

    fn poll_open(&mut self, handle: TransportHandle) -> OpenStatus {
        let Some(pending) = self.opening.as_mut().filter(|p| p.handle == handle.0) else {
            return OpenStatus::Failed(LinkError::InvalidSocket);
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return OpenStatus::Pending;
        }
        let fail = pending.fail;
        self.opening = None;
        if fail {
            OpenStatus::Failed(LinkError::HandshakeFailed)
        } else {
            self.established = Some(handle);
            OpenStatus::Established
        }
    }

    fn close(&mut self, handle: TransportHandle) {
        if self.opening.is_some_and(|p| p.handle == handle.0) {
            self.opening = None;
        }
        if self.established == Some(handle) {
            self.established = None;
            self.session_up = false;
            self.ack = None;
        }
    }
}

impl MessagingClient for SimNetwork {
    fn send_connect(
        &mut self,
        transport: TransportHandle,
        options: &ConnectOptions<'_>,
    ) -> Result<(), LinkError> {
        if self.established != Some(transport) {
            return Err(LinkError::InvalidSocket);
        }
        debug!(
            "sim: CONNECT client_id={} keep_alive={}s",
            options.client_id, options.keep_alive_secs
        );
        let rejection =
            take(&mut self.plan.connect_rejections).then_some(CONNACK_NOT_AUTHORIZED);
        self.ack = Some(AckWait {
            polls_left: self.plan.connect_ack_polls,
            rejection,
        });
        // The session counts as up once the CONNACK is accepted.
        self.session_up = false;
        Ok(())
    }

    fn send_subscribe(&mut self, topics: &[TopicName]) -> Result<(), LinkError> {
        if self.established.is_none() || !self.session_up {
            return Err(LinkError::InvalidSocket);
        }
        if topics.is_empty() {
            return Err(LinkError::BadArgument);
        }
        let rejection = take(&mut self.plan.subscribe_rejections).then_some(SUBACK_FAILURE);
        self.ack = Some(AckWait {
            polls_left: self.plan.subscribe_ack_polls,
            rejection,
        });
        Ok(())
    }

    fn poll_ack(&mut self) -> AckStatus {
        let Some(wait) = self.ack.as_mut() else {
            return AckStatus::Pending;
        };
        if wait.polls_left > 0 {
            wait.polls_left -= 1;
            return AckStatus::Pending;
        }
        let rejection = wait.rejection;
        self.ack = None;
        match rejection {
            Some(code) => AckStatus::Failed(LinkError::Rejected(code)),
            None => {
                self.session_up = true;
                AckStatus::Accepted
            }
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.require_session()?;
        debug!("sim: PUBLISH {} ({} bytes)", topic, payload.len());
        self.published = self.published.saturating_add(1);
        Ok(())
    }

    fn poll_receive(&mut self, into: &mut InboundMessage) -> Result<bool, LinkError> {
        self.require_session()?;
        self.receive_polls = self.receive_polls.saturating_add(1);

        if self
            .plan
            .drop_after_polls
            .is_some_and(|n| self.receive_polls >= n)
        {
            info!("sim: dropping connection");
            self.plan.drop_after_polls = None;
            self.session_up = false;
            self.established = None;
            return Err(LinkError::PeerReset);
        }

        let every = self.plan.inbound_every_polls;
        if every > 0 && self.receive_polls % every == 0 {
            into.clear();
            into.topic
                .push_str("device/commands")
                .map_err(|_| LinkError::OutOfBuffer)?;
            into.payload
                .extend_from_slice(br#"{"cmd":"status"}"#)
                .map_err(|_| LinkError::OutOfBuffer)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn ping(&mut self) -> Result<(), LinkError> {
        self.require_session()?;
        self.pings = self.pings.saturating_add(1);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.session_up = false;
        self.ack = None;
    }
}

// ───────────────────────────────────────────────────────────────
// Manual clock
// ───────────────────────────────────────────────────────────────

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

// ───────────────────────────────────────────────────────────────
// SimPlatform
// ───────────────────────────────────────────────────────────────

/// Debug codes buffered between drains.
pub const DEBUG_BUFFER: usize = 64;

/// One value implementing every collaborator port.
pub struct SimPlatform<C: Clock = SystemClock> {
    pub clock: C,
    pub store: NvsAdapter,
    pub debug: BufferedDebugSink<DEBUG_BUFFER>,
    pub network: SimNetwork,
}

impl<C: Clock> SimPlatform<C> {
    pub fn new(clock: C, mut store: NvsAdapter, plan: FaultPlan) -> Self {
        store.set_faults(plan.store);
        Self {
            clock,
            store,
            debug: BufferedDebugSink::new(),
            network: SimNetwork::new(plan),
        }
    }
}

impl<C: Clock> Clock for SimPlatform<C> {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl<C: Clock> DebugSink for SimPlatform<C> {
    fn post_debug_code(&mut self, code: i32) {
        self.debug.post_debug_code(code);
    }
}

impl<C: Clock> CredentialStore for SimPlatform<C> {
    fn erase_region(&mut self, region: Region) -> Result<StoreHandle, StoreError> {
        self.store.erase_region(region)
    }

    fn load_region(&mut self, region: Region) -> Result<StoreHandle, StoreError> {
        self.store.load_region(region)
    }

    fn write_region(&mut self, region: Region, data: &[u8]) -> Result<StoreHandle, StoreError> {
        self.store.write_region(region, data)
    }

    fn poll_store(&mut self, handle: StoreHandle) -> StoreStatus {
        self.store.poll_store(handle)
    }

    fn read_region(&self, region: Region, out: &mut [u8]) -> Result<usize, StoreError> {
        self.store.read_region(region, out)
    }
}

impl<C: Clock> NetworkReadiness for SimPlatform<C> {
    fn is_stack_ready(&mut self) -> bool {
        self.network.is_stack_ready()
    }

    fn current_address(&mut self) -> Option<IpAddr> {
        self.network.current_address()
    }
}

impl<C: Clock> NameResolver for SimPlatform<C> {
    fn resolve(&mut self, host: &str) -> Result<ResolveHandle, LinkError> {
        self.network.resolve(host)
    }

    fn poll_resolve(&mut self, handle: ResolveHandle) -> ResolveStatus {
        self.network.poll_resolve(handle)
    }

    fn cancel_resolve(&mut self, handle: ResolveHandle) {
        self.network.cancel_resolve(handle);
    }
}

impl<C: Clock> SecureTransport for SimPlatform<C> {
    fn open(
        &mut self,
        addr: IpAddr,
        port: u16,
        identity: &TlsIdentity<'_>,
    ) -> Result<TransportHandle, LinkError> {
        self.network.open(addr, port, identity)
    }

    fn poll_open(&mut self, handle: TransportHandle) -> OpenStatus {
        self.network.poll_open(handle)
    }

    fn close(&mut self, handle: TransportHandle) {
        self.network.close(handle);
    }
}

impl<C: Clock> MessagingClient for SimPlatform<C> {
    fn send_connect(
        &mut self,
        transport: TransportHandle,
        options: &ConnectOptions<'_>,
    ) -> Result<(), LinkError> {
        self.network.send_connect(transport, options)
    }

    fn send_subscribe(&mut self, topics: &[TopicName]) -> Result<(), LinkError> {
        self.network.send_subscribe(topics)
    }

    fn poll_ack(&mut self) -> AckStatus {
        self.network.poll_ack()
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        self.network.publish(topic, payload)
    }

    fn poll_receive(&mut self, into: &mut InboundMessage) -> Result<bool, LinkError> {
        self.network.poll_receive(into)
    }

    fn ping(&mut self) -> Result<(), LinkError> {
        self.network.ping()
    }

    fn disconnect(&mut self) {
        self.network.disconnect();
    }
}
