//! Session aggregate and the vocabulary exchanged with the FSM.
//!
//! - [`Session`] is the single owned aggregate: credentials, timers,
//!   handles, counters, buffers.  Handlers only ever see `&Session`.
//! - [`Observation`] is what one tick's polling step saw.
//! - [`Effect`] is what a handler wants done.  The controller applies the
//!   effects in order once the decision is final.

use core::net::IpAddr;
use core::time::Duration;

use heapless::Deque;

use crate::app::ports::{
    InboundMessage, MAX_PAYLOAD, ResolveHandle, StoreHandle, TransportHandle,
};
use crate::config::{LinkConfig, TopicName};
use crate::credentials::{Credentials, Region};
use crate::diagnostics::LinkDiagnostics;
use crate::error::AppCode;
use crate::timer::{TimerId, Timers};

/// Maximum outstanding store operations tracked at once.
pub const MAX_STORE_OPS: usize = 10;

/// Outbound messages waiting for the steady-state loop.
pub const OUTBOX_DEPTH: usize = 4;

/// Upper bound on effects produced by one decision.
pub const MAX_EFFECTS: usize = 16;

pub type Effects = heapless::Vec<Effect, MAX_EFFECTS>;

// ---------------------------------------------------------------------------
// Store bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOpKind {
    Erase,
    Load,
    Write,
}

impl StoreOpKind {
    /// Code latched when an operation of this kind cannot even be started.
    pub const fn failure_code(self) -> AppCode {
        match self {
            Self::Load => AppCode::StoreLoadFailed,
            Self::Erase | Self::Write => AppCode::StoreWriteFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOp {
    pub handle: StoreHandle,
    pub kind: StoreOpKind,
    pub region: Region,
}

/// Outstanding handles plus the success/failure counters.
#[derive(Debug, Clone, Default)]
pub struct StoreBook {
    pub pending: heapless::Vec<PendingOp, MAX_STORE_OPS>,
    pub successful_ops: u32,
    pub failed_ops: u32,
    /// Failures inside the current batch (one erase/load/write round).
    pub batch_failures: u32,
    /// Write batches issued since the last reset.
    pub write_attempts: u8,
    /// Loaded regions were committed to the session.
    pub loaded: bool,
}

impl StoreBook {
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn begin_batch(&mut self) {
        self.pending.clear();
        self.batch_failures = 0;
        self.loaded = false;
    }

    /// Returns `false` when the book is full.
    pub(crate) fn track(&mut self, op: PendingOp) -> bool {
        self.pending.push(op).is_ok()
    }

    /// Retire completed entries.  Bit `i` of a mask refers to `pending[i]`
    /// as it was when the tick polled it.
    pub(crate) fn settle(&mut self, succeeded: u16, failed: u16) {
        let mut kept = heapless::Vec::<PendingOp, MAX_STORE_OPS>::new();
        for (i, op) in self.pending.iter().enumerate() {
            let bit = 1u16 << i;
            if succeeded & bit != 0 {
                self.successful_ops = self.successful_ops.saturating_add(1);
            } else if failed & bit != 0 {
                self.failed_ops = self.failed_ops.saturating_add(1);
                self.batch_failures = self.batch_failures.saturating_add(1);
            } else {
                // Same capacity as `pending`.
                let _ = kept.push(*op);
            }
        }
        self.pending = kept;
    }

    /// Count an operation that never produced a handle.
    pub(crate) fn count_failure(&mut self) {
        self.failed_ops = self.failed_ops.saturating_add(1);
        self.batch_failures = self.batch_failures.saturating_add(1);
    }

    /// Give up on everything outstanding; each op counts as failed.
    pub(crate) fn abandon(&mut self) {
        let n = self.pending.len() as u32;
        self.failed_ops = self.failed_ops.saturating_add(n);
        self.batch_failures = self.batch_failures.saturating_add(n);
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Outbound messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: TopicName,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The controller's whole mutable world.  Created once, lives until reset.
pub struct Session {
    pub config: LinkConfig,

    // Identity
    pub credentials: Credentials,
    /// New credentials waiting for NVM_WRITE_CONFIGURATION.
    pub staged: Option<Credentials>,
    pub force_recommission: bool,

    // Network
    pub local_address: Option<IpAddr>,
    pub resolved_address: Option<IpAddr>,
    pub resolve: Option<ResolveHandle>,
    /// Transport being opened (connect + handshake in progress).
    pub connecting: Option<TransportHandle>,
    /// Established transport.  `Some` only from protocol connect to loop.
    pub transport: Option<TransportHandle>,

    pub timers: Timers,
    pub store: StoreBook,

    // Recovery
    pub consecutive_failures: u8,
    /// Failure raised while applying effects, surfaced on the next tick.
    pub deferred_failure: Option<AppCode>,

    pub diagnostics: LinkDiagnostics,

    // Buffers
    pub inbound: InboundMessage,
    pub outbox: Deque<OutboundMessage, OUTBOX_DEPTH>,
}

impl Session {
    pub fn new(config: LinkConfig) -> Self {
        let force_recommission = config.force_recommission;
        Self {
            config,
            credentials: Credentials::new(),
            staged: None,
            force_recommission,
            local_address: None,
            resolved_address: None,
            resolve: None,
            connecting: None,
            transport: None,
            timers: Timers::default(),
            store: StoreBook::default(),
            consecutive_failures: 0,
            deferred_failure: None,
            diagnostics: LinkDiagnostics::new(),
            inbound: InboundMessage::default(),
            outbox: Deque::new(),
        }
    }

    /// Keep the first failure if several are raised before the next tick.
    pub(crate) fn latch_failure(&mut self, code: AppCode) {
        if self.deferred_failure.is_none() {
            self.deferred_failure = Some(code);
        }
    }

    /// Return to boot conditions after an external reset.  Credentials in
    /// RAM are dropped and reloaded; staged credentials, the force flag,
    /// diagnostics and queued outbound messages survive.
    pub(crate) fn restart(&mut self) {
        self.credentials.erase();
        self.local_address = None;
        self.resolved_address = None;
        self.resolve = None;
        self.connecting = None;
        self.transport = None;
        self.timers.disarm_all();
        self.store = StoreBook::default();
        self.consecutive_failures = 0;
        self.deferred_failure = None;
        self.inbound.clear();
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Store completions seen by one poll round.  Bit `i` refers to
/// `StoreBook::pending[i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreProgress {
    pub succeeded: u16,
    pub failed: u16,
    pub still_pending: usize,
}

/// What the polling step saw for the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    Store(StoreProgress),
    StackReady,
    AddressAcquired(IpAddr),
    Resolved(IpAddr),
    TransportUp,
    Acknowledged,
    MessageReceived,
    Failed(AppCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub signal: Signal,
    /// The timer owned by the current state has expired.
    pub timer_expired: bool,
    /// Keep-alive timer expired (loop only).
    pub keep_alive_due: bool,
}

impl Observation {
    pub const fn quiet() -> Self {
        Self {
            signal: Signal::None,
            timer_expired: false,
            keep_alive_due: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// A single action requested by a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ArmTimer(TimerId, Duration),
    DisarmTimer(TimerId),

    // Store
    BeginStoreBatch,
    IssueStoreOps(StoreOpKind),
    SettleStoreOps { succeeded: u16, failed: u16 },
    AbandonStoreOps,
    CountStoreFailure,
    CommitLoaded,
    CommitStaged,
    EraseLocalCredentials,

    // Network
    RecordLocalAddress(IpAddr),
    StartResolve,
    SetResolved(IpAddr),
    OpenTransport,
    PromoteTransport,
    SendConnect,
    SendSubscribe,

    // Steady state
    Ping,
    PublishNext,
    DispatchInbound,
    ResetRetries,

    // Teardown
    CloseTransport,
    CancelResolve,
    ClearAddress,

    // Reporting
    RecordFailure(AppCode),
    RecordFatal(AppCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(h: u16) -> PendingOp {
        PendingOp {
            handle: StoreHandle(h),
            kind: StoreOpKind::Load,
            region: Region::Certificate,
        }
    }

    #[test]
    fn settle_retires_by_mask() {
        let mut book = StoreBook::default();
        for h in 0..3 {
            assert!(book.track(op(h)));
        }
        book.settle(0b001, 0b100);
        assert_eq!(book.successful_ops, 1);
        assert_eq!(book.failed_ops, 1);
        assert_eq!(book.batch_failures, 1);
        assert_eq!(book.pending.len(), 1);
        assert_eq!(book.pending[0].handle, StoreHandle(1));
    }

    #[test]
    fn book_is_bounded() {
        let mut book = StoreBook::default();
        for h in 0..MAX_STORE_OPS as u16 {
            assert!(book.track(op(h)));
        }
        assert!(!book.track(op(99)));
    }

    #[test]
    fn abandon_counts_outstanding_as_failed() {
        let mut book = StoreBook::default();
        book.track(op(1));
        book.track(op(2));
        book.abandon();
        assert_eq!(book.failed_ops, 2);
        assert_eq!(book.outstanding(), 0);
    }

    #[test]
    fn begin_batch_keeps_totals() {
        let mut book = StoreBook::default();
        book.count_failure();
        book.loaded = true;
        book.begin_batch();
        assert_eq!(book.failed_ops, 1);
        assert_eq!(book.batch_failures, 0);
        assert!(!book.loaded);
    }

    #[test]
    fn latch_keeps_first_failure() {
        let mut s = Session::new(LinkConfig::default());
        s.latch_failure(AppCode::DnsFailed);
        s.latch_failure(AppCode::Timeout);
        assert_eq!(s.deferred_failure, Some(AppCode::DnsFailed));
    }

    #[test]
    fn restart_clears_runtime_but_keeps_staged() {
        let mut s = Session::new(LinkConfig::default());
        s.staged = Some(Credentials::from_parts(b"c", b"k", "h").unwrap());
        s.consecutive_failures = 2;
        s.transport = Some(TransportHandle(4));
        s.restart();
        assert!(s.staged.is_some());
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.transport.is_none());
    }

    #[test]
    fn force_flag_comes_from_config() {
        let cfg = LinkConfig {
            force_recommission: true,
            ..Default::default()
        };
        assert!(Session::new(cfg).force_recommission);
    }
}
