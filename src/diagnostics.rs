//! Link diagnostics and the buffered debug-code sink.
//!
//! [`LinkDiagnostics`] lives inside the session and records the last
//! error and fatal codes, a short history of every code posted, and a few
//! counters.  [`RuntimeMetrics`] is a point-in-time snapshot built from it
//! on demand.
//!
//! [`BufferedDebugSink`] is the reference debug collaborator: posting never
//! blocks or fails, and when the buffer is full the oldest code is dropped.

use heapless::{Deque, HistoryBuffer};
use serde::Serialize;

use crate::app::ports::DebugSink;
use crate::error::AppCode;
use crate::fsm::LinkState;

/// Number of posted codes kept in the in-session history.
pub const CODE_HISTORY_LEN: usize = 16;

/// Debug code posted on every committed transition: `base + state index`.
pub const STATE_CODE_BASE: i32 = 100;

/// Debug code for entering `state`.
pub const fn state_code(state: LinkState) -> i32 {
    STATE_CODE_BASE + state as i32
}

/// Counters and recent codes for one controller.
#[derive(Debug, Clone, Default)]
pub struct LinkDiagnostics {
    pub last_error: Option<AppCode>,
    pub last_fatal: Option<AppCode>,
    pub error_visits: u32,
    pub connect_attempts: u32,
    pub sessions_established: u32,
    pub keep_alives_sent: u32,
    pub messages_received: u32,
    pub messages_published: u32,
    pub publish_dropped: u32,
    history: HistoryBuffer<i32, CODE_HISTORY_LEN>,
}

impl LinkDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_code(&mut self, code: i32) {
        self.history.write(code);
    }

    pub fn record_error(&mut self, code: AppCode) {
        self.last_error = Some(code);
        self.error_visits = self.error_visits.saturating_add(1);
        self.record_code(code.code());
    }

    pub fn record_fatal(&mut self, code: AppCode) {
        self.last_fatal = Some(code);
        self.record_code(code.code());
    }

    /// Posted codes, oldest first.
    pub fn recent_codes(&self) -> impl Iterator<Item = i32> + '_ {
        self.history.oldest_ordered().copied()
    }

    /// How many times `code` appears in the recent history.
    pub fn count_recent(&self, code: AppCode) -> usize {
        self.recent_codes().filter(|&c| c == code.code()).count()
    }
}

/// Snapshot for status publication or the console.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMetrics {
    pub uptime_secs: u64,
    pub ticks: u64,
    pub state: &'static str,
    pub commissioned: bool,
    pub consecutive_failures: u8,
    pub error_visits: u32,
    pub sessions_established: u32,
    pub keep_alives_sent: u32,
    pub messages_received: u32,
    pub messages_published: u32,
    pub last_error: Option<i32>,
    pub last_fatal: Option<i32>,
    pub heap_free: u32,
}

impl RuntimeMetrics {
    pub fn collect(
        uptime_secs: u64,
        ticks: u64,
        state: LinkState,
        commissioned: bool,
        consecutive_failures: u8,
        diag: &LinkDiagnostics,
    ) -> Self {
        Self {
            uptime_secs,
            ticks,
            state: state.name(),
            commissioned,
            consecutive_failures,
            error_visits: diag.error_visits,
            sessions_established: diag.sessions_established,
            keep_alives_sent: diag.keep_alives_sent,
            messages_received: diag.messages_received,
            messages_published: diag.messages_published,
            last_error: diag.last_error.map(AppCode::code),
            last_fatal: diag.last_fatal.map(AppCode::code),
            heap_free: Self::read_heap_free(),
        }
    }

    #[cfg(target_os = "espidf")]
    fn read_heap_free() -> u32 {
        unsafe { esp_idf_svc::sys::esp_get_free_heap_size() }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_heap_free() -> u32 {
        // Synthetic value so the simulation reports a plausible figure.
        307_200
    }
}

// ───────────────────────────────────────────────────────────────
// BufferedDebugSink
// ───────────────────────────────────────────────────────────────

/// Fixed-capacity FIFO of debug codes.  Drops the oldest code when full.
#[derive(Debug, Default)]
pub struct BufferedDebugSink<const N: usize> {
    codes: Deque<i32, N>,
    dropped: u32,
}

impl<const N: usize> BufferedDebugSink<N> {
    pub const fn new() -> Self {
        Self {
            codes: Deque::new(),
            dropped: 0,
        }
    }

    /// Hand every buffered code to `f`, oldest first.
    pub fn drain(&mut self, mut f: impl FnMut(i32)) {
        while let Some(code) = self.codes.pop_front() {
            f(code);
        }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &i32> {
        self.codes.iter()
    }
}

impl<const N: usize> DebugSink for BufferedDebugSink<N> {
    fn post_debug_code(&mut self, code: i32) {
        if self.codes.is_full() {
            self.codes.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
        let _ = self.codes.push_back(code);
    }
}
