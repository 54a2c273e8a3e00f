//! Software timers over a monotonic millisecond clock.
//!
//! A [`Timer`] only remembers when it was last marked and, optionally, the
//! timeout it was armed with.  Nothing here sleeps or reads the clock: the
//! caller passes `now_ms` in, which keeps every query pure and testable.
//!
//! All elapsed-time arithmetic saturates, so a clock that steps backwards
//! reads as "no time has passed" rather than as a huge elapsed value.

use core::time::Duration;

/// One mark-and-compare timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timer {
    marked_at_ms: u64,
    timeout: Option<Duration>,
}

impl Timer {
    pub const fn new() -> Self {
        Self {
            marked_at_ms: 0,
            timeout: None,
        }
    }

    /// Record `now_ms` as the reference point.  Keeps the armed timeout.
    pub fn mark(&mut self, now_ms: u64) {
        self.marked_at_ms = now_ms;
    }

    /// Mark now and arm with `timeout`.
    pub fn arm(&mut self, now_ms: u64, timeout: Duration) {
        self.marked_at_ms = now_ms;
        self.timeout = Some(timeout);
    }

    /// Forget the armed timeout.  A disarmed timer never expires.
    pub fn disarm(&mut self) {
        self.timeout = None;
    }

    pub fn is_armed(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.marked_at_ms)
    }

    pub fn has_elapsed_secs(&self, now_ms: u64, secs: u32) -> bool {
        self.elapsed_ms(now_ms) >= u64::from(secs) * 1000
    }

    pub fn has_elapsed_ms(&self, now_ms: u64, ms: u32) -> bool {
        self.elapsed_ms(now_ms) >= u64::from(ms)
    }

    /// `true` iff armed and elapsed ≥ timeout.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.timeout {
            Some(timeout) => u128::from(self.elapsed_ms(now_ms)) >= timeout.as_millis(),
            None => false,
        }
    }
}

/// The three timer slots owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Store waits, settle, command acks and backoff.
    General,
    /// Network stack, DNS and transport waits.
    TcpWait,
    /// Keep-alive ping schedule in the steady-state loop.
    KeepAlive,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timers {
    pub general: Timer,
    pub tcp_wait: Timer,
    pub keep_alive: Timer,
}

impl Timers {
    pub fn get(&self, id: TimerId) -> &Timer {
        match id {
            TimerId::General => &self.general,
            TimerId::TcpWait => &self.tcp_wait,
            TimerId::KeepAlive => &self.keep_alive,
        }
    }

    pub fn get_mut(&mut self, id: TimerId) -> &mut Timer {
        match id {
            TimerId::General => &mut self.general,
            TimerId::TcpWait => &mut self.tcp_wait,
            TimerId::KeepAlive => &mut self.keep_alive,
        }
    }

    pub fn disarm_all(&mut self) {
        self.general.disarm();
        self.tcp_wait.disarm();
        self.keep_alive.disarm();
    }
}
