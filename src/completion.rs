//! Interrupt-safe completion queue for asynchronous store operations.
//!
//! Storage drivers finish work in callback or interrupt context.  Those
//! callbacks must never touch the controller's session, so all they do is
//! record `(handle, outcome)` here.  The store adapter drains the queue
//! from the main loop when the controller polls a handle.
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ driver callback │────▶│ CompletionQueue │────▶│ poll_store()     │
//! │ (producer)      │     │  (lock-free)    │     │ (main loop)      │
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//! ```

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// One finished operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub handle: u16,
    pub success: bool,
}

impl Completion {
    const fn encode(self) -> u32 {
        ((self.handle as u32) << 8) | (self.success as u32)
    }

    const fn decode(raw: u32) -> Self {
        Self {
            handle: (raw >> 8) as u16,
            success: raw & 1 == 1,
        }
    }
}

// ── Lock-free SPSC ring buffer ────────────────────────────────
//
// One producer (driver callback), one consumer (main loop).  Each slot is
// an atomic word so no `unsafe` is needed.  One slot stays empty to tell
// full from empty, so capacity is `N - 1`.

pub struct CompletionQueue<const N: usize> {
    head: AtomicUsize,
    tail: AtomicUsize,
    slots: [AtomicU32; N],
}

impl<const N: usize> CompletionQueue<N> {
    pub const fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            slots: [const { AtomicU32::new(0) }; N],
        }
    }

    /// Record a completion.  Safe to call from interrupt context.
    /// Returns `false` if the queue is full (completion dropped).
    pub fn push(&self, completion: Completion) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let next_head = (head + 1) % N;

        if next_head == tail {
            return false;
        }

        self.slots[head].store(completion.encode(), Ordering::Relaxed);
        self.head.store(next_head, Ordering::Release);
        true
    }

    /// Take the oldest completion.  Main loop only.
    pub fn pop(&self) -> Option<Completion> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let raw = self.slots[tail].load(Ordering::Relaxed);
        self.tail.store((tail + 1) % N, Ordering::Release);
        Some(Completion::decode(raw))
    }

    /// Drain everything pending into `handler`, FIFO.
    pub fn drain(&self, mut handler: impl FnMut(Completion)) {
        while let Some(c) = self.pop() {
            handler(c);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        (head + N - tail) % N
    }
}

impl<const N: usize> Default for CompletionQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
