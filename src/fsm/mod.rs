//! Function-pointer finite state machine engine with pure transitions.
//!
//! Classic embedded FSM table, with one twist: handlers never perform I/O.
//! They read the [`Session`] and the tick's [`Observation`] and push
//! [`Effect`]s; the caller applies those after the decision is made.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                          │
//! │  ┌──────────────┬────────┬──────────────┬──────────────┬──────────┐  │
//! │  │ LinkState    │ timer  │ on_enter     │ on_exit      │ on_update│  │
//! │  ├──────────────┼────────┼──────────────┼──────────────┼──────────┤  │
//! │  │ Init         │ -      │ -            │ -            │ fn(..)   │  │
//! │  │ NvmLoad...   │ General│ fn(ctx, fx)  │ -            │ fn(..)   │  │
//! │  │ ...          │        │              │              │          │  │
//! │  └──────────────┴────────┴──────────────┴──────────────┴──────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!
//!   observe ──▶ decide (pure) ──▶ commit ──▶ apply effects
//! ```
//!
//! [`Fsm::decide`] runs `on_update` for the current state.  If it returns
//! `Some(next)`, the `on_exit` of the current state and the `on_enter` of
//! `next` are run too, all into the same effect list.  [`Fsm::commit`]
//! then moves the current pointer.  At most one transition per tick.

pub mod context;
pub mod states;

use context::{Effects, Observation, Session};
use log::info;

use crate::timer::TimerId;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Every controller state, in table order.
/// Must stay in sync with [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkState {
    Init = 0,
    NvmEraseConfiguration = 1,
    NvmLoadConfiguration = 2,
    NvmWriteConfiguration = 3,
    TcpipWaitInit = 4,
    TcpipWaitForIp = 5,
    TcpipWaitConfiguration = 6,
    TcpipMqttInit = 7,
    TcpipMqttNetConnect = 8,
    TcpipMqttProtocolConnect = 9,
    TcpipMqttSubscribe = 10,
    TcpipMqttLoop = 11,
    TcpipError = 12,
    FatalError = 13,
}

impl LinkState {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 14;

    pub const ALL: [LinkState; Self::COUNT] = [
        Self::Init,
        Self::NvmEraseConfiguration,
        Self::NvmLoadConfiguration,
        Self::NvmWriteConfiguration,
        Self::TcpipWaitInit,
        Self::TcpipWaitForIp,
        Self::TcpipWaitConfiguration,
        Self::TcpipMqttInit,
        Self::TcpipMqttNetConnect,
        Self::TcpipMqttProtocolConnect,
        Self::TcpipMqttSubscribe,
        Self::TcpipMqttLoop,
        Self::TcpipError,
        Self::FatalError,
    ];

    /// Convert an index back to `LinkState`.  Panics on out-of-range in
    /// debug builds; returns `FatalError` in release.
    pub fn from_index(idx: usize) -> Self {
        match Self::ALL.get(idx) {
            Some(state) => *state,
            None => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::FatalError
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::NvmEraseConfiguration => "NVM_ERASE_CONFIGURATION",
            Self::NvmLoadConfiguration => "NVM_LOAD_CONFIGURATION",
            Self::NvmWriteConfiguration => "NVM_WRITE_CONFIGURATION",
            Self::TcpipWaitInit => "TCPIP_WAIT_INIT",
            Self::TcpipWaitForIp => "TCPIP_WAIT_FOR_IP",
            Self::TcpipWaitConfiguration => "TCPIP_WAIT_CONFIGURATION",
            Self::TcpipMqttInit => "TCPIP_MQTT_INIT",
            Self::TcpipMqttNetConnect => "TCPIP_MQTT_NET_CONNECT",
            Self::TcpipMqttProtocolConnect => "TCPIP_MQTT_PROTOCOL_CONNECT",
            Self::TcpipMqttSubscribe => "TCPIP_MQTT_SUBSCRIBE",
            Self::TcpipMqttLoop => "TCPIP_MQTT_LOOP",
            Self::TcpipError => "TCPIP_ERROR",
            Self::FatalError => "FATAL_ERROR",
        }
    }

    /// States in which the session owns an open transport.
    pub const fn holds_transport(self) -> bool {
        matches!(
            self,
            Self::TcpipMqttProtocolConnect | Self::TcpipMqttSubscribe | Self::TcpipMqttLoop
        )
    }

    /// No automatic progress out of this state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::FatalError)
    }
}

impl core::fmt::Display for LinkState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&Session, &mut Effects);

/// Per-tick handler.  Returns `Some(next)` to transition, `None` to stay.
/// Returning the current state re-enters it (exit and enter both run).
pub type StateUpdateFn = fn(&Session, &Observation, &mut Effects) -> Option<LinkState>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor {
    pub id: LinkState,
    pub name: &'static str,
    /// Timer armed on entry whose expiry this state reacts to.
    pub timer: Option<TimerId>,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

/// Outcome of one decision.
#[derive(Debug)]
pub struct Step {
    pub from: LinkState,
    pub to: Option<LinkState>,
    pub effects: Effects,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

pub struct Fsm {
    /// Fixed-size table indexed by `LinkState as usize`.
    table: [StateDescriptor; LinkState::COUNT],
    current: usize,
    tick_count: u64,
    state_entry_tick: u64,
    transitions: u64,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; LinkState::COUNT], initial: LinkState) -> Self {
        debug_assert!(
            table.iter().enumerate().all(|(i, d)| d.id as usize == i),
            "state table out of order"
        );
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
            transitions: 0,
        }
    }

    /// Decide the next step without changing anything.
    pub fn decide(&self, ctx: &Session, obs: &Observation) -> Step {
        let mut effects = Effects::new();
        let desc = &self.table[self.current];
        let to = (desc.on_update)(ctx, obs, &mut effects);

        if let Some(next) = to {
            if let Some(exit) = desc.on_exit {
                exit(ctx, &mut effects);
            }
            if let Some(enter) = self.table[next as usize].on_enter {
                enter(ctx, &mut effects);
            }
        }

        Step {
            from: desc.id,
            to,
            effects,
        }
    }

    /// Record one tick and move to `step.to`, if any.
    pub fn commit(&mut self, step: &Step) {
        self.tick_count += 1;
        debug_assert_eq!(step.from as usize, self.current, "stale step");

        if let Some(next) = step.to {
            let next_idx = next as usize;
            info!(
                "FSM transition: {} -> {}",
                self.table[self.current].name, self.table[next_idx].name
            );
            self.current = next_idx;
            self.state_entry_tick = self.tick_count;
            self.transitions += 1;
        }
    }

    /// Jump to `next` outside the normal decision path (external reset).
    /// Returns the effects of leaving the current state and entering `next`.
    pub fn force(&mut self, next: LinkState, ctx: &Session) -> Effects {
        let mut effects = Effects::new();
        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx, &mut effects);
        }
        info!(
            "FSM forced: {} -> {}",
            self.table[self.current].name,
            next.name()
        );
        self.current = next as usize;
        self.state_entry_tick = self.tick_count;
        self.transitions += 1;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx, &mut effects);
        }
        effects
    }

    pub fn current_state(&self) -> LinkState {
        LinkState::from_index(self.current)
    }

    pub fn descriptor(&self, state: LinkState) -> &StateDescriptor {
        &self.table[state as usize]
    }

    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count - self.state_entry_tick
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn transitions(&self) -> u64 {
        self.transitions
    }
}
