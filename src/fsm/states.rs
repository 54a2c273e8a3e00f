//! Concrete state handler functions and table builder.
//!
//! Each state is three plain `fn` pointers plus the timer it owns.  No
//! closures, no dynamic dispatch, no I/O: handlers push [`Effect`]s.
//!
//! ```text
//!  INIT ─┬─[force]──▶ NVM_ERASE ──▶ NVM_LOAD ─┬─[staged]──▶ NVM_WRITE ─┐
//!        └───────────────────────────▶        └────────────────────────┴─▶ WAIT_INIT
//!
//!  WAIT_INIT ──▶ WAIT_FOR_IP ──▶ WAIT_CONFIGURATION ──▶ MQTT_INIT (DNS)
//!     ▲                                                   │
//!     │                                                   ▼
//!     │        MQTT_LOOP ◀── SUBSCRIBE ◀── PROTOCOL_CONNECT ◀── NET_CONNECT
//!     │            │
//!     └─[backoff]─ TCPIP_ERROR ◀──[any failure / timeout]── (every network state)
//!                      │
//!                      └─[limit reached]──▶ FATAL_ERROR
//! ```

use core::time::Duration;

use super::context::{Effect, Effects, Observation, Session, Signal, StoreOpKind};
use super::{LinkState, StateDescriptor};
use crate::error::AppCode;
use crate::timer::TimerId;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; LinkState::COUNT] {
    [
        StateDescriptor {
            id: LinkState::Init,
            name: "INIT",
            timer: None,
            on_enter: None,
            on_exit: None,
            on_update: init_update,
        },
        StateDescriptor {
            id: LinkState::NvmEraseConfiguration,
            name: "NVM_ERASE_CONFIGURATION",
            timer: Some(TimerId::General),
            on_enter: Some(erase_enter),
            on_exit: None,
            on_update: erase_update,
        },
        StateDescriptor {
            id: LinkState::NvmLoadConfiguration,
            name: "NVM_LOAD_CONFIGURATION",
            timer: Some(TimerId::General),
            on_enter: Some(load_enter),
            on_exit: None,
            on_update: load_update,
        },
        StateDescriptor {
            id: LinkState::NvmWriteConfiguration,
            name: "NVM_WRITE_CONFIGURATION",
            timer: Some(TimerId::General),
            on_enter: Some(write_enter),
            on_exit: None,
            on_update: write_update,
        },
        StateDescriptor {
            id: LinkState::TcpipWaitInit,
            name: "TCPIP_WAIT_INIT",
            timer: Some(TimerId::TcpWait),
            on_enter: Some(wait_init_enter),
            on_exit: None,
            on_update: wait_init_update,
        },
        StateDescriptor {
            id: LinkState::TcpipWaitForIp,
            name: "TCPIP_WAIT_FOR_IP",
            timer: Some(TimerId::TcpWait),
            on_enter: Some(wait_for_ip_enter),
            on_exit: None,
            on_update: wait_for_ip_update,
        },
        StateDescriptor {
            id: LinkState::TcpipWaitConfiguration,
            name: "TCPIP_WAIT_CONFIGURATION",
            timer: Some(TimerId::General),
            on_enter: Some(wait_configuration_enter),
            on_exit: None,
            on_update: wait_configuration_update,
        },
        StateDescriptor {
            id: LinkState::TcpipMqttInit,
            name: "TCPIP_MQTT_INIT",
            timer: Some(TimerId::TcpWait),
            on_enter: Some(mqtt_init_enter),
            on_exit: None,
            on_update: mqtt_init_update,
        },
        StateDescriptor {
            id: LinkState::TcpipMqttNetConnect,
            name: "TCPIP_MQTT_NET_CONNECT",
            timer: Some(TimerId::TcpWait),
            on_enter: Some(net_connect_enter),
            on_exit: None,
            on_update: net_connect_update,
        },
        StateDescriptor {
            id: LinkState::TcpipMqttProtocolConnect,
            name: "TCPIP_MQTT_PROTOCOL_CONNECT",
            timer: Some(TimerId::General),
            on_enter: Some(protocol_connect_enter),
            on_exit: None,
            on_update: protocol_connect_update,
        },
        StateDescriptor {
            id: LinkState::TcpipMqttSubscribe,
            name: "TCPIP_MQTT_SUBSCRIBE",
            timer: Some(TimerId::General),
            on_enter: Some(subscribe_enter),
            on_exit: None,
            on_update: subscribe_update,
        },
        StateDescriptor {
            id: LinkState::TcpipMqttLoop,
            name: "TCPIP_MQTT_LOOP",
            timer: None,
            on_enter: Some(loop_enter),
            on_exit: Some(loop_exit),
            on_update: loop_update,
        },
        StateDescriptor {
            id: LinkState::TcpipError,
            name: "TCPIP_ERROR",
            timer: Some(TimerId::General),
            on_enter: Some(error_enter),
            on_exit: None,
            on_update: error_update,
        },
        StateDescriptor {
            id: LinkState::FatalError,
            name: "FATAL_ERROR",
            timer: None,
            on_enter: Some(fatal_enter),
            on_exit: None,
            on_update: fatal_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Helpers
// ═══════════════════════════════════════════════════════════════════════════

fn push(fx: &mut Effects, effect: Effect) {
    if fx.push(effect).is_err() {
        debug_assert!(false, "effect list overflow: {effect:?}");
    }
}

fn arm(fx: &mut Effects, id: TimerId, timeout: Duration) {
    push(fx, Effect::ArmTimer(id, timeout));
}

fn secs(n: u32) -> Duration {
    Duration::from_secs(u64::from(n))
}

/// Record a recoverable failure and head for the recovery funnel.
fn fail(fx: &mut Effects, code: AppCode) -> Option<LinkState> {
    push(fx, Effect::RecordFailure(code));
    Some(LinkState::TcpipError)
}

fn fatal(fx: &mut Effects, code: AppCode) -> Option<LinkState> {
    push(fx, Effect::RecordFatal(code));
    Some(LinkState::FatalError)
}

fn teardown(fx: &mut Effects) {
    push(fx, Effect::CloseTransport);
    push(fx, Effect::CancelResolve);
    push(fx, Effect::ClearAddress);
}

/// Where one erase/load/write round stands after this tick.
enum Batch {
    InFlight,
    /// Every op reported.  `failures` counts this batch,
    /// `total_failed` the whole session including this tick.
    Finished { failures: u32, total_failed: u32 },
}

fn track_batch(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Batch {
    // Ops that failed to start were already counted by the book.
    match obs.signal {
        Signal::Store(progress) => {
            if progress.succeeded | progress.failed != 0 {
                push(
                    fx,
                    Effect::SettleStoreOps {
                        succeeded: progress.succeeded,
                        failed: progress.failed,
                    },
                );
            }
            let mut new_failures = progress.failed.count_ones();
            let finished = if progress.still_pending == 0 {
                true
            } else if obs.timer_expired {
                push(fx, Effect::AbandonStoreOps);
                new_failures += progress.still_pending as u32;
                true
            } else {
                false
            };
            if finished {
                Batch::Finished {
                    failures: ctx.store.batch_failures + new_failures,
                    total_failed: ctx.store.failed_ops + new_failures,
                }
            } else {
                Batch::InFlight
            }
        }
        // A failure taken in a store state ends the batch: it counts once
        // and everything still outstanding is abandoned.
        Signal::Failed(_) => {
            push(fx, Effect::CountStoreFailure);
            push(fx, Effect::AbandonStoreOps);
            let new_failures = 1 + ctx.store.outstanding() as u32;
            Batch::Finished {
                failures: ctx.store.batch_failures + new_failures,
                total_failed: ctx.store.failed_ops + new_failures,
            }
        }
        _ => Batch::InFlight,
    }
}

fn store_enter(ctx: &Session, fx: &mut Effects, kind: StoreOpKind) {
    arm(fx, TimerId::General, secs(ctx.config.store_timeout_secs));
    push(fx, Effect::BeginStoreBatch);
    push(fx, Effect::IssueStoreOps(kind));
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT
// ═══════════════════════════════════════════════════════════════════════════

fn init_update(ctx: &Session, _obs: &Observation, _fx: &mut Effects) -> Option<LinkState> {
    if ctx.force_recommission {
        Some(LinkState::NvmEraseConfiguration)
    } else {
        Some(LinkState::NvmLoadConfiguration)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  NVM states
// ═══════════════════════════════════════════════════════════════════════════

fn erase_enter(ctx: &Session, fx: &mut Effects) {
    store_enter(ctx, fx, StoreOpKind::Erase);
}

fn erase_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match track_batch(ctx, obs, fx) {
        Batch::InFlight => None,
        Batch::Finished { failures: 0, .. } => {
            push(fx, Effect::EraseLocalCredentials);
            Some(LinkState::NvmLoadConfiguration)
        }
        Batch::Finished { total_failed, .. } => {
            if total_failed >= u32::from(ctx.config.store_failure_threshold) {
                fatal(fx, AppCode::StoreExhausted)
            } else {
                // Re-enter: the erase is issued again.
                Some(LinkState::NvmEraseConfiguration)
            }
        }
    }
}

fn load_enter(ctx: &Session, fx: &mut Effects) {
    store_enter(ctx, fx, StoreOpKind::Load);
}

fn load_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    // Second phase: loaded content was committed on the previous tick.
    if ctx.store.loaded {
        if ctx.staged.is_some() {
            return Some(LinkState::NvmWriteConfiguration);
        }
        if ctx.credentials.is_commissioned() {
            return Some(LinkState::TcpipWaitInit);
        }
        return fatal(fx, AppCode::NoCredentials);
    }

    match track_batch(ctx, obs, fx) {
        Batch::InFlight => None,
        Batch::Finished { failures: 0, .. } => {
            push(fx, Effect::CommitLoaded);
            None
        }
        Batch::Finished { .. } => fatal(fx, AppCode::StoreLoadFailed),
    }
}

fn write_enter(ctx: &Session, fx: &mut Effects) {
    store_enter(ctx, fx, StoreOpKind::Write);
}

fn write_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    if ctx.staged.is_none() {
        return fatal(fx, AppCode::NoCredentials);
    }

    match track_batch(ctx, obs, fx) {
        Batch::InFlight => None,
        Batch::Finished { failures: 0, .. } => {
            push(fx, Effect::CommitStaged);
            Some(LinkState::TcpipWaitInit)
        }
        Batch::Finished { total_failed, .. } => {
            let budget_spent = ctx.store.write_attempts > ctx.config.write_retry_budget;
            let threshold_hit = total_failed >= u32::from(ctx.config.store_failure_threshold);
            if budget_spent || threshold_hit {
                fatal(fx, AppCode::StoreWriteFailed)
            } else {
                Some(LinkState::NvmWriteConfiguration)
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Network bring-up
// ═══════════════════════════════════════════════════════════════════════════

fn wait_init_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::TcpWait, secs(ctx.config.stack_init_timeout_secs));
}

fn wait_init_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    if !ctx.credentials.is_commissioned() {
        return fatal(fx, AppCode::NoCredentials);
    }
    match obs.signal {
        Signal::StackReady => Some(LinkState::TcpipWaitForIp),
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::Timeout),
        _ => None,
    }
}

fn wait_for_ip_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::TcpWait, secs(ctx.config.ip_timeout_secs));
}

fn wait_for_ip_update(_ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match obs.signal {
        Signal::AddressAcquired(addr) => {
            push(fx, Effect::RecordLocalAddress(addr));
            Some(LinkState::TcpipWaitConfiguration)
        }
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::Timeout),
        _ => None,
    }
}

fn wait_configuration_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::General, secs(ctx.config.settle_secs));
}

fn wait_configuration_update(
    _ctx: &Session,
    obs: &Observation,
    _fx: &mut Effects,
) -> Option<LinkState> {
    obs.timer_expired.then_some(LinkState::TcpipMqttInit)
}

// ═══════════════════════════════════════════════════════════════════════════
//  Broker session
// ═══════════════════════════════════════════════════════════════════════════

fn mqtt_init_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::TcpWait, secs(ctx.config.dns_timeout_secs));
    push(fx, Effect::StartResolve);
}

fn mqtt_init_update(_ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match obs.signal {
        Signal::Resolved(addr) => {
            push(fx, Effect::SetResolved(addr));
            Some(LinkState::TcpipMqttNetConnect)
        }
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::Timeout),
        _ => None,
    }
}

fn net_connect_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::TcpWait, secs(ctx.config.connect_timeout_secs));
    push(fx, Effect::OpenTransport);
}

fn net_connect_update(_ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match obs.signal {
        Signal::TransportUp => {
            push(fx, Effect::PromoteTransport);
            Some(LinkState::TcpipMqttProtocolConnect)
        }
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::Timeout),
        _ => None,
    }
}

fn command_timeout(ctx: &Session) -> Duration {
    Duration::from_millis(u64::from(ctx.config.command_timeout_ms))
}

fn protocol_connect_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::General, command_timeout(ctx));
    push(fx, Effect::SendConnect);
}

fn protocol_connect_update(
    _ctx: &Session,
    obs: &Observation,
    fx: &mut Effects,
) -> Option<LinkState> {
    match obs.signal {
        Signal::Acknowledged => Some(LinkState::TcpipMqttSubscribe),
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::CommandTimeout),
        _ => None,
    }
}

fn subscribe_enter(ctx: &Session, fx: &mut Effects) {
    arm(fx, TimerId::General, command_timeout(ctx));
    push(fx, Effect::SendSubscribe);
}

fn subscribe_update(_ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match obs.signal {
        Signal::Acknowledged => Some(LinkState::TcpipMqttLoop),
        Signal::Failed(code) => fail(fx, code),
        _ if obs.timer_expired => fail(fx, AppCode::CommandTimeout),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Steady state
// ═══════════════════════════════════════════════════════════════════════════

fn keep_alive_interval(ctx: &Session) -> Duration {
    Duration::from_secs(u64::from(ctx.config.keep_alive_secs))
}

fn loop_enter(ctx: &Session, fx: &mut Effects) {
    push(fx, Effect::ResetRetries);
    arm(fx, TimerId::KeepAlive, keep_alive_interval(ctx));
}

fn loop_exit(_ctx: &Session, fx: &mut Effects) {
    push(fx, Effect::DisarmTimer(TimerId::KeepAlive));
}

fn loop_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    match obs.signal {
        Signal::Failed(code) => return fail(fx, code),
        Signal::MessageReceived => push(fx, Effect::DispatchInbound),
        _ => {}
    }

    if obs.keep_alive_due {
        push(fx, Effect::Ping);
        arm(fx, TimerId::KeepAlive, keep_alive_interval(ctx));
    }

    if !ctx.outbox.is_empty() {
        push(fx, Effect::PublishNext);
    }

    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  Recovery
// ═══════════════════════════════════════════════════════════════════════════

fn error_enter(ctx: &Session, fx: &mut Effects) {
    teardown(fx);
    arm(fx, TimerId::General, secs(ctx.config.backoff_secs));
}

fn error_update(ctx: &Session, obs: &Observation, fx: &mut Effects) -> Option<LinkState> {
    if ctx.consecutive_failures >= ctx.config.max_consecutive_failures {
        return fatal(fx, AppCode::RetriesExhausted);
    }
    obs.timer_expired.then_some(LinkState::TcpipWaitInit)
}

fn fatal_enter(_ctx: &Session, fx: &mut Effects) {
    teardown(fx);
    push(fx, Effect::DisarmTimer(TimerId::General));
    push(fx, Effect::DisarmTimer(TimerId::TcpWait));
}

fn fatal_update(_ctx: &Session, _obs: &Observation, _fx: &mut Effects) -> Option<LinkState> {
    None
}
