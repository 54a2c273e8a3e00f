//! Timeouts, teardown and the bounded recovery funnel.

use cloudlink::adapters::sim::FaultPlan;
use cloudlink::app::commands::LinkCommand;
use cloudlink::config::LinkConfig;
use cloudlink::error::AppCode;
use cloudlink::fsm::LinkState;

use crate::harness::{Harness, Seen, clean_plan, test_credentials};

fn harness(config: LinkConfig, plan: FaultPlan) -> Harness {
    Harness::new(config, plan, Some(&test_credentials()))
}

/// Simulated time at which the last tick ran.
fn last_tick_ms(h: &Harness) -> u64 {
    h.now_ms() - h.step_ms
}

#[test]
fn hung_resolve_times_out_exactly_once() {
    let config = LinkConfig::default();
    let plan = FaultPlan {
        resolve_polls: u16::MAX,
        ..clean_plan()
    };
    let mut h = harness(config.clone(), plan);

    assert!(h.run_until_state(LinkState::TcpipMqttInit, 500));
    let entered_at = last_tick_ms(&h);
    assert!(h.run_until(|c| c.state() != LinkState::TcpipMqttInit, 500));
    let left_at = last_tick_ms(&h);

    assert_eq!(h.state(), LinkState::TcpipError);
    assert_eq!(
        left_at - entered_at,
        u64::from(config.dns_timeout_secs) * 1000
    );
    assert!(h.ctl.session().resolve.is_none());

    // Still backing off: no second failure for the same timeout.
    h.run_for_ms(2_000);
    assert_eq!(h.state(), LinkState::TcpipError);
    assert_eq!(h.events.failures(), vec![(AppCode::Timeout, 1)]);
    assert_eq!(
        h.events
            .count(|e| matches!(e, Seen::Changed(_, LinkState::TcpipError))),
        1
    );
}

/// Bring the link up against `plan` until it parks in `state`, then check
/// that the wait ends after exactly `timeout_ms` with one failure.
fn assert_times_out_once(plan: FaultPlan, state: LinkState, code: AppCode, timeout_ms: u64) {
    let mut h = harness(LinkConfig::default(), plan);

    assert!(h.run_until_state(state, 500));
    let entered_at = last_tick_ms(&h);
    assert!(h.run_until(|c| c.state() != state, 1_000));
    let left_at = last_tick_ms(&h);

    assert_eq!(h.state(), LinkState::TcpipError);
    assert_eq!(left_at - entered_at, timeout_ms);
    assert!(h.ctl.session().transport.is_none());
    assert!(h.ctl.session().connecting.is_none());

    // Backoff has not run out yet: the expiry is not reported twice.
    h.run_for_ms(2_000);
    assert_eq!(h.state(), LinkState::TcpipError);
    assert_eq!(h.events.failures(), vec![(code, 1)]);
    assert_eq!(h.code_count(code), 1);
    assert_eq!(
        h.events
            .count(|e| matches!(e, Seen::Changed(_, LinkState::TcpipError))),
        1
    );
}

#[test]
fn missing_address_times_out_once() {
    let plan = FaultPlan {
        address_after_polls: u16::MAX,
        ..clean_plan()
    };
    let timeout_ms = u64::from(LinkConfig::default().ip_timeout_secs) * 1000;
    assert_times_out_once(plan, LinkState::TcpipWaitForIp, AppCode::Timeout, timeout_ms);
}

#[test]
fn stalled_handshake_times_out_once() {
    let plan = FaultPlan {
        handshake_polls: u16::MAX,
        ..clean_plan()
    };
    let timeout_ms = u64::from(LinkConfig::default().connect_timeout_secs) * 1000;
    assert_times_out_once(
        plan,
        LinkState::TcpipMqttNetConnect,
        AppCode::Timeout,
        timeout_ms,
    );
}

#[test]
fn unanswered_connect_times_out_once() {
    let plan = FaultPlan {
        connect_ack_polls: u16::MAX,
        ..clean_plan()
    };
    let timeout_ms = u64::from(LinkConfig::default().command_timeout_ms);
    assert_times_out_once(
        plan,
        LinkState::TcpipMqttProtocolConnect,
        AppCode::CommandTimeout,
        timeout_ms,
    );
}

#[test]
fn unanswered_subscribe_times_out_once() {
    let plan = FaultPlan {
        subscribe_ack_polls: u16::MAX,
        ..clean_plan()
    };
    let timeout_ms = u64::from(LinkConfig::default().command_timeout_ms);
    assert_times_out_once(
        plan,
        LinkState::TcpipMqttSubscribe,
        AppCode::CommandTimeout,
        timeout_ms,
    );
}

#[test]
fn backoff_waits_before_retrying() {
    let config = LinkConfig::default();
    let plan = FaultPlan {
        dns_failures: 1,
        ..clean_plan()
    };
    let mut h = harness(config.clone(), plan);

    assert!(h.run_until_state(LinkState::TcpipError, 500));
    let entered_at = last_tick_ms(&h);
    assert!(h.run_until_state(LinkState::TcpipWaitInit, 500));

    assert_eq!(
        last_tick_ms(&h) - entered_at,
        u64::from(config.backoff_secs) * 1000
    );
}

#[test]
fn stack_that_never_comes_up_exhausts_retries() {
    let config = LinkConfig {
        max_consecutive_failures: 2,
        ..Default::default()
    };
    let plan = FaultPlan {
        stack_ready_after_polls: u16::MAX,
        ..clean_plan()
    };
    let mut h = harness(config, plan);
    h.step_ms = 500;

    assert!(h.run_until_state(LinkState::FatalError, 1_000));

    assert_eq!(
        h.events.failures(),
        vec![(AppCode::Timeout, 1), (AppCode::Timeout, 2)]
    );
    assert_eq!(h.code_count(AppCode::Timeout), 2);
    assert_eq!(
        h.ctl.diagnostics().last_fatal,
        Some(AppCode::RetriesExhausted)
    );
}

#[test]
fn dropped_connection_is_rebuilt() {
    let plan = FaultPlan {
        drop_after_polls: Some(3),
        ..clean_plan()
    };
    let mut h = harness(LinkConfig::default(), plan);

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    assert!(h.run_until_state(LinkState::TcpipError, 10));
    assert!(h.ctl.session().transport.is_none());
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    assert_eq!(h.events.failures(), vec![(AppCode::InvalidSocket, 1)]);
    assert_eq!(h.events.count(|e| *e == Seen::Connected), 2);
    assert_eq!(h.ctl.diagnostics().sessions_established, 2);
}

#[test]
fn reaching_the_loop_resets_the_failure_count() {
    let config = LinkConfig {
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let plan = FaultPlan {
        dns_failures: 2,
        drop_after_polls: Some(2),
        ..clean_plan()
    };
    let mut h = harness(config, plan);

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 2_000));
    assert!(h.run_until_state(LinkState::TcpipError, 10));
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    assert_eq!(
        h.events.failures(),
        vec![
            (AppCode::DnsFailed, 1),
            (AppCode::DnsFailed, 2),
            (AppCode::InvalidSocket, 1),
        ]
    );
}

#[test]
fn fatal_is_terminal_until_reset() {
    let mut h = Harness::new(LinkConfig::default(), clean_plan(), None);
    assert!(h.run_until_state(LinkState::FatalError, 10));
    let seen = h.events.seen.len();

    h.step_ms = 10_000;
    for _ in 0..60 {
        h.tick();
    }

    assert_eq!(h.state(), LinkState::FatalError);
    assert_eq!(h.events.seen.len(), seen);
    let timers = h.ctl.session().timers;
    assert!(!timers.general.is_armed());
    assert!(!timers.tcp_wait.is_armed());
}

#[test]
fn reset_restarts_bring_up_from_init() {
    let mut h = Harness::commissioned();
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    h.ctl
        .handle_command(LinkCommand::Reset, &mut h.platform, &mut h.events)
        .unwrap();
    assert_eq!(h.state(), LinkState::Init);
    assert!(h.ctl.session().transport.is_none());
    assert!(h.ctl.session().local_address.is_none());
    assert!(!h.ctl.session().credentials.is_commissioned());

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    assert_eq!(
        h.events
            .count(|e| matches!(e, Seen::Changed(_, LinkState::NvmLoadConfiguration))),
        2
    );
    assert_eq!(h.ctl.diagnostics().sessions_established, 2);
}

#[test]
fn reset_leaves_fatal_and_recovers_after_commissioning() {
    let mut h = Harness::new(LinkConfig::default(), clean_plan(), None);
    assert!(h.run_until_state(LinkState::FatalError, 10));

    h.ctl.stage_credentials(test_credentials()).unwrap();
    h.ctl
        .handle_command(LinkCommand::Reset, &mut h.platform, &mut h.events)
        .unwrap();

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    assert!(h.ctl.session().credentials.is_commissioned());
}

#[test]
fn runtime_config_applies_on_next_entry() {
    let mut h = harness(
        LinkConfig::default(),
        FaultPlan {
            dns_failures: 1,
            ..clean_plan()
        },
    );
    assert!(h.run_until_state(LinkState::TcpipMqttInit, 500));

    let faster = LinkConfig {
        backoff_secs: 1,
        ..Default::default()
    };
    h.ctl
        .handle_command(LinkCommand::UpdateConfig(faster), &mut h.platform, &mut h.events)
        .unwrap();

    assert!(h.run_until_state(LinkState::TcpipError, 10));
    let entered_at = last_tick_ms(&h);
    assert!(h.run_until_state(LinkState::TcpipWaitInit, 100));
    assert_eq!(last_tick_ms(&h) - entered_at, 1_000);
}
