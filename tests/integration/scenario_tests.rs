//! End-to-end bring-up scenarios against the simulated platform.

use cloudlink::adapters::sim::FaultPlan;
use cloudlink::app::commands::LinkCommand;
use cloudlink::app::ports::MAX_PAYLOAD;
use cloudlink::config::{LinkConfig, TopicName};
use cloudlink::diagnostics::state_code;
use cloudlink::error::AppCode;
use cloudlink::fsm::LinkState;

use crate::harness::{Harness, Seen, clean_plan, test_credentials};

const BRING_UP: [LinkState; 9] = [
    LinkState::NvmLoadConfiguration,
    LinkState::TcpipWaitInit,
    LinkState::TcpipWaitForIp,
    LinkState::TcpipWaitConfiguration,
    LinkState::TcpipMqttInit,
    LinkState::TcpipMqttNetConnect,
    LinkState::TcpipMqttProtocolConnect,
    LinkState::TcpipMqttSubscribe,
    LinkState::TcpipMqttLoop,
];

// ── Happy path ───────────────────────────────────────────────

#[test]
fn commissioned_device_reaches_loop_first_time() {
    let mut h = Harness::commissioned();
    let budget = LinkConfig::default().happy_path_budget_ms();

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    assert_eq!(h.events.states_entered(), BRING_UP.to_vec());
    assert!(h.now_ms() <= budget, "took {} ms", h.now_ms());
    assert_eq!(h.ctl.diagnostics().error_visits, 0);
    assert!(h.events.failures().is_empty());
    assert_eq!(h.events.count(|e| *e == Seen::Connected), 1);
    assert!(h.ctl.is_connected());
    assert!(h.ctl.session().transport.is_some());
    assert!(h.ctl.session().credentials.is_commissioned());
}

#[test]
fn every_transition_posts_its_state_code() {
    let mut h = Harness::commissioned();
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    let expected: Vec<i32> = BRING_UP.iter().map(|&s| state_code(s)).collect();
    assert_eq!(h.codes, expected);
}

#[test]
fn loop_stays_put_while_idle() {
    let mut h = Harness::commissioned();
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    let entered = h.events.states_entered().len();

    h.run_for_ms(30_000);

    assert_eq!(h.state(), LinkState::TcpipMqttLoop);
    assert_eq!(h.events.states_entered().len(), entered);
}

// ── DNS failures exhaust the retry limit ─────────────────────

#[test]
fn repeated_dns_failures_end_in_fatal() {
    let config = LinkConfig {
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let plan = FaultPlan {
        dns_failures: 3,
        ..clean_plan()
    };
    let mut h = Harness::new(config, plan, Some(&test_credentials()));

    assert!(h.run_until_state(LinkState::FatalError, 2_000));

    assert_eq!(h.code_count(AppCode::DnsFailed), 3);
    assert_eq!(
        h.events.failures(),
        vec![
            (AppCode::DnsFailed, 1),
            (AppCode::DnsFailed, 2),
            (AppCode::DnsFailed, 3),
        ]
    );
    assert_eq!(
        h.ctl.diagnostics().last_fatal,
        Some(AppCode::RetriesExhausted)
    );
    assert_eq!(h.codes.last(), Some(&AppCode::RetriesExhausted.code()));
    assert_eq!(
        h.events
            .count(|e| matches!(e, Seen::Changed(_, LinkState::TcpipError))),
        3
    );
    assert!(h.ctl.session().transport.is_none());
}

#[test]
fn fewer_dns_failures_than_the_limit_recover() {
    let config = LinkConfig {
        max_consecutive_failures: 3,
        ..Default::default()
    };
    let plan = FaultPlan {
        dns_failures: 2,
        ..clean_plan()
    };
    let mut h = Harness::new(config, plan, Some(&test_credentials()));

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 2_000));
    assert_eq!(h.code_count(AppCode::DnsFailed), 2);
    assert_eq!(h.ctl.session().consecutive_failures, 0);
}

// ── Handshake fails once ─────────────────────────────────────

#[test]
fn handshake_failure_recovers_through_one_error_visit() {
    let plan = FaultPlan {
        handshake_failures: 1,
        ..clean_plan()
    };
    let mut h = Harness::new(LinkConfig::default(), plan, Some(&test_credentials()));

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 2_000));

    assert_eq!(
        h.events
            .count(|e| matches!(e, Seen::Changed(_, LinkState::TcpipError))),
        1
    );
    assert_eq!(h.events.failures(), vec![(AppCode::HandshakeFailed, 1)]);
    assert_eq!(h.ctl.diagnostics().connect_attempts, 2);
    assert!(h.ctl.session().connecting.is_none());
    assert!(h.ctl.session().transport.is_some());
}

#[test]
fn rejected_connect_closes_transport_before_reopening() {
    // The simulated transport refuses a second open while one is still
    // established, so reaching the loop proves the first was closed.
    let plan = FaultPlan {
        connect_rejections: 1,
        ..clean_plan()
    };
    let mut h = Harness::new(LinkConfig::default(), plan, Some(&test_credentials()));

    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 2_000));

    assert_eq!(h.events.failures(), vec![(AppCode::ProtocolRejected, 1)]);
    assert_eq!(h.ctl.diagnostics().connect_attempts, 2);
    assert_eq!(h.ctl.diagnostics().sessions_established, 1);
}

// ── Keep-alive ───────────────────────────────────────────────

#[test]
fn keep_alive_pings_and_rearms_without_transition() {
    let mut h = Harness::commissioned();
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    let entered = h.events.states_entered().len();
    let interval_ms = u64::from(LinkConfig::default().keep_alive_secs) * 1000;

    h.run_for_ms(interval_ms + 500);

    assert_eq!(h.state(), LinkState::TcpipMqttLoop);
    assert_eq!(h.events.states_entered().len(), entered);
    assert_eq!(h.platform.network.pings, 1);
    assert_eq!(h.events.count(|e| *e == Seen::KeepAlive), 1);
    assert_eq!(h.ctl.diagnostics().keep_alives_sent, 1);

    let keep_alive = h.ctl.session().timers.keep_alive;
    assert!(keep_alive.is_armed());
    assert!(keep_alive.elapsed_ms(h.now_ms()) < interval_ms);
}

// ── Steady-state traffic ─────────────────────────────────────

#[test]
fn inbound_messages_are_dispatched() {
    let plan = FaultPlan {
        inbound_every_polls: 5,
        ..clean_plan()
    };
    let mut h = Harness::new(LinkConfig::default(), plan, Some(&test_credentials()));
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    for _ in 0..10 {
        h.tick();
    }

    let messages: Vec<_> = h
        .events
        .seen
        .iter()
        .filter(|e| matches!(e, Seen::Message(..)))
        .collect();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0],
        &Seen::Message(
            "device/commands".to_string(),
            br#"{"cmd":"status"}"#.to_vec()
        )
    );
    assert_eq!(h.ctl.diagnostics().messages_received, 2);
}

#[test]
fn queued_publish_goes_out_from_the_loop() {
    let mut h = Harness::commissioned();
    h.ctl.publish(b"online").unwrap();

    // Nothing leaves before the session is up.
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));
    assert_eq!(h.platform.network.published, 0);

    h.tick();
    assert_eq!(h.platform.network.published, 1);
    assert_eq!(
        h.events.count(|e| *e == Seen::Published("device/status".to_string())),
        1
    );
    assert!(h.ctl.session().outbox.is_empty());
}

#[test]
fn publish_command_uses_its_own_topic() {
    let mut h = Harness::commissioned();
    assert!(h.run_until_state(LinkState::TcpipMqttLoop, 500));

    let mut topic = TopicName::new();
    topic.push_str("device/telemetry").unwrap();
    let mut payload = heapless::Vec::<u8, MAX_PAYLOAD>::new();
    payload.extend_from_slice(b"{\"t\":21.5}").unwrap();
    h.ctl
        .handle_command(
            LinkCommand::Publish { topic, payload },
            &mut h.platform,
            &mut h.events,
        )
        .unwrap();
    h.tick();

    assert_eq!(
        h.events
            .count(|e| *e == Seen::Published("device/telemetry".to_string())),
        1
    );
    assert_eq!(h.ctl.diagnostics().messages_published, 1);
}
