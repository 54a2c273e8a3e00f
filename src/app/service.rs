//! Link controller, the hexagonal core.
//!
//! [`Controller`] owns the FSM and the session.  It exposes a
//! hardware-agnostic API; all I/O flows through port traits passed in at
//! call sites, making the whole controller testable with mock adapters.
//!
//! ```text
//!   Platform ──poll──▶ ┌──────────────────────────┐ ──▶ EventSink
//!                      │        Controller         │
//!   Platform ◀─effects─│  observe · decide · apply │ ──▶ DebugSink
//!                      └──────────────────────────┘
//! ```

use log::{error, info, warn};

use crate::credentials::{CERT_CAPACITY, Credentials, Region};
use crate::diagnostics::{LinkDiagnostics, RuntimeMetrics, state_code};
use crate::error::{AppCode, Error, LinkError, Result};
use crate::fsm::context::{
    Effect, Observation, OutboundMessage, PendingOp, Session, Signal, StoreOpKind, StoreProgress,
};
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, LinkState};
use crate::timer::TimerId;

use super::commands::LinkCommand;
use super::events::LinkEvent;
use super::ports::{
    AckStatus, ConfigPort, ConnectOptions, EventSink, OpenStatus, Platform, ResolveStatus,
    StoreStatus, TlsIdentity,
};

// ───────────────────────────────────────────────────────────────
// Controller
// ───────────────────────────────────────────────────────────────

/// Drives one device's connectivity lifecycle.
pub struct Controller {
    fsm: Fsm,
    session: Session,
    config_dirty: bool,
}

impl Controller {
    /// Create the session.  The FSM sits in INIT until the first tick.
    pub fn new(config: crate::config::LinkConfig) -> Self {
        Self {
            fsm: Fsm::new(build_state_table(), LinkState::Init),
            session: Session::new(config),
            config_dirty: false,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn start(&mut self, sink: &mut impl EventSink) {
        sink.emit(&LinkEvent::Started(self.fsm.current_state()));
        info!("Controller started in {}", self.fsm.current_state());
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one cycle: observe → decide → commit → apply → emit.
    ///
    /// The `platform` parameter satisfies every collaborator port, which
    /// avoids juggling several mutable borrows at once.
    pub fn tick(&mut self, platform: &mut impl Platform, sink: &mut impl EventSink) {
        let now = platform.now_ms();

        // 1. Observe
        let obs = self.observe(platform, now);

        // 2. Decide (pure) and 3. commit
        let step = self.fsm.decide(&self.session, &obs);
        self.fsm.commit(&step);

        // 4. Announce the transition
        if let Some(to) = step.to {
            self.post_code(platform, state_code(to));
            sink.emit(&LinkEvent::StateChanged {
                from: step.from,
                to,
            });
        }

        // 5. Apply effects in order
        for effect in &step.effects {
            self.apply(*effect, platform, sink, now);
        }

        debug_assert_eq!(
            self.session.transport.is_some(),
            self.fsm.current_state().holds_transport(),
            "transport handle out of step with {}",
            self.fsm.current_state()
        );
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an external command (console, provisioning, application).
    pub fn handle_command(
        &mut self,
        cmd: LinkCommand,
        platform: &mut impl Platform,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        match cmd {
            LinkCommand::StageCredentials(creds) => self.stage_credentials(creds),
            LinkCommand::Publish { topic, payload } => {
                self.session
                    .outbox
                    .push_back(OutboundMessage { topic, payload })
                    .map_err(|_| Error::Link(LinkError::OutOfBuffer))
            }
            LinkCommand::Reset => {
                self.reset(platform, sink);
                Ok(())
            }
            LinkCommand::Recommission => {
                info!("Recommission requested");
                self.session.force_recommission = true;
                self.reset(platform, sink);
                Ok(())
            }
            LinkCommand::UpdateConfig(config) => {
                config.validate().map_err(Error::Config)?;
                self.session.config = config;
                self.mark_config_dirty();
                info!("Configuration updated at runtime");
                Ok(())
            }
        }
    }

    /// Queue credentials for the next NVM_WRITE_CONFIGURATION.
    ///
    /// They are written on the next pass through NVM_LOAD_CONFIGURATION,
    /// i.e. at boot or after a `Reset`.
    pub fn stage_credentials(&mut self, creds: Credentials) -> Result<()> {
        creds.validate()?;
        info!("Credentials staged for {}", creds.broker_host());
        self.session.staged = Some(creds);
        Ok(())
    }

    /// Queue an outbound message on the default publish topic.
    pub fn publish(&mut self, payload: &[u8]) -> Result<()> {
        let mut message = OutboundMessage {
            topic: self.session.config.publish_topic.clone(),
            payload: heapless::Vec::new(),
        };
        message
            .payload
            .extend_from_slice(payload)
            .map_err(|_| Error::Link(LinkError::OutOfBuffer))?;
        self.session
            .outbox
            .push_back(message)
            .map_err(|_| Error::Link(LinkError::OutOfBuffer))
    }

    fn reset(&mut self, platform: &mut impl Platform, sink: &mut impl EventSink) {
        let now = platform.now_ms();
        let from = self.fsm.current_state();
        for effect in [Effect::CloseTransport, Effect::CancelResolve, Effect::ClearAddress] {
            self.apply(effect, platform, sink, now);
        }
        self.session.restart();
        let effects = self.fsm.force(LinkState::Init, &self.session);
        for effect in &effects {
            self.apply(*effect, platform, sink, now);
        }
        self.post_code(platform, state_code(LinkState::Init));
        sink.emit(&LinkEvent::StateChanged {
            from,
            to: LinkState::Init,
        });
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.fsm.current_state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn diagnostics(&self) -> &LinkDiagnostics {
        &self.session.diagnostics
    }

    pub fn is_connected(&self) -> bool {
        self.fsm.current_state() == LinkState::TcpipMqttLoop
    }

    /// Ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.fsm.tick_count()
    }

    pub fn metrics(&self, uptime_secs: u64) -> RuntimeMetrics {
        RuntimeMetrics::collect(
            uptime_secs,
            self.fsm.tick_count(),
            self.fsm.current_state(),
            self.session.credentials.is_commissioned(),
            self.session.consecutive_failures,
            &self.session.diagnostics,
        )
    }

    // ── Observe ───────────────────────────────────────────────

    fn observe(&mut self, p: &mut impl Platform, now: u64) -> Observation {
        let state = self.fsm.current_state();
        let timer_expired = self
            .fsm
            .descriptor(state)
            .timer
            .is_some_and(|id| self.session.timers.get(id).is_expired(now));
        let keep_alive_due = state == LinkState::TcpipMqttLoop
            && self.session.timers.get(TimerId::KeepAlive).is_expired(now);

        let signal = match self.session.deferred_failure.take() {
            Some(code) => Signal::Failed(code),
            None => self.poll(state, p),
        };

        Observation {
            signal,
            timer_expired,
            keep_alive_due,
        }
    }

    /// Poll only the collaborator the current state waits on.
    fn poll(&mut self, state: LinkState, p: &mut impl Platform) -> Signal {
        match state {
            LinkState::NvmEraseConfiguration
            | LinkState::NvmLoadConfiguration
            | LinkState::NvmWriteConfiguration => Signal::Store(self.poll_store_batch(p)),
            LinkState::TcpipWaitInit => {
                if p.is_stack_ready() {
                    Signal::StackReady
                } else {
                    Signal::None
                }
            }
            LinkState::TcpipWaitForIp => match p.current_address() {
                Some(addr) => Signal::AddressAcquired(addr),
                None => Signal::None,
            },
            LinkState::TcpipMqttInit => match self.session.resolve {
                Some(handle) => match p.poll_resolve(handle) {
                    ResolveStatus::Pending => Signal::None,
                    ResolveStatus::Resolved(addr) => Signal::Resolved(addr),
                    ResolveStatus::Failed(e) => Signal::Failed(e.classify()),
                },
                None => Signal::None,
            },
            LinkState::TcpipMqttNetConnect => match self.session.connecting {
                Some(handle) => match p.poll_open(handle) {
                    OpenStatus::Pending => Signal::None,
                    OpenStatus::Established => Signal::TransportUp,
                    OpenStatus::Failed(e) => Signal::Failed(e.classify()),
                },
                None => Signal::None,
            },
            LinkState::TcpipMqttProtocolConnect | LinkState::TcpipMqttSubscribe => {
                match p.poll_ack() {
                    AckStatus::Pending => Signal::None,
                    AckStatus::Accepted => Signal::Acknowledged,
                    AckStatus::Failed(e) => Signal::Failed(e.classify()),
                }
            }
            LinkState::TcpipMqttLoop => {
                self.session.inbound.clear();
                match p.poll_receive(&mut self.session.inbound) {
                    Ok(true) => Signal::MessageReceived,
                    Ok(false) => Signal::None,
                    Err(e) => Signal::Failed(e.classify()),
                }
            }
            LinkState::Init
            | LinkState::TcpipWaitConfiguration
            | LinkState::TcpipError
            | LinkState::FatalError => Signal::None,
        }
    }

    fn poll_store_batch(&self, p: &mut impl Platform) -> StoreProgress {
        let mut progress = StoreProgress::default();
        for (i, op) in self.session.store.pending.iter().enumerate() {
            let bit = 1u16 << i;
            match p.poll_store(op.handle) {
                StoreStatus::Pending => progress.still_pending += 1,
                StoreStatus::Success => progress.succeeded |= bit,
                StoreStatus::Failure => {
                    warn!("Store {:?} of {} failed", op.kind, op.region.name());
                    progress.failed |= bit;
                }
            }
        }
        progress
    }

    // ── Apply ─────────────────────────────────────────────────

    fn apply(
        &mut self,
        effect: Effect,
        p: &mut impl Platform,
        sink: &mut impl EventSink,
        now: u64,
    ) {
        let s = &mut self.session;
        match effect {
            Effect::ArmTimer(id, timeout) => s.timers.get_mut(id).arm(now, timeout),
            Effect::DisarmTimer(id) => s.timers.get_mut(id).disarm(),

            // ── Store ─────────────────────────────────────────
            Effect::BeginStoreBatch => s.store.begin_batch(),
            Effect::IssueStoreOps(kind) => self.issue_store_ops(kind, p),
            Effect::SettleStoreOps { succeeded, failed } => s.store.settle(succeeded, failed),
            Effect::AbandonStoreOps => {
                warn!("Abandoning {} outstanding store ops", s.store.outstanding());
                s.store.abandon();
            }
            Effect::CountStoreFailure => s.store.count_failure(),
            Effect::CommitLoaded => self.commit_loaded(p),
            Effect::CommitStaged => {
                if let Some(mut creds) = s.staged.take() {
                    creds.mark_commissioned();
                    info!("Credentials written, broker {}", creds.broker_host());
                    s.credentials = creds;
                }
            }
            Effect::EraseLocalCredentials => {
                s.credentials.erase();
                s.force_recommission = false;
                if s.config.force_recommission {
                    s.config.force_recommission = false;
                    self.mark_config_dirty();
                }
                info!("Stored credentials erased");
            }

            // ── Network ───────────────────────────────────────
            Effect::RecordLocalAddress(addr) => {
                info!("Address acquired: {}", addr);
                s.local_address = Some(addr);
            }
            Effect::StartResolve => match p.resolve(s.credentials.broker_host()) {
                Ok(handle) => s.resolve = Some(handle),
                Err(e) => {
                    warn!("Resolve failed to start: {}", e);
                    s.latch_failure(e.classify());
                }
            },
            Effect::SetResolved(addr) => {
                info!("{} resolved to {}", s.credentials.broker_host(), addr);
                s.resolved_address = Some(addr);
                s.resolve = None;
            }
            Effect::OpenTransport => self.open_transport(p),
            Effect::PromoteTransport => s.transport = s.connecting.take(),
            Effect::SendConnect => {
                let Some(transport) = s.transport else {
                    s.latch_failure(AppCode::InvalidSocket);
                    return;
                };
                let options = ConnectOptions {
                    client_id: s.config.client_id.as_str(),
                    keep_alive_secs: s.config.keep_alive_secs,
                    clean_session: true,
                };
                if let Err(e) = p.send_connect(transport, &options) {
                    warn!("CONNECT failed: {}", e);
                    s.latch_failure(e.classify());
                }
            }
            Effect::SendSubscribe => {
                if let Err(e) = p.send_subscribe(&s.config.subscribe_topics) {
                    warn!("SUBSCRIBE failed: {}", e);
                    s.latch_failure(e.classify());
                }
            }

            // ── Steady state ──────────────────────────────────
            Effect::Ping => match p.ping() {
                Ok(()) => {
                    s.diagnostics.keep_alives_sent = s.diagnostics.keep_alives_sent.saturating_add(1);
                    sink.emit(&LinkEvent::KeepAliveSent);
                }
                Err(e) => s.latch_failure(e.classify()),
            },
            Effect::PublishNext => {
                if let Some(message) = s.outbox.pop_front() {
                    match p.publish(&message.topic, &message.payload) {
                        Ok(()) => {
                            s.diagnostics.messages_published =
                                s.diagnostics.messages_published.saturating_add(1);
                            sink.emit(&LinkEvent::Published {
                                topic: &message.topic,
                            });
                        }
                        Err(e) => {
                            warn!("Publish to {} dropped: {}", message.topic, e);
                            s.diagnostics.publish_dropped =
                                s.diagnostics.publish_dropped.saturating_add(1);
                            s.latch_failure(e.classify());
                        }
                    }
                }
            }
            Effect::DispatchInbound => {
                s.diagnostics.messages_received = s.diagnostics.messages_received.saturating_add(1);
                sink.emit(&LinkEvent::MessageReceived {
                    topic: &s.inbound.topic,
                    payload: &s.inbound.payload,
                });
            }
            Effect::ResetRetries => {
                s.consecutive_failures = 0;
                s.diagnostics.sessions_established =
                    s.diagnostics.sessions_established.saturating_add(1);
                sink.emit(&LinkEvent::Connected {
                    broker: s.resolved_address,
                });
            }

            // ── Teardown ──────────────────────────────────────
            Effect::CloseTransport => {
                if let Some(transport) = s.transport.take() {
                    p.disconnect();
                    p.close(transport);
                }
                if let Some(connecting) = s.connecting.take() {
                    p.close(connecting);
                }
            }
            Effect::CancelResolve => {
                if let Some(handle) = s.resolve.take() {
                    p.cancel_resolve(handle);
                }
            }
            Effect::ClearAddress => {
                s.resolved_address = None;
                s.local_address = None;
            }

            // ── Reporting ─────────────────────────────────────
            Effect::RecordFailure(code) => {
                s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                s.diagnostics.record_error(code);
                let consecutive = s.consecutive_failures;
                warn!("Link failure: {} ({} consecutive)", code, consecutive);
                self.post_code(p, code.code());
                sink.emit(&LinkEvent::Failure { code, consecutive });
            }
            Effect::RecordFatal(code) => {
                s.diagnostics.record_fatal(code);
                error!("Link fatal: {}", code);
                self.post_code(p, code.code());
                sink.emit(&LinkEvent::Fatal(code));
            }
        }
    }

    fn issue_store_ops(&mut self, kind: StoreOpKind, p: &mut impl Platform) {
        let s = &mut self.session;
        if kind == StoreOpKind::Write {
            s.store.write_attempts = s.store.write_attempts.saturating_add(1);
        }
        for region in Region::ALL {
            let started = match kind {
                StoreOpKind::Erase => p.erase_region(region),
                StoreOpKind::Load => p.load_region(region),
                StoreOpKind::Write => match &s.staged {
                    Some(creds) => p.write_region(region, creds.region(region)),
                    None => {
                        warn!("Write issued with nothing staged");
                        s.store.count_failure();
                        return;
                    }
                },
            };
            match started {
                Ok(handle) => {
                    if !s.store.track(PendingOp {
                        handle,
                        kind,
                        region,
                    }) {
                        warn!("Store book full, {} untracked", region.name());
                        s.store.count_failure();
                    }
                }
                Err(e) => {
                    warn!("Store {:?} of {} not started: {}", kind, region.name(), e);
                    s.store.count_failure();
                }
            }
        }
    }

    fn commit_loaded(&mut self, p: &mut impl Platform) {
        let mut loaded = Credentials::new();
        let mut buf = [0u8; CERT_CAPACITY];
        for region in Region::ALL {
            let result = p
                .read_region(region, &mut buf)
                .map_err(Error::from)
                .and_then(|n| Ok(loaded.load_region(region, &buf[..n])?));
            if let Err(e) = result {
                warn!("Stored {} unusable: {}", region.name(), e);
            }
        }

        let s = &mut self.session;
        if loaded.is_complete() {
            loaded.mark_commissioned();
            info!("Stored credentials loaded, broker {}", loaded.broker_host());
            s.credentials = loaded;
        } else {
            info!("No usable stored credentials");
            s.credentials.erase();
        }
        s.store.loaded = true;
    }

    fn open_transport(&mut self, p: &mut impl Platform) {
        let s = &mut self.session;
        let Some(addr) = s.resolved_address else {
            s.latch_failure(AppCode::BadArgument);
            return;
        };
        let identity = TlsIdentity {
            certificate: s.credentials.certificate(),
            private_key: s.credentials.private_key(),
            server_name: s.credentials.broker_host(),
        };
        match p.open(addr, s.config.broker_port, &identity) {
            Ok(handle) => {
                s.connecting = Some(handle);
                s.diagnostics.connect_attempts = s.diagnostics.connect_attempts.saturating_add(1);
            }
            Err(e) => {
                warn!("Transport open failed: {}", e);
                s.latch_failure(e.classify());
            }
        }
    }

    fn post_code(&mut self, p: &mut impl Platform, code: i32) {
        self.session.diagnostics.record_code(code);
        p.post_debug_code(code);
    }

    // ── Config dirty-flag management ──────────────────────────

    fn mark_config_dirty(&mut self) {
        self.config_dirty = true;
    }

    /// Whether the config has unsaved changes.
    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty
    }

    /// Persist the live config if it changed.  Returns `true` if saved.
    pub fn save_config_if_dirty(&mut self, storage: &impl ConfigPort) -> bool {
        if !self.config_dirty {
            return false;
        }
        match storage.save(&self.session.config) {
            Ok(()) => {
                self.config_dirty = false;
                info!("Config saved");
                true
            }
            Err(e) => {
                warn!("Config save failed: {}", e);
                false
            }
        }
    }
}
