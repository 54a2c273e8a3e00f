//! linksim: CloudLink controller driven against the simulated network.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SystemClock   NvsAdapter            SimNetwork   LogEventSink │
//! │  (Clock)       (Config+Credentials)  (IP/DNS/TLS/  (EventSink) │
//! │                                       messaging)               │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Controller (pure decisions)               │    │
//! │  │  observe · decide · commit · apply                     │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Environment:
//!
//! | Variable            | Meaning                                         |
//! |---------------------|-------------------------------------------------|
//! | `LINKSIM_CONFIG`    | JSON `LinkConfig` file (overrides stored config) |
//! | `LINKSIM_FAULTS`    | JSON `FaultPlan` file                           |
//! | `LINKSIM_PROVISION` | JSON commissioning payload file                 |
//! | `LINKSIM_TICK_MS`   | Tick period, default 100                        |
//! | `LINKSIM_MAX_TICKS` | Stop after this many ticks                      |

#![deny(unused_must_use)]

use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};

use cloudlink::adapters::device_id;
use cloudlink::adapters::log_sink::{LogDebugSink, LogEventSink};
use cloudlink::adapters::nvs::NvsAdapter;
use cloudlink::adapters::sim::{FaultPlan, SimPlatform};
use cloudlink::adapters::time::SystemClock;
use cloudlink::app::commands::LinkCommand;
use cloudlink::app::ports::{ConfigPort, DebugSink};
use cloudlink::app::service::Controller;
use cloudlink::config::LinkConfig;
use cloudlink::provisioning::parse_commissioning;

const DEFAULT_TICK_MS: u64 = 100;

fn main() -> Result<()> {
    // ── 1. Logging ────────────────────────────────────────────
    init_logging()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  linksim v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Store + config ─────────────────────────────────────
    let nvs = match NvsAdapter::new() {
        Ok(n) => n,
        Err(e) => {
            warn!("NVS init failed ({}), running without persistence", e);
            NvsAdapter::default()
        }
    };
    let mut config = load_config(&nvs)?;

    // ── 3. Device identity ────────────────────────────────────
    if config.client_id.is_empty() {
        config.client_id = device_id::client_id(&device_id::read_mac());
    }
    info!("Client ID: {}", config.client_id);

    // ── 4. Platform ───────────────────────────────────────────
    let plan: FaultPlan = match read_env_file("LINKSIM_FAULTS")? {
        Some(text) => serde_json::from_str(&text).context("LINKSIM_FAULTS is not a FaultPlan")?,
        None => FaultPlan::default(),
    };
    let clock = SystemClock::new();
    let mut platform = SimPlatform::new(clock, nvs, plan);
    let mut sink = LogEventSink::new();
    let mut debug_log = LogDebugSink;

    // ── 5. Controller ─────────────────────────────────────────
    let mut ctl = Controller::new(config);
    if let Some(text) = read_env_file("LINKSIM_PROVISION")? {
        let creds = parse_commissioning(text.as_bytes()).context("commissioning payload")?;
        ctl.handle_command(LinkCommand::StageCredentials(creds), &mut platform, &mut sink)?;
    }
    ctl.start(&mut sink);

    let tick = Duration::from_millis(env_u64("LINKSIM_TICK_MS")?.unwrap_or(DEFAULT_TICK_MS));
    let max_ticks = env_u64("LINKSIM_MAX_TICKS")?;
    let mut announced_sessions = 0;

    info!("Entering tick loop ({} ms)", tick.as_millis());

    // ── 6. Tick loop ──────────────────────────────────────────
    loop {
        ctl.tick(&mut platform, &mut sink);
        platform.debug.drain(|code| debug_log.post_debug_code(code));

        // Announce every new session with a status message.
        let sessions = ctl.diagnostics().sessions_established;
        if sessions > announced_sessions {
            announced_sessions = sessions;
            let status = serde_json::to_vec(&ctl.metrics(platform.clock.uptime_secs()))?;
            if let Err(e) = ctl.publish(&status) {
                warn!("Status not queued: {}", e);
            }
        }

        ctl.save_config_if_dirty(&platform.store);

        if ctl.state().is_terminal() {
            error!("Controller stopped in {}", ctl.state());
            break;
        }
        if max_ticks.is_some_and(|n| ctl.tick_count() >= n) {
            info!("Tick limit reached in {}", ctl.state());
            break;
        }

        std::thread::sleep(tick);
    }

    let metrics = ctl.metrics(platform.clock.uptime_secs());
    info!("Final metrics: {}", serde_json::to_string(&metrics)?);
    Ok(())
}

#[cfg(target_os = "espidf")]
fn init_logging() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn init_logging() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    Ok(())
}

/// Config file named by `LINKSIM_CONFIG`, else the stored blob, else defaults.
fn load_config(nvs: &NvsAdapter) -> Result<LinkConfig> {
    if let Some(text) = read_env_file("LINKSIM_CONFIG")? {
        let config: LinkConfig =
            serde_json::from_str(&text).context("LINKSIM_CONFIG is not a LinkConfig")?;
        config
            .validate()
            .map_err(|msg| anyhow::anyhow!("invalid LINKSIM_CONFIG: {}", msg))?;
        if let Err(e) = nvs.save(&config) {
            warn!("Config not persisted: {}", e);
        }
        info!("Config loaded from file");
        return Ok(config);
    }
    // The adapter range-checks what it decodes.
    match nvs.load() {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!("Stored config unusable ({}), using defaults", e);
            Ok(LinkConfig::default())
        }
    }
}

fn read_env_file(var: &str) -> Result<Option<String>> {
    match std::env::var(var) {
        Ok(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("{} points at unreadable {}", var, path))?;
            Ok(Some(text))
        }
        Err(_) => Ok(None),
    }
}

fn env_u64(var: &str) -> Result<Option<u64>> {
    match std::env::var(var) {
        Ok(v) => Ok(Some(
            v.parse()
                .with_context(|| format!("{} must be an integer", var))?,
        )),
        Err(_) => Ok(None),
    }
}
