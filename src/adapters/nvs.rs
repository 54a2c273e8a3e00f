//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`CredentialStore`].
//!
//! # Credential regions
//!
//! Each [`Region`] is one blob in the `creds` namespace.  ESP-IDF NVS calls
//! are synchronous, so every operation runs when it is started; its outcome
//! is posted to a [`CompletionQueue`] exactly as a driver callback would,
//! and [`CredentialStore::poll_store`] drains that queue.  The controller
//! therefore sees the same start/poll contract on every backend.
//!
//! # Security
//!
//! - Config validation: all fields are range-checked before persistence.
//! - Encrypted NVS: on ESP32, the `creds` namespace lives on the encrypted
//!   NVS partition. The simulation backend uses plaintext (dev/test only).
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{ConfigError, ConfigPort, CredentialStore, StoreHandle, StoreStatus};
use crate::completion::{Completion, CompletionQueue};
use crate::config::LinkConfig;
use crate::credentials::Region;
use crate::error::StoreError;
use crate::fsm::context::StoreOpKind;

#[cfg(not(target_os = "espidf"))]
use std::cell::RefCell;
#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const CONFIG_NAMESPACE: &str = "cloudlink";
const CONFIG_KEY: &str = "linkcfg";
const CRED_NAMESPACE: &str = "creds";

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const MAX_BLOB_SIZE: usize = 4000;

/// Store operations tracked at once (started, not yet reported).
pub const MAX_OPS: usize = 8;

const COMPLETION_SLOTS: usize = 16;

/// Injected store failures.  Each counter fails that many upcoming
/// operations of its kind; `stall` keeps completions from ever arriving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFaults {
    pub erase_failures: u8,
    pub load_failures: u8,
    pub write_failures: u8,
    pub stall: bool,
}

impl StoreFaults {
    fn take(&mut self, kind: StoreOpKind) -> bool {
        let counter = match kind {
            StoreOpKind::Erase => &mut self.erase_failures,
            StoreOpKind::Load => &mut self.load_failures,
            StoreOpKind::Write => &mut self.write_failures,
        };
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpSlot {
    handle: u16,
    /// Filled in from the completion queue.
    outcome: Option<bool>,
    /// Extra polls reported as `Pending` after completion.
    polls_left: u8,
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    blobs: RefCell<HashMap<String, Vec<u8>>>,
    ops: heapless::Vec<OpSlot, MAX_OPS>,
    completions: CompletionQueue<COMPLETION_SLOTS>,
    /// Contents produced by the last load of each region.
    loaded: [Vec<u8>; 3],
    next_handle: u16,
    latency_polls: u8,
    faults: StoreFaults,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(ConfigError::IoError)` if flash initialisation fails
    /// unrecoverably. On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                let ret2 = unsafe { nvs_flash_erase() };
                if ret2 != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                let ret3 = unsafe { nvs_flash_init() };
                if ret3 != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self::empty())
    }

    fn empty() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            blobs: RefCell::new(HashMap::new()),
            ops: heapless::Vec::new(),
            completions: CompletionQueue::new(),
            loaded: [Vec::new(), Vec::new(), Vec::new()],
            next_handle: 0,
            latency_polls: 0,
            faults: StoreFaults::default(),
        }
    }

    /// Report each finished operation as `Pending` for `polls` more polls.
    pub fn set_latency_polls(&mut self, polls: u8) {
        self.latency_polls = polls;
    }

    pub fn set_faults(&mut self, faults: StoreFaults) {
        self.faults = faults;
    }

    pub fn faults(&self) -> StoreFaults {
        self.faults
    }

    /// Operations started and not yet reported.
    pub fn outstanding(&self) -> usize {
        self.ops.len()
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    // ── Operation table ────────────────────────────────────────

    fn alloc_handle(&mut self) -> u16 {
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.next_handle
    }

    fn collect_completions(&mut self) {
        let ops = &mut self.ops;
        self.completions.drain(|c| {
            match ops.iter_mut().find(|s| s.handle == c.handle) {
                Some(slot) => slot.outcome = Some(c.success),
                None => warn!("NvsAdapter: completion for unknown handle {}", c.handle),
            }
        });
    }

    /// Free a slot, evicting finished entries nobody polled.
    fn make_room(&mut self) -> Result<(), StoreError> {
        if !self.ops.is_full() {
            return Ok(());
        }
        self.collect_completions();
        let before = self.ops.len();
        self.ops.retain(|s| s.outcome.is_none());
        if self.ops.len() < before {
            warn!(
                "NvsAdapter: evicted {} unpolled completions",
                before - self.ops.len()
            );
        }
        if self.ops.is_full() {
            Err(StoreError::Busy)
        } else {
            Ok(())
        }
    }

    fn start(
        &mut self,
        kind: StoreOpKind,
        region: Region,
        data: &[u8],
    ) -> Result<StoreHandle, StoreError> {
        if kind == StoreOpKind::Write && data.len() > region.budget() {
            return Err(StoreError::Capacity);
        }
        self.make_room()?;

        let handle = self.alloc_handle();
        let success = if self.faults.take(kind) {
            warn!("NvsAdapter: injected {:?} failure on {}", kind, region.name());
            false
        } else {
            match self.execute(kind, region, data) {
                Ok(()) => true,
                Err(e) => {
                    warn!("NvsAdapter: {:?} {} failed: {}", kind, region.name(), e);
                    false
                }
            }
        };

        self.ops
            .push(OpSlot {
                handle,
                outcome: None,
                polls_left: self.latency_polls,
            })
            .map_err(|_| StoreError::Busy)?;

        if !self.faults.stall && !self.completions.push(Completion { handle, success }) {
            warn!("NvsAdapter: completion queue full, handle {} lost", handle);
        }
        Ok(StoreHandle(handle))
    }

    // ── Backends ───────────────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn execute(&mut self, kind: StoreOpKind, region: Region, data: &[u8]) -> Result<(), StoreError> {
        let key = Self::composite_key(CRED_NAMESPACE, region.key());
        let mut blobs = self.blobs.borrow_mut();
        match kind {
            StoreOpKind::Erase => {
                blobs.remove(&key);
                self.loaded[region as usize].clear();
            }
            StoreOpKind::Load => {
                // Missing regions load as empty.
                self.loaded[region as usize] = blobs.get(&key).cloned().unwrap_or_default();
            }
            StoreOpKind::Write => {
                blobs.insert(key, data.to_vec());
            }
        }
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn execute(&mut self, kind: StoreOpKind, region: Region, data: &[u8]) -> Result<(), StoreError> {
        let key = c_key(region.key());
        match kind {
            StoreOpKind::Erase => {
                Self::with_nvs_handle(CRED_NAMESPACE, true, |handle| {
                    let ret = unsafe { nvs_erase_key(handle, key.as_ptr() as *const _) };
                    if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                        return Err(ret);
                    }
                    let ret = unsafe { nvs_commit(handle) };
                    if ret != ESP_OK {
                        return Err(ret);
                    }
                    Ok(())
                })
                .map_err(|_| StoreError::Io)?;
                self.loaded[region as usize].clear();
                Ok(())
            }
            StoreOpKind::Load => {
                let result = Self::with_nvs_handle(CRED_NAMESPACE, false, |handle| {
                    let mut size: usize = 0;
                    let ret = unsafe {
                        nvs_get_blob(
                            handle,
                            key.as_ptr() as *const _,
                            core::ptr::null_mut(),
                            &mut size,
                        )
                    };
                    if ret == ESP_ERR_NVS_NOT_FOUND {
                        return Ok(Vec::new());
                    }
                    if ret != ESP_OK || size > region.budget() {
                        return Err(ret);
                    }
                    let mut buf = vec![0u8; size];
                    let ret = unsafe {
                        nvs_get_blob(
                            handle,
                            key.as_ptr() as *const _,
                            buf.as_mut_ptr() as *mut _,
                            &mut size,
                        )
                    };
                    if ret != ESP_OK {
                        return Err(ret);
                    }
                    buf.truncate(size);
                    Ok(buf)
                });
                match result {
                    Ok(bytes) => {
                        self.loaded[region as usize] = bytes;
                        Ok(())
                    }
                    // Namespace never created: nothing stored yet.
                    Err(e) if e == ESP_ERR_NVS_NOT_FOUND => {
                        self.loaded[region as usize].clear();
                        Ok(())
                    }
                    Err(_) => Err(StoreError::Io),
                }
            }
            StoreOpKind::Write => Self::with_nvs_handle(CRED_NAMESPACE, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(|_| StoreError::Io),
        }
    }

    /// Open an NVS namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns_buf = c_key(namespace);

        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns_buf.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }
}

/// NUL-terminated NVS key (15 characters max).
#[cfg(target_os = "espidf")]
fn c_key(key: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = key.as_bytes();
    let len = bytes.len().min(15);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

// ── Host-only helpers for simulation and tests ─────────────────────

#[cfg(not(target_os = "espidf"))]
impl NvsAdapter {
    /// Write all three regions directly, as a factory image would.
    pub fn preload(&mut self, creds: &crate::credentials::Credentials) {
        let mut blobs = self.blobs.borrow_mut();
        for region in Region::ALL {
            blobs.insert(
                Self::composite_key(CRED_NAMESPACE, region.key()),
                creds.region(region).to_vec(),
            );
        }
    }

    /// Raw stored bytes of one region, if present.
    pub fn stored(&self, region: Region) -> Option<Vec<u8>> {
        self.blobs
            .borrow()
            .get(&Self::composite_key(CRED_NAMESPACE, region.key()))
            .cloned()
    }
}

impl CredentialStore for NvsAdapter {
    fn erase_region(&mut self, region: Region) -> Result<StoreHandle, StoreError> {
        self.start(StoreOpKind::Erase, region, &[])
    }

    fn load_region(&mut self, region: Region) -> Result<StoreHandle, StoreError> {
        self.start(StoreOpKind::Load, region, &[])
    }

    fn write_region(&mut self, region: Region, data: &[u8]) -> Result<StoreHandle, StoreError> {
        self.start(StoreOpKind::Write, region, data)
    }

    fn poll_store(&mut self, handle: StoreHandle) -> StoreStatus {
        self.collect_completions();
        let Some(idx) = self.ops.iter().position(|s| s.handle == handle.0) else {
            return StoreStatus::Failure;
        };
        let slot = &mut self.ops[idx];
        match slot.outcome {
            None => StoreStatus::Pending,
            Some(_) if slot.polls_left > 0 => {
                slot.polls_left -= 1;
                StoreStatus::Pending
            }
            Some(success) => {
                self.ops.swap_remove(idx);
                if success {
                    StoreStatus::Success
                } else {
                    StoreStatus::Failure
                }
            }
        }
    }

    fn read_region(&self, region: Region, out: &mut [u8]) -> Result<usize, StoreError> {
        let data = &self.loaded[region as usize];
        if out.len() < data.len() {
            return Err(StoreError::Capacity);
        }
        out[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<LinkConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            if let Some(bytes) = self.blobs.borrow().get(&key) {
                let cfg: LinkConfig =
                    postcard::from_bytes(bytes).map_err(|_| ConfigError::Corrupted)?;
                cfg.validate().map_err(ConfigError::ValidationFailed)?;
                info!("NvsAdapter: loaded config from store");
                Ok(cfg)
            } else {
                info!("NvsAdapter: no stored config, using defaults");
                Ok(LinkConfig::default())
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_key(CONFIG_KEY);
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, false, |handle| {
                let mut size: usize = 0;

                // First call: get size
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key.as_ptr() as *const _,
                        core::ptr::null_mut(),
                        &mut size,
                    )
                };
                if ret == ESP_ERR_NVS_NOT_FOUND {
                    return Err(ESP_ERR_NVS_NOT_FOUND);
                }
                if ret != ESP_OK || size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ret);
                }

                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }

                Ok(buf)
            });

            match result {
                Ok(bytes) => {
                    let cfg: LinkConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    cfg.validate().map_err(ConfigError::ValidationFailed)?;
                    info!("NvsAdapter: loaded config from NVS ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => {
                    info!("NvsAdapter: no stored config, using defaults");
                    Ok(LinkConfig::default())
                }
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}, using defaults", e);
                    Ok(LinkConfig::default())
                }
            }
        }
    }

    fn save(&self, config: &LinkConfig) -> Result<(), ConfigError> {
        config.validate().map_err(ConfigError::ValidationFailed)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            let key = Self::composite_key(CONFIG_NAMESPACE, CONFIG_KEY);
            self.blobs.borrow_mut().insert(key, bytes);
            info!("NvsAdapter: config saved (simulation)");
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_key(CONFIG_KEY);
            let result = Self::with_nvs_handle(CONFIG_NAMESPACE, true, |handle| {
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        bytes.as_ptr() as *const _,
                        bytes.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
                    Ok(())
                }
                Err(e) => {
                    warn!("NvsAdapter: NVS write error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self::empty())
    }
}
