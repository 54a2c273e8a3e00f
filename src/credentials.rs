//! Device identity material: client certificate, private key, broker host.
//!
//! Buffers are fixed-capacity.  Every setter checks the length first and
//! rejects oversized input without touching the current contents, so a
//! record is never left half-written or silently truncated.
//!
//! ```text
//!   persistent layout (budget / used)
//!   ┌──────────────────────┬─────────────────────┬──────────────────┐
//!   │ certificate  64 KiB  │ private key 48 KiB  │ host     32 KiB  │
//!   │   ≤ 2048 B used      │   ≤ 2048 B used     │   ≤ 256 B used   │
//!   └──────────────────────┴─────────────────────┴──────────────────┘
//! ```

use core::fmt;

use crate::adapters::utils::is_printable_ascii;
use crate::error::CredentialError;

pub const CERT_CAPACITY: usize = 2048;
pub const KEY_CAPACITY: usize = 2048;
pub const HOST_CAPACITY: usize = 256;

/// One of the three persistent regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Certificate,
    PrivateKey,
    BrokerHost,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Certificate, Region::PrivateKey, Region::BrokerHost];

    /// Reserved bytes in persistent storage.
    pub const fn budget(self) -> usize {
        match self {
            Self::Certificate => 64 * 1024,
            Self::PrivateKey => 48 * 1024,
            Self::BrokerHost => 32 * 1024,
        }
    }

    /// Bytes actually usable by the in-memory record.
    pub const fn capacity(self) -> usize {
        match self {
            Self::Certificate => CERT_CAPACITY,
            Self::PrivateKey => KEY_CAPACITY,
            Self::BrokerHost => HOST_CAPACITY,
        }
    }

    /// Storage key (≤15 chars, NVS limit).
    pub const fn key(self) -> &'static str {
        match self {
            Self::Certificate => "client_cert",
            Self::PrivateKey => "client_key",
            Self::BrokerHost => "broker_host",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Certificate => "certificate",
            Self::PrivateKey => "private key",
            Self::BrokerHost => "broker host",
        }
    }
}

/// Certificate, key and broker hostname plus the commissioned flag.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    certificate: heapless::Vec<u8, CERT_CAPACITY>,
    private_key: heapless::Vec<u8, KEY_CAPACITY>,
    broker_host: heapless::String<HOST_CAPACITY>,
    commissioned: bool,
}

impl Credentials {
    /// Empty, uncommissioned record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a complete record.  The result is not yet commissioned: that
    /// only happens once the store has accepted or produced it.
    pub fn from_parts(
        certificate: &[u8],
        private_key: &[u8],
        broker_host: &str,
    ) -> Result<Self, CredentialError> {
        let mut creds = Self::new();
        creds.set_certificate(certificate)?;
        creds.set_private_key(private_key)?;
        creds.set_broker_host(broker_host)?;
        Ok(creds)
    }

    pub fn set_certificate(&mut self, bytes: &[u8]) -> Result<(), CredentialError> {
        if bytes.len() > CERT_CAPACITY {
            return Err(CredentialError::CertificateTooLarge {
                len: bytes.len(),
                max: CERT_CAPACITY,
            });
        }
        self.certificate.clear();
        // Length checked above.
        let _ = self.certificate.extend_from_slice(bytes);
        Ok(())
    }

    pub fn set_private_key(&mut self, bytes: &[u8]) -> Result<(), CredentialError> {
        if bytes.len() > KEY_CAPACITY {
            return Err(CredentialError::PrivateKeyTooLarge {
                len: bytes.len(),
                max: KEY_CAPACITY,
            });
        }
        self.private_key.clear();
        let _ = self.private_key.extend_from_slice(bytes);
        Ok(())
    }

    pub fn set_broker_host(&mut self, host: &str) -> Result<(), CredentialError> {
        if host.len() > HOST_CAPACITY {
            return Err(CredentialError::HostTooLarge {
                len: host.len(),
                max: HOST_CAPACITY,
            });
        }
        if !is_printable_ascii(host) {
            return Err(CredentialError::InvalidHost);
        }
        self.broker_host.clear();
        let _ = self.broker_host.push_str(host);
        Ok(())
    }

    /// Fill one region from raw bytes read back from the store.
    pub fn load_region(&mut self, region: Region, bytes: &[u8]) -> Result<(), CredentialError> {
        match region {
            Region::Certificate => self.set_certificate(bytes),
            Region::PrivateKey => self.set_private_key(bytes),
            Region::BrokerHost => {
                let host =
                    core::str::from_utf8(bytes).map_err(|_| CredentialError::InvalidHost)?;
                self.set_broker_host(host)
            }
        }
    }

    /// Raw bytes of one region, as written to the store.
    pub fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Certificate => &self.certificate,
            Region::PrivateKey => &self.private_key,
            Region::BrokerHost => self.broker_host.as_bytes(),
        }
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn is_commissioned(&self) -> bool {
        self.commissioned
    }

    pub(crate) fn mark_commissioned(&mut self) {
        self.commissioned = true;
    }

    /// Check content only.  Erased flash (all `0xFF`) counts as empty.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if is_blank(&self.certificate) {
            return Err(CredentialError::Empty("certificate"));
        }
        if is_blank(&self.private_key) {
            return Err(CredentialError::Empty("private key"));
        }
        if self.broker_host.is_empty() {
            return Err(CredentialError::Empty("broker host"));
        }
        if !is_printable_ascii(&self.broker_host) {
            return Err(CredentialError::InvalidHost);
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }

    /// Drop all material.  Idempotent.
    pub fn erase(&mut self) {
        self.certificate.clear();
        self.private_key.clear();
        self.broker_host.clear();
        self.commissioned = false;
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.is_empty() || bytes.iter().all(|&b| b == 0xFF)
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .field("broker_host", &self.broker_host.as_str())
            .field("commissioned", &self.commissioned)
            .finish()
    }
}
