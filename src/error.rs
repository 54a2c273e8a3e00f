//! Error types and the closed diagnostic code set.
//!
//! Two layers:
//!
//! - [`AppCode`] is the small, closed set of codes the controller reasons
//!   about and posts to the debug sink.  Numeric values are stable and
//!   shared with the existing field tooling.
//! - [`LinkError`], [`StoreError`] and [`CredentialError`] are the causes
//!   reported by collaborators and validation paths.  [`LinkError::classify`]
//!   maps each cause onto exactly one [`AppCode`].
//!
//! All variants are `Copy` so they can be latched in the session and
//! carried through the FSM without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Diagnostic code set
// ---------------------------------------------------------------------------

/// Closed set of outcome codes.  Every transition into `TCPIP_ERROR` or
/// `FATAL_ERROR` carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AppCode {
    BadArgument = -255,
    OutOfBuffer = -254,
    TlsFatal = -253,
    InvalidSocket = -252,
    DnsStartFailed = -251,
    DnsFailed = -250,
    HandshakeFailed = -249,
    Timeout = -248,
    CommandTimeout = -247,
    /// Broker answered a connect or subscribe with a refusal.
    ProtocolRejected = -246,
    /// Collaborator error with no mapping. Recovered through `TCPIP_ERROR`.
    Unclassified = -245,
    StoreLoadFailed = -244,
    StoreWriteFailed = -243,
    /// Store failures reached the configured threshold.
    StoreExhausted = -242,
    /// No valid credentials stored and none staged.
    NoCredentials = -241,
    /// Consecutive recovery attempts reached the configured limit.
    RetriesExhausted = -240,
    Success = 0,
}

/// Coarse taxonomy used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Argument,
    ResourceExhaustion,
    Security,
    Connectivity,
    Timeout,
    Storage,
    Unclassified,
    None,
}

impl AppCode {
    /// Integer value posted to the debug sink.
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::BadArgument => ErrorCategory::Argument,
            Self::OutOfBuffer => ErrorCategory::ResourceExhaustion,
            Self::TlsFatal | Self::HandshakeFailed => ErrorCategory::Security,
            Self::InvalidSocket
            | Self::DnsStartFailed
            | Self::DnsFailed
            | Self::ProtocolRejected => ErrorCategory::Connectivity,
            Self::Timeout | Self::CommandTimeout => ErrorCategory::Timeout,
            Self::StoreLoadFailed
            | Self::StoreWriteFailed
            | Self::StoreExhausted
            | Self::NoCredentials => ErrorCategory::Storage,
            Self::Unclassified | Self::RetriesExhausted => ErrorCategory::Unclassified,
            Self::Success => ErrorCategory::None,
        }
    }

    /// Reverse lookup for codes read back from a debug stream.
    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [AppCode; 17] = [
            AppCode::BadArgument,
            AppCode::OutOfBuffer,
            AppCode::TlsFatal,
            AppCode::InvalidSocket,
            AppCode::DnsStartFailed,
            AppCode::DnsFailed,
            AppCode::HandshakeFailed,
            AppCode::Timeout,
            AppCode::CommandTimeout,
            AppCode::ProtocolRejected,
            AppCode::Unclassified,
            AppCode::StoreLoadFailed,
            AppCode::StoreWriteFailed,
            AppCode::StoreExhausted,
            AppCode::NoCredentials,
            AppCode::RetriesExhausted,
            AppCode::Success,
        ];
        ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for AppCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::BadArgument => "bad argument",
            Self::OutOfBuffer => "out of buffer",
            Self::TlsFatal => "TLS fatal",
            Self::InvalidSocket => "invalid socket",
            Self::DnsStartFailed => "failed to begin DNS resolution",
            Self::DnsFailed => "DNS resolution failed",
            Self::HandshakeFailed => "TLS negotiation failed",
            Self::Timeout => "timeout",
            Self::CommandTimeout => "command timeout",
            Self::ProtocolRejected => "broker rejected request",
            Self::Unclassified => "unclassified collaborator error",
            Self::StoreLoadFailed => "credential load failed",
            Self::StoreWriteFailed => "credential write failed",
            Self::StoreExhausted => "store failure threshold reached",
            Self::NoCredentials => "no valid credentials",
            Self::RetriesExhausted => "retry limit reached",
            Self::Success => "success",
        };
        write!(f, "{text} ({})", self.code())
    }
}

// ---------------------------------------------------------------------------
// Collaborator errors
// ---------------------------------------------------------------------------

/// Causes reported by the resolver, transport and messaging collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    BadArgument,
    OutOfBuffer,
    TlsFatal,
    InvalidSocket,
    PeerReset,
    DnsStartFailed,
    DnsFailed,
    HandshakeFailed,
    Timeout,
    CommandTimeout,
    /// Protocol-level refusal with the broker's return code.
    Rejected(u8),
    /// Raw platform error with no dedicated variant.
    Other(i32),
}

impl LinkError {
    /// Map the cause onto the closed code set.  Unknown causes become
    /// [`AppCode::Unclassified`], which recovers instead of locking out.
    pub const fn classify(self) -> AppCode {
        match self {
            Self::BadArgument => AppCode::BadArgument,
            Self::OutOfBuffer => AppCode::OutOfBuffer,
            Self::TlsFatal => AppCode::TlsFatal,
            Self::InvalidSocket | Self::PeerReset => AppCode::InvalidSocket,
            Self::DnsStartFailed => AppCode::DnsStartFailed,
            Self::DnsFailed => AppCode::DnsFailed,
            Self::HandshakeFailed => AppCode::HandshakeFailed,
            Self::Timeout => AppCode::Timeout,
            Self::CommandTimeout => AppCode::CommandTimeout,
            Self::Rejected(_) => AppCode::ProtocolRejected,
            Self::Other(_) => AppCode::Unclassified,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadArgument => write!(f, "bad argument"),
            Self::OutOfBuffer => write!(f, "out of buffer"),
            Self::TlsFatal => write!(f, "TLS fatal alert"),
            Self::InvalidSocket => write!(f, "invalid socket"),
            Self::PeerReset => write!(f, "connection reset by peer"),
            Self::DnsStartFailed => write!(f, "resolver refused request"),
            Self::DnsFailed => write!(f, "name not resolved"),
            Self::HandshakeFailed => write!(f, "TLS handshake failed"),
            Self::Timeout => write!(f, "timed out"),
            Self::CommandTimeout => write!(f, "command not acknowledged"),
            Self::Rejected(rc) => write!(f, "rejected by broker (rc={rc})"),
            Self::Other(code) => write!(f, "platform error {code}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Too many operations already outstanding.
    Busy,
    /// Payload exceeds the region budget.
    Capacity,
    /// Unknown or already retired handle.
    UnknownHandle,
    /// Backend I/O failure.
    Io,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "too many outstanding store operations"),
            Self::Capacity => write!(f, "payload exceeds region budget"),
            Self::UnknownHandle => write!(f, "unknown store handle"),
            Self::Io => write!(f, "store I/O error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Credential errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    CertificateTooLarge { len: usize, max: usize },
    PrivateKeyTooLarge { len: usize, max: usize },
    HostTooLarge { len: usize, max: usize },
    /// A required field is empty.
    Empty(&'static str),
    /// Hostname contains non-printable characters.
    InvalidHost,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CertificateTooLarge { len, max } => {
                write!(f, "certificate is {len} bytes, limit {max}")
            }
            Self::PrivateKeyTooLarge { len, max } => {
                write!(f, "private key is {len} bytes, limit {max}")
            }
            Self::HostTooLarge { len, max } => {
                write!(f, "broker host is {len} bytes, limit {max}")
            }
            Self::Empty(field) => write!(f, "{field} is empty"),
            Self::InvalidHost => write!(f, "broker host contains non-printable characters"),
        }
    }
}

// ---------------------------------------------------------------------------
// Crate-level error
// ---------------------------------------------------------------------------

/// Every fallible library entry point funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Link(LinkError),
    Store(StoreError),
    Credential(CredentialError),
    /// Commissioning payload could not be parsed.
    Provisioning(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Credential(e) => write!(f, "credentials: {e}"),
            Self::Provisioning(msg) => write!(f, "provisioning: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}
impl std::error::Error for LinkError {}
impl std::error::Error for StoreError {}
impl std::error::Error for CredentialError {}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<CredentialError> for Error {
    fn from(e: CredentialError) -> Self {
        Self::Credential(e)
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = core::result::Result<T, Error>;
