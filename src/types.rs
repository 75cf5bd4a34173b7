//! # Types
//!
//! Client configuration, the library-wide error type and the set of valid
//! values for FTP commands

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use native_tls::TlsConnector;
use parking_lot::Mutex;
use thiserror::Error;

use crate::status::{is_transient_negative, Status};

/// A shorthand for a Result whose error type is always an FtpError.
pub type FtpResult<T> = std::result::Result<T, FtpError>;

/// Injection hook for the raw TCP dialer, used for custom routing, proxying
/// or fault injection. Applied to both control and data connection dials.
pub type Dialer = Arc<dyn Fn(SocketAddr, Duration) -> io::Result<TcpStream> + Send + Sync>;

/// Debug trace sink. Writes are serialized by the mutex.
pub type Logger = Arc<Mutex<dyn io::Write + Send>>;

/// Features advertised by the server in its FEAT reply: upper-cased feature
/// name mapped to the optional argument string.
pub type Features = HashMap<String, Option<String>>;

/// FTPS negotiation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Connect in the clear, then upgrade the control connection with
    /// `AUTH TLS` (RFC 4217)
    #[default]
    Explicit,
    /// TLS from the first byte
    Implicit,
}

/// TLS settings for FTPS. Presence in [`Config`] enables FTPS for both the
/// control and every data connection.
#[derive(Clone)]
pub struct TlsOptions {
    /// Connector used to wrap control and data sockets
    pub connector: TlsConnector,
    /// Domain presented for certificate verification
    pub domain: String,
    /// Explicit (`AUTH TLS`) or implicit negotiation
    pub mode: TlsMode,
}

impl fmt::Debug for TlsOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsOptions")
            .field("domain", &self.domain)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Canned reply keyed by command word; commands matching an entry are
/// answered without touching the wire. Test hook.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub code: u32,
    pub message: String,
}

/// Client configuration. `Config::default()` gives the values documented on
/// each field; zero values are normalized back to their defaults at dial
/// time.
#[derive(Clone, Default)]
pub struct Config {
    /// User name. Defaults to `anonymous`.
    pub user: String,

    /// User password. Defaults to `anonymous` if required.
    pub password: String,

    /// Account information, sent if the server asks with a 332 reply.
    pub account: Option<String>,

    /// Maximum number of concurrent control connections per host endpoint.
    /// Defaults to 5.
    pub connections_per_host: usize,

    /// Timeout for opening connections and for each individual control
    /// read or write. Defaults to 5 seconds.
    pub timeout: Duration,

    /// TLS settings for FTPS. If provided, it is an error if the server
    /// does not support TLS. Both control and data connections are wrapped.
    pub tls: Option<TlsOptions>,

    /// Include IPv6 (AAAA) addresses when resolving hostnames.
    pub ipv6_lookup: bool,

    /// Request active (EPRT/PORT) rather than passive data connections.
    pub active_transfers: bool,

    /// Raw TCP dialer override.
    pub dialer: Option<Dialer>,

    /// Destination for debugging messages; no tracing when absent.
    pub logger: Option<Logger>,

    /// Canned replies by command word. Test hook.
    pub stub_responses: HashMap<String, StubResponse>,
}

impl Config {
    /// Apply defaults to unset fields, as dialing does.
    pub(crate) fn normalized(mut self) -> Self {
        if self.user.is_empty() {
            self.user = "anonymous".to_string();
        }
        if self.password.is_empty() {
            self.password = "anonymous".to_string();
        }
        if self.connections_per_host == 0 {
            self.connections_per_host = 5;
        }
        if self.timeout.is_zero() {
            self.timeout = Duration::from_secs(5);
        }
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("account", &self.account)
            .field("connections_per_host", &self.connections_per_host)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .field("ipv6_lookup", &self.ipv6_lookup)
            .field("active_transfers", &self.active_transfers)
            .finish()
    }
}

/// A reply from the ftp server: the three-digit code and the message text,
/// with multi-line replies joined by `\n`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub code: u32,
    pub body: String,
}

impl Response {
    pub fn new(code: u32, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
        }
    }

    /// The named status for this reply code
    pub fn status(&self) -> Status {
        Status::from(self.code)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.body.lines().next().unwrap_or(""))
    }
}

/// `FtpError` is a library-global error type to describe the different kinds
/// of errors that might occur while using the client.
#[derive(Debug, Error)]
pub enum FtpError {
    /// I/O failure on a control or data socket. Always temporary; the
    /// originating connection is discarded.
    #[error("connection error: {source}")]
    Io {
        #[source]
        source: io::Error,
        timeout: bool,
    },
    /// The server replied with a code the command did not expect. Temporary
    /// when the code is 4xx.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(Response),
    /// There was an error with the secure stream
    #[error("secure error: {0}")]
    Secure(String),
    /// The reply framing is invalid
    #[error("response contains an invalid syntax")]
    BadResponse,
    /// A reply payload (MLST entry, PWD path, passive address) could not be
    /// interpreted. Permanent for the call; the connection stays usable.
    #[error("parse error: {0}")]
    Parse(String),
    /// The host list is empty or a host string is malformed
    #[error("invalid host {0:?}")]
    InvalidHost(String),
    /// Operation on a closed client
    #[error("client is closed")]
    ClientClosed,
    /// The transferred byte count disagrees with the server-reported size
    #[error("expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// A transfer failed after partial progress and could not be resumed
    #[error("{source} (can't resume)")]
    CannotResume {
        #[source]
        source: Box<FtpError>,
    },
    /// A resumable transfer failed and the resume attempt itself failed
    #[error("{source} (resume failed)")]
    ResumeFailed {
        #[source]
        source: Box<FtpError>,
    },
}

impl FtpError {
    /// Classify an I/O error, flagging expired deadlines.
    pub(crate) fn from_io(source: io::Error) -> Self {
        let timeout = matches!(
            source.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        );
        Self::Io { source, timeout }
    }

    /// The server reply code, or 0 when the error did not originate from a
    /// server reply.
    pub fn code(&self) -> u32 {
        match self {
            Self::UnexpectedResponse(response) => response.code,
            Self::CannotResume { source } | Self::ResumeFailed { source } => source.code(),
            _ => 0,
        }
    }

    /// The server message for reply-originated errors, the display string
    /// otherwise.
    pub fn message(&self) -> String {
        match self {
            Self::UnexpectedResponse(response) => response.body.clone(),
            Self::CannotResume { source } | Self::ResumeFailed { source } => source.message(),
            other => other.to_string(),
        }
    }

    /// Whether retrying the operation may succeed: true for network I/O
    /// errors and 4xx replies.
    pub fn is_temporary(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::UnexpectedResponse(response) => is_transient_negative(response.code),
            Self::CannotResume { source } | Self::ResumeFailed { source } => source.is_temporary(),
            _ => false,
        }
    }

    /// Whether the error was caused by an expired deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io { timeout, .. } => *timeout,
            Self::CannotResume { source } | Self::ResumeFailed { source } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Text Format Control used in `TYPE` command
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormatControl {
    /// Default text format control (is NonPrint)
    Default,
    /// Non-print (not destined for printing)
    NonPrint,
    /// Telnet format control (\<CR\>, \<FF\>, etc.)
    Telnet,
    /// ASA (Fortran) Carriage Control
    Asa,
}

/// File Type used in `TYPE` command
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileType {
    /// ASCII text (the argument is the text format control)
    Ascii(FormatControl),
    /// Binary (image) type; transfers preserve bytes and `REST` offsets are
    /// byte offsets
    Binary,
}

impl fmt::Display for FormatControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatControl::Default | FormatControl::NonPrint => write!(f, "N"),
            FormatControl::Telnet => write!(f, "T"),
            FormatControl::Asa => write!(f, "C"),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Ascii(fc) => write!(f, "A {fc}"),
            FileType::Binary => write!(f, "I"),
        }
    }
}
