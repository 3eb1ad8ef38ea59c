//! Unified error types for the dispatch bridge.
//!
//! Every subsystem has its own small error enum; all of them convert into
//! the crate-level [`Error`] so setup code can use a single `Result`.
//! None of these errors ever reaches the peer directly: the peer only sees
//! an [`AppError`] encoded by the reply path.

use core::fmt;

use crate::dispatcher::Task;

// ---------------------------------------------------------------------------
// Crate-level error
// ---------------------------------------------------------------------------

/// Every fallible setup operation funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// Envelope could not be decoded.
    Envelope(EnvelopeError),
    /// A header write transform failed.
    Transform(TransformError),
    /// The foreign handler failed.
    Handler(HandlerError),
    /// A request could not be handed to the dispatcher.
    Dispatch(DispatchError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Writing to the connection failed.
    Transport(TransportError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope(e) => write!(f, "envelope: {e}"),
            Self::Transform(e) => write!(f, "transform: {e}"),
            Self::Handler(e) => write!(f, "handler: {e}"),
            Self::Dispatch(e) => write!(f, "dispatch: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Envelope errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Buffer ended before the header was complete.
    Truncated,
    /// Strict binary header carried an unknown version.
    BadVersion(u32),
    /// Compact header did not start with the compact protocol id.
    BadProtocolId(u8),
    /// Message kind outside the known range.
    BadMessageType(u8),
    /// Length prefix is negative or larger than the buffer.
    BadLength(i64),
    /// Varint ran past its maximum width.
    VarintOverflow,
    /// Method name is not valid UTF-8.
    InvalidUtf8,
    /// Protocol id is neither binary nor compact.
    UnsupportedProtocol(i16),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated message header"),
            Self::BadVersion(v) => write!(f, "bad version 0x{v:08x}"),
            Self::BadProtocolId(b) => write!(f, "bad compact protocol id 0x{b:02x}"),
            Self::BadMessageType(t) => write!(f, "bad message type {t}"),
            Self::BadLength(n) => write!(f, "bad length {n}"),
            Self::VarintOverflow => write!(f, "varint overflow"),
            Self::InvalidUtf8 => write!(f, "method name is not UTF-8"),
            Self::UnsupportedProtocol(p) => write!(f, "unsupported protocol id {p}"),
        }
    }
}

impl From<EnvelopeError> for Error {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

// ---------------------------------------------------------------------------
// Transform errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Transform id is known on the wire but not implemented here.
    Unsupported(u16),
    /// Decoding a payload failed.
    Corrupt(&'static str),
    /// Encoding a payload failed.
    Failed(&'static str),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(id) => write!(f, "unsupported transform id {id}"),
            Self::Corrupt(msg) => write!(f, "corrupt payload: {msg}"),
            Self::Failed(msg) => write!(f, "{msg} encode failed"),
        }
    }
}

impl From<TransformError> for Error {
    fn from(e: TransformError) -> Self {
        Self::Transform(e)
    }
}

// ---------------------------------------------------------------------------
// Handler errors
// ---------------------------------------------------------------------------

/// A failure raised inside, or reported by, the foreign handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler raised; the string is its description.
    Raised(String),
    /// The handler returned a value of an unsupported type.
    BadReturn(&'static str),
    /// The handler returned nothing where a value was required.
    MissingResult,
}

impl HandlerError {
    pub fn raised(msg: impl Into<String>) -> Self {
        Self::Raised(msg.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised(msg) => write!(f, "{msg}"),
            Self::BadReturn(ty) => {
                write!(f, "Return from processor method is not bytes (got {ty})")
            }
            Self::MissingResult => write!(f, "Unexpected error in processor method"),
        }
    }
}

impl From<HandlerError> for Error {
    fn from(e: HandlerError) -> Self {
        Self::Handler(e)
    }
}

impl From<TransformError> for HandlerError {
    fn from(e: TransformError) -> Self {
        Self::Raised(format!("transform failed: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher errors
// ---------------------------------------------------------------------------

/// Why the dispatcher refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Pending-task cap reached.
    QueueFull,
    /// Dispatcher is stopping or stopped.
    ShutDown,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue full"),
            Self::ShutDown => write!(f, "dispatcher shut down"),
        }
    }
}

impl From<DispatchError> for Error {
    fn from(e: DispatchError) -> Self {
        Self::Dispatch(e)
    }
}

/// Rejected enqueue. The task is handed back untouched so the caller can
/// dispose of its request.
pub struct EnqueueError {
    pub kind: DispatchError,
    pub task: Task,
}

impl fmt::Debug for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("kind", &self.kind)
            .field("priority", &self.task.priority())
            .finish()
    }
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Callback errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    /// The handle was already completed; the second call is rejected.
    AlreadyCompleted,
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyCompleted => write!(f, "callback invoked more than once"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    Io(std::io::Error),
    /// Config file is not valid JSON for [`BridgeConfig`](crate::config::BridgeConfig).
    Parse(serde_json::Error),
    /// A field failed range validation.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Parse(e) => write!(f, "parse error: {e}"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Peer is gone.
    NotConnected,
    /// Write failed for another reason.
    WriteFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Peer-visible application errors
// ---------------------------------------------------------------------------

/// Exception category carried in an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AppErrorKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
    Loadshedding = 11,
    Timeout = 12,
}

/// Application-level exception sent to the peer instead of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Unknown, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
