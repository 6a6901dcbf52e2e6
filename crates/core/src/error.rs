//! Error types for the screencast server.

use std::fmt;

use crate::config::LowerTransport;
use crate::pipeline::state::PipelineState;

/// Errors that can occur while discovering resources, building the mount
/// table and running the server.
///
/// Variants group by how the caller is expected to react:
///
/// - **Recovered locally**: [`Discovery`](Self::Discovery): logged, then
///   replaced with a default.
/// - **Fatal before start**: [`DisplayEnumeration`](Self::DisplayEnumeration),
///   [`InvalidMonitor`](Self::InvalidMonitor),
///   [`InvalidProfile`](Self::InvalidProfile),
///   [`InvalidMountPath`](Self::InvalidMountPath),
///   [`DuplicatePath`](Self::DuplicatePath),
///   [`TransportMismatch`](Self::TransportMismatch).
/// - **Fatal to start**: [`ServerAttach`](Self::ServerAttach),
///   [`AlreadyStarted`](Self::AlreadyStarted), [`Engine`](Self::Engine).
/// - **Rejected request**: [`PipelineState`](Self::PipelineState).
/// - **Engine-internal**: [`Io`](Self::Io), [`Parse`](Self::Parse): only
///   ever surface to the core as a client disconnect.
#[derive(Debug, thiserror::Error)]
pub enum ScreencastError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A resource query (network interfaces, audio devices) failed.
    #[error("resource discovery failed: {0}")]
    Discovery(String),

    /// Display monitors could not be enumerated, or none were found.
    #[error("display enumeration failed: {0}")]
    DisplayEnumeration(String),

    /// The selected monitor does not exist.
    #[error("invalid monitor index {index} ({count} monitors detected)")]
    InvalidMonitor { index: i64, count: usize },

    /// A stream profile violates its invariants.
    #[error("invalid stream profile {path}: {reason}")]
    InvalidProfile { path: String, reason: &'static str },

    /// Mount paths must be absolute (`/1`, `/live`).
    #[error("invalid mount path: {0:?}")]
    InvalidMountPath(String),

    /// A mount path was registered twice on one server instance.
    #[error("mount path already registered: {0}")]
    DuplicatePath(String),

    /// The mount table was built for another lower transport than the one
    /// the server is configured with.
    #[error("mounts offer {mounted} but the server is configured for {configured}")]
    TransportMismatch {
        configured: LowerTransport,
        mounted: LowerTransport,
    },

    /// The listener could not be bound or attached to its execution context.
    #[error("failed to attach server to {addr}: {reason}")]
    ServerAttach { addr: String, reason: String },

    /// [`StreamingServer::start`](crate::StreamingServer::start) was called on
    /// a server that is running or has already been stopped.
    #[error("server already started; create a new instance to restart")]
    AlreadyStarted,

    /// A pipeline state request was rejected.
    #[error("pipeline state error: {0}")]
    PipelineState(#[from] PipelineStateError),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The media engine reported a failure during setup.
    #[error("media engine error: {0}")]
    Engine(String),
}

/// Why a pipeline state request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineStateError {
    /// No pipeline handle is bound to the controller.
    #[error("no pipeline bound")]
    NoPipeline,

    /// The pipeline is already in the requested state.
    #[error("pipeline already in state {0:?}")]
    Redundant(PipelineState),

    /// The engine refused the transition; the recorded state is unchanged.
    #[error("unable to change pipeline state from {from:?} to {to:?}: {reason}")]
    ChangeFailed {
        from: PipelineState,
        to: PipelineState,
        reason: String,
    },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, ScreencastError>`.
pub type Result<T> = std::result::Result<T, ScreencastError>;
