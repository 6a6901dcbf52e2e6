//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created by the first SETUP
//! of a client and destroyed by TEARDOWN or by the connection closing. It
//! tracks:
//!
//! - A random session ID (hex string, returned in the `Session` header).
//! - The mount it belongs to, and one negotiated [`Transport`] per stream
//!   (`stream=0` video, `stream=1` audio).
//! - The playback state: Ready -> Playing <-> Paused.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! SETUP          -> Ready
//! SETUP + Session -> Ready (another stream added)
//! PLAY           -> Playing
//! PAUSE          -> Paused   (from Playing)
//! TEARDOWN       -> (removed)
//! TCP disconnect -> (removed, via cleanup)
//! ```

pub mod transport;

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use transport::Transport;

const SERVER_PORT_MIN: u64 = 5000;
const SERVER_PORT_MAX: u64 = 65534;

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created via SETUP, not yet playing.
    Ready,
    /// Media is being delivered.
    Playing,
    /// Delivery suspended; can resume via PLAY.
    Paused,
}

/// A single RTSP session (RFC 2326 §3).
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// Path of the mount this session plays.
    pub mount_path: String,
    /// Negotiated transport per stream index.
    streams: RwLock<BTreeMap<u8, Transport>>,
    state: RwLock<SessionState>,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
}

impl Session {
    /// Create a new session with a random ID.
    pub fn new(mount_path: &str) -> Self {
        let id = rand::random::<u64>();
        Session {
            id: format!("{:016X}", id),
            mount_path: mount_path.to_string(),
            streams: RwLock::new(BTreeMap::new()),
            state: RwLock::new(SessionState::Ready),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    /// Record the transport of one stream (called during SETUP).
    pub fn set_transport(&self, stream: u8, transport: Transport) {
        tracing::debug!(session_id = %self.id, stream, ?transport, "transport configured");
        self.streams.write().insert(stream, transport);
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Transition to a new playback state.
    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    /// Current playback state; PAUSE is only valid once it has played.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"00000000DEADBEEF;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of active sessions, bounded by a maximum count.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    next_server_port: Arc<AtomicU64>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_server_port: Arc::new(AtomicU64::new(SERVER_PORT_MIN)),
            max_sessions,
        }
    }

    /// Create and register a session for a mount.
    ///
    /// Returns `None` when the pool already holds `max_sessions` sessions.
    pub fn create_session(&self, mount_path: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            tracing::warn!(max = self.max_sessions, "session pool full");
            return None;
        }

        let session = Arc::new(Session::new(mount_path));
        sessions.insert(session.id.clone(), session.clone());
        tracing::debug!(session_id = %session.id, mount_path, total_sessions = sessions.len(), "session created");

        Some(session)
    }

    /// Look up a session by ID.
    pub fn get_session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by ID (used by TEARDOWN).
    pub fn remove_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    /// Remove multiple sessions at once (used during TCP disconnect cleanup).
    pub fn remove_sessions(&self, ids: &[String]) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.write();
        let removed: Vec<_> = ids.iter().filter_map(|id| sessions.remove(id)).collect();
        if !removed.is_empty() {
            tracing::debug!(removed = removed.len(), remaining = sessions.len(), "batch session cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Allocate a pair of (RTP, RTCP) server ports.
    ///
    /// Ports are allocated from a monotonic counter starting at 5000.
    /// When the range is exhausted (> 65534), it wraps back to 5000.
    /// Per RFC 3550 §11, RTP ports should be even and RTCP = RTP + 1.
    pub fn allocate_server_ports(&self) -> (u16, u16) {
        let mut rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);

        if rtp > SERVER_PORT_MAX {
            tracing::warn!(rtp, "port range exhausted, wrapping to {SERVER_PORT_MIN}");
            self.next_server_port.store(SERVER_PORT_MIN, Ordering::SeqCst);
            rtp = self.next_server_port.fetch_add(2, Ordering::SeqCst);
        }

        tracing::trace!(rtp_port = rtp, rtcp_port = rtp + 1, "allocated server ports");
        (rtp as u16, rtp as u16 + 1)
    }
}
