//! Client and media lifecycle notifications.
//!
//! Engines report what happens on their worker thread through
//! [`SessionObserver`]. Handlers are invoked synchronously from inside the
//! event loop, possibly concurrently for independent clients, so they must
//! return quickly: no blocking I/O, and no lock held beyond the update
//! itself.
//!
//! [`SessionEventTracker`] is the diagnostics view the server ships with. It
//! never feeds back into pipeline behavior.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Receives lifecycle notifications from a media engine.
pub trait SessionObserver: Send + Sync {
    fn on_connect(&self, remote_host: &str, remote_port: u16);

    /// Delivery may be repeated for the same client; unknown clients must be
    /// ignored.
    fn on_disconnect(&self, remote_host: &str, remote_port: u16);

    /// A shared media pipeline was created for `path`.
    fn on_media_constructed(&self, path: &str);

    /// A shared media pipeline for `path` was configured and is about to be
    /// prepared.
    fn on_media_configured(&self, path: &str);
}

/// A connected client as observed by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    pub remote_host: String,
    pub remote_port: u16,
    pub connected_at: DateTime<Utc>,
}

/// How often the media of one mount path has been built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaActivity {
    pub constructed: u32,
    pub configured: u32,
}

/// In-memory view of active clients and media activity.
#[derive(Debug, Default)]
pub struct SessionEventTracker {
    sessions: Mutex<HashMap<(String, u16), ClientSession>>,
    media: Mutex<HashMap<String, MediaActivity>>,
}

impl SessionEventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active clients, oldest first.
    pub fn active_sessions(&self) -> Vec<ClientSession> {
        let mut sessions: Vec<ClientSession> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.remote_port.cmp(&b.remote_port))
        });
        sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_connected(&self, remote_host: &str, remote_port: u16) -> bool {
        self.sessions
            .lock()
            .contains_key(&(remote_host.to_string(), remote_port))
    }

    pub fn media_activity(&self, path: &str) -> MediaActivity {
        self.media.lock().get(path).copied().unwrap_or_default()
    }
}

impl SessionObserver for SessionEventTracker {
    fn on_connect(&self, remote_host: &str, remote_port: u16) {
        let session = ClientSession {
            remote_host: remote_host.to_string(),
            remote_port,
            connected_at: Utc::now(),
        };
        let total = {
            let mut sessions = self.sessions.lock();
            sessions.insert((remote_host.to_string(), remote_port), session);
            sessions.len()
        };
        tracing::info!(remote_host, remote_port, total, "[+] client connected");
    }

    fn on_disconnect(&self, remote_host: &str, remote_port: u16) {
        let removed = self
            .sessions
            .lock()
            .remove(&(remote_host.to_string(), remote_port));

        match removed {
            Some(session) => {
                let connected_for = Utc::now() - session.connected_at;
                tracing::info!(
                    remote_host,
                    remote_port,
                    secs = connected_for.num_seconds(),
                    "[-] client disconnected"
                );
            }
            None => {
                tracing::debug!(remote_host, remote_port, "disconnect for unknown client ignored");
            }
        }
    }

    fn on_media_constructed(&self, path: &str) {
        self.media.lock().entry(path.to_string()).or_default().constructed += 1;
        tracing::debug!(path, "media constructed");
    }

    fn on_media_configured(&self, path: &str) {
        self.media.lock().entry(path.to_string()).or_default().configured += 1;
        tracing::debug!(path, "media configured");
    }
}
