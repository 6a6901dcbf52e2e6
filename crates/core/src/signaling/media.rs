//! Shared media of the signaling engine.
//!
//! Each mount owns one [`SharedMedia`]. It is built lazily by the first
//! DESCRIBE or SETUP on its path and torn down when its last session leaves,
//! or when a client that only described it disconnects:
//!
//! ```text
//! (unbound) --first DESCRIBE/SETUP--> Ready --first PLAY--> Playing
//!                                       ^                    |   ^
//!                                       |         all paused v   | PLAY
//!                                       |                   Paused
//!     last session removed, or idle on close: Null, unbound, next client rebuilds it
//! ```
//!
//! The signaling engine negotiates sessions only, so [`SignalingPipeline`]
//! records the requested states without producing any media.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::events::SessionObserver;
use crate::mount::{MountEntry, MountRegistry};
use crate::pipeline::state::{PipelineController, PipelineHandle, PipelineState};
use crate::signaling::protocol::sdp;
use crate::signaling::session::SessionState;

/// Pipeline handle that only logs what it is asked to do.
#[derive(Debug)]
pub struct SignalingPipeline {
    path: String,
}

impl PipelineHandle for SignalingPipeline {
    fn set_state(&mut self, state: PipelineState) -> Result<()> {
        tracing::debug!(path = %self.path, ?state, "pipeline state requested");
        Ok(())
    }
}

struct MediaInner {
    controller: PipelineController<SignalingPipeline>,
    /// Playback state of every session attached to this media.
    sessions: HashMap<String, SessionState>,
    sdp_session_id: u64,
}

/// The single pipeline instance serving every client of one mount.
pub struct SharedMedia {
    entry: MountEntry,
    observer: Arc<dyn SessionObserver>,
    inner: Mutex<MediaInner>,
}

impl SharedMedia {
    pub fn new(entry: MountEntry, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            entry,
            observer,
            inner: Mutex::new(MediaInner {
                controller: PipelineController::new(),
                sessions: HashMap::new(),
                sdp_session_id: 0,
            }),
        }
    }

    pub fn entry(&self) -> &MountEntry {
        &self.entry
    }

    pub fn path(&self) -> &str {
        self.entry.path()
    }

    /// Bind and ready a pipeline if none is bound. Returns whether one was
    /// built. Callers hold the media lock for the whole call.
    fn bind_if_needed(inner: &mut MediaInner, path: &str) -> Result<bool> {
        if inner.controller.is_bound() {
            return Ok(false);
        }
        inner.controller.bind(SignalingPipeline {
            path: path.to_string(),
        });
        if let Err(e) = inner.controller.update_state(PipelineState::Ready) {
            inner.controller.unbind();
            return Err(e);
        }
        inner.sdp_session_id = rand::random::<u64>();
        Ok(true)
    }

    /// Runs after the lock is released.
    fn notify_constructed(&self) {
        tracing::info!(path = %self.entry.path(), "shared media constructed");
        self.observer.on_media_constructed(self.entry.path());
        self.observer.on_media_configured(self.entry.path());
    }

    /// Session description for DESCRIBE, as seen from `host`. Builds the
    /// media if needed; it stays bound until [`release_if_idle`](Self::release_if_idle)
    /// or the last session leaves.
    pub fn describe(&self, host: &str) -> Result<String> {
        let (constructed, sdp_session_id) = {
            let mut inner = self.inner.lock();
            let constructed = Self::bind_if_needed(&mut inner, self.entry.path())?;
            (constructed, inner.sdp_session_id)
        };
        if constructed {
            self.notify_constructed();
        }
        Ok(sdp::generate_sdp(self.entry.description(), host, sdp_session_id))
    }

    /// Attach a session created by SETUP. Binding and attaching happen under
    /// one lock, so a concurrent last-session removal cannot unbind the
    /// media in between.
    pub fn add_session(&self, session_id: &str) -> Result<()> {
        let constructed = {
            let mut inner = self.inner.lock();
            let constructed = Self::bind_if_needed(&mut inner, self.entry.path())?;
            inner
                .sessions
                .entry(session_id.to_string())
                .or_insert(SessionState::Ready);
            constructed
        };
        if constructed {
            self.notify_constructed();
        }
        Ok(())
    }

    /// Mark a session as playing; the first one starts the pipeline.
    pub fn play(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner
            .sessions
            .insert(session_id.to_string(), SessionState::Playing);
        if inner.controller.state() != PipelineState::Playing {
            inner.controller.update_state(PipelineState::Playing)?;
        }
        Ok(())
    }

    /// Mark a session as paused; the pipeline pauses once nobody is playing.
    pub fn pause(&self, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(state) = inner.sessions.get_mut(session_id) {
            *state = SessionState::Paused;
        }
        let all_paused = inner
            .sessions
            .values()
            .all(|s| *s == SessionState::Paused);
        if all_paused && inner.controller.state() == PipelineState::Playing {
            inner.controller.update_state(PipelineState::Paused)?;
        }
        Ok(())
    }

    /// Detach a session. The last one out shuts the pipeline down.
    pub fn remove_session(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if inner.sessions.remove(session_id).is_none() || !inner.sessions.is_empty() {
            return;
        }
        Self::shutdown(&mut inner, self.entry.path());
    }

    /// Unbind media that no session is attached to, such as media built by
    /// a DESCRIBE whose client went away. Returns whether it was released.
    pub fn release_if_idle(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.sessions.is_empty() || !inner.controller.is_bound() {
            return false;
        }
        Self::shutdown(&mut inner, self.entry.path());
        true
    }

    /// Shut the pipeline down regardless of attached sessions.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.sessions.clear();
        Self::shutdown(&mut inner, self.entry.path());
    }

    fn shutdown(inner: &mut MediaInner, path: &str) {
        if !inner.controller.is_bound() {
            return;
        }
        if inner.controller.state() != PipelineState::Null
            && let Err(e) = inner.controller.update_state(PipelineState::Null)
        {
            tracing::warn!(path, error = %e, "could not stop shared media");
        }
        inner.controller.unbind();
        tracing::info!(path, "shared media released");
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().controller.state()
    }

    pub fn is_constructed(&self) -> bool {
        self.inner.lock().controller.is_bound()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

/// Every mount's [`SharedMedia`], keyed by path.
#[derive(Clone)]
pub struct MediaTable {
    media: Arc<HashMap<String, Arc<SharedMedia>>>,
}

impl MediaTable {
    pub fn new(mounts: &MountRegistry, observer: &Arc<dyn SessionObserver>) -> Self {
        let media = mounts
            .entries()
            .iter()
            .map(|entry| {
                (
                    entry.path().to_string(),
                    Arc::new(SharedMedia::new(entry.clone(), observer.clone())),
                )
            })
            .collect();
        Self {
            media: Arc::new(media),
        }
    }

    pub fn get(&self, path: &str) -> Option<Arc<SharedMedia>> {
        self.media.get(path).cloned()
    }

    /// Resolve the media a request URI refers to, ignoring any
    /// `/stream=N` control suffix.
    pub fn resolve_from_uri(&self, uri: &str) -> Option<Arc<SharedMedia>> {
        self.get(extract_mount_path(uri))
    }

    pub fn release_all(&self) {
        for media in self.media.values() {
            media.release();
        }
    }
}

/// Extract the mount path from an RTSP URI.
///
/// `rtsp://host:9999/1/stream=0` → `/1`
/// `rtsp://host:9999/1/`         → `/1`
/// `rtsp://host:9999/2`          → `/2`
/// `rtsp://host:9999`            → `/`
/// `*`                           → `/`
pub fn extract_mount_path(uri: &str) -> &str {
    let path = if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else if uri.starts_with('/') {
        uri
    } else {
        "/"
    };

    let path = match path.rfind("/stream=") {
        Some(pos) => &path[..pos],
        None => path,
    };

    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ if path.is_empty() => "/",
        _ => path,
    }
}

/// Stream addressed by a request URI. Without a `/stream=N` suffix that is
/// stream 0; a suffix that is not a number addresses nothing.
pub fn stream_index(uri: &str) -> Option<u8> {
    match uri.rfind("/stream=") {
        None => Some(0),
        Some(pos) => uri[pos + "/stream=".len()..]
            .trim_end_matches('/')
            .parse()
            .ok(),
    }
}
