//! The seam between the server lifecycle and the media engine that does the
//! actual listening, capturing and encoding.
//!
//! Everything an engine creates (execution context, listener, media
//! factories) is created in [`MediaEngine::attach`] and dropped when
//! [`EventLoop::run`] returns. Both calls happen on the server's worker
//! thread, so engines may hold handles that are not `Send` once attached.
//! The controlling thread only ever touches the [`LoopQuit`] handle.

use std::sync::Arc;

use crate::error::Result;
use crate::events::SessionObserver;
use crate::mount::MountRegistry;

/// What an engine needs to come up.
pub struct EngineSetup {
    pub bind_address: String,
    pub port: u16,
    pub max_sessions: u32,
    pub mounts: MountRegistry,
    pub observer: Arc<dyn SessionObserver>,
}

impl EngineSetup {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// A media engine that can be attached once.
pub trait MediaEngine: Send + 'static {
    type Loop: EventLoop;

    /// Create the execution context, bind the listener and mount every
    /// registry entry. Must not start dispatching client events; that only
    /// happens inside [`EventLoop::run`].
    ///
    /// Fails with [`ScreencastError::ServerAttach`](crate::ScreencastError::ServerAttach)
    /// if the listener cannot be bound or attached.
    fn attach(self, setup: EngineSetup) -> Result<Self::Loop>;
}

/// An attached engine, ready to dispatch.
pub trait EventLoop {
    /// Handle used by the controlling thread to end [`run`](Self::run).
    fn quit_handle(&self) -> Box<dyn LoopQuit>;

    /// Dispatch events until quit. When this returns, no further observer
    /// notification may fire and every engine handle has been released.
    fn run(self);
}

/// Asks a running loop to exit.
///
/// A quit issued before the loop starts spinning must not be lost.
pub trait LoopQuit: Send + Sync {
    fn quit(&self);
}
