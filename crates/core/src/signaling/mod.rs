//! Pure-Rust RTSP signaling engine.
//!
//! Negotiates sessions and tracks the state of each mount's shared media
//! without capturing or encoding anything. It drives the whole server
//! lifecycle on machines without a native media stack, and is what the
//! test suite runs against.
//!
//! ```text
//! attach:  bind TcpListener (non-blocking), build the media table
//! run:     accept loop (50ms poll) ──> one thread per client connection
//! quit:    clear the running flag; run joins every client thread,
//!          releases all shared media, then drops the listener
//! ```

mod connection;
pub mod media;
pub mod protocol;
pub mod session;

use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::engine::{EngineSetup, EventLoop, LoopQuit, MediaEngine};
use crate::error::{Result, ScreencastError};
use crate::events::SessionObserver;

use connection::Connection;
use media::MediaTable;
use session::SessionManager;

pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const CLIENT_READ_TIMEOUT: Duration = Duration::from_millis(200);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_millis(800);

/// Wait after the `failures`-th accept error in a row. Errors such as
/// EMFILE persist, so the wait doubles up to [`MAX_ACCEPT_BACKOFF`].
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_POLL_INTERVAL
        .saturating_mul(1 << failures.saturating_sub(1).min(5))
        .min(MAX_ACCEPT_BACKOFF)
}

/// Engine serving RTSP signaling only.
#[derive(Debug, Clone, Default)]
pub struct SignalingEngine {
    read_timeout: Option<Duration>,
}

impl SignalingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a client thread blocks on its socket before checking for
    /// shutdown. Defaults to [`CLIENT_READ_TIMEOUT`].
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

impl MediaEngine for SignalingEngine {
    type Loop = SignalingLoop;

    fn attach(self, setup: EngineSetup) -> Result<SignalingLoop> {
        let addr = setup.bind_addr();
        let attach_error = |e: std::io::Error| ScreencastError::ServerAttach {
            addr: addr.clone(),
            reason: e.to_string(),
        };

        let listener = TcpListener::bind(&addr).map_err(attach_error)?;
        listener.set_nonblocking(true).map_err(attach_error)?;

        let media = MediaTable::new(&setup.mounts, &setup.observer);
        tracing::debug!(%addr, mounts = setup.mounts.len(), "signaling engine attached");

        Ok(SignalingLoop {
            listener,
            media,
            sessions: SessionManager::new(setup.max_sessions as usize),
            observer: setup.observer,
            running: Arc::new(AtomicBool::new(true)),
            read_timeout: self.read_timeout.unwrap_or(CLIENT_READ_TIMEOUT),
        })
    }
}

/// Attached signaling engine. Owns the listener until [`run`](EventLoop::run)
/// returns.
pub struct SignalingLoop {
    listener: TcpListener,
    media: MediaTable,
    sessions: SessionManager,
    observer: Arc<dyn SessionObserver>,
    running: Arc<AtomicBool>,
    read_timeout: Duration,
}

struct SignalingQuit(Arc<AtomicBool>);

impl LoopQuit for SignalingQuit {
    fn quit(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventLoop for SignalingLoop {
    fn quit_handle(&self) -> Box<dyn LoopQuit> {
        Box::new(SignalingQuit(self.running.clone()))
    }

    fn run(self) {
        let mut clients: Vec<JoinHandle<()>> = Vec::new();
        let mut failures = 0u32;

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    failures = 0;
                    let sessions = self.sessions.clone();
                    let media = self.media.clone();
                    let observer = self.observer.clone();
                    let running = self.running.clone();
                    let read_timeout = self.read_timeout;
                    let spawned = thread::Builder::new()
                        .name(format!("rtsp-client-{peer_addr}"))
                        .spawn(move || {
                            Connection::handle(
                                stream,
                                peer_addr,
                                sessions,
                                media,
                                observer,
                                running,
                                read_timeout,
                            );
                        });
                    match spawned {
                        Ok(handle) => clients.push(handle),
                        Err(e) => tracing::warn!(%peer_addr, error = %e, "cannot spawn client thread"),
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    failures = 0;
                    clients.retain(|c| !c.is_finished());
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let backoff = accept_backoff(failures);
                    tracing::warn!(error = %e, failures, ?backoff, "TCP accept error");
                    clients.retain(|c| !c.is_finished());
                    thread::sleep(backoff);
                }
            }
        }

        tracing::debug!(clients = clients.len(), "accept loop exited, joining clients");
        for client in clients {
            if client.join().is_err() {
                tracing::error!("client thread panicked");
            }
        }
        self.media.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEventTracker;
    use crate::mount::MountRegistry;

    fn setup(port: u16) -> EngineSetup {
        EngineSetup {
            bind_address: "127.0.0.1".to_string(),
            port,
            max_sessions: 4,
            mounts: MountRegistry::default(),
            observer: Arc::new(SessionEventTracker::new()),
        }
    }

    #[test]
    fn quit_before_run_is_not_lost() {
        let event_loop = SignalingEngine::new().attach(setup(18590)).unwrap();
        event_loop.quit_handle().quit();
        event_loop.run();
    }

    #[test]
    fn accept_errors_back_off_up_to_a_cap() {
        assert_eq!(accept_backoff(1), ACCEPT_POLL_INTERVAL);
        assert_eq!(accept_backoff(2), ACCEPT_POLL_INTERVAL * 2);
        assert_eq!(accept_backoff(4), ACCEPT_POLL_INTERVAL * 8);
        assert_eq!(accept_backoff(5), MAX_ACCEPT_BACKOFF);
        assert_eq!(accept_backoff(u32::MAX), MAX_ACCEPT_BACKOFF);
    }

    #[test]
    fn busy_port_fails_attach() {
        let _holder = TcpListener::bind("127.0.0.1:18591").unwrap();
        let err = SignalingEngine::new().attach(setup(18591)).err().unwrap();
        assert!(matches!(err, ScreencastError::ServerAttach { .. }));
    }
}
