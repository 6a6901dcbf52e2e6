//! Server lifecycle: one worker thread per [`StreamingServer`], started
//! once and stopped once.
//!
//! The mount table decides what each path offers. [`ServerConfig::transport`]
//! must agree with it, so a config and a registry built from different
//! settings are refused before anything is attached.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::ServerConfig;
use crate::engine::{EngineSetup, EventLoop, LoopQuit, MediaEngine};
use crate::error::{Result, ScreencastError};
use crate::events::SessionObserver;
use crate::mount::MountRegistry;

const WORKER_THREAD_NAME: &str = "rtsp-server";

/// Lifecycle of a [`StreamingServer`]. There is no way back from
/// [`Stopped`](Self::Stopped): a fresh instance is needed to serve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Running,
    Stopped,
}

/// The background thread driving an attached engine.
struct Worker {
    quit: Box<dyn LoopQuit>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Quit the loop and wait for the thread. Consumes the worker, so the
    /// join happens exactly once.
    fn shutdown(self) {
        self.quit.quit();
        if self.thread.join().is_err() {
            tracing::error!("server worker panicked during shutdown");
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the media engine until [`start`](Self::start), then the worker thread
/// the engine runs on. The engine's native handles (execution context,
/// listener, mount table) are created, used and released on that worker
/// only; this type just signals it and waits.
///
/// ```text
/// Uninitialized --start--> Running --stop--> Stopped
///       |                                      ^
///       +------------- attach failure ---------+
/// ```
pub struct StreamingServer<E: MediaEngine> {
    engine: Option<E>,
    observer: Arc<dyn SessionObserver>,
    state: ServerState,
    worker: Option<Worker>,
}

impl<E: MediaEngine> StreamingServer<E> {
    pub fn new(engine: E, observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            engine: Some(engine),
            observer,
            state: ServerState::Uninitialized,
            worker: None,
        }
    }

    /// Attach the engine on a new worker thread and start its event loop.
    ///
    /// Returns once the listener is attached. On attach failure the worker
    /// has already exited and been joined when this returns, and the server
    /// is left [`Stopped`](ServerState::Stopped).
    ///
    /// Fails with [`ScreencastError::TransportMismatch`] without touching the
    /// engine when `mounts` was built for another lower transport than
    /// `config.transport`.
    pub fn start(&mut self, config: &ServerConfig, mounts: MountRegistry) -> Result<()> {
        if self.state != ServerState::Uninitialized {
            return Err(ScreencastError::AlreadyStarted);
        }
        if mounts.transport() != config.transport {
            return Err(ScreencastError::TransportMismatch {
                configured: config.transport,
                mounted: mounts.transport(),
            });
        }
        let engine = self.engine.take().ok_or(ScreencastError::AlreadyStarted)?;

        let setup = EngineSetup {
            bind_address: config.bind_address.clone(),
            port: config.port,
            max_sessions: config.max_sessions,
            mounts,
            observer: self.observer.clone(),
        };
        let addr = setup.bind_addr();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || match engine.attach(setup) {
                Ok(event_loop) => {
                    if ready_tx.send(Ok(event_loop.quit_handle())).is_err() {
                        return;
                    }
                    tracing::debug!("event loop running");
                    event_loop.run();
                    tracing::debug!("event loop exited");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            });

        let thread = match thread {
            Ok(t) => t,
            Err(e) => {
                self.state = ServerState::Stopped;
                return Err(ScreencastError::ServerAttach {
                    addr,
                    reason: format!("cannot spawn worker: {e}"),
                });
            }
        };

        let attached = ready_rx.recv();
        match attached {
            Ok(Ok(quit)) => {
                tracing::info!(%addr, "RTSP server listening");
                self.worker = Some(Worker { quit, thread });
                self.state = ServerState::Running;
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                self.state = ServerState::Stopped;
                tracing::error!(%addr, error = %e, "can not start RTSP server");
                Err(match e {
                    err @ ScreencastError::ServerAttach { .. } => err,
                    other => ScreencastError::ServerAttach {
                        addr,
                        reason: other.to_string(),
                    },
                })
            }
            Err(_) => {
                let _ = thread.join();
                self.state = ServerState::Stopped;
                Err(ScreencastError::ServerAttach {
                    addr,
                    reason: "worker exited before attaching".to_string(),
                })
            }
        }
    }

    /// Quit the event loop and block until the worker has exited.
    ///
    /// A no-op before a successful start and on every call after the first.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            tracing::info!("server stopping");
            worker.shutdown();
            self.state = ServerState::Stopped;
            tracing::info!("server stopped");
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }
}

impl<E: MediaEngine> Drop for StreamingServer<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
