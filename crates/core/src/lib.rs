pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod events;
pub mod mount;
pub mod pipeline;
pub mod server;
pub mod signaling;

pub use config::{EncoderConfig, LowerTransport, ServerConfig, StreamProfile};
pub use discovery::ResourceDiscovery;
pub use engine::{EngineSetup, EventLoop, LoopQuit, MediaEngine};
pub use error::{Result, ScreencastError};
pub use events::{SessionEventTracker, SessionObserver};
pub use mount::MountRegistry;
pub use pipeline::PipelineDescriptionBuilder;
pub use server::{ServerState, StreamingServer};
pub use signaling::SignalingEngine;
