//! Engine and resource providers the binary runs with.
//!
//! Built with `--features gstreamer`, displays and audio devices come from
//! the GStreamer device monitor and the server captures and encodes. Other
//! builds have no media engine: they refuse to stream and can only answer
//! RTSP handshakes when started with `--signaling-only`.

use screencast::Result;
use screencast::ResourceDiscovery;
use screencast::discovery::{Discovered, LocalInterfaces};

#[cfg(feature = "gstreamer")]
pub fn init(log_level: u8) -> Result<()> {
    screencast_gst::init(log_level)?;
    println!("GStreamer version: {}\n", screencast_gst::version());
    Ok(())
}

#[cfg(not(feature = "gstreamer"))]
pub fn init(_log_level: u8) -> Result<()> {
    tracing::info!("built without GStreamer");
    Ok(())
}

#[cfg(feature = "gstreamer")]
pub fn media_engine() -> Result<screencast_gst::GstEngine> {
    Ok(screencast_gst::GstEngine::new())
}

#[cfg(not(feature = "gstreamer"))]
pub use nomedia::media_engine;

#[cfg(not(feature = "gstreamer"))]
mod nomedia {
    use screencast::{EngineSetup, EventLoop, LoopQuit, MediaEngine, Result, ScreencastError};

    /// Stands in for the capture engine in builds without one. It has no
    /// values, so it can never be attached.
    #[derive(Debug)]
    pub enum NoMediaEngine {}

    impl MediaEngine for NoMediaEngine {
        type Loop = NoMediaEngine;

        fn attach(self, _setup: EngineSetup) -> Result<Self::Loop> {
            match self {}
        }
    }

    impl EventLoop for NoMediaEngine {
        fn quit_handle(&self) -> Box<dyn LoopQuit> {
            match *self {}
        }

        fn run(self) {
            match self {}
        }
    }

    pub fn media_engine() -> Result<NoMediaEngine> {
        Err(ScreencastError::Engine(
            "this build has no media engine; rebuild with --features gstreamer, \
             or pass --signaling-only"
                .into(),
        ))
    }
}

#[cfg(feature = "gstreamer")]
pub fn discover() -> Result<Discovered> {
    let displays = screencast_gst::DeviceMonitorDisplays;
    let audio = screencast_gst::DeviceMonitorAudio;
    ResourceDiscovery::new(&LocalInterfaces, &displays, &audio).discover()
}

#[cfg(not(feature = "gstreamer"))]
pub fn discover() -> Result<Discovered> {
    use screencast::discovery::{FixedDisplays, NoLoopbackAudio};

    let displays = FixedDisplays::primary();
    ResourceDiscovery::new(&LocalInterfaces, &displays, &NoLoopbackAudio).discover()
}
