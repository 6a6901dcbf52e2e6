//! GStreamer backend for `screencast-rtsp`.
//!
//! [`GstEngine`] runs a `gst-rtsp-server` instance on the server's worker
//! thread, with one shared `RTSPMediaFactory` per mount. Each factory is
//! launched from the mount's pipeline description:
//!
//! ```text
//! ( d3d11screencapturesrc show-cursor=true monitor-index=0 ! queue ! ...
//!   ! rtph264pay name=pay0 pt=96 ... )
//! ```
//!
//! [`DeviceMonitorDisplays`] and [`DeviceMonitorAudio`] answer the resource
//! discovery queries through `gst::DeviceMonitor`.
//!
//! Call [`init`] once, before anything else in this crate.

mod devices;
mod engine;

use std::sync::LazyLock;

use screencast::{Result, ScreencastError};

pub use devices::{DeviceMonitorAudio, DeviceMonitorDisplays};
pub use engine::{GstEngine, GstLoop};

pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "screencast",
        gst::DebugColorFlags::empty(),
        Some("Screencast RTSP server"),
    )
});

/// GStreamer debug level for a `-l` verbosity of 0 to 6.
pub fn debug_level(log_level: u8) -> gst::DebugLevel {
    match log_level {
        0 => gst::DebugLevel::None,
        1 => gst::DebugLevel::Error,
        2 => gst::DebugLevel::Warning,
        3 => gst::DebugLevel::Fixme,
        4 => gst::DebugLevel::Info,
        5 => gst::DebugLevel::Debug,
        _ => gst::DebugLevel::Log,
    }
}

/// Set the default debug threshold, then initialise GStreamer.
pub fn init(log_level: u8) -> Result<()> {
    gst::log::set_default_threshold(debug_level(log_level));
    gst::init().map_err(|e| ScreencastError::Engine(format!("GStreamer init failed: {e}")))?;
    gst::info!(CAT, "GStreamer {} initialised", gst::version_string());
    Ok(())
}

pub fn version() -> String {
    gst::version_string().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels_follow_verbosity() {
        assert_eq!(debug_level(0), gst::DebugLevel::None);
        assert_eq!(debug_level(1), gst::DebugLevel::Error);
        assert_eq!(debug_level(2), gst::DebugLevel::Warning);
        assert_eq!(debug_level(6), gst::DebugLevel::Log);
    }
}
