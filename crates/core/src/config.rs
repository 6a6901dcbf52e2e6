//! Stream profiles, encoder settings and server configuration.

use std::fmt;

use crate::error::{Result, ScreencastError};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9999;
pub const DEFAULT_BITRATE_KBPS: u32 = 4000;
pub const DEFAULT_TARGET_FPS: u32 = 30;
pub const DEFAULT_MAX_SESSIONS: u32 = 255;

pub const PRIMARY_MOUNT_PATH: &str = "/1";
pub const SECONDARY_MOUNT_PATH: &str = "/2";

/// One published stream: resolution, bitrate and the path it is mounted at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub mount_path: String,
    pub audio_enabled: bool,
}

impl StreamProfile {
    pub fn new(width: u32, height: u32, bitrate_kbps: u32, mount_path: &str) -> Self {
        Self {
            width,
            height,
            bitrate_kbps,
            mount_path: mount_path.to_string(),
            audio_enabled: false,
        }
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    /// Check the profile's invariants. Must pass before the profile is handed
    /// to the pipeline builder.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.width == 0 || self.height == 0 {
            "resolution must be non-zero"
        } else if self.bitrate_kbps == 0 {
            "bitrate must be non-zero"
        } else if !self.mount_path.starts_with('/') {
            return Err(ScreencastError::InvalidMountPath(self.mount_path.clone()));
        } else {
            return Ok(());
        };

        Err(ScreencastError::InvalidProfile {
            path: self.mount_path.clone(),
            reason,
        })
    }
}

/// Encoder rate control policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// Constant quantization parameter (hardware encoder).
    ConstantQp,
    /// Constant bitrate (software encoder).
    ConstantBitrate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub use_hardware: bool,
    pub target_fps: u32,
}

impl EncoderConfig {
    pub fn new(use_hardware: bool) -> Self {
        Self {
            use_hardware,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }

    /// Rate control follows the encoder choice and cannot be set on its own.
    pub fn rate_control(&self) -> RateControl {
        if self.use_hardware {
            RateControl::ConstantQp
        } else {
            RateControl::ConstantBitrate
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new(true)
    }
}

/// RTP lower transport offered to clients. Applies to every mount of a
/// server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowerTransport {
    /// RTP interleaved on the RTSP TCP connection (RFC 2326 §10.12).
    Tcp,
    /// RTP/AVP over UDP unicast.
    #[default]
    Udp,
}

impl fmt::Display for LowerTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Everything one server run needs. Built once at startup from discovered
/// resources and parsed flags; not modified afterwards.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Monitor to capture. Negative selects the primary display.
    pub monitor_index: i32,
    pub audio_device_id: Option<String>,
    pub encoder: EncoderConfig,
    pub transport: LowerTransport,
    pub max_sessions: u32,
    pub profiles: Vec<StreamProfile>,
}

impl ServerConfig {
    /// `address:port` as handed to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// The two stock profiles: full HD at the requested bitrate on `/1`, and
    /// 720p at half of it on `/2`.
    pub fn default_profiles(bitrate_kbps: u32, audio: bool) -> Vec<StreamProfile> {
        vec![
            StreamProfile::new(1920, 1080, bitrate_kbps, PRIMARY_MOUNT_PATH).with_audio(audio),
            StreamProfile::new(1280, 720, (bitrate_kbps / 2).max(1), SECONDARY_MOUNT_PATH)
                .with_audio(audio),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        self.profiles.iter().try_for_each(StreamProfile::validate)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            monitor_index: 0,
            audio_device_id: None,
            encoder: EncoderConfig::default(),
            transport: LowerTransport::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            profiles: Self::default_profiles(DEFAULT_BITRATE_KBPS, false),
        }
    }
}
