//! Capture → encode → pack pipeline descriptions.
//!
//! A [`PipelineDescription`] is a typed topology: an ordered video
//! [`Branch`] and an optional audio [`Branch`], each a sequence of
//! [`Stage`]s. It is only turned into the engine's textual launch syntax at
//! the boundary, through its [`Display`](fmt::Display) impl:
//!
//! ```text
//! ( d3d11screencapturesrc show-cursor=true monitor-index=0 ! queue
//!   ! d3d11convert ! video/x-raw(memory:D3D11Memory),width=1920,height=1080,framerate=30/1
//!   ! queue ! qsvh264enc bitrate=4000 rate-control=cqp target-usage=7
//!   ! rtph264pay name=pay0 pt=96
//!   wasapi2src device="…" loopback=true ! queue ! audioconvert ! queue
//!   ! avenc_aac bitrate=192000 ! rtpmp4apay name=pay1 pt=98 )
//! ```
//!
//! The outer parentheses make the whole topology a single bin, which the
//! engine treats as one shared media source. Payloaders named `payN` become
//! the RTSP streams of that source.

pub mod state;

use std::fmt;

use crate::config::{EncoderConfig, RateControl, StreamProfile};

/// Speed/quality hint for the hardware encoder: 7 is the fastest preset.
pub const HARDWARE_TARGET_USAGE: u8 = 7;
pub const AUDIO_BITRATE_BPS: u32 = 192_000;

pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
pub const AUDIO_PAYLOAD_TYPE: u8 = 98;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;
pub const AUDIO_CLOCK_RATE: u32 = 48_000;
pub const AUDIO_CHANNELS: u8 = 2;

/// RTP encoding produced by a payloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    H264,
    Mp4aLatm,
}

impl Encoding {
    pub fn rtpmap_name(&self) -> &'static str {
        match self {
            Self::H264 => "H264",
            Self::Mp4aLatm => "MP4A-LATM",
        }
    }

    pub fn clock_rate(&self) -> u32 {
        match self {
            Self::H264 => VIDEO_CLOCK_RATE,
            Self::Mp4aLatm => AUDIO_CLOCK_RATE,
        }
    }
}

/// The final stage of a branch. `stream` is the N in `payN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payloader {
    pub stream: u8,
    pub payload_type: u8,
    pub encoding: Encoding,
}

impl Payloader {
    pub fn name(&self) -> String {
        format!("pay{}", self.stream)
    }
}

/// One element of a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Desktop duplication source. `None` captures the primary monitor.
    ScreenCapture { monitor_index: Option<u32> },
    Queue,
    /// GPU-side color conversion and scaling.
    D3d11Convert,
    VideoConvert,
    VideoScale,
    /// Raw video caps filter pinning resolution and frame rate.
    VideoCaps {
        gpu_memory: bool,
        width: u32,
        height: u32,
        fps: u32,
    },
    /// Intel Quick Sync H.264 encoder, constant QP.
    HardwareH264 { bitrate_kbps: u32, target_usage: u8 },
    /// OpenH264 software encoder, constant bitrate.
    SoftwareH264 { bitrate_bps: u64 },
    LoopbackAudio { device_id: String },
    AudioConvert,
    Aac { bitrate_bps: u32 },
    Pay(Payloader),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScreenCapture { monitor_index } => {
                write!(f, "d3d11screencapturesrc show-cursor=true")?;
                if let Some(index) = monitor_index {
                    write!(f, " monitor-index={index}")?;
                }
                Ok(())
            }
            Self::Queue => write!(f, "queue"),
            Self::D3d11Convert => write!(f, "d3d11convert"),
            Self::VideoConvert => write!(f, "videoconvert"),
            Self::VideoScale => write!(f, "videoscale"),
            Self::VideoCaps {
                gpu_memory,
                width,
                height,
                fps,
            } => {
                let features = if *gpu_memory { "(memory:D3D11Memory)" } else { "" };
                write!(
                    f,
                    "video/x-raw{features},width={width},height={height},framerate={fps}/1"
                )
            }
            Self::HardwareH264 {
                bitrate_kbps,
                target_usage,
            } => write!(
                f,
                "qsvh264enc bitrate={bitrate_kbps} rate-control=cqp target-usage={target_usage}"
            ),
            Self::SoftwareH264 { bitrate_bps } => write!(
                f,
                "openh264enc bitrate={bitrate_bps} rate-control=bitrate complexity=low"
            ),
            Self::LoopbackAudio { device_id } => {
                write!(f, "wasapi2src device={} loopback=true", quote(device_id))
            }
            Self::AudioConvert => write!(f, "audioconvert"),
            Self::Aac { bitrate_bps } => write!(f, "avenc_aac bitrate={bitrate_bps}"),
            Self::Pay(pay) => {
                let element = match pay.encoding {
                    Encoding::H264 => "rtph264pay",
                    Encoding::Mp4aLatm => "rtpmp4apay",
                };
                write!(f, "{element} name={} pt={}", pay.name(), pay.payload_type)
            }
        }
    }
}

/// Quote a property value for the launch syntax unless it is a plain token.
fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// A linear chain of stages, linked with `!`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Branch {
    stages: Vec<Stage>,
}

impl Branch {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn payloader(&self) -> Option<&Payloader> {
        self.stages.iter().rev().find_map(|stage| match stage {
            Stage::Pay(pay) => Some(pay),
            _ => None,
        })
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                write!(f, " ! ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

/// The full topology of one stream profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDescription {
    video: Branch,
    audio: Option<Branch>,
}

impl PipelineDescription {
    pub fn video(&self) -> &Branch {
        &self.video
    }

    pub fn audio(&self) -> Option<&Branch> {
        self.audio.as_ref()
    }

    /// Payloaders in stream order (`pay0` first).
    pub fn payloaders(&self) -> Vec<Payloader> {
        let mut pays: Vec<Payloader> = std::iter::once(&self.video)
            .chain(self.audio.as_ref())
            .filter_map(|branch| branch.payloader().copied())
            .collect();
        pays.sort_by_key(|p| p.stream);
        pays
    }
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "( {}", self.video)?;
        if let Some(audio) = &self.audio {
            write!(f, " {audio}")?;
        }
        write!(f, " )")
    }
}

/// Builds one [`PipelineDescription`] per stream profile.
///
/// The encoder choice, captured monitor and audio device are shared by all
/// profiles of a server, so they are fixed at construction. `build` is pure:
/// identical inputs always produce identical descriptions. Profiles must be
/// validated by the caller first; secondary bitrates are also the caller's
/// business.
#[derive(Debug, Clone)]
pub struct PipelineDescriptionBuilder<'a> {
    encoder: &'a EncoderConfig,
    monitor_index: i32,
    audio_device_id: Option<&'a str>,
}

impl<'a> PipelineDescriptionBuilder<'a> {
    pub fn new(
        encoder: &'a EncoderConfig,
        monitor_index: i32,
        audio_device_id: Option<&'a str>,
    ) -> Self {
        Self {
            encoder,
            monitor_index,
            audio_device_id,
        }
    }

    pub fn build(&self, profile: &StreamProfile) -> PipelineDescription {
        let audio = match self.audio_device_id {
            Some(device_id) if profile.audio_enabled => Some(audio_branch(device_id)),
            _ => None,
        };

        PipelineDescription {
            video: self.video_branch(profile),
            audio,
        }
    }

    fn video_branch(&self, profile: &StreamProfile) -> Branch {
        let monitor_index = u32::try_from(self.monitor_index).ok();
        let caps = |gpu_memory| Stage::VideoCaps {
            gpu_memory,
            width: profile.width,
            height: profile.height,
            fps: self.encoder.target_fps,
        };

        let mut stages = vec![Stage::ScreenCapture { monitor_index }, Stage::Queue];

        match self.encoder.rate_control() {
            RateControl::ConstantQp => stages.extend([
                Stage::D3d11Convert,
                caps(true),
                Stage::Queue,
                Stage::HardwareH264 {
                    bitrate_kbps: profile.bitrate_kbps,
                    target_usage: HARDWARE_TARGET_USAGE,
                },
            ]),
            RateControl::ConstantBitrate => stages.extend([
                Stage::VideoConvert,
                Stage::VideoScale,
                caps(false),
                Stage::SoftwareH264 {
                    bitrate_bps: u64::from(profile.bitrate_kbps) * 1000,
                },
            ]),
        }

        stages.push(Stage::Pay(Payloader {
            stream: 0,
            payload_type: VIDEO_PAYLOAD_TYPE,
            encoding: Encoding::H264,
        }));

        Branch::new(stages)
    }
}

fn audio_branch(device_id: &str) -> Branch {
    Branch::new(vec![
        Stage::LoopbackAudio {
            device_id: device_id.to_string(),
        },
        Stage::Queue,
        Stage::AudioConvert,
        Stage::Queue,
        Stage::Aac {
            bitrate_bps: AUDIO_BITRATE_BPS,
        },
        Stage::Pay(Payloader {
            stream: 1,
            payload_type: AUDIO_PAYLOAD_TYPE,
            encoding: Encoding::Mp4aLatm,
        }),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(audio: bool) -> StreamProfile {
        StreamProfile::new(1920, 1080, 4000, "/1").with_audio(audio)
    }

    #[test]
    fn hardware_description() {
        let encoder = EncoderConfig::new(true);
        let desc = PipelineDescriptionBuilder::new(&encoder, 0, None).build(&profile(false));
        assert_eq!(
            desc.to_string(),
            "( d3d11screencapturesrc show-cursor=true monitor-index=0 ! queue ! d3d11convert \
             ! video/x-raw(memory:D3D11Memory),width=1920,height=1080,framerate=30/1 ! queue \
             ! qsvh264enc bitrate=4000 rate-control=cqp target-usage=7 \
             ! rtph264pay name=pay0 pt=96 )"
        );
    }

    #[test]
    fn software_description() {
        let encoder = EncoderConfig::new(false);
        let desc = PipelineDescriptionBuilder::new(&encoder, 1, None).build(&profile(false));
        let text = desc.to_string();
        assert!(text.contains("monitor-index=1"));
        assert!(text.contains("videoconvert ! videoscale ! video/x-raw,width=1920,height=1080"));
        assert!(text.contains("openh264enc bitrate=4000000 rate-control=bitrate complexity=low"));
        assert!(!text.contains("qsvh264enc"));
        assert!(text.ends_with("rtph264pay name=pay0 pt=96 )"));
    }

    #[test]
    fn negative_monitor_omits_selector() {
        let encoder = EncoderConfig::new(true);
        let desc = PipelineDescriptionBuilder::new(&encoder, -1, None).build(&profile(false));
        assert!(!desc.to_string().contains("monitor-index"));
        assert_eq!(
            desc.video().stages()[0],
            Stage::ScreenCapture {
                monitor_index: None
            }
        );
    }

    #[test]
    fn build_is_deterministic() {
        let encoder = EncoderConfig::new(true);
        let builder = PipelineDescriptionBuilder::new(&encoder, 0, Some("speaker-0"));
        let a = builder.build(&profile(true));
        let b = builder.build(&profile(true));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn audio_toggle_only_changes_audio_branch() {
        let encoder = EncoderConfig::new(true);
        let builder = PipelineDescriptionBuilder::new(&encoder, 0, Some("speaker-0"));
        let with_audio = builder.build(&profile(true));
        let without_audio = builder.build(&profile(false));

        assert_eq!(with_audio.video(), without_audio.video());
        assert!(without_audio.audio().is_none());

        let audio = with_audio.audio().unwrap().to_string();
        assert_eq!(
            audio,
            "wasapi2src device=speaker-0 loopback=true ! queue ! audioconvert ! queue \
             ! avenc_aac bitrate=192000 ! rtpmp4apay name=pay1 pt=98"
        );
        assert!(with_audio.to_string().ends_with("rtpmp4apay name=pay1 pt=98 )"));
    }

    #[test]
    fn audio_requires_device() {
        let encoder = EncoderConfig::new(false);
        let desc = PipelineDescriptionBuilder::new(&encoder, 0, None).build(&profile(true));
        assert!(desc.audio().is_none());
        assert_eq!(desc.payloaders().len(), 1);
    }

    #[test]
    fn payloaders_in_stream_order() {
        let encoder = EncoderConfig::new(true);
        let desc = PipelineDescriptionBuilder::new(&encoder, 0, Some("spk")).build(&profile(true));
        let pays = desc.payloaders();
        assert_eq!(pays.len(), 2);
        assert_eq!(pays[0].name(), "pay0");
        assert_eq!(pays[0].encoding, Encoding::H264);
        assert_eq!(pays[1].name(), "pay1");
        assert_eq!(pays[1].payload_type, 98);
    }

    #[test]
    fn device_ids_are_quoted() {
        let encoder = EncoderConfig::new(true);
        let id = r"\\?\SWD#MMDEVAPI#{0.0.0.00000000}";
        let desc = PipelineDescriptionBuilder::new(&encoder, 0, Some(id)).build(&profile(true));
        let text = desc.audio().unwrap().to_string();
        assert!(text.starts_with(r#"wasapi2src device="\\\\?\\SWD#MMDEVAPI#{0.0.0.00000000}" loopback=true"#));
    }

    #[test]
    fn fps_follows_encoder_config() {
        let encoder = EncoderConfig {
            use_hardware: false,
            target_fps: 60,
        };
        let desc = PipelineDescriptionBuilder::new(&encoder, 0, None).build(&profile(false));
        assert!(desc.to_string().contains("framerate=60/1"));
    }
}
