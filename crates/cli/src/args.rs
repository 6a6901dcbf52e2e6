use std::fmt;

use clap::{Parser, ValueEnum};
use screencast::LowerTransport;
use screencast::config::{
    DEFAULT_BIND_ADDRESS, DEFAULT_BITRATE_KBPS, DEFAULT_MAX_SESSIONS, DEFAULT_PORT,
};
use tracing::level_filters::LevelFilter;

pub const DEFAULT_LOG_LEVEL: u8 = 2;
/// Level used when `-l` is out of range or unreadable.
pub const FALLBACK_LOG_LEVEL: u8 = 1;
pub const MAX_LOG_LEVEL: u8 = 6;

#[derive(Parser, Debug)]
#[command(
    name = "screencast-server",
    about = "Capture a display and serve it over RTSP"
)]
pub struct Args {
    /// Video bitrate in kbps
    #[arg(short = 'b', value_name = "KBPS", allow_hyphen_values = true)]
    pub bitrate: Option<String>,

    /// Use the hardware encoder (0 or 1)
    #[arg(short = 'e', value_name = "0|1", allow_hyphen_values = true)]
    pub hardware: Option<String>,

    /// Log verbosity, 0 (off) to 6 (everything)
    #[arg(short = 'l', value_name = "LEVEL", allow_hyphen_values = true)]
    pub log_level: Option<String>,

    /// Address the RTSP listener binds to
    #[arg(long, default_value = DEFAULT_BIND_ADDRESS)]
    pub address: String,

    /// RTSP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// RTP lower transport offered to clients
    #[arg(long, value_enum, default_value_t = TransportArg::Udp)]
    pub transport: TransportArg,

    /// Do not stream the default speaker's loopback audio
    #[arg(long)]
    pub no_audio: bool,

    /// Maximum number of concurrent RTSP sessions
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: u32,

    /// Answer RTSP handshakes without capturing or sending any media
    #[arg(long)]
    pub signaling_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Tcp,
    Udp,
}

impl From<TransportArg> for LowerTransport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Tcp => LowerTransport::Tcp,
            TransportArg::Udp => LowerTransport::Udp,
        }
    }
}

/// A flag value that was replaced by a default. Reported as a warning once
/// logging is up; never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correction {
    Bitrate { given: String },
    Hardware { given: String },
    LogLevel { given: String },
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitrate { given } => {
                write!(f, "invalid bitrate {given:?}, using {DEFAULT_BITRATE_KBPS} kbps")
            }
            Self::Hardware { given } => {
                write!(f, "invalid encoder flag {given:?}, using the hardware encoder")
            }
            Self::LogLevel { given } => {
                write!(f, "invalid log level {given:?}, using {FALLBACK_LOG_LEVEL}")
            }
        }
    }
}

/// Flags after correction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub bitrate_kbps: u32,
    pub use_hardware: bool,
    pub log_level: u8,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            use_hardware: true,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

impl LaunchOptions {
    pub fn resolve(args: &Args) -> (Self, Vec<Correction>) {
        let mut opts = Self::default();
        let mut corrections = Vec::new();

        if let Some(given) = &args.bitrate {
            match given.trim().parse::<i64>() {
                Ok(kbps) if kbps > 0 => {
                    opts.bitrate_kbps = u32::try_from(kbps).unwrap_or(u32::MAX);
                }
                _ => corrections.push(Correction::Bitrate {
                    given: given.clone(),
                }),
            }
        }

        if let Some(given) = &args.hardware {
            match given.trim().parse::<i64>() {
                Ok(flag) => opts.use_hardware = flag != 0,
                Err(_) => corrections.push(Correction::Hardware {
                    given: given.clone(),
                }),
            }
        }

        if let Some(given) = &args.log_level {
            match given.trim().parse::<u8>() {
                Ok(level) if level <= MAX_LOG_LEVEL => opts.log_level = level,
                _ => {
                    opts.log_level = FALLBACK_LOG_LEVEL;
                    corrections.push(Correction::LogLevel {
                        given: given.clone(),
                    });
                }
            }
        }

        (opts, corrections)
    }

    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::OFF,
            1 => LevelFilter::ERROR,
            2 | 3 => LevelFilter::WARN,
            4 => LevelFilter::INFO,
            5 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("screencast-server").chain(argv.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_without_flags() {
        let args = parse(&[]);
        let (opts, corrections) = LaunchOptions::resolve(&args);
        assert_eq!(opts, LaunchOptions::default());
        assert!(corrections.is_empty());
        assert_eq!(args.port, 9999);
        assert_eq!(args.address, "0.0.0.0");
        assert_eq!(args.transport, TransportArg::Udp);
        assert_eq!(args.max_sessions, 255);
        assert!(!args.no_audio);
        assert!(!args.signaling_only);
        assert_eq!(opts.level_filter(), LevelFilter::WARN);
    }

    #[test]
    fn negative_bitrate_reaches_correction() {
        let (opts, corrections) = LaunchOptions::resolve(&parse(&["-b", "-5"]));
        assert_eq!(opts.bitrate_kbps, 4000);
        assert_eq!(
            corrections,
            vec![Correction::Bitrate {
                given: "-5".to_string()
            }]
        );
    }

    #[test]
    fn unparsable_bitrate_resets() {
        let (opts, corrections) = LaunchOptions::resolve(&parse(&["-b", "fast"]));
        assert_eq!(opts.bitrate_kbps, 4000);
        assert_eq!(corrections.len(), 1);
    }

    #[test]
    fn valid_flags_apply() {
        let (opts, corrections) =
            LaunchOptions::resolve(&parse(&["-b", "8000", "-e", "0", "-l", "5"]));
        assert!(corrections.is_empty());
        assert_eq!(opts.bitrate_kbps, 8000);
        assert!(!opts.use_hardware);
        assert_eq!(opts.level_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn non_numeric_encoder_flag_keeps_hardware() {
        let (opts, corrections) = LaunchOptions::resolve(&parse(&["-e", "yes"]));
        assert!(opts.use_hardware);
        assert_eq!(corrections.len(), 1);
    }

    #[test]
    fn out_of_range_log_level_falls_back_to_error() {
        for given in ["7", "-1", "loud"] {
            let (opts, corrections) = LaunchOptions::resolve(&parse(&["-l", given]));
            assert_eq!(opts.log_level, 1, "for {given}");
            assert_eq!(opts.level_filter(), LevelFilter::ERROR);
            assert_eq!(corrections.len(), 1);
        }
    }

    #[test]
    fn level_mapping() {
        let filter = |log_level| {
            LaunchOptions {
                log_level,
                ..LaunchOptions::default()
            }
            .level_filter()
        };
        assert_eq!(filter(0), LevelFilter::OFF);
        assert_eq!(filter(3), LevelFilter::WARN);
        assert_eq!(filter(4), LevelFilter::INFO);
        assert_eq!(filter(6), LevelFilter::TRACE);
    }

    #[test]
    fn long_flags() {
        let args = parse(&[
            "--address",
            "127.0.0.1",
            "--port",
            "8554",
            "--transport",
            "tcp",
            "--no-audio",
            "--max-sessions",
            "4",
            "--signaling-only",
        ]);
        assert_eq!(args.address, "127.0.0.1");
        assert_eq!(args.port, 8554);
        assert_eq!(LowerTransport::from(args.transport), LowerTransport::Tcp);
        assert!(args.no_audio);
        assert_eq!(args.max_sessions, 4);
        assert!(args.signaling_only);
    }
}
