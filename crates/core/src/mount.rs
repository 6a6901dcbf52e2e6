//! Mount table: which paths the server answers and the pipeline behind each.

use crate::config::{LowerTransport, ServerConfig};
use crate::error::{Result, ScreencastError};
use crate::pipeline::{PipelineDescription, PipelineDescriptionBuilder};

/// A named stream endpoint (e.g. `/1`, `/2`) and the media it serves.
///
/// Every entry is a shared media source: all clients of one path are fed by
/// a single capture/encode pipeline, created on the first request. Screen
/// capture and hardware encoder sessions are expensive and often limited to
/// one per process, so fan-out happens after encoding.
#[derive(Debug, Clone)]
pub struct MountEntry {
    path: String,
    description: PipelineDescription,
    transport: LowerTransport,
}

impl MountEntry {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &PipelineDescription {
        &self.description
    }

    pub fn transport(&self) -> LowerTransport {
        self.transport
    }

    pub fn is_shared(&self) -> bool {
        true
    }
}

/// Mount table handed to the server at start.
///
/// Built entirely before [`StreamingServer::start`](crate::StreamingServer::start)
/// and read-only afterwards. Entries keep their registration order.
#[derive(Debug, Clone, Default)]
pub struct MountRegistry {
    transport: LowerTransport,
    entries: Vec<MountEntry>,
}

impl MountRegistry {
    pub fn new(transport: LowerTransport) -> Self {
        Self {
            transport,
            entries: Vec::new(),
        }
    }

    /// Validate every profile of `config` and register one entry per profile.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let builder = PipelineDescriptionBuilder::new(
            &config.encoder,
            config.monitor_index,
            config.audio_device_id.as_deref(),
        );

        let mut registry = Self::new(config.transport);
        for profile in &config.profiles {
            registry.register(&profile.mount_path, builder.build(profile))?;
        }
        Ok(registry)
    }

    /// Register a new mount point.
    ///
    /// Fails with [`ScreencastError::DuplicatePath`] if `path` is taken; the
    /// existing entry is left untouched.
    pub fn register(&mut self, path: &str, description: PipelineDescription) -> Result<()> {
        if !path.starts_with('/') {
            return Err(ScreencastError::InvalidMountPath(path.to_string()));
        }
        if self.get(path).is_some() {
            tracing::warn!(path, "mount path already registered");
            return Err(ScreencastError::DuplicatePath(path.to_string()));
        }

        tracing::info!(path, transport = %self.transport, pipeline = %description, "mount registered");
        self.entries.push(MountEntry {
            path: path.to_string(),
            description,
            transport: self.transport,
        });
        Ok(())
    }

    /// Look up a mount by exact path.
    pub fn get(&self, path: &str) -> Option<&MountEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    pub fn transport(&self) -> LowerTransport {
        self.transport
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EncoderConfig, StreamProfile};

    fn description(profile: &StreamProfile) -> PipelineDescription {
        let encoder = EncoderConfig::new(false);
        PipelineDescriptionBuilder::new(&encoder, 0, None).build(profile)
    }

    #[test]
    fn distinct_paths_register() {
        let profiles = [
            StreamProfile::new(1920, 1080, 4000, "/1"),
            StreamProfile::new(1280, 720, 2000, "/2"),
            StreamProfile::new(640, 360, 500, "/test"),
        ];
        let mut registry = MountRegistry::new(LowerTransport::Udp);
        for p in &profiles {
            registry.register(&p.mount_path, description(p)).unwrap();
        }
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.paths().collect::<Vec<_>>(), vec!["/1", "/2", "/test"]);
        assert!(registry.entries().iter().all(MountEntry::is_shared));
    }

    #[test]
    fn duplicate_path_keeps_first() {
        let first = StreamProfile::new(1920, 1080, 4000, "/1");
        let second = StreamProfile::new(1280, 720, 2000, "/1");
        let mut registry = MountRegistry::new(LowerTransport::Tcp);

        registry.register("/1", description(&first)).unwrap();
        let err = registry.register("/1", description(&second)).unwrap_err();
        assert!(matches!(err, ScreencastError::DuplicatePath(p) if p == "/1"));

        assert_eq!(registry.len(), 1);
        let kept = registry.get("/1").unwrap();
        assert_eq!(kept.description(), &description(&first));
        assert_eq!(kept.transport(), LowerTransport::Tcp);
    }

    #[test]
    fn relative_path_rejected() {
        let p = StreamProfile::new(1920, 1080, 4000, "/1");
        let mut registry = MountRegistry::default();
        assert!(matches!(
            registry.register("1", description(&p)),
            Err(ScreencastError::InvalidMountPath(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn from_config_registers_every_profile() {
        let config = ServerConfig {
            audio_device_id: Some("spk".into()),
            profiles: ServerConfig::default_profiles(4000, true),
            ..ServerConfig::default()
        };
        let registry = MountRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);

        let secondary = registry.get("/2").unwrap().description().to_string();
        assert!(secondary.contains("width=1280,height=720"));
        assert!(secondary.contains("qsvh264enc bitrate=2000"));
        assert!(secondary.contains("name=pay1"));
    }

    #[test]
    fn from_config_rejects_duplicates() {
        let config = ServerConfig {
            profiles: vec![
                StreamProfile::new(1920, 1080, 4000, "/1"),
                StreamProfile::new(1280, 720, 2000, "/1"),
            ],
            ..ServerConfig::default()
        };
        assert!(matches!(
            MountRegistry::from_config(&config),
            Err(ScreencastError::DuplicatePath(_))
        ));
    }

    #[test]
    fn from_config_rejects_invalid_profile() {
        let config = ServerConfig {
            profiles: vec![StreamProfile::new(1920, 1080, 0, "/1")],
            ..ServerConfig::default()
        };
        assert!(matches!(
            MountRegistry::from_config(&config),
            Err(ScreencastError::InvalidProfile { .. })
        ));
    }
}
