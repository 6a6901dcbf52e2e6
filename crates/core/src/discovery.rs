//! Resource discovery: local addresses, display monitors and the default
//! loopback audio device.
//!
//! The actual queries are delegated to three narrow provider traits so the
//! platform-specific parts (GStreamer device monitors, OS interface tables)
//! stay outside the core. [`ResourceDiscovery`] only aggregates their
//! answers and decides which failures are fatal:
//!
//! | Query | On failure |
//! |-------|------------|
//! | network interfaces | empty address set, server binds the wildcard anyway |
//! | audio device | no audio device, audio branches are left out |
//! | displays | [`ScreencastError::DisplayEnumeration`] |

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Result, ScreencastError};

/// Lists local IPv4 addresses clients may use to reach the server.
pub trait NetworkInfoProvider {
    fn list_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>>;
}

/// Enumerates the display monitors available for capture.
pub trait DisplayEnumerator {
    fn monitors(&self) -> Result<Vec<MonitorInfo>>;

    fn count_monitors(&self) -> Result<usize> {
        Ok(self.monitors()?.len())
    }
}

/// Finds the system's default loopback (speaker capture) device.
pub trait AudioDeviceProvider {
    /// `Ok(None)` when no device is both the default and loopback-capable.
    fn default_loopback_device_id(&self) -> Result<Option<String>>;
}

/// Geometry of one monitor in desktop coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorInfo {
    pub index: usize,
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl MonitorInfo {
    pub fn width(&self) -> u32 {
        self.right.abs_diff(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.abs_diff(self.top)
    }
}

/// Facts gathered before the server is configured.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub addresses: BTreeSet<Ipv4Addr>,
    pub monitors: Vec<MonitorInfo>,
    pub default_audio_device_id: Option<String>,
}

impl Discovered {
    pub fn monitor_count(&self) -> usize {
        self.monitors.len()
    }
}

/// Queries the three providers and aggregates their answers.
pub struct ResourceDiscovery<'a> {
    network: &'a dyn NetworkInfoProvider,
    displays: &'a dyn DisplayEnumerator,
    audio: &'a dyn AudioDeviceProvider,
}

impl<'a> ResourceDiscovery<'a> {
    pub fn new(
        network: &'a dyn NetworkInfoProvider,
        displays: &'a dyn DisplayEnumerator,
        audio: &'a dyn AudioDeviceProvider,
    ) -> Self {
        Self {
            network,
            displays,
            audio,
        }
    }

    /// Run every query. Only a display enumeration failure is returned as an
    /// error; the other queries degrade to empty answers.
    pub fn discover(&self) -> Result<Discovered> {
        let addresses = match self.network.list_ipv4_addresses() {
            Ok(addrs) => addrs.into_iter().collect(),
            Err(e) => {
                tracing::warn!(error = %e, "network interface query failed, continuing without addresses");
                BTreeSet::new()
            }
        };

        let default_audio_device_id = match self.audio.default_loopback_device_id() {
            Ok(Some(id)) => {
                tracing::info!(device_id = %id, "default loopback audio device");
                Some(id)
            }
            Ok(None) => {
                tracing::info!("no default loopback audio device");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "audio device query failed, continuing without audio");
                None
            }
        };

        let monitors = self.displays.monitors()?;
        if monitors.is_empty() {
            return Err(ScreencastError::DisplayEnumeration(
                "no display monitors detected".to_string(),
            ));
        }

        tracing::debug!(
            addresses = addresses.len(),
            monitors = monitors.len(),
            audio = default_audio_device_id.is_some(),
            "resource discovery complete"
        );

        Ok(Discovered {
            addresses,
            monitors,
            default_audio_device_id,
        })
    }
}

/// Every local IPv4 address a client on the network could connect to,
/// read from the OS interface table. One machine usually has several
/// (wired, wireless, VPN) and the banner lists each of them.
#[derive(Debug, Clone, Default)]
pub struct LocalInterfaces;

impl NetworkInfoProvider for LocalInterfaces {
    fn list_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        let interfaces = if_addrs::get_if_addrs()
            .map_err(|e| ScreencastError::Discovery(format!("cannot read interface table: {e}")))?;
        let addresses = reachable_ipv4(interfaces.iter().map(|iface| iface.ip()));
        tracing::debug!(interfaces = interfaces.len(), addresses = ?addresses, "local IPv4 addresses");
        Ok(addresses)
    }
}

/// Keep IPv4 addresses other hosts can reach: no loopback, link-local or
/// unspecified ones.
fn reachable_ipv4(addresses: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    addresses
        .into_iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() && !v4.is_unspecified() => {
                Some(v4)
            }
            _ => None,
        })
        .collect()
}

/// A fixed list of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<Ipv4Addr>);

impl NetworkInfoProvider for StaticInterfaces {
    fn list_ipv4_addresses(&self) -> Result<Vec<Ipv4Addr>> {
        Ok(self.0.clone())
    }
}

/// A fixed monitor layout.
#[derive(Debug, Clone)]
pub struct FixedDisplays(pub Vec<MonitorInfo>);

impl FixedDisplays {
    /// A single 1920x1080 primary display.
    pub fn primary() -> Self {
        Self(vec![MonitorInfo {
            index: 0,
            left: 0,
            top: 0,
            right: 1920,
            bottom: 1080,
        }])
    }
}

impl Default for FixedDisplays {
    fn default() -> Self {
        Self::primary()
    }
}

impl DisplayEnumerator for FixedDisplays {
    fn monitors(&self) -> Result<Vec<MonitorInfo>> {
        Ok(self.0.clone())
    }
}

/// Used when loopback capture is unavailable on the platform.
#[derive(Debug, Clone, Default)]
pub struct NoLoopbackAudio;

impl AudioDeviceProvider for NoLoopbackAudio {
    fn default_loopback_device_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
}
