use gst::prelude::*;

use screencast::discovery::{AudioDeviceProvider, DisplayEnumerator, MonitorInfo};
use screencast::{Result, ScreencastError};

use crate::CAT;

const MONITOR_CLASS: &str = "Source/Monitor";
const AUDIO_SOURCE_CLASS: &str = "Audio/Source";

/// Run a device monitor once with a single filter and return what it saw.
fn monitor_devices(class: &str, caps: Option<&gst::Caps>) -> std::result::Result<Vec<gst::Device>, String> {
    let monitor = gst::DeviceMonitor::new();
    if monitor.add_filter(Some(class), caps).is_none() {
        return Err(format!("cannot filter on {class}"));
    }
    monitor
        .start()
        .map_err(|e| format!("device monitor did not start: {e}"))?;
    let devices: Vec<gst::Device> = monitor.devices().into_iter().collect();
    monitor.stop();
    gst::debug!(CAT, "{} devices of class {}", devices.len(), class);
    Ok(devices)
}

/// Display monitors as reported by the platform's screen capture provider.
#[derive(Debug, Clone, Default)]
pub struct DeviceMonitorDisplays;

impl DisplayEnumerator for DeviceMonitorDisplays {
    fn monitors(&self) -> Result<Vec<MonitorInfo>> {
        let devices = monitor_devices(MONITOR_CLASS, None).map_err(ScreencastError::DisplayEnumeration)?;

        Ok(devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let props = device.properties();
                let coord = |name: &str| {
                    let key = format!("display.coordinates.virtual.{name}");
                    props
                        .as_ref()
                        .and_then(|p| p.get::<i32>(key.as_str()).ok())
                        .unwrap_or(0)
                };
                MonitorInfo {
                    index,
                    left: coord("left"),
                    top: coord("top"),
                    right: coord("right"),
                    bottom: coord("bottom"),
                }
            })
            .collect())
    }
}

/// Loopback capture of the default speaker.
#[derive(Debug, Clone, Default)]
pub struct DeviceMonitorAudio;

impl AudioDeviceProvider for DeviceMonitorAudio {
    fn default_loopback_device_id(&self) -> Result<Option<String>> {
        let caps = gst::Caps::new_empty_simple("audio/x-raw");
        let devices = monitor_devices(AUDIO_SOURCE_CLASS, Some(&caps)).map_err(ScreencastError::Discovery)?;

        let id = devices.iter().find_map(|device| {
            let props = device.properties()?;
            let is_default = props.get::<bool>("device.default").unwrap_or(false);
            let is_loopback = props.get::<bool>("wasapi2.device.loopback").unwrap_or(false);
            if is_default && is_loopback {
                props.get::<String>("device.id").ok()
            } else {
                None
            }
        });

        match &id {
            Some(id) => gst::info!(CAT, "default speaker loopback device: {}", id),
            None => gst::info!(CAT, "no default speaker loopback device"),
        }
        Ok(id)
    }
}
