// Audio device enumeration
// Lists cpal input devices for the --list-devices CLI flag and device selection

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// Represents an audio input device with its properties
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputDevice {
    /// Human-readable name of the device
    pub name: String,
    /// Whether this is the system's default input device
    pub is_default: bool,
}

/// List all available audio input devices on the default host.
///
/// Returns devices sorted with the default device first.
/// Returns an empty vector if enumeration fails.
#[cfg_attr(coverage_nightly, coverage(off))]
pub fn list_input_devices() -> Vec<AudioInputDevice> {
    let host = cpal::default_host();
    crate::debug!("[audio] Listing input devices on {:?}", host.id());

    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            crate::warn!("[audio] Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    let names = devices.filter_map(|d| d.name().ok()).collect();
    let device_list = mark_and_sort(names, default_name.as_deref());

    crate::debug!("[audio] Found {} input devices", device_list.len());
    device_list
}

/// Flag the default device and move it to the front
fn mark_and_sort(names: Vec<String>, default_name: Option<&str>) -> Vec<AudioInputDevice> {
    let mut devices: Vec<AudioInputDevice> = names
        .into_iter()
        .map(|name| AudioInputDevice {
            is_default: Some(name.as_str()) == default_name,
            name,
        })
        .collect();
    // Stable sort keeps the host's order among non-default devices
    devices.sort_by(|a, b| b.is_default.cmp(&a.is_default));
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_device_sorted_first() {
        let names = vec![
            "Device A".to_string(),
            "Device B".to_string(),
            "Device C".to_string(),
        ];

        let devices = mark_and_sort(names, Some("Device B"));

        assert!(devices[0].is_default);
        assert_eq!(devices[0].name, "Device B");
        assert_eq!(devices[1].name, "Device A");
        assert_eq!(devices[2].name, "Device C");
        assert_eq!(devices.iter().filter(|d| d.is_default).count(), 1);
    }

    #[test]
    fn test_no_default_keeps_order() {
        let devices = mark_and_sort(vec!["X".to_string(), "Y".to_string()], None);
        assert!(devices.iter().all(|d| !d.is_default));
        assert_eq!(devices[0].name, "X");
    }

    #[test]
    #[cfg_attr(coverage_nightly, coverage(off))]
    fn test_list_input_devices_default_first() {
        // May be empty without audio hardware
        let devices = list_input_devices();
        if devices.iter().any(|d| d.is_default) {
            assert!(devices[0].is_default, "Default device should be first");
        }
    }
}
