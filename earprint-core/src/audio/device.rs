//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Whether a device captures or plays audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
}

/// Puts default devices first, then sorts by name, inputs before outputs.
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| {
        (
            d.direction == DeviceDirection::Output,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List all available input and output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = Vec::new();
    match host.input_devices() {
        Ok(devices) => {
            for (idx, device) in devices.enumerate() {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                let is_default = default_input.as_deref() == Some(name.as_str());
                list.push(DeviceInfo {
                    name,
                    direction: DeviceDirection::Input,
                    is_default,
                });
            }
        }
        Err(e) => warn!("failed to enumerate input devices: {e}"),
    }
    match host.output_devices() {
        Ok(devices) => {
            for (idx, device) in devices.enumerate() {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                let is_default = default_output.as_deref() == Some(name.as_str());
                list.push(DeviceInfo {
                    name,
                    direction: DeviceDirection::Output,
                    is_default,
                });
            }
        }
        Err(e) => warn!("failed to enumerate output devices: {e}"),
    }

    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, direction: DeviceDirection, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction,
            is_default,
        }
    }

    #[test]
    fn defaults_sort_first_within_direction() {
        let mut list = vec![
            info("Speakers", DeviceDirection::Output, false),
            info("b mic", DeviceDirection::Input, false),
            info("Headphones", DeviceDirection::Output, true),
            info("A mic", DeviceDirection::Input, false),
            info("Line In", DeviceDirection::Input, true),
        ];
        sort_devices(&mut list);
        let names: Vec<_> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["Line In", "A mic", "b mic", "Headphones", "Speakers"]);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&info("X", DeviceDirection::Input, true)).unwrap();
        assert_eq!(json, r#"{"name":"X","direction":"input","isDefault":true}"#);
    }
}
