//! Audio output device enumeration.

use serde::{Deserialize, Serialize};

/// Metadata about an audio output device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default output device.
    pub is_default: bool,
    /// Heuristic flag for virtual sinks / capture bridges nobody can hear.
    pub is_virtual_like: bool,
    /// Heuristic recommendation for listening to speech.
    pub is_recommended: bool,
}

const VIRTUAL_KEYWORDS: &[&str] = &[
    "virtual",
    "loopback",
    "null",
    "dummy",
    "cable input",
    "vb-audio",
    "blackhole",
    "soundflower",
    "monitor of",
];

const LISTENING_KEYWORDS: &[&str] = &[
    "headphone",
    "headset",
    "earbud",
    "airpods",
    "speaker",
    "built-in output",
];

/// Best-effort heuristic for virtual output sinks.
pub fn is_virtual_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    VIRTUAL_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Score a device name for listening to speech. Higher is better.
pub fn listening_preference_score(name: &str) -> i32 {
    let lowered = name.trim().to_ascii_lowercase();
    let mut score = 0;
    if is_virtual_like_name(&lowered) {
        score -= 16;
    } else {
        score += 8;
    }
    if LISTENING_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        score += 4;
    }
    // HDMI sinks are often a monitor without speakers.
    if lowered.contains("hdmi") || lowered.contains("displayport") {
        score -= 3;
    }
    score
}

/// Mark the best candidate and order the list: recommended, real, default, name.
pub fn rank_devices(mut list: Vec<DeviceInfo>) -> Vec<DeviceInfo> {
    if let Some((idx, _)) = list.iter().enumerate().max_by_key(|(_, d)| {
        listening_preference_score(&d.name) + if d.is_default { 6 } else { 0 }
    }) {
        if let Some(best) = list.get_mut(idx) {
            best.is_recommended = true;
        }
    }

    list.sort_by_key(|d| {
        (
            !d.is_recommended,
            d.is_virtual_like,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
    list
}

/// List all available audio output devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    match host.output_devices() {
        Ok(devices) => {
            let list = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Output Device {}", idx + 1));
                    let is_default = default_name.as_deref() == Some(name.as_str());
                    let is_virtual_like = is_virtual_like_name(&name);
                    DeviceInfo {
                        name,
                        is_default,
                        is_virtual_like,
                        is_recommended: false,
                    }
                })
                .collect::<Vec<_>>();
            rank_devices(list)
        }
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            match default_name {
                Some(name) => {
                    let is_virtual_like = is_virtual_like_name(&name);
                    vec![DeviceInfo {
                        name,
                        is_default: true,
                        is_virtual_like,
                        is_recommended: !is_virtual_like,
                    }]
                }
                None => vec![],
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
