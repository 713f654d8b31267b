//! Persistent playback settings (JSON file in the user's data directory).

use std::fs;
use std::path::{Path, PathBuf};

use earprint_core::crosstalk::{DEFAULT_FILTER_LENGTH, DEFAULT_REGULARIZATION};
use earprint_core::render::DEFAULT_BLOCK_SIZE;
use earprint_core::{ProcessingConfig, Speaker};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PlaybackSettings {
    /// Impulse-response table in the standard 32-track layout.
    pub hrir_path: Option<PathBuf>,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
    pub block_size: usize,
    /// Run the correction pipeline on the table after loading it.
    pub apply_correction: bool,
    pub processing: ProcessingConfig,
    pub crosstalk_enabled: bool,
    /// Speakers whose paths feed the crosstalk canceller.
    pub crosstalk_speakers: [Speaker; 2],
    pub crosstalk_filter_length: usize,
    pub crosstalk_regularization: f64,
    /// Stop playback automatically after this many seconds.
    pub duration_seconds: Option<f64>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            hrir_path: None,
            preferred_input_device: None,
            preferred_output_device: None,
            block_size: DEFAULT_BLOCK_SIZE,
            apply_correction: false,
            processing: ProcessingConfig::default(),
            crosstalk_enabled: false,
            crosstalk_speakers: [Speaker::FrontLeft, Speaker::FrontRight],
            crosstalk_filter_length: DEFAULT_FILTER_LENGTH,
            crosstalk_regularization: DEFAULT_REGULARIZATION,
            duration_seconds: None,
        }
    }
}

fn normalize_device(raw: &Option<String>) -> Option<String> {
    raw.as_ref()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

impl PlaybackSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = normalize_device(&self.preferred_input_device);
        self.preferred_output_device = normalize_device(&self.preferred_output_device);
        self.block_size = self.block_size.clamp(16, 16_384);
        self.crosstalk_filter_length = self.crosstalk_filter_length.clamp(16, 16_384);
        if !self.crosstalk_regularization.is_finite() || self.crosstalk_regularization < 0.0 {
            self.crosstalk_regularization = DEFAULT_REGULARIZATION;
        }
        self.duration_seconds = self
            .duration_seconds
            .filter(|s| s.is_finite() && *s > 0.0);
        self.processing.normalize();
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Earprint")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("earprint")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> PlaybackSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<PlaybackSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &PlaybackSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, PlaybackSettings::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = PlaybackSettings {
            hrir_path: Some(PathBuf::from("hrir.wav")),
            preferred_output_device: Some("Headphones".into()),
            block_size: 512,
            crosstalk_enabled: true,
            duration_seconds: Some(12.5),
            ..PlaybackSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn normalize_clamps_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"blockSize": 1, "preferredInputDevice": "  ", "durationSeconds": -3,
                "crosstalkRegularization": -1.0, "crosstalkSpeakers": ["SL", "SR"]}"#,
        )
        .unwrap();
        let settings = load_settings(&path);
        assert_eq!(settings.block_size, 16);
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.duration_seconds, None);
        assert_eq!(settings.crosstalk_regularization, DEFAULT_REGULARIZATION);
        assert_eq!(settings.crosstalk_speakers, [Speaker::SideLeft, Speaker::SideRight]);
    }

    #[test]
    fn malformed_json_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_settings(&path), PlaybackSettings::default());
    }
}
