//! Persistent node settings (JSON file in the platform data directory).

use std::fs;
use std::path::{Path, PathBuf};

use hark_core::{ChannelConfig, DetectorConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct NodeSettings {
    /// Microphone to open. `None` picks the system default.
    pub input_device: Option<String>,
    /// Replay this file instead of opening a microphone.
    pub wav_path: Option<PathBuf>,
    pub wav_loop: bool,
    /// `stub`, `dense` or `onnx`.
    pub model_kind: String,
    pub model_path: Option<PathBuf>,
    /// Constant score reported by the stub model.
    pub stub_score: f32,
    pub threshold: f32,
    pub required_consecutive: u32,
    pub run_interval_ms: u64,
    /// How long the node stays active after a detection.
    pub active_window_ms: u64,
    /// Overrides the per-source channel defaults.
    pub channel: Option<ChannelConfig>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        Self {
            input_device: None,
            wav_path: None,
            wav_loop: false,
            model_kind: "stub".into(),
            model_path: None,
            stub_score: 0.0,
            threshold: detector.threshold,
            required_consecutive: detector.required_consecutive,
            run_interval_ms: detector.run_interval_ms,
            active_window_ms: 5_000,
            channel: None,
        }
    }
}

impl NodeSettings {
    pub fn normalize(&mut self) {
        self.model_kind = normalize_model_kind(&self.model_kind);
        self.input_device = self
            .input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.model_path = self.model_path.take().filter(|p| !p.as_os_str().is_empty());
        self.wav_path = self.wav_path.take().filter(|p| !p.as_os_str().is_empty());
        self.stub_score = clamp_unit(self.stub_score, 0.0);
        self.threshold = clamp_unit(self.threshold, DetectorConfig::default().threshold);
        self.required_consecutive = self.required_consecutive.clamp(1, 10);
        self.run_interval_ms = self.run_interval_ms.clamp(20, 2_000);
        self.active_window_ms = self.active_window_ms.min(60_000);
    }

    /// Apply `HARK_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `HARK_*` overrides from `lookup`, then re-normalize.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("HARK_MODEL_PATH") {
            self.model_path = Some(PathBuf::from(path));
        }
        if let Some(kind) = lookup("HARK_MODEL_KIND") {
            self.model_kind = kind;
        }
        if let Some(device) = lookup("HARK_INPUT_DEVICE") {
            self.input_device = Some(device);
        }
        if let Some(threshold) = lookup("HARK_THRESHOLD").and_then(|v| v.trim().parse().ok()) {
            self.threshold = threshold;
        }
        self.normalize();
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold: self.threshold,
            required_consecutive: self.required_consecutive,
            run_interval_ms: self.run_interval_ms,
            ..DetectorConfig::default()
        }
    }
}

pub fn normalize_model_kind(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "dense" | "json" | "mlp" => "dense".into(),
        "onnx" | "ort" => "onnx".into(),
        _ => "stub".into(),
    }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Hark")
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
            .join("hark")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> NodeSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<NodeSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &NodeSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
