use beam_core::pacing::period_for_rate;
use beam_core::SamplerSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REFRESH_RATE_HZ: f32 = 60.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `BEAM_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path.
    pub camera_device: String,
    /// Requested capture resolution (the driver may pick another).
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum detector invocations per second.
    pub sample_rate_hz: f32,
    /// Scheduling tick rate of the sampling loop.
    pub refresh_rate_hz: f32,
    /// EMA weight for each new happiness sample.
    pub smoothing_alpha: f32,
    /// Background hue in degrees.
    pub hue: f32,
    /// Where to write the face thumbnail PNG; disabled when unset.
    pub thumbnail_path: Option<PathBuf>,
    /// Edge length of the square thumbnail in pixels.
    pub thumbnail_size: u32,
    /// Start a session as soon as the daemon is up.
    pub autostart: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            model_dir: beam_core::default_model_dir(),
            sample_rate_hz: beam_core::pacing::DEFAULT_SAMPLE_RATE_HZ,
            refresh_rate_hz: DEFAULT_REFRESH_RATE_HZ,
            smoothing_alpha: beam_core::smoothing::DEFAULT_ALPHA,
            hue: beam_core::palette::DEFAULT_HUE,
            thumbnail_path: None,
            thumbnail_size: 128,
            autostart: false,
        }
    }
}

impl Config {
    /// Load the config file (if present) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match config_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading config file");
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `BEAM_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BEAM_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("BEAM_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("BEAM_THUMBNAIL_PATH") {
            self.thumbnail_path = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup("BEAM_AUTOSTART") {
            self.autostart = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        override_parsed(&lookup, "BEAM_FRAME_WIDTH", &mut self.frame_width);
        override_parsed(&lookup, "BEAM_FRAME_HEIGHT", &mut self.frame_height);
        override_parsed(&lookup, "BEAM_SAMPLE_RATE_HZ", &mut self.sample_rate_hz);
        override_parsed(&lookup, "BEAM_REFRESH_RATE_HZ", &mut self.refresh_rate_hz);
        override_parsed(&lookup, "BEAM_SMOOTHING_ALPHA", &mut self.smoothing_alpha);
        override_parsed(&lookup, "BEAM_HUE", &mut self.hue);
        override_parsed(&lookup, "BEAM_THUMBNAIL_SIZE", &mut self.thumbnail_size);
        self
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            interval: period_for_rate(self.sample_rate_hz),
            alpha: self.smoothing_alpha,
            hue: self.hue,
        }
    }

    /// Period of the scheduling tick.
    pub fn tick_period(&self) -> Duration {
        if self.refresh_rate_hz.is_finite() && self.refresh_rate_hz > 0.0 {
            period_for_rate(self.refresh_rate_hz)
        } else {
            period_for_rate(DEFAULT_REFRESH_RATE_HZ)
        }
    }

    /// Path to the SCRFD detection model.
    pub fn face_model_path(&self) -> String {
        self.model_dir
            .join(beam_core::FACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the FER+ expression model.
    pub fn expression_model_path(&self) -> String {
        self.model_dir
            .join(beam_core::EXPRESSION_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

/// `$BEAM_CONFIG`, else `$XDG_CONFIG_HOME/beam/beamd.toml`, else `~/.config/beam/beamd.toml`.
fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("BEAM_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .ok()?;
    Some(base.join("beam").join("beamd.toml"))
}
