// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/noisefft

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

use crate::error::SetupError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Input/output locations
    pub data: DataConfig,

    /// Number of worker threads (station groups are dealt round-robin)
    pub workers: usize,

    /// Synthesize a demo network instead of reading real data
    pub demo_mode: bool,

    /// Windowing, normalization and whitening parameters
    pub preprocessing: PreprocessingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "noisefft".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data: DataConfig::default(),
            workers: 4,
            demo_mode: false,
            preprocessing: PreprocessingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("noisefft"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Write the provenance record of the parameters used for this run.
    /// Never read back during processing.
    pub fn write_metadata(&self) -> Result<PathBuf> {
        let path = self.data.metadata_path();
        self.save(&path)?;
        Ok(path)
    }

    /// Check everything that must hold before any unit is processed
    pub fn validate(&self) -> Result<InputFormat, SetupError> {
        if self.workers == 0 {
            return Err(SetupError::InvalidConfig("workers must be at least 1".into()));
        }
        self.preprocessing.validate()?;
        self.data.input_format()
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root of the raw data (archive files or day directories)
    pub input_root: PathBuf,

    /// Format selector: "archive" (alias "asdf"), "sac" or "mseed"
    pub data_format: String,

    /// Station table, needed for directory formats only
    pub station_list: PathBuf,

    /// Directory receiving one archive per station
    pub output_dir: PathBuf,

    /// Provenance record path; defaults to `<output_dir>/fft_metadata.toml`
    pub metadata_file: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("./data/raw"),
            data_format: "archive".to_string(),
            station_list: PathBuf::from("./data/locations.txt"),
            output_dir: PathBuf::from("./data/fft"),
            metadata_file: None,
        }
    }
}

impl DataConfig {
    pub fn input_format(&self) -> Result<InputFormat, SetupError> {
        self.data_format.parse()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_file
            .clone()
            .unwrap_or_else(|| self.output_dir.join("fft_metadata.toml"))
    }
}

/// Which reader produces the station-day units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Per-station archive datasets
    Archive,
    /// Day directories of SAC files plus a station table
    Sac,
}

impl FromStr for InputFormat {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" | "asdf" => Ok(InputFormat::Archive),
            "sac" => Ok(InputFormat::Sac),
            "mseed" => Err(SetupError::UnsupportedFormat(s.to_string())),
            "" => Err(SetupError::InvalidFormat("<empty>".to_string())),
            _ => Err(SetupError::InvalidFormat(s.to_string())),
        }
    }
}

/// Normalization applied in the time domain or to the spectrum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormMode {
    #[default]
    None,
    OneBit,
    RunningMean,
}

impl fmt::Display for NormMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NormMode::None => "none",
            NormMode::OneBit => "one_bit",
            NormMode::RunningMean => "running_mean",
        };
        f.write_str(name)
    }
}

/// Parameters shared read-only by every processing unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Target sampling rate in Hz
    pub sampling_rate: f64,

    /// Corners of the cosine band taper used while preprocessing raw data
    pub pre_filt: [f64; 4],

    /// Lower edge of the whitening band in Hz
    pub freqmin: f64,

    /// Upper edge of the whitening band in Hz
    pub freqmax: f64,

    /// Window length in seconds
    pub window_length: f64,

    /// Offset between consecutive window starts in seconds
    pub step: f64,

    /// Time-domain normalization
    pub time_norm: NormMode,

    /// Spectral whitening
    pub whitening: NormMode,

    /// Half-width of the moving average, in samples or bins
    pub smooth_n: usize,

    /// Width of the whitening band-edge taper in bins
    pub taper_bins: usize,

    /// Run detrend/filter/resample on the raw trace first
    pub preprocess: bool,

    /// Require and remove the instrument response while preprocessing
    pub remove_response: bool,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 10.0,
            pre_filt: [0.04, 0.05, 4.0, 5.0],
            freqmin: 0.05,
            freqmax: 4.0,
            window_length: 3600.0,
            step: 1800.0,
            time_norm: NormMode::None,
            whitening: NormMode::None,
            smooth_n: 100,
            taper_bins: 100,
            preprocess: false,
            remove_response: false,
        }
    }
}

impl PreprocessingConfig {
    /// Sample interval at the target rate
    pub fn dt(&self) -> f64 {
        1.0 / self.sampling_rate
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        let bad = |msg: String| Err(SetupError::InvalidConfig(msg));

        if !(self.sampling_rate.is_finite() && self.sampling_rate > 0.0) {
            return bad(format!("sampling_rate must be positive, got {}", self.sampling_rate));
        }
        if !(self.window_length.is_finite() && self.window_length > 0.0) {
            return bad(format!("window_length must be positive, got {}", self.window_length));
        }
        if !(self.step.is_finite() && self.step > 0.0) {
            return bad(format!("step must be positive, got {}", self.step));
        }
        if self.whitening != NormMode::None {
            if !(self.freqmin >= 0.0 && self.freqmin < self.freqmax) {
                return bad(format!(
                    "whitening band [{}, {}] is empty",
                    self.freqmin, self.freqmax
                ));
            }
            // only resampled data is known to be at the target rate
            if self.preprocess && self.freqmax > self.sampling_rate / 2.0 {
                return bad(format!(
                    "freqmax {} above Nyquist of {} Hz",
                    self.freqmax, self.sampling_rate
                ));
            }
        }
        if self.preprocess && !self.pre_filt.windows(2).all(|w| w[0] <= w[1]) {
            return bad(format!("pre_filt corners must be ascending: {:?}", self.pre_filt));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selector() {
        assert_eq!("sac".parse::<InputFormat>().unwrap(), InputFormat::Sac);
        assert_eq!("ASDF".parse::<InputFormat>().unwrap(), InputFormat::Archive);
        assert!(matches!(
            "mseed".parse::<InputFormat>(),
            Err(SetupError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            "segy".parse::<InputFormat>(),
            Err(SetupError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.preprocessing.step = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_band_above_nyquist() {
        let mut config = Config::default();
        config.preprocessing.whitening = NormMode::OneBit;
        config.preprocessing.freqmax = 6.0;
        // raw rate unknown until a trace is loaded
        assert!(config.validate().is_ok());

        config.preprocessing.preprocess = true;
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_round_trip_keeps_modes() {
        let mut config = Config::default();
        config.preprocessing.time_norm = NormMode::RunningMean;
        config.preprocessing.whitening = NormMode::OneBit;

        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("time_norm = \"running_mean\""));
        assert!(text.contains("whitening = \"one_bit\""));

        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.preprocessing.time_norm, NormMode::RunningMean);
        assert_eq!(back.preprocessing.whitening, NormMode::OneBit);
    }

    #[test]
    fn test_metadata_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data.output_dir = dir.path().join("fft");

        let path = config.write_metadata().unwrap();
        assert_eq!(path, dir.path().join("fft").join("fft_metadata.toml"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("window_length = 3600.0"));
    }
}
