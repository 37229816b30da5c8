//! Analysis configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a power of two, got {value}")]
    NotPowerOfTwo { name: &'static str, value: usize },

    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Feature extraction configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Preferred sample rate in Hz (the device default is used when unsupported)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// FFT window size for the real-time path
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Ring buffer capacity, which is also the pitch detection window
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Samples written between analysis passes
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,

    /// Smallest autocorrelation lag searched by the pitch detector
    #[serde(default = "default_min_lag")]
    pub min_lag: usize,

    /// Largest lag (exclusive); `None` means half the buffer capacity
    #[serde(default)]
    pub max_lag: Option<usize>,

    /// Fraction of spectral energy below the rolloff point (0-1]
    #[serde(default = "default_rolloff_threshold")]
    pub rolloff_threshold: f32,

    /// Samples per device callback requested for the real-time path
    #[serde(default = "default_quantum_size")]
    pub quantum_size: usize,

    /// Values buffered between producer and consumer before older ones are superseded
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,

    /// Input device name; `None` selects the system default
    #[serde(default)]
    pub device: Option<String>,

    /// Sort fallback peaks by amplitude instead of scan order
    #[serde(default)]
    pub sort_peaks: bool,

    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Polling analyser used when the real-time path cannot be registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_fft_size")]
    pub fft_size: usize,

    /// Exponential smoothing between successive spectra [0, 1)
    #[serde(default = "default_smoothing_time_constant")]
    pub smoothing_time_constant: f32,

    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,

    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,

    /// Analysis tick interval, independent of any render loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            buffer_capacity: default_buffer_capacity(),
            hop_size: default_hop_size(),
            min_lag: default_min_lag(),
            max_lag: None,
            rolloff_threshold: default_rolloff_threshold(),
            quantum_size: default_quantum_size(),
            frame_queue: default_frame_queue(),
            device: None,
            sort_peaks: false,
            fallback: FallbackConfig::default(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fallback_fft_size(),
            smoothing_time_constant: default_smoothing_time_constant(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_sample_rate() -> u32 { 44_100 }
fn default_fft_size() -> usize { 1024 }
fn default_buffer_capacity() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_min_lag() -> usize { 20 }
fn default_rolloff_threshold() -> f32 { 0.85 }
fn default_quantum_size() -> usize { 128 }
fn default_frame_queue() -> usize { 4 }
fn default_fallback_fft_size() -> usize { 2048 }
fn default_smoothing_time_constant() -> f32 { 0.8 }
fn default_min_decibels() -> f32 { -90.0 }
fn default_max_decibels() -> f32 { -10.0 }
fn default_poll_interval_ms() -> u64 { 16 }

impl AnalysisConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Upper (exclusive) lag bound actually searched by the pitch detector.
    pub fn effective_max_lag(&self) -> usize {
        let half = self.buffer_capacity / 2;
        self.max_lag.unwrap_or(half).min(half)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        require_power_of_two("fft_size", self.fft_size)?;
        require_power_of_two("buffer_capacity", self.buffer_capacity)?;
        if self.hop_size == 0 || self.hop_size > self.buffer_capacity {
            return Err(invalid(
                "hop_size",
                format!("must be in 1..={}, got {}", self.buffer_capacity, self.hop_size),
            ));
        }
        if self.min_lag == 0 || self.min_lag >= self.effective_max_lag() {
            return Err(invalid(
                "min_lag",
                format!(
                    "must be in 1..{}, got {}",
                    self.effective_max_lag(),
                    self.min_lag
                ),
            ));
        }
        if !(self.rolloff_threshold > 0.0 && self.rolloff_threshold <= 1.0) {
            return Err(invalid(
                "rolloff_threshold",
                format!("must be in (0, 1], got {}", self.rolloff_threshold),
            ));
        }
        if self.quantum_size == 0 {
            return Err(invalid("quantum_size", "must be positive"));
        }
        if self.frame_queue == 0 {
            return Err(invalid("frame_queue", "must be positive"));
        }
        self.fallback.validate()
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_power_of_two("fallback.fft_size", self.fft_size)?;
        if !(0.0..1.0).contains(&self.smoothing_time_constant) {
            return Err(invalid(
                "fallback.smoothing_time_constant",
                format!("must be in [0, 1), got {}", self.smoothing_time_constant),
            ));
        }
        if !(self.min_decibels < self.max_decibels) {
            return Err(invalid(
                "fallback.min_decibels",
                format!(
                    "must be below max_decibels ({} >= {})",
                    self.min_decibels, self.max_decibels
                ),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("fallback.poll_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

fn require_power_of_two(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value < 2 || !value.is_power_of_two() {
        return Err(ConfigError::NotPowerOfTwo { name, value });
    }
    Ok(())
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}
