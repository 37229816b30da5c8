//! Input source enumeration

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of input source identifiers
pub const INPUT_PREFIX: &str = "input:";

/// Input source information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSource {
    /// Unique identifier, accepted by `AnalysisConfig::device`
    pub id: String,

    /// Display name
    pub name: String,

    /// Whether this is the host's default input
    pub is_default: bool,
}

impl InputSource {
    fn from_device_name(name: String, default_name: Option<&str>) -> Self {
        Self {
            id: format!("{}{}", INPUT_PREFIX, name),
            is_default: default_name == Some(name.as_str()),
            name,
        }
    }
}

/// Source enumeration errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to enumerate devices: {0}")]
    EnumerationError(String),
}

/// List available input devices, default first.
pub fn list_sources() -> Result<Vec<InputSource>, SourceError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| SourceError::EnumerationError(e.to_string()))?;

    let mut sources: Vec<InputSource> = devices
        .filter_map(|device| device.name().ok())
        .map(|name| InputSource::from_device_name(name, default_name.as_deref()))
        .collect();

    // Stable, so host order is kept among the rest
    sources.sort_by_key(|source| !source.is_default);

    log::debug!("Found {} input sources", sources.len());
    Ok(sources)
}
