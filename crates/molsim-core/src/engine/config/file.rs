use super::{ConfigError, IndexingConfig, IndexingConfigBuilder};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialAddressingConfig {
    #[serde(rename = "bit-widths")]
    bit_widths: Option<Vec<u32>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
struct PartialAllocatorConfig {
    #[serde(rename = "reservoir-capacity")]
    reservoir_capacity: Option<i64>,
}

/// On-disk form of [`IndexingConfig`]; every section and key is optional.
///
/// ```toml
/// [addressing]
/// bit-widths = [1, 7, 8, 16]
///
/// [allocator]
/// reservoir-capacity = 3
/// ```
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartialIndexingConfig {
    addressing: Option<PartialAddressingConfig>,
    allocator: Option<PartialAllocatorConfig>,
}

impl PartialIndexingConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading indexing configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Fills omitted values from [`IndexingConfig::default`] and validates.
    pub fn into_config(self) -> Result<IndexingConfig, ConfigError> {
        let defaults = IndexingConfig::default();
        let addressing = self.addressing.unwrap_or_default();
        let allocator = self.allocator.unwrap_or_default();

        IndexingConfigBuilder::new()
            .bit_widths(addressing.bit_widths.unwrap_or(defaults.bit_widths))
            .reservoir_capacity(
                allocator
                    .reservoir_capacity
                    .unwrap_or(defaults.reservoir_capacity as i64),
            )
            .build()
    }
}
