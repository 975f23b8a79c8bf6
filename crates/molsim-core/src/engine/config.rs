use crate::core::address::AddressCodec;
use std::path::Path;
use thiserror::Error;

mod file;

pub use file::PartialIndexingConfig;

/// Root, species, molecule and atom levels: 31 species, 65535 molecules per
/// species and 1023 atoms per molecule.
pub const DEFAULT_BIT_WIDTHS: [u32; 4] = [1, 5, 16, 10];
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 50;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Address bit widths must sum to {expected}, got {actual}")]
    BitWidthSum { expected: u32, actual: u64 },

    #[error("Address depth {depth} has a bit width of zero")]
    ZeroBitWidth { depth: usize },

    #[error("Reservoir capacity must be non-negative, got {0}")]
    NegativeReservoirCapacity(i64),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration file '{path}': {message}")]
    Io { path: String, message: String },
}

/// Validated configuration of the indexing subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingConfig {
    pub bit_widths: Vec<u32>,
    pub reservoir_capacity: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            bit_widths: DEFAULT_BIT_WIDTHS.to_vec(),
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
        }
    }
}

impl IndexingConfig {
    pub fn builder() -> IndexingConfigBuilder {
        IndexingConfigBuilder::new()
    }

    /// Builds the address codec described by `bit_widths`.
    pub fn codec(&self) -> Result<AddressCodec, ConfigError> {
        AddressCodec::new(&self.bit_widths)
    }

    /// Parses a TOML document; omitted sections fall back to the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        PartialIndexingConfig::from_toml_str(content)?.into_config()
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        PartialIndexingConfig::from_file(path)?.into_config()
    }
}

#[derive(Default)]
pub struct IndexingConfigBuilder {
    bit_widths: Option<Vec<u32>>,
    reservoir_capacity: Option<i64>,
}

impl IndexingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_widths(mut self, widths: Vec<u32>) -> Self {
        self.bit_widths = Some(widths);
        self
    }
    pub fn reservoir_capacity(mut self, capacity: i64) -> Self {
        self.reservoir_capacity = Some(capacity);
        self
    }

    /// Validates and assembles the configuration.
    ///
    /// Bit widths are required; the reservoir capacity defaults to
    /// [`DEFAULT_RESERVOIR_CAPACITY`]. The width table is checked by building a
    /// codec from it, so a configuration that passes here can always be used.
    pub fn build(self) -> Result<IndexingConfig, ConfigError> {
        let bit_widths = self
            .bit_widths
            .ok_or(ConfigError::MissingParameter("bit_widths"))?;
        AddressCodec::new(&bit_widths)?;

        let capacity = self
            .reservoir_capacity
            .unwrap_or(DEFAULT_RESERVOIR_CAPACITY as i64);
        let reservoir_capacity =
            usize::try_from(capacity).map_err(|_| ConfigError::NegativeReservoirCapacity(capacity))?;

        Ok(IndexingConfig {
            bit_widths,
            reservoir_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = IndexingConfig::default();
        assert!(config.codec().is_ok());
        assert_eq!(config.reservoir_capacity, 50);
    }

    #[test]
    fn builder_accepts_valid_parameters() {
        let config = IndexingConfig::builder()
            .bit_widths(vec![1, 7, 8, 16])
            .reservoir_capacity(3)
            .build()
            .unwrap();
        assert_eq!(config.bit_widths, vec![1, 7, 8, 16]);
        assert_eq!(config.reservoir_capacity, 3);
    }

    #[test]
    fn builder_defaults_reservoir_capacity() {
        let config = IndexingConfigBuilder::new()
            .bit_widths(vec![16, 16])
            .build()
            .unwrap();
        assert_eq!(config.reservoir_capacity, DEFAULT_RESERVOIR_CAPACITY);
    }

    #[test]
    fn builder_rejects_missing_widths() {
        let err = IndexingConfigBuilder::new().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("bit_widths"));
    }

    #[test]
    fn builder_rejects_bad_width_sum() {
        let err = IndexingConfig::builder()
            .bit_widths(vec![1, 7, 8])
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::BitWidthSum {
                expected: 32,
                actual: 16
            }
        );
    }

    #[test]
    fn builder_rejects_negative_capacity() {
        let err = IndexingConfig::builder()
            .bit_widths(vec![32])
            .reservoir_capacity(-1)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::NegativeReservoirCapacity(-1));
    }

    #[test]
    fn zero_capacity_is_allowed() {
        let config = IndexingConfig::builder()
            .bit_widths(vec![32])
            .reservoir_capacity(0)
            .build()
            .unwrap();
        assert_eq!(config.reservoir_capacity, 0);
    }
}
