//! Error kinds raised by the verification engine

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while loading configuration or analysing output
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed tolerance, category, template or test definition
    #[error("Configuration error: {0}")]
    Config(String),

    /// A category reaches itself through its members
    #[error("Category cycle detected: {}", .path.join(" -> "))]
    Cycle {
        /// Categories on the cycle, first and last entries are the same
        path: Vec<String>,
    },

    /// Selection names neither a category nor a test
    #[error("Unknown category or test: {0}")]
    UnknownCategory(String),

    /// Output could not be turned into labeled values
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// A numeric field has no tolerance to compare with
    #[error("No tolerance defined for field '{label}'")]
    ToleranceUndefined {
        /// Field label
        label: String,
    },

    /// Failed to read a configuration file
    #[error("Failed to read {path}: {source}")]
    ReadConfig {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML or does not match the schema
    #[error("Failed to parse {path}: {source}")]
    ParseConfig {
        /// File that could not be parsed
        path: PathBuf,
        /// Underlying TOML error
        source: toml::de::Error,
    },

    /// Extractor emitted YAML that could not be parsed
    #[error("Invalid YAML data: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
