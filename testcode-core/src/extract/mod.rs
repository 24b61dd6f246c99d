//! Extraction of comparable data from program output
//!
//! Three strategies are configurable per test program:
//!
//! - tagged lines, scanned directly from the output file (`tag`)
//! - an external extraction program whose standard output is a stacked
//!   whitespace table (`table`) or a YAML mapping (`yaml`)
//! - an external verifier whose exit status is the verdict
//!
//! The text-parsing strategies implement [`Extractor`]; the verifier never
//! produces labeled values and replaces comparison entirely.

pub mod table;
pub mod tag;
pub mod yaml;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::LabeledValues;

pub use table::TableExtractor;
pub use tag::TagExtractor;
pub use yaml::YamlExtractor;

/// Turns raw text into labeled values
pub trait Extractor {
    /// Extract every labeled value from `text`, in order of appearance
    fn extract(&self, text: &str) -> Result<LabeledValues>;
}

/// Output format of an external extraction program
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractFormat {
    /// One or more header + rows tables
    #[default]
    Table,
    /// A mapping of label to scalar or list of scalars
    Yaml,
}

impl ExtractFormat {
    /// Parser for this format
    pub fn extractor(&self) -> Box<dyn Extractor + Send + Sync> {
        match self {
            Self::Table => Box::new(TableExtractor),
            Self::Yaml => Box::new(YamlExtractor),
        }
    }
}

/// How a test program's output is analysed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExtractionMode {
    /// Scan output lines starting with `tag`
    Tag {
        /// Marker prefix of result lines
        tag: String,
    },
    /// Run an extraction program on each output file
    Program {
        /// Extraction program
        program: String,
        /// Extra arguments, substituted for `tc.args`
        args: String,
        /// Command template using `tc.extract`, `tc.args` and `tc.file`
        template: String,
        /// Format of the program's standard output
        format: ExtractFormat,
    },
    /// Run a verifier on the test and benchmark output together
    Verify {
        /// Verification program
        program: String,
        /// Extra arguments, substituted for `tc.args`
        args: String,
        /// Command template using `tc.extract`, `tc.args`, `tc.test` and `tc.bench`
        template: String,
    },
}

impl ExtractionMode {
    /// Short name used in logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tag { .. } => "tag",
            Self::Program { format: ExtractFormat::Table, .. } => "table",
            Self::Program { format: ExtractFormat::Yaml, .. } => "yaml",
            Self::Verify { .. } => "verify",
        }
    }

    /// Whether this mode bypasses the comparator
    pub fn is_verifier(&self) -> bool {
        matches!(self, Self::Verify { .. })
    }
}

/// Data produced by analysing one output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Extraction {
    /// Labeled values for comparison
    Values(LabeledValues),
    /// Direct verdict from a verifier
    Verdict(bool),
}
