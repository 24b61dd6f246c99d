//! Verification engine for regression testing numerical programs
//!
//! This crate holds everything needed to decide whether a program's output
//! still agrees with a stored benchmark, without running anything itself:
//!
//! - `value`: labeled values, the common currency of every extractor
//! - `tolerance`: absolute/relative tolerances and per-label lookup
//! - `extract`: tag, table and YAML extractors plus the configured mode
//! - `compare`: positional, label-aware comparison against a benchmark
//! - `category`: expansion of nested test categories
//! - `command`: run, launch, submit and extract command templates
//! - `filename`: deterministic names for test and benchmark files
//! - `config`: user and job configuration files

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod category;
pub mod command;
pub mod compare;
pub mod config;
pub mod error;
pub mod extract;
pub mod filename;
pub mod tolerance;
pub mod value;

pub use category::{CategoryGraph, Selection, ALL_CATEGORY, DEFAULT_CATEGORY};
pub use command::{CommandBuilder, JobCommand, Placeholder, Substitutions};
pub use compare::{compare, Comparator, ComparisonOutcome, FieldMismatch, FieldOutcome, FieldStatus};
pub use config::{
    ConfigOverride, Executables, InputArgs, JobConfig, Test, TestProgram, TestSpec, UserConfig,
};
pub use error::{Error, Result};
pub use extract::{
    ExtractFormat, Extraction, ExtractionMode, Extractor, TableExtractor, TagExtractor,
};
pub use filename::{output_filename, FileStems};
pub use tolerance::{Tolerance, ToleranceCheck, ToleranceSpec, ToleranceTable};
pub use value::{LabeledValue, LabeledValues, Value};
