//! # testcode runner
//!
//! Runs configured tests of numerical programs, extracts their results and
//! checks them against stored benchmarks using `testcode-core`.
//!
//! ## Architecture
//!
//! - `cli`: command-line surface
//! - `session`: configuration loading, test ids and test selection
//! - `execution`: subprocesses, queue submission and output relocation
//! - `analysis`: extraction and verification of finished jobs
//! - `scheduler`: concurrent dispatch of tests under processor limits
//! - `actions`: compare and diff actions on existing output
//! - `benchmarks`: creation of new benchmarks from test output
//! - `reporting`: per-job results, statistics and the final summary

pub mod actions;
pub mod analysis;
pub mod benchmarks;
pub mod cli;
pub mod execution;
pub mod reporting;
pub mod scheduler;
pub mod session;

pub use actions::Dispatcher;
pub use analysis::Analysis;
pub use benchmarks::{make_benchmarks, BenchmarkSet, DATA_DIR};
pub use cli::{Action, Cli};
pub use execution::{CommandOutput, QueueSystem, TestExecutor};
pub use reporting::{JobResult, JobStatus, TestReport, TestStatistics};
pub use scheduler::{Mode, Scheduler, SchedulerConfig};
pub use session::{RunContext, Session, TestUnit};

use std::path::PathBuf;

/// Errors raised while running or analysing tests
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    /// A command could not be started or exited unsuccessfully
    #[error("Command `{command}` failed: {reason}")]
    Subprocess {
        /// Command line
        command: String,
        /// What went wrong
        reason: String,
    },

    /// A command ran longer than the configured timeout
    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout {
        /// Command line
        command: String,
        /// Timeout in seconds
        seconds: u64,
    },

    /// Queue submission or polling failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// A job's input file does not exist
    #[error("Input file does not exist: {0}")]
    MissingInput(PathBuf),

    /// A job needs more processors than the whole run may use
    #[error("Job needs {needed} processors but the budget is {budget}")]
    ProcessorBudget {
        /// Processors the job needs
        needed: usize,
        /// Processors available to the run
        budget: usize,
    },

    /// The run was interrupted before the job finished
    #[error("Run aborted")]
    Aborted,

    /// New benchmarks were not made
    #[error("Not making benchmarks: {0}")]
    BenchmarksRefused(String),

    /// Output files are missing or ambiguous
    #[error("Output error: {0}")]
    Output(String),

    /// Configuration, extraction or tolerance error from the engine
    #[error(transparent)]
    Core(#[from] testcode_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Progress bar template error
    #[error("Template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),
}

impl RunError {
    /// Whether the error is a verdict on the output rather than a tooling
    /// failure: malformed or missing output fails a job, anything else is an
    /// error.
    pub fn is_output_failure(&self) -> bool {
        matches!(
            self,
            Self::Core(
                testcode_core::Error::Extraction(_)
                    | testcode_core::Error::Yaml(_)
                    | testcode_core::Error::ToleranceUndefined { .. }
            )
        )
    }
}

/// Result alias used throughout the runner
pub type Result<T> = std::result::Result<T, RunError>;
