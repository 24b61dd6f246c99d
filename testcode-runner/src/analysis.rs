//! Analysis of finished jobs
//!
//! Dispatches on the program's extraction mode: tagged lines are read
//! directly, extraction programs are run on both output files and their
//! standard output parsed, and verifiers are run once on the pair with their
//! exit status taken as the verdict.

use std::path::Path;
use std::time::Duration;

use log::debug;
use testcode_core::command::{extract_command, verify_command};
use testcode_core::{
    compare, ComparisonOutcome, Error as CoreError, ExtractFormat, ExtractionMode, Extractor,
    LabeledValues, TagExtractor, TestProgram, TestSpec,
};

use crate::execution::run_shell;
use crate::reporting::JobResult;
use crate::{Result, RunError};

/// Exit statuses `sh` uses when a command cannot be found or executed
const SHELL_LAUNCH_FAILURES: [i32; 2] = [126, 127];

/// Verdict on one job's output
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    /// Extracted values were compared field by field
    Compared(ComparisonOutcome),
    /// A verifier judged the output
    Verified {
        /// Whether the verifier exited with status 0
        passed: bool,
        /// Verifier's standard output
        output: String,
    },
}

impl Analysis {
    /// Whether the output agrees with the benchmark
    pub fn passed(&self) -> bool {
        match self {
            Self::Compared(outcome) => outcome.passed(),
            Self::Verified { passed, .. } => *passed,
        }
    }

    /// Turn the verdict into a job result
    pub fn into_result(self, spec: &TestSpec) -> JobResult {
        match self {
            Self::Compared(outcome) if outcome.passed() => {
                JobResult::passed(spec).with_comparison(outcome)
            }
            Self::Compared(outcome) => {
                let failures = outcome.failures().count();
                let message = match (failures, outcome.mismatches.len()) {
                    (f, 0) => format!("{} field(s) outside tolerance", f),
                    (0, m) => format!("{} field count mismatch(es)", m),
                    (f, m) => {
                        format!("{} field(s) outside tolerance, {} field count mismatch(es)", f, m)
                    }
                };
                JobResult::failed(spec, message).with_comparison(outcome)
            }
            Self::Verified { passed: true, output } => {
                JobResult::passed(spec).with_verifier_output(output)
            }
            Self::Verified { passed: false, output } => {
                JobResult::failed(spec, "Verifier reported a failure").with_verifier_output(output)
            }
        }
    }
}

/// Analyse a job's test output against its benchmark.
///
/// `test_file` and `benchmark_file` are relative to the job's directory.
/// Missing files and malformed output are returned as extraction errors;
/// extraction programs and verifiers that cannot be run are subprocess
/// errors.
pub async fn analyse(
    program: &TestProgram,
    spec: &TestSpec,
    test_file: &str,
    benchmark_file: &str,
    timeout: Option<Duration>,
) -> Result<Analysis> {
    let directory = spec.directory.as_path();
    for (kind, file) in [("Benchmark", benchmark_file), ("Test output", test_file)] {
        if !directory.join(file).is_file() {
            return Err(CoreError::Extraction(format!(
                "{} file {} not found in {}",
                kind,
                file,
                directory.display()
            ))
            .into());
        }
    }

    match &program.extraction {
        ExtractionMode::Tag { tag } => {
            debug!("{}: extracting with data tag {}", spec.describe(), tag);
            let extractor = TagExtractor::new(tag.as_str());
            let benchmark = extract_file(&extractor, &directory.join(benchmark_file))?;
            let test = extract_file(&extractor, &directory.join(test_file))?;
            Ok(compared(spec, &test, &benchmark))
        }
        ExtractionMode::Program { program, args, template, format } => {
            debug!("{}: extracting with {}", spec.describe(), program);
            let benchmark_cmd = extract_command(template, program, args, benchmark_file)?;
            let test_cmd = extract_command(template, program, args, test_file)?;
            let benchmark = run_extractor(&benchmark_cmd, directory, *format, timeout).await?;
            let test = run_extractor(&test_cmd, directory, *format, timeout).await?;
            Ok(compared(spec, &test, &benchmark))
        }
        ExtractionMode::Verify { program, args, template } => {
            debug!("{}: verifying with {}", spec.describe(), program);
            let command = verify_command(template, program, args, test_file, benchmark_file)?;
            let output = run_shell(&command, directory, timeout).await?;
            match output.status {
                Some(code) if SHELL_LAUNCH_FAILURES.contains(&code) => {
                    Err(RunError::Subprocess { command, reason: output.failure_reason() })
                }
                Some(code) => Ok(Analysis::Verified { passed: code == 0, output: output.stdout }),
                None => Err(RunError::Subprocess { command, reason: output.failure_reason() }),
            }
        }
    }
}

fn compared(spec: &TestSpec, test: &LabeledValues, benchmark: &LabeledValues) -> Analysis {
    Analysis::Compared(compare(test, benchmark, &spec.tolerances, &spec.ignore_fields))
}

fn extract_file(extractor: &dyn Extractor, path: &Path) -> Result<LabeledValues> {
    let text = std::fs::read_to_string(path)?;
    Ok(extractor.extract(&text)?)
}

async fn run_extractor(
    command: &str,
    directory: &Path,
    format: ExtractFormat,
    timeout: Option<Duration>,
) -> Result<LabeledValues> {
    let output = run_shell(command, directory, timeout).await?;
    if !output.success() {
        return Err(RunError::Subprocess {
            command: command.to_string(),
            reason: output.failure_reason(),
        });
    }
    Ok(format.extractor().extract(&output.stdout)?)
}
