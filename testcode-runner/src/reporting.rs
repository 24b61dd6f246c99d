//! Job results, statistics and the end-of-run summary

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::style;
use serde::Serialize;
use testcode_core::{ComparisonOutcome, FieldStatus, TestSpec};

/// Terminal state of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum JobStatus {
    /// Output agrees with the benchmark
    Passed,
    /// Output was analysed and disagrees with the benchmark
    Failed,
    /// Job was not run or not analysed
    Skipped,
    /// Tooling failure: the job could not be run or analysed
    Error,
}

impl JobStatus {
    /// Whether the run should exit unsuccessfully because of this status
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Passed => "Passed",
            Self::Failed => "**FAILED**",
            Self::Skipped => "Skipped",
            Self::Error => "**ERROR**",
        };
        f.write_str(label)
    }
}

/// Result of running and analysing one job
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    /// Test the job belongs to
    pub test: String,
    /// Program under test
    pub program: String,
    /// Working directory
    pub directory: PathBuf,
    /// Input file; empty for none
    pub input: String,
    /// Program arguments; empty for none
    pub args: String,
    /// Terminal state
    pub status: JobStatus,
    /// Time spent running and analysing
    pub duration: Duration,
    /// Command that was run, if any
    pub command: Option<String>,
    /// Reason for a failure, error or skip
    pub message: Option<String>,
    /// Field-by-field comparison, when values were compared
    pub comparison: Option<ComparisonOutcome>,
    /// Captured output of a verifier
    pub verifier_output: Option<String>,
}

impl JobResult {
    fn new(spec: &TestSpec, status: JobStatus, message: Option<String>) -> Self {
        Self {
            test: spec.test.clone(),
            program: spec.program.clone(),
            directory: spec.directory.clone(),
            input: spec.input.clone(),
            args: spec.args.clone(),
            status,
            duration: Duration::ZERO,
            command: None,
            message,
            comparison: None,
            verifier_output: None,
        }
    }

    /// Create a passed result
    pub fn passed(spec: &TestSpec) -> Self {
        Self::new(spec, JobStatus::Passed, None)
    }

    /// Create a failed result
    pub fn failed(spec: &TestSpec, message: impl Into<String>) -> Self {
        Self::new(spec, JobStatus::Failed, Some(message.into()))
    }

    /// Create a skipped result
    pub fn skipped(spec: &TestSpec, reason: impl Into<String>) -> Self {
        Self::new(spec, JobStatus::Skipped, Some(reason.into()))
    }

    /// Create an error result
    pub fn error(spec: &TestSpec, message: impl Into<String>) -> Self {
        Self::new(spec, JobStatus::Error, Some(message.into()))
    }

    /// Record the command that was run
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Record the comparison behind the verdict
    pub fn with_comparison(mut self, comparison: ComparisonOutcome) -> Self {
        self.comparison = Some(comparison);
        self
    }

    /// Record a verifier's output
    pub fn with_verifier_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        if !output.trim().is_empty() {
            self.verifier_output = Some(output);
        }
        self
    }

    /// Record the time taken
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Short description of the job
    pub fn describe(&self) -> String {
        match (self.input.is_empty(), self.args.is_empty()) {
            (true, true) => self.test.clone(),
            (false, true) => format!("{} [{}]", self.test, self.input),
            (true, false) => format!("{} [args: {}]", self.test, self.args),
            (false, false) => format!("{} [{}, args: {}]", self.test, self.input, self.args),
        }
    }
}

/// Counts over a set of job results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestStatistics {
    /// Number of jobs
    pub total: usize,
    /// Number of passed jobs
    pub passed: usize,
    /// Number of failed jobs
    pub failed: usize,
    /// Number of skipped jobs
    pub skipped: usize,
    /// Number of jobs that hit a tooling error
    pub errors: usize,
    /// Total time spent in jobs
    pub total_duration: Duration,
}

impl TestStatistics {
    /// Create statistics from job results
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut stats = Self { total: results.len(), ..Self::default() };
        for result in results {
            match result.status {
                JobStatus::Passed => stats.passed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Skipped => stats.skipped += 1,
                JobStatus::Error => stats.errors += 1,
            }
            stats.total_duration += result.duration;
        }
        stats
    }

    /// Jobs that ran to a verdict
    pub fn ran(&self) -> usize {
        self.total - self.skipped
    }

    /// Check if no job failed or hit an error
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Passed jobs as a percentage of jobs that ran
    pub fn success_rate(&self) -> f64 {
        if self.ran() == 0 {
            100.0
        } else {
            (self.passed as f64 / self.ran() as f64) * 100.0
        }
    }

    /// The closing `All done.` line
    pub fn status_line(&self) -> String {
        let warning = if self.passed == self.ran() { "" } else { "WARNING: only " };
        let mut line =
            format!("All done.  {}{} out of {} tests passed.", warning, self.passed, self.ran());
        if self.skipped > 0 {
            line.push_str(&format!("  (Skipped: {}.)", self.skipped));
        }
        line
    }

    /// Compact `[passed/ran]` form used in quiet mode
    pub fn short_status(&self) -> String {
        let mut line = format!(" [{}/{}]", self.passed, self.ran());
        if self.skipped > 0 {
            line.push_str(&format!("  (Skipped: {}.)", self.skipped));
        }
        line
    }
}

/// Complete report of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    /// Test id of the outputs
    pub test_id: String,
    /// Benchmark id compared against
    pub benchmark: Option<String>,
    /// Every job result, in test definition order
    pub results: Vec<JobResult>,
    /// Overall statistics
    pub statistics: TestStatistics,
    /// Wall-clock time of the run
    pub duration: Duration,
    /// Whether the run was interrupted
    pub aborted: bool,
    /// Timestamp when the tests were run
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TestReport {
    /// Create a new report
    pub fn new(
        test_id: impl Into<String>,
        benchmark: Option<String>,
        results: Vec<JobResult>,
        duration: Duration,
    ) -> Self {
        let statistics = TestStatistics::from_results(&results);
        Self {
            test_id: test_id.into(),
            benchmark,
            results,
            statistics,
            duration,
            aborted: false,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Mark the run as interrupted
    pub fn aborted(mut self) -> Self {
        self.aborted = true;
        self
    }

    /// Append the results of another report over the same outputs
    pub fn merge(&mut self, other: TestReport) {
        self.results.extend(other.results);
        self.statistics = TestStatistics::from_results(&self.results);
        self.duration += other.duration;
        self.aborted |= other.aborted;
    }

    /// Results with the given status
    pub fn with_status(&self, status: JobStatus) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    /// Whether the run should exit unsuccessfully
    pub fn has_failures(&self) -> bool {
        self.aborted || self.results.iter().any(|r| r.status.is_failure())
    }

    /// Print every job, the failures in detail and the closing line
    pub fn print_summary(&self) {
        println!();
        self.print_results();
        if !self.statistics.all_passed() {
            self.print_failures();
        }
        self.print_statistics();
        self.print_status_line();
    }

    /// Print only the closing line
    pub fn print_status_line(&self) {
        if self.aborted {
            println!("{}", style("Run interrupted; remaining tests were not run.").bold().red());
        }
        let line = self.statistics.status_line();
        if self.statistics.all_passed() {
            println!("{}", style(line).bold().green());
        } else {
            println!("{}", style(line).bold().red());
        }
    }

    fn print_results(&self) {
        for result in &self.results {
            let status = match result.status {
                JobStatus::Passed => style(result.status.to_string()).green(),
                JobStatus::Skipped => style(result.status.to_string()).yellow(),
                JobStatus::Failed | JobStatus::Error => style(result.status.to_string()).red(),
            };
            println!("  {:<12} {} [{:.2?}]", status, result.describe(), result.duration);
        }
        println!();
    }

    /// Print details of every failed or errored job
    pub fn print_failures(&self) {
        let failed: Vec<_> = self.with_status(JobStatus::Failed).collect();
        if !failed.is_empty() {
            println!("{}", style("FAILED TESTS:").bold().red());
            for result in failed {
                print_failure(result);
            }
        }

        let errors: Vec<_> = self.with_status(JobStatus::Error).collect();
        if !errors.is_empty() {
            println!("{}", style("ERROR TESTS:").bold().red());
            for result in errors {
                println!("\n  {} {}", style("!").red(), result.describe());
                print_context(result);
            }
        }
        println!();
    }

    fn print_statistics(&self) {
        let stats = &self.statistics;
        println!("{}", style("SUMMARY").bold());
        println!("  Test id: {}", self.test_id);
        if let Some(benchmark) = &self.benchmark {
            println!("  Benchmark: {}", benchmark);
        }
        println!("  {} {}", style("Passed:").green(), style(stats.passed).bold().green());
        if stats.failed > 0 {
            println!("  {} {}", style("Failed:").red(), style(stats.failed).bold().red());
        }
        if stats.errors > 0 {
            println!("  {} {}", style("Errors:").red(), style(stats.errors).bold().red());
        }
        if stats.skipped > 0 {
            println!("  {} {}", style("Skipped:").yellow(), style(stats.skipped).bold().yellow());
        }
        println!("  Success rate: {:.1}%", stats.success_rate());
        println!("  Duration: {:.2?}", self.duration);
        println!();
    }

    /// Export report as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save report to file
    pub fn save_to_file(&self, path: &Path) -> crate::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| crate::RunError::Output(format!("Cannot encode report: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn print_context(result: &JobResult) {
    println!("    Directory: {}", style(result.directory.display()).dim());
    if let Some(command) = &result.command {
        println!("    Command: {}", style(command).dim());
    }
    if let Some(message) = &result.message {
        println!("    Error: {}", style(message).red());
    }
}

fn print_failure(result: &JobResult) {
    println!("\n  {} {}", style("✗").red(), result.describe());
    print_context(result);

    if let Some(comparison) = &result.comparison {
        print_comparison(comparison);
    }
    if let Some(output) = &result.verifier_output {
        println!("    Verifier output:");
        for line in output.lines() {
            println!("      {}", style(line).dim());
        }
    }
}

fn print_comparison(comparison: &ComparisonOutcome) {
    let failures: Vec<_> = comparison.failures().collect();
    if !failures.is_empty() {
        println!(
            "    {:<20} {:>4} {:>16} {:>16} {:>12} {:>12}  {:<24} Status",
            "Field", "#", "Benchmark", "Test", "Abs diff", "Rel diff", "Tolerance"
        );
        for field in failures {
            let status = match field.status {
                FieldStatus::ToleranceUndefined => "no tolerance",
                _ => "failed",
            };
            let line = format!(
                "    {:<20} {:>4} {:>16} {:>16} {:>12} {:>12}  {:<24} {}",
                field.label,
                field.position,
                field.benchmark_value.to_string(),
                field.test_value.to_string(),
                format_diff(field.abs_diff),
                format_diff(field.rel_diff),
                field.tolerance.map_or_else(|| "-".to_string(), |t| t.to_string()),
                status
            );
            println!("{}", style(line).red());
        }
    }
    for mismatch in &comparison.mismatches {
        println!("    {} {}", style("Field count mismatch:").red(), mismatch);
    }
}

fn format_diff(diff: Option<f64>) -> String {
    diff.map_or_else(|| "-".to_string(), |d| format!("{:.3e}", d))
}
