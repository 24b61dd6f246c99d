//! Action dispatch
//!
//! Performs the requested actions in order against one session and turns the
//! combined report into an exit code.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use console::style;
use log::{debug, info, warn};
use similar::{ChangeTag, TextDiff};
use testcode_core::command::quote;
use testcode_core::TestSpec;

use crate::benchmarks::make_benchmarks;
use crate::cli::{Action, Cli};
use crate::execution::run_shell;
use crate::reporting::TestReport;
use crate::scheduler::{Mode, Scheduler, SchedulerConfig};
use crate::session::Session;
use crate::Result;

/// Performs the actions of one invocation
pub struct Dispatcher {
    session: Session,
}

impl Dispatcher {
    /// Create a new dispatcher for the given session
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Perform every action and return the process exit code
    pub async fn execute(&self, cli: &Cli) -> Result<i32> {
        let mut report: Option<TestReport> = None;
        let mut printed = false;
        let mut run_started = None;
        for error in &self.session.rejected {
            eprintln!("{}", style(format!("Error: {}; its tests are not selected", error)).red());
        }
        let rejected = !self.session.rejected.is_empty();

        for action in &self.session.actions {
            if report.as_ref().is_some_and(|report| report.aborted) {
                warn!("Skipping remaining actions after interrupt");
                break;
            }
            match action {
                Action::Run => {
                    run_started = Some(SystemTime::now());
                    let run = self.schedule(cli, Mode::Run).await?;
                    merge_into(&mut report, run);
                }
                Action::Compare => {
                    if self.session.actions.contains(&Action::Run) {
                        debug!("Output already compared during run");
                        continue;
                    }
                    let compared = self.schedule(cli, Mode::Compare).await?;
                    merge_into(&mut report, compared);
                }
                Action::Diff => self.diff_tests().await?,
                Action::MakeBenchmarks => {
                    if let Some(report) = &report {
                        self.print_report(report, cli.quiet);
                        printed = true;
                    }
                    let benchmark =
                        cli.new_benchmark.as_deref().unwrap_or(&self.session.context.test_id);
                    let set = make_benchmarks(
                        &self.session,
                        report.as_ref(),
                        benchmark,
                        cli.force,
                        run_started,
                    )?;
                    println!("Setting new benchmark in userconfig to be {}.", set.benchmark);
                    if !set.missing.is_empty() {
                        let missing = format!("{} test outputs were missing.", set.missing.len());
                        println!("{}", style(missing).yellow());
                    }
                    if !set.data_files.is_empty() {
                        info!("Saved {} data files of the run", set.data_files.len());
                    }
                }
            }
        }

        let Some(report) = report else {
            return Ok(if rejected { 1 } else { 0 });
        };
        if !printed {
            self.print_report(&report, cli.quiet);
        }
        if let Some(path) = &cli.report_json {
            report.save_to_file(path)?;
            info!("Report written to {}", path.display());
        }
        Ok(if rejected || report.has_failures() { 1 } else { 0 })
    }

    async fn schedule(&self, cli: &Cli, mode: Mode) -> Result<TestReport> {
        let config = SchedulerConfig {
            concurrency: cli.nthreads,
            total_processors: cli.total_processors,
            show_progress: !cli.quiet,
        };
        let scheduler = Scheduler::new(config, self.session.context.clone());
        scheduler.run(&self.session.units, mode).await
    }

    fn print_report(&self, report: &TestReport, quiet: bool) {
        if quiet {
            println!("{}", report.statistics.short_status());
        } else {
            report.print_summary();
        }
    }

    /// Show differences between every job's benchmark and test output
    async fn diff_tests(&self) -> Result<()> {
        let context = &self.session.context;
        for unit in &self.session.units {
            for spec in &unit.test.specs {
                let Some(benchmark) = context.benchmark_file(spec) else {
                    println!("Skipping diff of {}: no benchmark set.", spec.describe());
                    continue;
                };
                let test_file = context.test_file(spec);
                let directory = spec.directory.as_path();
                if !directory.join(&test_file).is_file() {
                    println!("Skipping diff of {}: {} does not exist.", spec.describe(), test_file);
                    continue;
                }
                if !directory.join(&benchmark).is_file() {
                    println!("Skipping diff of {}: {} does not exist.", spec.describe(), benchmark);
                    continue;
                }

                println!(
                    "Diffing {} and {} in {}.",
                    benchmark,
                    test_file,
                    directory.display()
                );
                self.diff_files(spec, directory, &benchmark, &test_file).await?;
            }
        }
        Ok(())
    }

    async fn diff_files(
        &self,
        spec: &TestSpec,
        directory: &Path,
        benchmark: &str,
        test_file: &str,
    ) -> Result<()> {
        let program = self.session.user.diff.trim();
        if program.is_empty() {
            let old = fs::read_to_string(directory.join(benchmark))?;
            let new = fs::read_to_string(directory.join(test_file))?;
            print!("{}", unified_diff(&old, &new, benchmark, test_file));
            return Ok(());
        }

        let command = format!("{} {} {}", program, quote(benchmark)?, quote(test_file)?);
        debug!("Diff command for {}: {}", spec.describe(), command);
        let output = run_shell(&command, directory, self.session.context.timeout).await?;
        print!("{}", output.stdout);
        if output.status.is_none() || output.status.is_some_and(|code| code > 1) {
            warn!("{} exited unusually: {}", command, output.failure_reason());
        }
        Ok(())
    }
}

fn merge_into(report: &mut Option<TestReport>, other: TestReport) {
    match report {
        Some(report) => report.merge(other),
        None => *report = Some(other),
    }
}

/// Colored unified diff of two texts; empty when they agree
pub fn unified_diff(old: &str, new: &str, old_name: &str, new_name: &str) -> String {
    if old == new {
        return String::new();
    }
    let diff = TextDiff::from_lines(old, new);
    let groups = diff.grouped_ops(3);
    if groups.is_empty() {
        return String::new();
    }

    let mut output = format!("--- {}\n+++ {}\n", old_name, new_name);
    for group in groups {
        if let Some((first, last)) = group.first().zip(group.last()) {
            let old_start = first.old_range().start;
            let new_start = first.new_range().start;
            output.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                old_start + 1,
                last.old_range().end - old_start,
                new_start + 1,
                last.new_range().end - new_start,
            ));
        }
        for op in &group {
            for change in diff.iter_changes(op) {
                let mut line = change.to_string();
                if change.missing_newline() {
                    line.push('\n');
                }
                let line = match change.tag() {
                    ChangeTag::Delete => style(format!("-{}", line)).red().to_string(),
                    ChangeTag::Insert => style(format!("+{}", line)).green().to_string(),
                    ChangeTag::Equal => format!(" {}", line),
                };
                output.push_str(&line);
            }
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_have_no_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "old", "new"), "");
    }

    #[test]
    fn test_diff_marks_changed_lines() {
        console::set_colors_enabled(false);
        let diff = unified_diff("a\nb\nc\n", "a\nB\nc", "bench", "test");
        assert!(diff.starts_with("--- bench\n+++ test\n@@ -1,3 +1,3 @@\n"));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+B\n"));
        assert!(diff.contains("+c\n"));
        assert!(diff.contains(" a\n"));
    }
}
