//! Concurrent dispatch of tests
//!
//! Tests sharing a directory run one after another in selection order, as
//! they may read and write the same files. Directories run concurrently, up
//! to the configured number of tests at a time. An optional processor budget
//! is shared by every running job.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use tokio::sync::{mpsc, Semaphore};

use crate::execution::TestExecutor;
use crate::reporting::{JobResult, TestReport};
use crate::session::{RunContext, TestUnit};
use crate::Result;

/// What to do with each test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the jobs, then analyse their output
    Run,
    /// Analyse output left by an earlier run
    Compare,
}

/// Limits applied by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tests that may run at once; lifted to the number of tests when
    /// submitting to a queue
    pub concurrency: usize,
    /// Processors shared by all running jobs
    pub total_processors: Option<usize>,
    /// Show a progress bar
    pub show_progress: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { concurrency: 1, total_processors: None, show_progress: false }
    }
}

/// Runs selected tests under the configured limits
pub struct Scheduler {
    config: SchedulerConfig,
    executor: TestExecutor,
}

impl Scheduler {
    /// Create a scheduler for jobs sharing `context`
    pub fn new(config: SchedulerConfig, context: Arc<RunContext>) -> Self {
        let executor = match config.total_processors {
            Some(total) => TestExecutor::new(context).with_processor_budget(total),
            None => TestExecutor::new(context),
        };
        Self { config, executor }
    }

    /// Process every test, stopping early on Ctrl-C
    pub async fn run(&self, units: &[TestUnit], mode: Mode) -> Result<TestReport> {
        let interrupted = async {
            if tokio::signal::ctrl_c().await.is_err() {
                // No signal handler; never interrupt
                std::future::pending::<()>().await;
            }
        };
        self.run_until(units, mode, interrupted).await
    }

    /// Process every test unless `shutdown` completes first.
    ///
    /// On shutdown every running subprocess is killed. Results of tests that
    /// already finished are kept and the report is marked as aborted.
    pub async fn run_until<F>(
        &self,
        units: &[TestUnit],
        mode: Mode,
        shutdown: F,
    ) -> Result<TestReport>
    where
        F: Future<Output = ()>,
    {
        let start_time = Instant::now();
        let total_jobs: usize = units.iter().map(|unit| unit.test.specs.len()).sum();
        let progress = self.progress_bar(total_jobs)?;

        let context = self.executor.context();
        let concurrency =
            if context.queue.is_some() { units.len() } else { self.config.concurrency }.max(1);
        let slots = Semaphore::new(concurrency);
        // Keyed by (test index, job index) to restore definition order
        let (sender, mut receiver) = mpsc::unbounded_channel::<((usize, usize), JobResult)>();

        let groups = group_by_directory(units);
        debug!(
            "Dispatching {} tests in {} directories, {} at a time",
            units.len(),
            groups.len(),
            concurrency
        );

        let slots = &slots;
        let progress_ref = progress.as_ref();
        let group_runs: Vec<_> = groups
            .into_iter()
            .map(|group| {
                let sender = sender.clone();
                async move {
                    for (index, unit) in group {
                        let Ok(_slot) = slots.acquire().await else {
                            return;
                        };
                        let on_result = |job: usize, result: JobResult| {
                            if let Some(pb) = progress_ref {
                                pb.inc(1);
                            }
                            // The receiver outlives every group
                            let _ = sender.send(((index, job), result));
                        };
                        match mode {
                            Mode::Run => self.executor.run_test(unit, on_result).await,
                            Mode::Compare => self.executor.compare_test(unit, on_result).await,
                        }
                    }
                }
            })
            .collect();
        drop(sender);

        let aborted = tokio::select! {
            _ = join_all(group_runs) => false,
            _ = shutdown => {
                warn!("Interrupted; killing running tests");
                true
            }
        };

        let mut finished = Vec::new();
        while let Ok(entry) = receiver.try_recv() {
            finished.push(entry);
        }
        finished.sort_by_key(|(key, _)| *key);
        let results: Vec<JobResult> = finished.into_iter().map(|(_, result)| result).collect();

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }

        let report = TestReport::new(
            context.test_id.clone(),
            context.benchmark.clone(),
            results,
            start_time.elapsed(),
        );
        Ok(if aborted { report.aborted() } else { report })
    }

    fn progress_bar(&self, total: usize) -> Result<Option<ProgressBar>> {
        if !self.config.show_progress {
            return Ok(None);
        }
        let pb = ProgressBar::new(total as u64);
        pb.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        )?);
        Ok(Some(pb))
    }
}

/// Tests grouped by directory, groups in order of first appearance
fn group_by_directory(units: &[TestUnit]) -> Vec<Vec<(usize, &TestUnit)>> {
    let mut groups: Vec<(&Path, Vec<(usize, &TestUnit)>)> = Vec::new();
    for (index, unit) in units.iter().enumerate() {
        let directory = unit.test.directory.as_path();
        match groups.iter_mut().find(|(dir, _)| *dir == directory) {
            Some((_, group)) => group.push((index, unit)),
            None => groups.push((directory, vec![(index, unit)])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use testcode_core::{
        CommandBuilder, ExtractionMode, Test, TestProgram, TestSpec, ToleranceTable,
    };

    fn unit(name: &str, directory: &Path, exe: &str, args: &str) -> TestUnit {
        jobs(name, directory, exe, &[args])
    }

    fn jobs(name: &str, directory: &Path, exe: &str, args: &[&str]) -> TestUnit {
        let program = TestProgram {
            name: "sh".to_string(),
            exe: exe.to_string(),
            commands: CommandBuilder::default(),
            submit_template: None,
            extraction: ExtractionMode::Tag { tag: "[QA]".to_string() },
            ignore_fields: Vec::new(),
            tolerances: Vec::new(),
            inputs_args: Vec::new(),
            output: None,
            nprocs: 0,
        };
        let specs = args
            .iter()
            .map(|args| TestSpec {
                test: name.to_string(),
                program: "sh".to_string(),
                directory: directory.to_path_buf(),
                input: String::new(),
                args: args.to_string(),
                nprocs: 0,
                min_nprocs: 0,
                max_nprocs: None,
                override_nprocs: false,
                output: None,
                tolerances: ToleranceTable::new(),
                ignore_fields: Vec::new(),
            })
            .collect();
        let test = Test {
            name: name.to_string(),
            program: "sh".to_string(),
            directory: directory.to_path_buf(),
            output: None,
            specs,
        };
        TestUnit { test, program: Arc::new(program) }
    }

    #[test]
    fn test_groups_follow_first_appearance() {
        let a = PathBuf::from("a");
        let b = PathBuf::from("b");
        let units = vec![unit("t1", &a, "x", ""), unit("t2", &b, "x", ""), unit("t3", &a, "x", "")];
        let groups = group_by_directory(&units);
        let names: Vec<Vec<&str>> = groups
            .iter()
            .map(|group| group.iter().map(|(_, unit)| unit.test.name.as_str()).collect())
            .collect();
        assert_eq!(names, vec![vec!["t1", "t3"], vec!["t2"]]);
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_tests() {
        let dir = tempfile::TempDir::new().unwrap();
        let units = vec![unit("slow", dir.path(), "sleep", "30")];
        let context = Arc::new(RunContext::new("1", None));
        let scheduler = Scheduler::new(SchedulerConfig::default(), context);

        let start = Instant::now();
        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(200));
        let report = scheduler.run_until(&units, Mode::Run, shutdown).await.unwrap();

        assert!(report.aborted);
        assert!(report.results.is_empty());
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_keeps_finished_jobs_of_running_test() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("benchmark.out.ref.args=0"), "").unwrap();
        let units = vec![jobs("pair", dir.path(), "sleep", &["0", "30"])];
        let context = Arc::new(RunContext::new("1", Some("ref".to_string())));
        let scheduler = Scheduler::new(SchedulerConfig::default(), context);

        let shutdown = tokio::time::sleep(std::time::Duration::from_millis(500));
        let report = scheduler.run_until(&units, Mode::Run, shutdown).await.unwrap();

        assert!(report.aborted);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].args, "0");
        assert_eq!(report.results[0].status, crate::reporting::JobStatus::Passed);
    }

    #[tokio::test]
    async fn test_results_follow_definition_order() {
        let a = tempfile::TempDir::new().unwrap();
        let b = tempfile::TempDir::new().unwrap();
        let units = vec![
            jobs("slow", a.path(), "sleep", &["0.3", "0"]),
            jobs("fast", b.path(), "sleep", &["0"]),
        ];
        let context = Arc::new(RunContext::new("1", None));
        let config = SchedulerConfig { concurrency: 2, ..SchedulerConfig::default() };
        let scheduler = Scheduler::new(config, context);

        let report =
            scheduler.run_until(&units, Mode::Run, std::future::pending()).await.unwrap();
        let order: Vec<_> =
            report.results.iter().map(|r| (r.test.as_str(), r.args.as_str())).collect();
        assert_eq!(order, vec![("slow", "0.3"), ("slow", "0"), ("fast", "0")]);
    }
}
