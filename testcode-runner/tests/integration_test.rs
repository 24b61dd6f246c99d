//! Integration tests for the testcode runner
//!
//! Each test builds a small project in a temporary directory whose program
//! is `cat`: the test output is the input file itself.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tempfile::TempDir;
use testcode_core::{Executables, UserConfig};
use testcode_runner::{
    Cli, Dispatcher, JobStatus, Mode, RunError, Scheduler, SchedulerConfig, Session, TestReport,
    DATA_DIR,
};

const INPUT: &str = " SCF converged\n [QA] Energy = -1.5000000\n [QA] Gap = 0.25\n";

struct Project {
    dir: TempDir,
}

impl Project {
    fn new(benchmark: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let userconfig = r#"
[user]
benchmark = "ref"
date_fmt = "fixed"
tolerance = ["1e-6;"]

[programs.cat]
exe = "cat"
data_tag = "[QA]"
"#;
        fs::write(dir.path().join("userconfig.toml"), userconfig).unwrap();
        let jobconfig = r#"
[categories]
quick = "h2"

[tests.h2]
inputs_args = ["a.in"]
"#;
        fs::write(dir.path().join("jobconfig.toml"), jobconfig).unwrap();
        let test_dir = dir.path().join("h2");
        fs::create_dir(&test_dir).unwrap();
        fs::write(test_dir.join("a.in"), INPUT).unwrap();
        fs::write(test_dir.join("benchmark.out.ref.inp=a.in"), benchmark).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn test_dir(&self) -> PathBuf {
        self.path("h2")
    }

    fn cli(&self, extra: &[&str]) -> Cli {
        let userconfig = self.path("userconfig.toml");
        let jobconfig = self.path("jobconfig.toml");
        let mut args = vec![
            "testcode".to_string(),
            "-q".to_string(),
            "--userconfig".to_string(),
            userconfig.display().to_string(),
            "--jobconfig".to_string(),
            jobconfig.display().to_string(),
        ];
        args.extend(extra.iter().map(|arg| arg.to_string()));
        Cli::parse_from(args)
    }

    async fn schedule(&self, extra: &[&str], mode: Mode) -> TestReport {
        let session = Session::new(&self.cli(extra)).unwrap();
        let scheduler = Scheduler::new(SchedulerConfig::default(), session.context.clone());
        scheduler.run_until(&session.units, mode, std::future::pending()).await.unwrap()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn test_run_against_matching_benchmark() {
    let project = Project::new(INPUT);
    let report = project.schedule(&["run"], Mode::Run).await;

    assert_eq!(report.test_id, "fixed");
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, JobStatus::Passed);
    assert!(report.statistics.all_passed());
    assert!(!report.has_failures());
    assert_eq!(read(&project.test_dir().join("test.out.fixed.inp=a.in")), INPUT);
}

#[tokio::test]
async fn test_run_against_drifted_benchmark() {
    let project = Project::new(&INPUT.replace("0.25", "0.26"));
    let report = project.schedule(&["run"], Mode::Run).await;

    let result = &report.results[0];
    assert_eq!(result.status, JobStatus::Failed);
    let comparison = result.comparison.as_ref().unwrap();
    let failures: Vec<_> = comparison.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].label.starts_with("Gap"));
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_second_run_gets_new_id() {
    let project = Project::new(INPUT);
    project.schedule(&["run"], Mode::Run).await;
    let report = project.schedule(&["run"], Mode::Run).await;

    assert_eq!(report.test_id, "fixed-1");
    assert!(project.test_dir().join("test.out.fixed-1.inp=a.in").is_file());
}

#[tokio::test]
async fn test_compare_uses_latest_output() {
    let project = Project::new(INPUT);
    fs::write(project.test_dir().join("test.out.earlier.inp=a.in"), INPUT).unwrap();

    let report = project.schedule(&["compare"], Mode::Compare).await;
    assert_eq!(report.test_id, "earlier");
    assert_eq!(report.results[0].status, JobStatus::Passed);
}

#[tokio::test]
async fn test_compare_without_output_skips() {
    let project = Project::new(INPUT);
    let report = project.schedule(&["compare", "-t", "missing"], Mode::Compare).await;

    assert_eq!(report.results[0].status, JobStatus::Skipped);
    assert_eq!(report.statistics.ran(), 0);
}

#[tokio::test]
async fn test_benchmark_compared_with_itself() {
    let project = Project::new(INPUT);
    let report = project.schedule(&["compare", "-t", "b:ref"], Mode::Compare).await;

    assert_eq!(report.results[0].status, JobStatus::Passed);
}

#[tokio::test]
async fn test_benchmark_as_test_output_rejected_when_running() {
    let project = Project::new(INPUT);
    let result = Session::new(&project.cli(&["run", "-t", "b:ref"]));
    assert!(matches!(result, Err(RunError::Core(testcode_core::Error::Config(_)))));
}

#[tokio::test]
async fn test_unknown_category_rejected() {
    let project = Project::new(INPUT);
    let result = Session::new(&project.cli(&["run", "-c", "slow"]));
    assert!(matches!(result, Err(RunError::Core(testcode_core::Error::UnknownCategory(_)))));
}

#[tokio::test]
async fn test_cyclic_category_does_not_drop_other_selections() {
    let project = Project::new(INPUT);
    let jobconfig = r#"
[categories]
good = ["h2"]
cyc = ["cyc"]

[tests.h2]
inputs_args = ["a.in"]
"#;
    fs::write(project.path("jobconfig.toml"), jobconfig).unwrap();

    let cli = project.cli(&["run", "-c", "good", "-c", "cyc"]);
    let session = Session::new(&cli).unwrap();
    assert_eq!(session.units.len(), 1);
    assert_eq!(session.units[0].test.name, "h2");
    assert_eq!(session.rejected.len(), 1);
    assert!(matches!(session.rejected[0], testcode_core::Error::Cycle { .. }));

    let dispatcher = Dispatcher::new(session);
    assert_eq!(dispatcher.execute(&cli).await.unwrap(), 1);
    assert!(project.test_dir().join("test.out.fixed.inp=a.in").is_file());
}

#[tokio::test]
async fn test_make_benchmarks_after_passing_run() {
    let project = Project::new(INPUT);
    // inputs predate the run and are not saved as data
    std::thread::sleep(std::time::Duration::from_millis(100));
    let cli = project.cli(&["make-benchmarks", "--new-benchmark", "v2"]);
    let dispatcher = Dispatcher::new(Session::new(&cli).unwrap());

    assert_eq!(dispatcher.execute(&cli).await.unwrap(), 0);
    assert_eq!(read(&project.test_dir().join("benchmark.out.v2.inp=a.in")), INPUT);

    let user =
        UserConfig::load(project.path("userconfig.toml"), &[], &Executables::default()).unwrap();
    assert_eq!(user.benchmark.as_deref(), Some("v2"));

    let data_dir = project.test_dir().join(DATA_DIR);
    assert_eq!(read(&data_dir.join("test.out.fixed.inp=a.in")), INPUT);
    assert!(!data_dir.join("a.in").exists());
}

#[tokio::test]
async fn test_make_benchmarks_refused_after_failure() {
    let project = Project::new(&INPUT.replace("-1.5", "-1.6"));
    let cli = project.cli(&["make-benchmarks"]);
    let dispatcher = Dispatcher::new(Session::new(&cli).unwrap());

    let result = dispatcher.execute(&cli).await;
    assert!(matches!(result, Err(RunError::BenchmarksRefused(_))));
    assert!(!project.test_dir().join("benchmark.out.fixed.inp=a.in").exists());
}

#[tokio::test]
async fn test_make_benchmarks_forced_after_failure() {
    let project = Project::new(&INPUT.replace("-1.5", "-1.6"));
    let cli = project.cli(&["make-benchmarks", "--force"]);
    let dispatcher = Dispatcher::new(Session::new(&cli).unwrap());

    assert_eq!(dispatcher.execute(&cli).await.unwrap(), 1);
    assert_eq!(read(&project.test_dir().join("benchmark.out.fixed.inp=a.in")), INPUT);
}

#[tokio::test]
async fn test_json_report_written() {
    let project = Project::new(INPUT);
    let report_path = project.path("report.json");
    let report_arg = report_path.display().to_string();
    let cli = project.cli(&["run", "--report-json", &report_arg]);
    let dispatcher = Dispatcher::new(Session::new(&cli).unwrap());

    assert_eq!(dispatcher.execute(&cli).await.unwrap(), 0);
    let json: serde_json::Value = serde_json::from_str(&read(&report_path)).unwrap();
    assert_eq!(json["test_id"], "fixed");
    assert_eq!(json["statistics"]["passed"], 1);
}
