//! Command-line interface definitions using Clap

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use testcode_core::{ConfigOverride, ALL_CATEGORY, DEFAULT_CATEGORY};

/// What to do with the selected tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Action {
    /// Run the tests and compare their output with the benchmarks
    Run,
    /// Compare existing test output with the benchmarks
    Compare,
    /// Show the differences between test output and benchmark files
    Diff,
    /// Turn the test output into new benchmarks
    MakeBenchmarks,
}

/// testcode - regression testing for numerical programs
#[derive(Debug, Parser)]
#[command(name = "testcode")]
#[command(version, long_about = None)]
#[command(about = "Run tests and compare their output against benchmarks")]
pub struct Cli {
    /// Actions to perform, in order
    #[arg(value_enum)]
    pub actions: Vec<Action>,

    /// File id of the benchmarks; `t:ID` compares against test output ID
    #[arg(short = 'b', long = "benchmark")]
    pub benchmark: Option<String>,

    /// Category or test to select; may be repeated
    #[arg(short = 'c', long = "category")]
    pub categories: Vec<String>,

    /// Executable for every program, or `PROGRAM=EXECUTABLE` for one
    #[arg(short = 'e', long = "executable")]
    pub executables: Vec<String>,

    /// Job configuration file
    #[arg(long = "jobconfig", default_value = "jobconfig.toml")]
    pub jobconfig: PathBuf,

    /// Override a jobconfig setting
    #[arg(long = "job-option", num_args = 3, value_names = ["SECTION", "OPTION", "VALUE"])]
    pub job_options: Vec<String>,

    /// User configuration file
    #[arg(long = "userconfig", default_value = "userconfig.toml")]
    pub userconfig: PathBuf,

    /// Override a userconfig setting
    #[arg(long = "user-option", num_args = 3, value_names = ["SECTION", "OPTION", "VALUE"])]
    pub user_options: Vec<String>,

    /// Number of tests to run concurrently
    #[arg(short = 'n', long = "nthreads", default_value_t = 1)]
    pub nthreads: usize,

    /// Processors to run each test on (ignored by tests with override_nprocs)
    #[arg(short = 'p', long = "processors")]
    pub processors: Option<usize>,

    /// Processors shared by all concurrently running tests
    #[arg(long = "total-processors")]
    pub total_processors: Option<usize>,

    /// Seconds before a running command is killed
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Submit tests to a queueing system (only PBS is supported)
    #[arg(short = 's', long = "submit")]
    pub submit: Option<String>,

    /// Seconds between queue status checks
    #[arg(long = "poll-interval", default_value_t = 60)]
    pub poll_interval: u64,

    /// File id of the test output; `b:ID` treats benchmark ID as test output
    #[arg(short = 't', long = "test-id")]
    pub test_id: Option<String>,

    /// Benchmark id given to new benchmarks (default: the test id)
    #[arg(long = "new-benchmark")]
    pub new_benchmark: Option<String>,

    /// Make benchmarks even if not every test passed
    #[arg(long = "force")]
    pub force: bool,

    /// Write a JSON report to this file
    #[arg(long = "report-json")]
    pub report_json: Option<PathBuf>,

    /// Print only minimal output
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Cli {
    /// Actions to run, with `run` added when nothing else produces output
    /// to work on.
    pub fn effective_actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();
        for action in &self.actions {
            if !actions.contains(action) {
                actions.push(*action);
            }
        }

        let only_benchmarks = actions.iter().all(|action| *action == Action::MakeBenchmarks);
        if only_benchmarks {
            actions.insert(0, Action::Run);
        }
        actions
    }

    /// Selected categories; `_default_` when running without making
    /// benchmarks, `_all_` otherwise.
    pub fn effective_categories(&self) -> Vec<String> {
        if !self.categories.is_empty() {
            return self.categories.clone();
        }
        let actions = self.effective_actions();
        let running = actions.contains(&Action::Run);
        let category = if running && !actions.contains(&Action::MakeBenchmarks) {
            DEFAULT_CATEGORY
        } else {
            ALL_CATEGORY
        };
        vec![category.to_string()]
    }

    /// `--user-option` values as overrides
    pub fn user_overrides(&self) -> Vec<ConfigOverride> {
        overrides(&self.user_options)
    }

    /// `--job-option` values as overrides
    pub fn job_overrides(&self) -> Vec<ConfigOverride> {
        overrides(&self.job_options)
    }
}

fn overrides(values: &[String]) -> Vec<ConfigOverride> {
    values
        .chunks_exact(3)
        .map(|chunk| ConfigOverride::new(&chunk[0], &chunk[1], &chunk[2]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("testcode").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_is_default_action() {
        let cli = parse(&[]);
        assert_eq!(cli.effective_actions(), vec![Action::Run]);
        assert_eq!(cli.effective_categories(), vec![DEFAULT_CATEGORY]);
    }

    #[test]
    fn test_make_benchmarks_implies_run() {
        let cli = parse(&["make-benchmarks"]);
        assert_eq!(cli.effective_actions(), vec![Action::Run, Action::MakeBenchmarks]);
        assert_eq!(cli.effective_categories(), vec![ALL_CATEGORY]);

        let cli = parse(&["compare", "make-benchmarks"]);
        assert_eq!(cli.effective_actions(), vec![Action::Compare, Action::MakeBenchmarks]);
    }

    #[test]
    fn test_compare_uses_all_category() {
        let cli = parse(&["compare", "-c", "quick", "-c", "slow"]);
        assert_eq!(cli.effective_categories(), vec!["quick", "slow"]);
        assert_eq!(parse(&["diff"]).effective_categories(), vec![ALL_CATEGORY]);
    }

    #[test]
    fn test_option_triples() {
        let cli = parse(&[
            "--user-option", "user", "benchmark", "abc",
            "--job-option", "t1", "nprocs", "2",
            "--job-option", "t2", "nprocs", "4",
        ]);
        assert_eq!(cli.user_overrides(), vec![ConfigOverride::new("user", "benchmark", "abc")]);
        assert_eq!(cli.job_overrides().len(), 2);
        assert_eq!(cli.job_overrides()[1], ConfigOverride::new("t2", "nprocs", "4"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = Cli::try_parse_from(["testcode", "tidy"]);
        assert!(result.is_err());
    }
}
