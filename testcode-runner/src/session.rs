//! Session state for one invocation
//!
//! Loads both configuration files, settles the test and benchmark ids and
//! resolves the selected categories into the tests to work on.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use log::{debug, info};
use testcode_core::filename::matching_files;
use testcode_core::{
    output_filename, Error as CoreError, Executables, FileStems, JobConfig, Test, TestProgram,
    TestSpec, UserConfig,
};

use crate::cli::{Action, Cli};
use crate::execution::QueueSystem;
use crate::Result;

/// Prefix of `-b` selecting another run's test outputs as benchmarks
const TEST_AS_BENCHMARK: &str = "t:";

/// Prefix of `-t` selecting benchmarks as the outputs under test
const BENCHMARK_AS_TEST: &str = "b:";

/// Settings shared by every job of a run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Id of the test outputs
    pub test_id: String,
    /// Id of the benchmarks; analysis is skipped without one
    pub benchmark: Option<String>,
    /// File stems of test, error and benchmark files
    pub stems: FileStems,
    /// Processor count from the command line
    pub nprocs: Option<usize>,
    /// Limit on each subprocess
    pub timeout: Option<Duration>,
    /// Queueing system to submit to instead of running locally
    pub queue: Option<QueueSystem>,
    /// Interval between queue status checks
    pub poll_interval: Duration,
}

impl RunContext {
    /// Local run with default stems and no limits
    pub fn new(test_id: impl Into<String>, benchmark: Option<String>) -> Self {
        Self {
            test_id: test_id.into(),
            benchmark,
            stems: FileStems::default(),
            nprocs: None,
            timeout: None,
            queue: None,
            poll_interval: Duration::from_secs(60),
        }
    }

    /// Name of the job's test output, relative to its directory
    pub fn test_file(&self, spec: &TestSpec) -> String {
        output_filename(&self.stems.test, &self.test_id, &spec.input, &spec.args)
    }

    /// Name of the job's captured standard error
    pub fn error_file(&self, spec: &TestSpec) -> String {
        output_filename(&self.stems.error, &self.test_id, &spec.input, &spec.args)
    }

    /// Name of the job's benchmark, if a benchmark id is set
    pub fn benchmark_file(&self, spec: &TestSpec) -> Option<String> {
        self.benchmark
            .as_deref()
            .map(|id| output_filename(&self.stems.benchmark, id, &spec.input, &spec.args))
    }
}

/// A selected test together with its program
#[derive(Debug, Clone)]
pub struct TestUnit {
    /// Test and its jobs
    pub test: Test,
    /// Program under test
    pub program: Arc<TestProgram>,
}

/// Global session state for one invocation
pub struct Session {
    /// Actions to perform, in order
    pub actions: Vec<Action>,
    /// Contents of the userconfig
    pub user: UserConfig,
    /// Contents of the jobconfig
    pub jobs: JobConfig,
    /// Selected tests in resolution order
    pub units: Vec<TestUnit>,
    /// Selected categories that could not be expanded
    pub rejected: Vec<CoreError>,
    /// Settings shared by every job
    pub context: Arc<RunContext>,
}

impl Session {
    /// Create a session from the command line
    pub fn new(cli: &Cli) -> Result<Self> {
        let actions = cli.effective_actions();
        let running = actions.contains(&Action::Run);

        let executables = Executables::parse(&cli.executables);
        let user = UserConfig::load(&cli.userconfig, &cli.user_overrides(), &executables)?;
        let jobs = JobConfig::load(&cli.jobconfig, &user, &cli.job_overrides())?;

        let graph = jobs.category_graph()?;
        let selection = graph.resolve_all(&cli.effective_categories())?;
        let rejected: Vec<CoreError> = selection.cycle_errors().collect();
        let names = selection.tests;
        let programs: HashMap<String, Arc<TestProgram>> = user
            .programs
            .iter()
            .map(|(name, program)| (name.clone(), Arc::new(program.clone())))
            .collect();
        let mut units = Vec::with_capacity(names.len());
        for name in &names {
            let test = jobs
                .test(name)
                .ok_or_else(|| CoreError::UnknownCategory(name.clone()))?
                .clone();
            let program = programs
                .get(&test.program)
                .cloned()
                .ok_or_else(|| CoreError::Config(format!("Unknown program '{}'", test.program)))?;
            units.push(TestUnit { test, program });
        }
        debug!("Selected tests: {}", names.join(", "));

        let mut stems = FileStems::default();
        let benchmark = match cli.benchmark.as_deref() {
            Some(id) => match id.strip_prefix(TEST_AS_BENCHMARK) {
                Some(id) => {
                    stems = stems.benchmark_from_test_outputs();
                    Some(id.to_string())
                }
                None => Some(id.to_string()),
            },
            None => user.benchmark.clone(),
        };

        let directories: BTreeSet<&Path> =
            units.iter().map(|unit| unit.test.directory.as_path()).collect();
        let test_id = match cli.test_id.as_deref() {
            Some(id) => match id.strip_prefix(BENCHMARK_AS_TEST) {
                Some(_) if running => {
                    return Err(CoreError::Config(
                        "Benchmarks cannot be used as test output when running tests".to_string(),
                    )
                    .into())
                }
                Some(id) => {
                    stems = stems.test_from_benchmarks();
                    id.to_string()
                }
                None => id.to_string(),
            },
            None if running => new_test_id(&user.date_fmt, &directories, &stems)?,
            None => latest_test_id(&directories, &stems.test)?.ok_or_else(|| {
                CoreError::Config("No test output found; give a test id with -t".to_string())
            })?,
        };
        info!("Test id: {}", test_id);

        let queue = cli.submit.as_deref().map(str::parse::<QueueSystem>).transpose()?;

        let context = RunContext {
            test_id,
            benchmark,
            stems,
            nprocs: cli.processors,
            timeout: cli.timeout.map(Duration::from_secs),
            queue,
            poll_interval: Duration::from_secs(cli.poll_interval),
        };

        Ok(Self { actions, user, jobs, units, rejected, context: Arc::new(context) })
    }
}

/// A date-based id not yet used by any test or error file in `directories`;
/// `-1`, `-2`, ... are appended until one is free.
pub fn new_test_id(
    date_fmt: &str,
    directories: &BTreeSet<&Path>,
    stems: &FileStems,
) -> Result<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(date_fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(CoreError::Config(format!("Invalid date_fmt '{}'", date_fmt)).into());
    }
    let base = Local::now().format_with_items(items.iter()).to_string();

    let mut id = base.clone();
    let mut suffix = 0;
    while id_in_use(&id, directories, stems)? {
        suffix += 1;
        id = format!("{}-{}", base, suffix);
    }
    Ok(id)
}

fn id_in_use(id: &str, directories: &BTreeSet<&Path>, stems: &FileStems) -> Result<bool> {
    for directory in directories {
        for stem in [&stems.test, &stems.error] {
            if !matching_files(directory, &format!("{}.{}*", stem, id))?.is_empty() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Id of the most recently written file with stem `stem` in `directories`
pub fn latest_test_id(directories: &BTreeSet<&Path>, stem: &str) -> Result<Option<String>> {
    let prefix = format!("{}.", stem);
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for directory in directories {
        for name in matching_files(directory, &format!("{}*", prefix))? {
            let path = directory.join(&name);
            let modified = fs::metadata(&path)?.modified()?;
            if latest.as_ref().map_or(true, |(time, _)| modified > *time) {
                latest = Some((modified, path));
            }
        }
    }

    Ok(latest.and_then(|(_, path)| {
        let name = path.file_name()?.to_str()?;
        name.strip_prefix(&prefix).map(id_from_suffix)
    }))
}

fn id_from_suffix(suffix: &str) -> String {
    let end = [".inp=", ".args="]
        .iter()
        .filter_map(|marker| suffix.find(marker))
        .min()
        .unwrap_or(suffix.len());
    suffix[..end].to_string()
}
