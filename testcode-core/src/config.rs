//! User and job configuration
//!
//! Both files are TOML. The userconfig holds a `[user]` table of global
//! settings and one `[programs.<name>]` table per program under test; the
//! jobconfig holds a `[categories]` table and one `[tests.<name>]` table per
//! test. Command-line overrides are applied to the parsed TOML before it is
//! turned into typed records, so an override goes through the same
//! validation as a value written in the file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::category::CategoryGraph;
use crate::command::{CommandBuilder, DEFAULT_EXTRACT_TEMPLATE, DEFAULT_VERIFY_TEMPLATE};
use crate::command::{DEFAULT_LAUNCH_PARALLEL, DEFAULT_RUN_TEMPLATE, DEFAULT_SUBMIT_PATTERN};
use crate::error::{Error, Result};
use crate::extract::{ExtractFormat, ExtractionMode};
use crate::filename::{is_glob, matching_files};
use crate::tolerance::{Tolerance, ToleranceSpec, ToleranceTable};

const DEFAULT_DATE_FMT: &str = "%d%m%Y";
const DEFAULT_DIFF: &str = "diff";
const DEFAULT_TOLERANCE: f64 = 1e-10;

/// A `SECTION OPTION VALUE` override from the command line.
///
/// `VALUE` is read as a TOML value when it parses as one (`4`, `true`,
/// `["a;1e-3;"]`) and as a plain string otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverride {
    /// Section name: `user`/`categories` or a program/test name
    pub section: String,
    /// Option within the section
    pub option: String,
    /// Raw value
    pub value: String,
}

impl ConfigOverride {
    /// Create an override
    pub fn new(
        section: impl Into<String>,
        option: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self { section: section.into(), option: option.into(), value: value.into() }
    }

    /// Build from the three values given to a command-line flag
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self> {
        match parts {
            [section, option, value] => {
                Ok(Self::new(section.as_ref(), option.as_ref(), value.as_ref()))
            }
            _ => Err(Error::Config(format!(
                "Expected SECTION OPTION VALUE, got {} values",
                parts.len()
            ))),
        }
    }

    fn parsed_value(&self) -> toml::Value {
        toml::from_str::<toml::Table>(&format!("value = {}", self.value))
            .ok()
            .and_then(|mut table| table.remove("value"))
            .unwrap_or_else(|| toml::Value::String(self.value.clone()))
    }

    /// Set the option in `root`. `top_level` names the section stored at the
    /// root of the file; every other section lives under `nested`.
    fn apply(&self, root: &mut toml::Table, top_level: &str, nested: &str) -> Result<()> {
        let section = if self.section == top_level {
            table_entry(root, top_level)?
        } else {
            let parent = table_entry(root, nested)?;
            table_entry(parent, &self.section)?
        };
        debug!("Override {}.{} = {}", self.section, self.option, self.value);
        section.insert(self.option.clone(), self.parsed_value());
        Ok(())
    }
}

fn table_entry<'a>(table: &'a mut toml::Table, key: &str) -> Result<&'a mut toml::Table> {
    table
        .entry(key.to_string())
        .or_insert_with(|| toml::Value::Table(toml::Table::new()))
        .as_table_mut()
        .ok_or_else(|| Error::Config(format!("'{}' is not a table", key)))
}

/// Executables chosen on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Executables {
    all: Option<String>,
    per_program: HashMap<String, String>,
}

impl Executables {
    /// Parse `PATH` (every program) and `PROGRAM=PATH` entries
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut executables = Self::default();
        for entry in entries {
            match entry.as_ref().split_once('=') {
                Some((program, path)) => {
                    executables.per_program.insert(program.to_string(), path.to_string());
                }
                None => executables.all = Some(entry.as_ref().to_string()),
            }
        }
        executables
    }

    /// Executable chosen for `program`, if any
    pub fn for_program(&self, program: &str) -> Option<&str> {
        self.per_program.get(program).or(self.all.as_ref()).map(String::as_str)
    }
}

/// One input file and the arguments passed alongside it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawInputArgs")]
pub struct InputArgs {
    /// Input file or glob pattern; empty for none
    pub input: String,
    /// Arguments; empty for none
    pub args: String,
}

impl InputArgs {
    /// Pair an input with arguments
    pub fn new(input: impl Into<String>, args: impl Into<String>) -> Self {
        Self { input: input.into(), args: args.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawInputArgs {
    Input(String),
    Pair(String, String),
    Single((String,)),
    Table {
        #[serde(default)]
        input: String,
        #[serde(default)]
        args: String,
    },
}

impl From<RawInputArgs> for InputArgs {
    fn from(raw: RawInputArgs) -> Self {
        match raw {
            RawInputArgs::Input(input) | RawInputArgs::Single((input,)) => Self::new(input, ""),
            RawInputArgs::Pair(input, args) | RawInputArgs::Table { input, args } => {
                Self::new(input, args)
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Names {
    Spaced(String),
    List(Vec<String>),
}

impl Names {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Spaced(names) => names.split_whitespace().map(str::to_string).collect(),
            Self::List(names) => names,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUserConfig {
    user: RawUserSection,
    #[serde(default)]
    programs: BTreeMap<String, RawProgram>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUserSection {
    benchmark: Option<Names>,
    date_fmt: Option<String>,
    diff: Option<String>,
    tolerance: Option<Vec<ToleranceSpec>>,
    default_program: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProgram {
    exe: Option<String>,
    #[serde(default)]
    executables: BTreeMap<String, String>,
    run_cmd_template: Option<String>,
    launch_parallel: Option<String>,
    submit_template: Option<PathBuf>,
    submit_pattern: Option<String>,
    data_tag: Option<String>,
    extract_program: Option<String>,
    #[serde(default)]
    extract_args: String,
    extract_cmd_template: Option<String>,
    #[serde(default)]
    extract_fmt: ExtractFormat,
    #[serde(default)]
    verify: bool,
    #[serde(default)]
    ignore_fields: Vec<String>,
    #[serde(default)]
    tolerance: Vec<ToleranceSpec>,
    #[serde(default)]
    inputs_args: Vec<InputArgs>,
    output: Option<String>,
    #[serde(default)]
    nprocs: usize,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
    program: Option<String>,
    path: Option<PathBuf>,
    inputs_args: Option<Vec<InputArgs>>,
    output: Option<String>,
    nprocs: Option<usize>,
    #[serde(default)]
    min_nprocs: usize,
    max_nprocs: Option<usize>,
    #[serde(default)]
    override_nprocs: bool,
    #[serde(default)]
    tolerance: Vec<ToleranceSpec>,
    #[serde(default)]
    ignore_fields: Vec<String>,
}

/// A program under test and how its output is analysed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestProgram {
    /// Name of the `[programs.<name>]` table
    pub name: String,
    /// Executable, after command-line selection and expansion
    pub exe: String,
    /// Run, launch-parallel and submit templates
    pub commands: CommandBuilder,
    /// Submit script template, relative to the userconfig directory
    pub submit_template: Option<PathBuf>,
    /// Extraction strategy
    pub extraction: ExtractionMode,
    /// Fields never judged
    pub ignore_fields: Vec<String>,
    /// User tolerances followed by program tolerances
    pub tolerances: Vec<ToleranceSpec>,
    /// Default inputs for tests of this program
    pub inputs_args: Vec<InputArgs>,
    /// Default output file pattern
    pub output: Option<String>,
    /// Default processor count
    pub nprocs: usize,
}

impl TestProgram {
    fn resolve(
        name: &str,
        raw: RawProgram,
        user_tolerances: &[ToleranceSpec],
        executables: &Executables,
        base_dir: &Path,
    ) -> Result<Self> {
        let chosen = executables
            .for_program(name)
            .map(str::to_string)
            .or_else(|| raw.exe.clone())
            .ok_or_else(|| Error::Config(format!("Program '{}' has no exe", name)))?;
        // A name from the executables table stands for the path it maps to
        let exe = raw.executables.get(&chosen).cloned().unwrap_or(chosen);

        let extraction = extraction_mode(name, &raw)?;
        let commands = CommandBuilder::new(
            raw.run_cmd_template.unwrap_or_else(|| DEFAULT_RUN_TEMPLATE.to_string()),
            raw.launch_parallel.unwrap_or_else(|| DEFAULT_LAUNCH_PARALLEL.to_string()),
            raw.submit_pattern.unwrap_or_else(|| DEFAULT_SUBMIT_PATTERN.to_string()),
        );

        let mut tolerances = user_tolerances.to_vec();
        tolerances.extend(raw.tolerance);

        debug!("Program {}: exe {}, {} extraction", name, exe, extraction.name());

        Ok(Self {
            name: name.to_string(),
            exe,
            commands,
            submit_template: raw.submit_template.map(|template| base_dir.join(template)),
            extraction,
            ignore_fields: raw.ignore_fields,
            tolerances,
            inputs_args: raw.inputs_args,
            output: raw.output,
            nprocs: raw.nprocs,
        })
    }
}

fn extraction_mode(name: &str, raw: &RawProgram) -> Result<ExtractionMode> {
    if raw.verify {
        let program = raw.extract_program.clone().ok_or_else(|| {
            Error::Config(format!("Program '{}' sets verify but has no extract_program", name))
        })?;
        return Ok(ExtractionMode::Verify {
            program,
            args: raw.extract_args.clone(),
            template: raw
                .extract_cmd_template
                .clone()
                .unwrap_or_else(|| DEFAULT_VERIFY_TEMPLATE.to_string()),
        });
    }
    if let Some(tag) = &raw.data_tag {
        return Ok(ExtractionMode::Tag { tag: tag.clone() });
    }
    if let Some(program) = &raw.extract_program {
        return Ok(ExtractionMode::Program {
            program: program.clone(),
            args: raw.extract_args.clone(),
            template: raw
                .extract_cmd_template
                .clone()
                .unwrap_or_else(|| DEFAULT_EXTRACT_TEMPLATE.to_string()),
            format: raw.extract_fmt,
        });
    }
    Err(Error::Config(format!(
        "Program '{}' needs one of data_tag, extract_program or verify",
        name
    )))
}

/// Contents of the userconfig file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserConfig {
    /// File the configuration was read from
    pub path: PathBuf,
    /// Benchmark id, several ids joined with `-`
    pub benchmark: Option<String>,
    /// `chrono` format of date-based test ids
    pub date_fmt: String,
    /// Program used by the diff action
    pub diff: String,
    /// Program used by tests that do not name one
    pub default_program: Option<String>,
    /// Programs under test, by name
    pub programs: BTreeMap<String, TestProgram>,
}

impl UserConfig {
    /// Read and resolve a userconfig file
    pub fn load(
        path: impl AsRef<Path>,
        overrides: &[ConfigOverride],
        executables: &Executables,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = read_config(path)?;
        Self::parse(&text, path, overrides, executables)
    }

    /// Resolve userconfig `text` as if read from `path`
    pub fn parse(
        text: &str,
        path: &Path,
        overrides: &[ConfigOverride],
        executables: &Executables,
    ) -> Result<Self> {
        let mut root: toml::Table = toml::from_str(text).map_err(|e| parse_error(path, e))?;
        for config_override in overrides {
            config_override.apply(&mut root, "user", "programs")?;
        }
        let raw: RawUserConfig =
            toml::Value::Table(root).try_into().map_err(|e| parse_error(path, e))?;

        if raw.programs.is_empty() {
            return Err(Error::Config(format!("No programs defined in {}", path.display())));
        }

        let user_tolerances = match raw.user.tolerance {
            Some(specs) => specs,
            None => vec![ToleranceSpec::default_for_all(Tolerance::absolute(DEFAULT_TOLERANCE)?)],
        };

        let base_dir = config_dir(path);
        let mut programs = BTreeMap::new();
        for (name, program) in raw.programs {
            let program =
                TestProgram::resolve(&name, program, &user_tolerances, executables, &base_dir)?;
            programs.insert(name, program);
        }

        let default_program = match raw.user.default_program {
            Some(name) if !programs.contains_key(&name) => {
                return Err(Error::Config(format!("Default program '{}' is not defined", name)))
            }
            Some(name) => Some(name),
            None if programs.len() == 1 => programs.keys().next().cloned(),
            None => None,
        };

        Ok(Self {
            path: path.to_path_buf(),
            benchmark: raw.user.benchmark.map(|ids| ids.into_vec().join("-")),
            date_fmt: raw.user.date_fmt.unwrap_or_else(|| DEFAULT_DATE_FMT.to_string()),
            diff: raw.user.diff.unwrap_or_else(|| DEFAULT_DIFF.to_string()),
            default_program,
            programs,
        })
    }

    /// Look up a program by name
    pub fn program(&self, name: &str) -> Result<&TestProgram> {
        self.programs
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unknown program '{}'", name)))
    }

    /// Rewrite `[user].benchmark` in the userconfig file at `path`
    pub fn set_benchmark(path: impl AsRef<Path>, benchmark: &str) -> Result<()> {
        let path = path.as_ref();
        let mut root: toml::Table =
            toml::from_str(&read_config(path)?).map_err(|e| parse_error(path, e))?;
        table_entry(&mut root, "user")?
            .insert("benchmark".to_string(), toml::Value::String(benchmark.to_string()));
        let text = toml::to_string_pretty(&root)
            .map_err(|e| Error::Config(format!("Cannot write {}: {}", path.display(), e)))?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// One job: a test program run on one input with one set of arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestSpec {
    /// Test this job belongs to
    pub test: String,
    /// Program that runs it
    pub program: String,
    /// Working directory
    pub directory: PathBuf,
    /// Input file relative to `directory`; empty for none
    pub input: String,
    /// Program arguments; empty for none
    pub args: String,
    /// Processors requested
    pub nprocs: usize,
    /// Fewest processors the test may run on
    pub min_nprocs: usize,
    /// Most processors the test may run on
    pub max_nprocs: Option<usize>,
    /// Ignore the command-line processor count
    pub override_nprocs: bool,
    /// File (or glob) the program writes instead of standard output
    pub output: Option<String>,
    /// Layered tolerances
    pub tolerances: ToleranceTable,
    /// Fields never judged
    pub ignore_fields: Vec<String>,
}

impl TestSpec {
    /// Processor count after a command-line override
    pub fn effective_nprocs(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(nprocs) if !self.override_nprocs => nprocs,
            _ => self.nprocs,
        }
    }

    /// Whether `nprocs` lies within this job's bounds
    pub fn accepts_nprocs(&self, nprocs: usize) -> bool {
        nprocs >= self.min_nprocs && self.max_nprocs.map_or(true, |max| nprocs <= max)
    }

    /// Short description used in logs and reports
    pub fn describe(&self) -> String {
        match (self.input.is_empty(), self.args.is_empty()) {
            (true, true) => self.test.clone(),
            (false, true) => format!("{} [{}]", self.test, self.input),
            (true, false) => format!("{} [args: {}]", self.test, self.args),
            (false, false) => format!("{} [{}, args: {}]", self.test, self.input, self.args),
        }
    }
}

/// A configured test and the jobs it expands into
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Test {
    /// Name of the `[tests.<name>]` table
    pub name: String,
    /// Program under test
    pub program: String,
    /// Working directory of every job
    pub directory: PathBuf,
    /// Output file pattern, if the program does not write to standard output
    pub output: Option<String>,
    /// One job per expanded input
    pub specs: Vec<TestSpec>,
}

impl Test {
    fn resolve(name: String, raw: RawTest, user: &UserConfig, base_dir: &Path) -> Result<Self> {
        let program_name = raw.program.or_else(|| user.default_program.clone()).ok_or_else(|| {
            Error::Config(format!(
                "Test '{}' does not name a program and there is no default program",
                name
            ))
        })?;
        let program = user.program(&program_name)?;

        let directory = base_dir.join(raw.path.unwrap_or_else(|| PathBuf::from(&name)));
        if !directory.is_dir() {
            return Err(Error::Config(format!(
                "Directory {} of test '{}' does not exist",
                directory.display(),
                name
            )));
        }

        let mut tolerances = ToleranceTable::from_specs(&program.tolerances);
        tolerances.extend(&raw.tolerance);

        let mut ignore_fields = program.ignore_fields.clone();
        ignore_fields.extend(raw.ignore_fields);

        let output = raw.output.or_else(|| program.output.clone());
        let inputs_args = raw.inputs_args.unwrap_or_else(|| program.inputs_args.clone());

        let jobs = if inputs_args.is_empty() {
            vec![InputArgs::default()]
        } else {
            let mut jobs = Vec::new();
            for entry in &inputs_args {
                let inputs = expand_input(&directory, &entry.input)?;
                if inputs.is_empty() {
                    warn!("Input pattern '{}' of test '{}' matches no files", entry.input, name);
                }
                jobs.extend(inputs.into_iter().map(|input| InputArgs::new(input, &entry.args)));
            }
            jobs
        };

        let specs = jobs
            .into_iter()
            .map(|job| TestSpec {
                test: name.clone(),
                program: program_name.clone(),
                directory: directory.clone(),
                input: job.input,
                args: job.args,
                nprocs: raw.nprocs.unwrap_or(program.nprocs),
                min_nprocs: raw.min_nprocs,
                max_nprocs: raw.max_nprocs,
                override_nprocs: raw.override_nprocs,
                output: output.clone(),
                tolerances: tolerances.clone(),
                ignore_fields: ignore_fields.clone(),
            })
            .collect();

        Ok(Self { name, program: program_name, directory, output, specs })
    }
}

/// Expand a wildcard in `pattern` against the files in `directory`. Literal
/// names are kept whether or not they exist.
fn expand_input(directory: &Path, pattern: &str) -> Result<Vec<String>> {
    if is_glob(pattern) {
        matching_files(directory, pattern)
    } else {
        Ok(vec![pattern.to_string()])
    }
}

/// Contents of the jobconfig file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobConfig {
    /// File the configuration was read from
    pub path: PathBuf,
    /// Tests in definition order
    pub tests: Vec<Test>,
    /// Configured categories and their members
    pub categories: BTreeMap<String, Vec<String>>,
}

impl JobConfig {
    /// Read and resolve a jobconfig file
    pub fn load(
        path: impl AsRef<Path>,
        user: &UserConfig,
        overrides: &[ConfigOverride],
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = read_config(path)?;
        Self::parse(&text, path, user, overrides)
    }

    /// Resolve jobconfig `text` as if read from `path`; test directories are
    /// relative to the directory containing `path`.
    pub fn parse(
        text: &str,
        path: &Path,
        user: &UserConfig,
        overrides: &[ConfigOverride],
    ) -> Result<Self> {
        let mut root: toml::Table = toml::from_str(text).map_err(|e| parse_error(path, e))?;
        for config_override in overrides {
            config_override.apply(&mut root, "categories", "tests")?;
        }

        let categories = match root.remove("categories") {
            Some(value) => value
                .try_into::<BTreeMap<String, Names>>()
                .map_err(|e| parse_error(path, e))?
                .into_iter()
                .map(|(name, members)| (name, members.into_vec()))
                .collect(),
            None => BTreeMap::new(),
        };

        let tests_table = match root.remove("tests") {
            Some(toml::Value::Table(table)) => table,
            Some(_) => return Err(Error::Config("'tests' must be a table of tests".to_string())),
            None => toml::Table::new(),
        };
        if let Some(section) = root.keys().next() {
            return Err(Error::Config(format!(
                "Unknown section '{}' in {}",
                section,
                path.display()
            )));
        }

        let base_dir = config_dir(path);
        let mut tests = Vec::with_capacity(tests_table.len());
        for (name, value) in tests_table {
            let raw: RawTest = value.try_into().map_err(|e| parse_error(path, e))?;
            tests.push(Test::resolve(name, raw, user, &base_dir)?);
        }

        debug!("Loaded {} tests and {} categories", tests.len(), categories.len());
        Ok(Self { path: path.to_path_buf(), tests, categories })
    }

    /// Graph of the configured categories over the configured tests
    pub fn category_graph(&self) -> Result<CategoryGraph> {
        CategoryGraph::new(self.tests.iter().map(|test| test.name.as_str()), &self.categories)
    }

    /// Look up a test by name
    pub fn test(&self, name: &str) -> Option<&Test> {
        self.tests.iter().find(|test| test.name == name)
    }
}

fn read_config(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|source| Error::ReadConfig { path: path.to_path_buf(), source })
}

fn parse_error(path: &Path, source: toml::de::Error) -> Error {
    Error::ParseConfig { path: path.to_path_buf(), source }
}

fn config_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}
