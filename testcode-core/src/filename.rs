//! Names of test output, error and benchmark files
//!
//! Every job writes to `STEM.ID[.inp=INPUT][.args=ARGS]` in the test
//! directory, with spaces in the arguments replaced by underscores. The same
//! scheme names benchmarks, so a benchmark can be made by copying a test
//! output and changing its stem and id.

use std::fs;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stem of test output files
pub const TEST_STEM: &str = "test.out";

/// Stem of captured standard error
pub const ERROR_STEM: &str = "test.err";

/// Stem of benchmark files
pub const BENCHMARK_STEM: &str = "benchmark.out";

/// File stems used for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStems {
    /// Stem of the outputs being checked
    pub test: String,
    /// Stem of standard error captures
    pub error: String,
    /// Stem of the reference outputs
    pub benchmark: String,
}

impl Default for FileStems {
    fn default() -> Self {
        Self {
            test: TEST_STEM.to_string(),
            error: ERROR_STEM.to_string(),
            benchmark: BENCHMARK_STEM.to_string(),
        }
    }
}

impl FileStems {
    /// Compare against the outputs of an earlier run rather than benchmarks
    pub fn benchmark_from_test_outputs(mut self) -> Self {
        self.benchmark = self.test.clone();
        self
    }

    /// Treat benchmark files as the outputs under test
    pub fn test_from_benchmarks(mut self) -> Self {
        self.test = self.benchmark.clone();
        self
    }
}

/// Deterministic file name for one job.
///
/// Empty `input` and `args` are omitted from the name.
pub fn output_filename(stem: &str, id: &str, input: &str, args: &str) -> String {
    let mut name = format!("{}.{}", stem, id);
    if !input.is_empty() {
        name.push_str(".inp=");
        name.push_str(input);
    }
    if !args.is_empty() {
        name.push_str(".args=");
        name.push_str(&args.replace(' ', "_"));
    }
    name
}

/// Whether `pattern` contains shell wildcards
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Files in `directory` matching `pattern`, sorted.
///
/// Wildcards may only appear in the last path component; `inputs/*.in`
/// lists `directory/inputs`. Names are returned relative to `directory`.
pub fn matching_files(directory: &Path, pattern: &str) -> Result<Vec<String>> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::Config(format!("Invalid file pattern '{}': {}", pattern, e)))?
        .compile_matcher();

    let parent = Path::new(pattern).parent().filter(|p| !p.as_os_str().is_empty());
    let search = parent.map_or_else(|| directory.to_path_buf(), |p| directory.join(p));
    if !search.is_dir() {
        return Ok(Vec::new());
    }

    let mut matches = Vec::new();
    for entry in fs::read_dir(&search)? {
        let file_name = entry?.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let relative = match parent {
            Some(parent) => parent.join(file_name),
            None => PathBuf::from(file_name),
        };
        if matcher.is_match(&relative) {
            matches.push(relative.to_string_lossy().into_owned());
        }
    }
    matches.sort();
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name() {
        assert_eq!(output_filename(TEST_STEM, "20240101", "", ""), "test.out.20240101");
    }

    #[test]
    fn test_input_and_args() {
        assert_eq!(
            output_filename(BENCHMARK_STEM, "abc", "h2o.in", "-n 4 --fast"),
            "benchmark.out.abc.inp=h2o.in.args=-n_4_--fast"
        );
    }

    #[test]
    fn test_args_without_input() {
        assert_eq!(output_filename(ERROR_STEM, "1", "", "x"), "test.err.1.args=x");
    }

    #[test]
    fn test_matching_files() {
        let dir = tempfile::TempDir::new().unwrap();
        for name in ["run.2.log", "run.1.log", "run.log.bak"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(
            matching_files(dir.path(), "run.*.log").unwrap(),
            vec!["run.1.log", "run.2.log"]
        );
        assert_eq!(matching_files(dir.path(), "run.1.log").unwrap(), vec!["run.1.log"]);
        assert!(matching_files(dir.path(), "missing/*.in").unwrap().is_empty());
        assert!(is_glob("*.in") && !is_glob("h2.in"));
    }

    #[test]
    fn test_stem_swaps() {
        let stems = FileStems::default().benchmark_from_test_outputs();
        assert_eq!(stems.benchmark, TEST_STEM);

        let stems = FileStems::default().test_from_benchmarks();
        assert_eq!(stems.test, BENCHMARK_STEM);
    }
}
