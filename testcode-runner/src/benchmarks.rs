//! Creation of new benchmarks from test output

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};
use serde::Serialize;
use testcode_core::{output_filename, FileStems, UserConfig};

use crate::reporting::TestReport;
use crate::session::Session;
use crate::{Result, RunError};

/// Benchmarks written by [`make_benchmarks`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BenchmarkSet {
    /// Id of the new benchmarks
    pub benchmark: String,
    /// Benchmark files written
    pub created: Vec<PathBuf>,
    /// Test outputs that did not exist
    pub missing: Vec<PathBuf>,
    /// Files written by the run, saved under [`DATA_DIR`]
    pub data_files: Vec<PathBuf>,
}

/// Directory in each test directory keeping files written by the run that
/// produced the benchmarks
pub const DATA_DIR: &str = "testcode_data";

/// File modification times come from a coarse clock and may trail the
/// system time by up to a scheduler tick
const MTIME_SLACK: Duration = Duration::from_millis(20);

/// Copy every selected job's test output to a benchmark named `benchmark`
/// and make it the userconfig's benchmark.
///
/// Unless `force` is set, this is refused when `report` is missing, was
/// interrupted, or has a failed or errored job. With `copy_files_since`,
/// every file in a test directory modified since then is also copied into
/// its [`DATA_DIR`].
pub fn make_benchmarks(
    session: &Session,
    report: Option<&TestReport>,
    benchmark: &str,
    force: bool,
    copy_files_since: Option<SystemTime>,
) -> Result<BenchmarkSet> {
    if !force {
        let refusal = match report {
            None => Some("the test outputs have not been checked"),
            Some(report) if report.aborted => Some("the run was interrupted"),
            Some(report) if !report.statistics.all_passed() => Some("not all tests passed"),
            Some(_) => None,
        };
        if let Some(reason) = refusal {
            return Err(RunError::BenchmarksRefused(format!("{}; use --force", reason)));
        }
    }

    let stem = FileStems::default().benchmark;
    let mut set = BenchmarkSet { benchmark: benchmark.to_string(), ..BenchmarkSet::default() };
    for unit in &session.units {
        for spec in &unit.test.specs {
            let test_file = spec.directory.join(session.context.test_file(spec));
            if !test_file.is_file() {
                warn!("No test output {}; no benchmark made", test_file.display());
                set.missing.push(test_file);
                continue;
            }
            let bench_file =
                spec.directory.join(output_filename(&stem, benchmark, &spec.input, &spec.args));
            fs::copy(&test_file, &bench_file)?;
            set.created.push(bench_file);
        }
    }

    if let Some(since) = copy_files_since {
        let directories: BTreeSet<&Path> =
            session.units.iter().map(|unit| unit.test.directory.as_path()).collect();
        for directory in directories {
            set.data_files.extend(copy_files_since_time(directory, since)?);
        }
    }

    info!("Setting new benchmark in {} to be {}", session.user.path.display(), benchmark);
    UserConfig::set_benchmark(&session.user.path, benchmark)?;
    Ok(set)
}

/// Copy regular files in `directory` modified at or after `since` into its
/// data directory, replacing older copies
fn copy_files_since_time(directory: &Path, since: SystemTime) -> Result<Vec<PathBuf>> {
    let data_dir = directory.join(DATA_DIR);
    fs::create_dir_all(&data_dir)?;
    let since = since.checked_sub(MTIME_SLACK).unwrap_or(since);

    let mut copied = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() || metadata.modified()? < since {
            continue;
        }
        let target = data_dir.join(entry.file_name());
        fs::copy(entry.path(), &target)?;
        copied.push(target);
    }
    copied.sort();
    debug!("Saved {} data files in {}", copied.len(), data_dir.display());
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_only_files_written_since_are_copied() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("input.in"), "old").unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let since = SystemTime::now();
        std::thread::sleep(Duration::from_millis(100));
        fs::write(dir.path().join("density.dat"), "new").unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let copied = copy_files_since_time(dir.path(), since).unwrap();
        assert_eq!(copied, vec![dir.path().join(DATA_DIR).join("density.dat")]);
        assert_eq!(fs::read_to_string(&copied[0]).unwrap(), "new");

        fs::write(dir.path().join("density.dat"), "newer").unwrap();
        copy_files_since_time(dir.path(), since).unwrap();
        assert_eq!(fs::read_to_string(&copied[0]).unwrap(), "newer");
    }
}
