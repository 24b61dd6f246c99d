//! Test execution: subprocesses, queue submission and output relocation

use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use testcode_core::command::quote;
use testcode_core::filename::{is_glob, matching_files};
use testcode_core::{Error as CoreError, JobCommand, TestSpec};
use tokio::process::Command as TokioCommand;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::analysis::analyse;
use crate::reporting::JobResult;
use crate::session::{RunContext, TestUnit};
use crate::{Result, RunError};

/// Output of a finished shell command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock run time
    pub duration: Duration,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Exit status and standard error, for error messages
    pub fn failure_reason(&self) -> String {
        let status = match self.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by a signal".to_string(),
        };
        match self.stderr.trim() {
            "" => status,
            stderr => format!("{}: {}", status, stderr),
        }
    }
}

/// Kills a shell's whole process group when dropped while armed
struct ProcessGroup {
    id: Option<u32>,
}

impl ProcessGroup {
    fn new(id: Option<u32>) -> Self {
        Self { id }
    }

    /// The shell exited by itself; leave the group alone
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            kill_process_group(id);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(id: u32) {
    let Ok(pgid) = libc::pid_t::try_from(id) else {
        return;
    };
    debug!("Killing process group {}", pgid);
    // SAFETY: killpg only sends a signal to the group created for the shell
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_id: u32) {}

/// Run `command` with `sh -c` in `directory`.
///
/// The shell runs in its own process group. The whole group is killed if
/// `timeout` elapses or the returned future is dropped.
pub async fn run_shell(
    command: &str,
    directory: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    let start_time = Instant::now();
    debug!("Running `{}` in {}", command, directory.display());

    let mut shell = TokioCommand::new("sh");
    shell
        .arg("-c")
        .arg(command)
        .current_dir(directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    shell.process_group(0);
    let child = shell.spawn().map_err(|e| RunError::Subprocess {
        command: command.to_string(),
        reason: format!("failed to spawn: {}", e),
    })?;
    let mut group = ProcessGroup::new(child.id());

    let wait = child.wait_with_output();
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| RunError::Timeout {
            command: command.to_string(),
            seconds: limit.as_secs(),
        })?,
        None => wait.await,
    }
    .map_err(|e| RunError::Subprocess { command: command.to_string(), reason: e.to_string() })?;
    group.disarm();

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        duration: start_time.elapsed(),
    })
}

/// Supported queueing systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueueSystem {
    /// PBS/Torque: `qsub` to submit, `qstat` to poll
    Pbs,
}

impl FromStr for QueueSystem {
    type Err = CoreError;

    fn from_str(name: &str) -> std::result::Result<Self, Self::Err> {
        match name.to_ascii_uppercase().as_str() {
            "PBS" => Ok(Self::Pbs),
            _ => Err(CoreError::Config(format!("Queueing system '{}' is not supported", name))),
        }
    }
}

impl QueueSystem {
    fn submit_program(&self) -> &'static str {
        match self {
            Self::Pbs => "qsub",
        }
    }

    fn status_program(&self) -> &'static str {
        match self {
            Self::Pbs => "qstat",
        }
    }

    /// Submit `script` from `directory` and return the job id
    pub async fn submit(&self, script: &str, directory: &Path) -> Result<String> {
        let command = format!("{} {}", self.submit_program(), quote(script)?);
        let output = run_shell(&command, directory, None).await?;
        if !output.success() {
            return Err(RunError::Queue(format!(
                "`{}` failed: {}",
                command,
                output.failure_reason()
            )));
        }
        let job_id = output.stdout.trim().to_string();
        if job_id.is_empty() {
            return Err(RunError::Queue(format!("`{}` printed no job id", command)));
        }
        info!("Submitted {} as job {}", script, job_id);
        Ok(job_id)
    }

    /// Poll until the queue no longer knows `job_id`, giving up once
    /// `timeout` has passed
    pub async fn wait(
        &self,
        job_id: &str,
        directory: &Path,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let command = format!("{} {}", self.status_program(), quote(job_id)?);
        let polling = async {
            loop {
                tokio::time::sleep(poll_interval).await;
                let output = run_shell(&command, directory, None).await?;
                if !output.success() {
                    debug!("Job {} has left the queue", job_id);
                    return Ok(());
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, polling).await.map_err(|_| {
                RunError::Timeout { command: command.clone(), seconds: limit.as_secs() }
            })?,
            None => polling.await,
        }
    }
}

/// Move files in `directory` matching the output `pattern` into
/// `test.prev.output.<test_id>`. Returns the names that were moved.
pub fn move_old_outputs(directory: &Path, pattern: &str, test_id: &str) -> Result<Vec<String>> {
    let old_files = matching_files(directory, pattern)?;
    if old_files.is_empty() {
        return Ok(old_files);
    }

    let out_dir = directory.join(format!("test.prev.output.{}", test_id));
    warn!(
        "Moving existing files matching output pattern {} ({}) to {}",
        pattern,
        old_files.join(", "),
        out_dir.display()
    );
    fs::create_dir_all(&out_dir)?;
    for name in &old_files {
        let source = directory.join(name);
        let file_name = source
            .file_name()
            .ok_or_else(|| RunError::Output(format!("Cannot move {}", source.display())))?;
        fs::rename(&source, out_dir.join(file_name))?;
    }
    Ok(old_files)
}

/// Move the single file matching `pattern` to `test_file`
pub fn move_output_to_test_file(directory: &Path, pattern: &str, test_file: &str) -> Result<()> {
    let matches = matching_files(directory, pattern)?;
    match matches.as_slice() {
        [output] => {
            fs::rename(directory.join(output), directory.join(test_file))?;
            Ok(())
        }
        _ => Err(RunError::Output(format!(
            "Output pattern ({}) matches {} files ({})",
            pattern,
            matches.len(),
            matches.join(", ")
        ))),
    }
}

/// Runs the jobs of a test and analyses their output
#[derive(Clone)]
pub struct TestExecutor {
    context: Arc<RunContext>,
    processors: Option<Arc<Semaphore>>,
    processor_budget: usize,
}

impl TestExecutor {
    /// Create an executor with no processor budget
    pub fn new(context: Arc<RunContext>) -> Self {
        Self { context, processors: None, processor_budget: 0 }
    }

    /// Limit the processors used by concurrently running jobs; serial jobs
    /// count as one
    pub fn with_processor_budget(mut self, total: usize) -> Self {
        self.processors = Some(Arc::new(Semaphore::new(total)));
        self.processor_budget = total;
        self
    }

    /// Settings shared by every job
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Run every job of a test, then analyse each one.
    ///
    /// `on_result` receives each job's index within the test and its result
    /// as soon as the job is finished.
    pub async fn run_test<F>(&self, unit: &TestUnit, mut on_result: F)
    where
        F: FnMut(usize, JobResult),
    {
        let mut runnable = Vec::new();
        for (index, spec) in unit.test.specs.iter().enumerate() {
            let nprocs = spec.effective_nprocs(self.context.nprocs);
            if spec.accepts_nprocs(nprocs) {
                runnable.push((index, spec, nprocs));
            } else {
                let bounds = match spec.max_nprocs {
                    Some(max) => format!("[{}, {}]", spec.min_nprocs, max),
                    None => format!("[{}, ∞)", spec.min_nprocs),
                };
                debug!("{}: pending -> skipped", spec.describe());
                on_result(
                    index,
                    JobResult::skipped(
                        spec,
                        format!("{} processors is outside the allowed range {}", nprocs, bounds),
                    ),
                );
            }
        }

        if let Some(pattern) = &unit.test.output {
            if let Err(e) = move_old_outputs(&unit.test.directory, pattern, &self.context.test_id) {
                for (index, spec, _) in runnable {
                    on_result(index, JobResult::error(spec, e.to_string()));
                }
                return;
            }
        }

        match self.context.queue {
            Some(queue) => {
                for (index, result) in self.run_queued(unit, queue, &runnable).await {
                    on_result(index, result);
                }
            }
            None => {
                for (index, spec, nprocs) in runnable {
                    on_result(index, self.run_local(unit, spec, nprocs).await);
                }
            }
        }
    }

    /// Analyse existing output of every job of a test; jobs without test
    /// output are skipped
    pub async fn compare_test<F>(&self, unit: &TestUnit, mut on_result: F)
    where
        F: FnMut(usize, JobResult),
    {
        for (index, spec) in unit.test.specs.iter().enumerate() {
            let test_file = self.context.test_file(spec);
            if !spec.directory.join(&test_file).is_file() {
                on_result(index, JobResult::skipped(spec, format!("{} not found", test_file)));
                continue;
            }
            let start_time = Instant::now();
            let result = self.analyse_job(unit, spec, "pending").await;
            on_result(index, result.with_duration(start_time.elapsed()));
        }
    }

    async fn run_local(&self, unit: &TestUnit, spec: &TestSpec, nprocs: usize) -> JobResult {
        let start_time = Instant::now();
        let test_file = self.context.test_file(spec);
        let job = match self.job_command(unit, spec, nprocs) {
            Ok(job) => job,
            Err(e) => return JobResult::error(spec, e.to_string()),
        };

        if let Err(e) = self.execute(spec, &job, &test_file).await {
            debug!("{}: running -> error", spec.describe());
            return JobResult::error(spec, e.to_string())
                .with_command(job.command)
                .with_duration(start_time.elapsed());
        }

        self.analyse_job(unit, spec, "running")
            .await
            .with_command(job.command)
            .with_duration(start_time.elapsed())
    }

    fn job_command(&self, unit: &TestUnit, spec: &TestSpec, nprocs: usize) -> Result<JobCommand> {
        if !spec.input.is_empty() && !spec.directory.join(&spec.input).exists() {
            return Err(RunError::MissingInput(spec.directory.join(&spec.input)));
        }
        let job = unit.program.commands.run(
            &unit.program.exe,
            &spec.args,
            &spec.input,
            &self.context.test_file(spec),
            &self.context.error_file(spec),
            nprocs,
        )?;
        Ok(job)
    }

    async fn execute(&self, spec: &TestSpec, job: &JobCommand, test_file: &str) -> Result<()> {
        let permit = self.acquire_processors(job.nprocs).await?;
        debug!("{}: pending -> running", spec.describe());
        info!("Running test using {} in {}", job.command, spec.directory.display());

        let output = run_shell(&job.command, &spec.directory, self.context.timeout).await?;
        drop(permit);

        if !output.success() {
            return Err(RunError::Subprocess {
                command: job.command.clone(),
                reason: output.failure_reason(),
            });
        }
        if let Some(pattern) = &spec.output {
            move_output_to_test_file(&spec.directory, pattern, test_file)?;
        }
        Ok(())
    }

    async fn acquire_processors(&self, nprocs: usize) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(processors) = &self.processors else {
            return Ok(None);
        };
        let needed = nprocs.max(1);
        let budget_error = || RunError::ProcessorBudget { needed, budget: self.processor_budget };
        if needed > self.processor_budget {
            return Err(budget_error());
        }
        let permits = u32::try_from(needed).map_err(|_| budget_error())?;
        let permit = Arc::clone(processors)
            .acquire_many_owned(permits)
            .await
            .map_err(|_| RunError::Aborted)?;
        Ok(Some(permit))
    }

    /// Submit every runnable job of a test as one queue job
    async fn run_queued(
        &self,
        unit: &TestUnit,
        queue: QueueSystem,
        runnable: &[(usize, &TestSpec, usize)],
    ) -> Vec<(usize, JobResult)> {
        let start_time = Instant::now();
        let mut results = Vec::new();
        let mut submitted = Vec::new();
        let mut commands = Vec::new();
        for &(index, spec, nprocs) in runnable {
            match self.queued_command(unit, spec, nprocs) {
                Ok(command) => {
                    commands.push(command);
                    submitted.push((index, spec));
                }
                Err(e) => results.push((index, JobResult::error(spec, e.to_string()))),
            }
        }
        if submitted.is_empty() {
            return results;
        }

        let script = commands.join("\n");
        if let Err(e) = self.submit_and_wait(unit, queue, &script).await {
            for (index, spec) in submitted {
                let result = JobResult::error(spec, e.to_string()).with_command(script.clone());
                results.push((index, result));
            }
            return results;
        }

        for (index, spec) in submitted {
            let result = self.analyse_job(unit, spec, "running").await;
            results.push((index, result.with_duration(start_time.elapsed())));
        }
        results
    }

    /// Run command followed, if the program writes to a file, by a move of
    /// that file to the test output
    fn queued_command(&self, unit: &TestUnit, spec: &TestSpec, nprocs: usize) -> Result<String> {
        let job = self.job_command(unit, spec, nprocs)?;
        match &spec.output {
            Some(pattern) => {
                // Wildcards are left for the shell to expand
                let output = if is_glob(pattern) { pattern.clone() } else { quote(pattern)? };
                let test_file = quote(&self.context.test_file(spec))?;
                Ok(format!("{}; mv {} {}", job.command, output, test_file))
            }
            None => Ok(job.command),
        }
    }

    async fn submit_and_wait(
        &self,
        unit: &TestUnit,
        queue: QueueSystem,
        commands: &str,
    ) -> Result<()> {
        let script_name = self.write_submit_script(unit, commands)?;
        info!("Submitting {} in {}", script_name, unit.test.directory.display());

        let job_id = queue.submit(&script_name, &unit.test.directory).await?;
        let directory = &unit.test.directory;
        queue.wait(&job_id, directory, self.context.poll_interval, self.context.timeout).await
    }

    /// Write `<template name>.<test id>` into the test directory with the
    /// submit marker replaced by `commands`; returns the script name
    fn write_submit_script(&self, unit: &TestUnit, commands: &str) -> Result<String> {
        let template = unit.program.submit_template.as_ref().ok_or_else(|| {
            CoreError::Config(format!("Program '{}' has no submit_template", unit.program.name))
        })?;
        let template_name =
            template.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
                CoreError::Config(format!("Invalid submit_template {}", template.display()))
            })?;
        let script_name = format!("{}.{}", template_name, self.context.test_id);

        let script = fs::read_to_string(template)?;
        let script = unit.program.commands.submit_script(&script, commands);
        fs::write(unit.test.directory.join(&script_name), script)?;
        Ok(script_name)
    }

    async fn analyse_job(&self, unit: &TestUnit, spec: &TestSpec, from: &str) -> JobResult {
        let Some(benchmark_file) = self.context.benchmark_file(spec) else {
            debug!("{}: {} -> skipped", spec.describe(), from);
            return JobResult::skipped(spec, "No benchmark id set");
        };
        let test_file = self.context.test_file(spec);
        let state = if unit.program.extraction.is_verifier() { "verifying" } else { "extracting" };
        debug!("{}: {} -> {}", spec.describe(), from, state);

        let timeout = self.context.timeout;
        let analysis = analyse(&unit.program, spec, &test_file, &benchmark_file, timeout).await;
        let result = match analysis {
            Ok(analysis) => analysis.into_result(spec),
            Err(e) if e.is_output_failure() => JobResult::failed(spec, e.to_string()),
            Err(e) => JobResult::error(spec, e.to_string()),
        };
        debug!("{}: {} -> {:?}", spec.describe(), state, result.status);
        result
    }
}
