//! Command templates for running, launching, submitting and analysing tests
//!
//! Templates are plain shell text containing `tc.*` placeholders. Substitution
//! is a single left-to-right pass: each recognised placeholder is replaced
//! once and the replacement text is never scanned again, so a file called
//! `tc.input` cannot be expanded twice. Tokens that merely look like
//! placeholders (`tc.unknown`, `tc.programs`) are left untouched.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::{Error, Result};

/// Default run template
pub const DEFAULT_RUN_TEMPLATE: &str = "tc.program tc.args tc.input > tc.output 2> tc.error";

/// Default wrapper applied when a test runs on more than zero processors
pub const DEFAULT_LAUNCH_PARALLEL: &str = "mpirun -np tc.nprocs";

/// Default marker replaced in submit scripts
pub const DEFAULT_SUBMIT_PATTERN: &str = "testcode.run_cmd";

/// Default template for extraction programs
pub const DEFAULT_EXTRACT_TEMPLATE: &str = "tc.extract tc.args tc.file";

/// Default template for verifiers
pub const DEFAULT_VERIFY_TEMPLATE: &str = "tc.extract tc.args tc.test tc.bench";

const PREFIX: &str = "tc.";

/// A recognised template token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Placeholder {
    /// `tc.program`: the test program's executable
    Program,
    /// `tc.args`: arguments for the program or extractor
    Args,
    /// `tc.input`: the input file
    Input,
    /// `tc.output`: file receiving standard output
    Output,
    /// `tc.error`: file receiving standard error
    Error,
    /// `tc.nprocs`: processor count
    Nprocs,
    /// `tc.extract`: extraction program or verifier
    Extract,
    /// `tc.file`: output file to extract from
    File,
    /// `tc.test`: test output file given to a verifier
    Test,
    /// `tc.bench`: benchmark file given to a verifier
    Bench,
}

impl Placeholder {
    /// Every placeholder
    pub const ALL: [Placeholder; 10] = [
        Self::Program,
        Self::Args,
        Self::Input,
        Self::Output,
        Self::Error,
        Self::Nprocs,
        Self::Extract,
        Self::File,
        Self::Test,
        Self::Bench,
    ];

    /// Token as written in templates
    pub fn token(&self) -> &'static str {
        match self {
            Self::Program => "tc.program",
            Self::Args => "tc.args",
            Self::Input => "tc.input",
            Self::Output => "tc.output",
            Self::Error => "tc.error",
            Self::Nprocs => "tc.nprocs",
            Self::Extract => "tc.extract",
            Self::File => "tc.file",
            Self::Test => "tc.test",
            Self::Bench => "tc.bench",
        }
    }

    /// Look up the placeholder written as `token`
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|placeholder| placeholder.token() == token)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Quote `value` for the shell, leaving an empty value empty
pub fn quote(value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| Error::Config(format!("Cannot quote '{}' for the shell: {}", value, e)))
}

/// Values for the placeholders of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: HashMap<Placeholder, String>,
}

impl Substitutions {
    /// No values; every placeholder is left verbatim
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value to be inserted as-is
    pub fn set(mut self, placeholder: Placeholder, value: impl Into<String>) -> Self {
        self.values.insert(placeholder, value.into());
        self
    }

    /// Set a file name or path, quoted for the shell
    pub fn set_quoted(self, placeholder: Placeholder, value: &str) -> Result<Self> {
        Ok(self.set(placeholder, quote(value)?))
    }

    /// Value set for `placeholder`
    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(String::as_str)
    }

    /// Substitute every placeholder with a value in one pass over `template`
    pub fn apply(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut glued_to_previous = false;

        while let Some(start) = rest.find(PREFIX) {
            let (before, candidate) = rest.split_at(start);
            out.push_str(before);

            let end = candidate[PREFIX.len()..]
                .find(|c: char| !is_token_char(c))
                .map_or(candidate.len(), |i| i + PREFIX.len());
            let token = &candidate[..end];

            // `xtc.input` is not a placeholder
            let glued = before.chars().next_back().is_some_and(is_token_char)
                || (before.is_empty() && glued_to_previous);
            let value = if glued {
                None
            } else {
                Placeholder::from_token(token).and_then(|placeholder| self.get(placeholder))
            };

            match value {
                Some(value) => out.push_str(value),
                None => out.push_str(token),
            }
            glued_to_previous = token.ends_with(is_token_char);
            rest = &candidate[end..];
        }

        out.push_str(rest);
        out
    }
}

/// Fully substituted command for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobCommand {
    /// Shell command line
    pub command: String,
    /// Processors requested (0 runs serially)
    pub nprocs: usize,
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)
    }
}

/// Builds run, submit and analysis commands from a program's templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandBuilder {
    run_template: String,
    launch_parallel: String,
    submit_pattern: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_TEMPLATE, DEFAULT_LAUNCH_PARALLEL, DEFAULT_SUBMIT_PATTERN)
    }
}

impl CommandBuilder {
    /// Create a builder from explicit templates
    pub fn new(
        run_template: impl Into<String>,
        launch_parallel: impl Into<String>,
        submit_pattern: impl Into<String>,
    ) -> Self {
        Self {
            run_template: run_template.into(),
            launch_parallel: launch_parallel.into(),
            submit_pattern: submit_pattern.into(),
        }
    }

    /// Run template
    pub fn run_template(&self) -> &str {
        &self.run_template
    }

    /// Build the command running `exe` on one input.
    ///
    /// The run template is substituted first. With `nprocs > 0` the result
    /// is prefixed by the substituted launch-parallel template. Paths are
    /// shell-quoted, `args` is inserted verbatim.
    pub fn run(
        &self,
        exe: &str,
        args: &str,
        input: &str,
        output_file: &str,
        error_file: &str,
        nprocs: usize,
    ) -> Result<JobCommand> {
        let substitutions = Substitutions::new()
            .set_quoted(Placeholder::Program, exe)?
            .set(Placeholder::Args, args)
            .set_quoted(Placeholder::Input, input)?
            .set_quoted(Placeholder::Output, output_file)?
            .set_quoted(Placeholder::Error, error_file)?
            .set(Placeholder::Nprocs, nprocs.to_string());

        let inner = substitutions.apply(&self.run_template);
        let command = if nprocs > 0 && !self.launch_parallel.trim().is_empty() {
            let launcher = substitutions.apply(&self.launch_parallel);
            format!("{} {}", launcher, inner)
        } else {
            inner
        };

        Ok(JobCommand { command, nprocs })
    }

    /// Replace the submit marker in `script` with `commands`; nothing else
    /// in the script is touched.
    pub fn submit_script(&self, script: &str, commands: &str) -> String {
        script.replace(&self.submit_pattern, commands)
    }
}

/// Build the command extracting data from one output file
pub fn extract_command(template: &str, program: &str, args: &str, file: &str) -> Result<String> {
    let substitutions = Substitutions::new()
        .set_quoted(Placeholder::Extract, program)?
        .set(Placeholder::Args, args)
        .set_quoted(Placeholder::File, file)?;
    Ok(substitutions.apply(template))
}

/// Build the command verifying a test output against its benchmark
pub fn verify_command(
    template: &str,
    program: &str,
    args: &str,
    test_file: &str,
    benchmark_file: &str,
) -> Result<String> {
    let substitutions = Substitutions::new()
        .set_quoted(Placeholder::Extract, program)?
        .set(Placeholder::Args, args)
        .set_quoted(Placeholder::Test, test_file)?
        .set_quoted(Placeholder::Bench, benchmark_file)?;
    Ok(substitutions.apply(template))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_run_command() {
        let builder = CommandBuilder::default();
        let job = builder.run("./prog", "-v", "in.dat", "test.out.1", "test.err.1", 0).unwrap();
        assert_eq!(job.command, "./prog -v in.dat > test.out.1 2> test.err.1");
        assert_eq!(job.nprocs, 0);
    }

    #[test]
    fn test_parallel_run_command_is_wrapped() {
        let builder = CommandBuilder::default();
        let job = builder.run("prog", "", "in", "o", "e", 4).unwrap();
        assert_eq!(job.command, "mpirun -np 4 prog  in > o 2> e");
    }

    #[test]
    fn test_paths_are_quoted() {
        let builder = CommandBuilder::default();
        let job = builder.run("my prog", "a b", "in put", "o", "e", 0).unwrap();
        assert_eq!(job.command, "'my prog' a b 'in put' > o 2> e");
    }

    #[test]
    fn test_unknown_tokens_left_verbatim() {
        let subs = Substitutions::new().set(Placeholder::Args, "X");
        assert_eq!(
            subs.apply("tc.argsx tc.unknown tc.args xtc.args tc.args."),
            "tc.argsx tc.unknown X xtc.args X."
        );
    }

    #[test]
    fn test_unset_placeholder_left_verbatim() {
        let subs = Substitutions::new().set(Placeholder::Program, "p");
        assert_eq!(subs.apply("tc.program tc.input"), "p tc.input");
    }

    #[test]
    fn test_single_pass() {
        let subs = Substitutions::new()
            .set(Placeholder::Input, "tc.output")
            .set(Placeholder::Output, "out");
        assert_eq!(subs.apply("tc.input > tc.output"), "tc.output > out");
    }

    #[test]
    fn test_submit_marker_replaced_literally() {
        let builder = CommandBuilder::default();
        let script = "#PBS -l nodes=1\ncd $PBS_O_WORKDIR\ntestcode.run_cmd\n# tc.program\n";
        assert_eq!(
            builder.submit_script(script, "./a > b"),
            "#PBS -l nodes=1\ncd $PBS_O_WORKDIR\n./a > b\n# tc.program\n"
        );
    }

    #[test]
    fn test_extract_and_verify_commands() {
        let cmd =
            extract_command(DEFAULT_EXTRACT_TEMPLATE, "extract.py", "-t", "test.out.x").unwrap();
        assert_eq!(cmd, "extract.py -t test.out.x");

        let cmd = verify_command(DEFAULT_VERIFY_TEMPLATE, "check", "", "t f", "b").unwrap();
        assert_eq!(cmd, "check  't f' b");
    }

    #[test]
    fn test_nul_byte_cannot_be_quoted() {
        assert!(matches!(quote("a\0b"), Err(Error::Config(_))));
    }
}
