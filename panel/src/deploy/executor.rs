//! Command execution for deployment steps

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::PanelError;
use crate::utils::truncate_chars;

/// Maximum stderr characters carried in a command failure
pub const MAX_STDERR_CHARS: usize = 500;

/// Output stream of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// A command to run inside a project's working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Callback receiving each output line as it is produced
pub type LineSink<'a> = &'a mut (dyn FnMut(OutputStream, &str) + Send);

/// Process-spawning primitive used by the pipeline
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion, streaming every line to `on_line`.
    ///
    /// A non-zero exit is not an error at this level; failing to launch is.
    async fn run(&self, spec: &CommandSpec, on_line: LineSink<'_>)
        -> Result<CommandOutput, PanelError>;
}

/// Run a command and turn a non-zero exit into `CommandFailed`
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
    on_line: LineSink<'_>,
) -> Result<CommandOutput, PanelError> {
    let output = runner.run(spec, on_line).await?;
    if output.is_success() {
        return Ok(output);
    }

    warn!("Command `{}` exited with code {}", spec, output.exit_code);
    Err(PanelError::CommandFailed(format!(
        "{} exited with code {}: {}",
        spec,
        output.exit_code,
        truncate_chars(output.stderr.trim(), MAX_STDERR_CHARS)
    )))
}

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_line: LineSink<'_>,
    ) -> Result<CommandOutput, PanelError> {
        debug!("Running `{}` in {}", spec, spec.working_dir.display());

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PanelError::CommandFailed(format!("Failed to run {}: {}", spec.program, e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PanelError::Internal("child stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PanelError::Internal("child stderr not captured".to_string()))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut output = CommandOutput::default();

        // read_until keeps partial bytes in the buffer when the other branch wins
        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut stdout_buf), if stdout_open => {
                    if read? == 0 {
                        stdout_open = false;
                    }
                    if let Some(line) = take_line(&mut stdout_buf) {
                        on_line(OutputStream::Stdout, &line);
                        output.stdout.push_str(&line);
                        output.stdout.push('\n');
                    }
                }
                read = stderr.read_until(b'\n', &mut stderr_buf), if stderr_open => {
                    if read? == 0 {
                        stderr_open = false;
                    }
                    if let Some(line) = take_line(&mut stderr_buf) {
                        on_line(OutputStream::Stderr, &line);
                        output.stderr.push_str(&line);
                        output.stderr.push('\n');
                    }
                }
            }
        }

        let status = child.wait().await?;
        // Killed by a signal has no code
        output.exit_code = status.code().unwrap_or(-1);

        debug!("`{}` finished with code {}", spec, output.exit_code);
        Ok(output)
    }
}

/// Decode and clear a buffered line. Output is not required to be UTF-8.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    if buf.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(&['\n', '\r'][..])
        .to_string();
    buf.clear();
    Some(line)
}
