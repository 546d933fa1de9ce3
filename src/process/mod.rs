use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Failure modes of a single external process invocation
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} produced more than {limit} bytes of output")]
    BufferExceeded { program: String, limit: usize },

    #[error("{program} exited with code {code:?}: {stderr}")]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProcessError::Timeout { .. })
    }
}

/// A typed command: executable plus argument vector, never a shell string
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            timeout,
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

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Human-readable rendering for logs only
    pub fn display(&self) -> String {
        let mut rendered = self.program.display().to_string();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

/// Captured result of a process that exited zero
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external executables with a timeout and an output cap.
///
/// No retries happen at this layer. Partial files left in the working
/// directory by an interrupted process are the caller's to clean up.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    output_limit: usize,
}

impl ProcessRunner {
    pub fn new(output_limit: usize) -> Self {
        Self { output_limit }
    }

    pub fn output_limit(&self) -> usize {
        self.output_limit
    }

    pub async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
        let program = spec.program_name();
        tracing::debug!(command = %spec.display(), "Running external process");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.output_limit;

        let run = async {
            let (stdout, stderr) = tokio::try_join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit)
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        let outcome = tokio::time::timeout(spec.timeout, run).await;

        let (status, stdout, stderr) = match outcome {
            Err(_) => {
                terminate(&mut child, &program).await;
                return Err(ProcessError::Timeout {
                    program,
                    timeout: spec.timeout,
                });
            }
            Ok(Err(source)) if source.kind() == std::io::ErrorKind::OutOfMemory => {
                terminate(&mut child, &program).await;
                return Err(ProcessError::BufferExceeded { program, limit });
            }
            Ok(Err(source)) => {
                terminate(&mut child, &program).await;
                return Err(ProcessError::Io { program, source });
            }
            Ok(Ok(captured)) => captured,
        };

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();

        if !status.success() {
            return Err(ProcessError::ProcessFailed {
                program,
                code: status.code(),
                stderr: truncate_chars(&stderr, 1000),
            });
        }

        if !stderr.trim().is_empty() {
            tracing::debug!(program = %program, stderr = %stderr.trim(), "Process stderr");
        }

        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Reads a pipe to EOF, failing with `OutOfMemory` once `limit` is exceeded.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };

    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Ok(captured);
        }
        if captured.len() + read > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "output limit exceeded",
            ));
        }
        captured.extend_from_slice(&chunk[..read]);
    }
}

async fn terminate(child: &mut tokio::process::Child, program: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(program = %program, error = %e, "Failed to kill process");
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.trim().chars().take(max).collect()
}
