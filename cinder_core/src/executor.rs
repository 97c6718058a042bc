use crate::input::Input;
use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Environment variable through which [`CommandExecutor`] hands the child
/// process its per-run coverage dump path.
pub const COVERAGE_FILE_ENV: &str = "CINDER_COVERAGE_FILE";

/// Raw outcome of running the target once.
///
/// This is what the executor reports; deciding whether an outcome counts as a
/// fault is the fault detector's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    Timeout,
    Crash(String),
    Error(String),
}

/// Errors raised while setting a target up, as opposed to outcomes of running
/// it (those are [`ExecutionStatus`] values).
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Global target initialization failed: {0}")]
    GlobalInit(String),
    #[error("Failed to prepare target run: {0}")]
    Initialize(String),
}

/// Knows how to run the system under test against one input.
///
/// `Target` is an opaque per-run handle: created by [`initialize`], consumed
/// by the coverage reader and fault detector for that one run, then dropped.
/// It must never outlive a single queue-entry processing pass.
///
/// [`initialize`]: TargetExecutor::initialize
pub trait TargetExecutor<I: Input>: Send + Sync {
    type Target;

    /// One-time process-wide setup, invoked before any run so that setup work
    /// is not misattributed as covered target code. Implementations should be
    /// idempotent.
    fn global_init(&self) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Prepares a single run for `input` and returns its handle.
    fn initialize(&self, input: &I) -> Result<Self::Target, ExecutorError>;

    /// Executes the prepared run. Called by the fault detector, which
    /// interprets the returned status.
    fn run(&self, target: &mut Self::Target) -> ExecutionStatus;
}

/// Per-run handle of an [`InProcessExecutor`].
#[derive(Debug)]
pub struct InProcessTarget {
    bytes: Vec<u8>,
}

/// Runs a harness closure in the fuzzer's own process, converting panics into
/// [`ExecutionStatus::Crash`].
pub struct InProcessExecutor<H>
where
    H: Fn(&[u8]) + Send + Sync,
{
    harness: H,
    global_init: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<H> InProcessExecutor<H>
where
    H: Fn(&[u8]) + Send + Sync,
{
    pub fn new(harness: H) -> Self {
        Self {
            harness,
            global_init: None,
        }
    }

    /// Registers process-wide setup to run once before fuzzing starts,
    /// e.g. initializing the target library outside coverage collection.
    pub fn with_global_init(mut self, init: impl Fn() + Send + Sync + 'static) -> Self {
        self.global_init = Some(Box::new(init));
        self
    }
}

impl<I, H> TargetExecutor<I> for InProcessExecutor<H>
where
    I: Input + AsRef<[u8]>,
    H: Fn(&[u8]) + Send + Sync,
{
    type Target = InProcessTarget;

    fn global_init(&self) -> Result<(), ExecutorError> {
        if let Some(init) = &self.global_init {
            init();
        }
        Ok(())
    }

    fn initialize(&self, input: &I) -> Result<InProcessTarget, ExecutorError> {
        Ok(InProcessTarget {
            bytes: input.as_ref().to_vec(),
        })
    }

    fn run(&self, target: &mut InProcessTarget) -> ExecutionStatus {
        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.harness)(&target.bytes);
        }));

        match result {
            Ok(()) => ExecutionStatus::Ok,
            Err(payload) => {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        }
    }
}

/// How a [`CommandExecutor`] delivers the input to the child process.
pub enum InputDelivery {
    StdIn,
    /// Argument template; every `{}` is replaced with the input file path.
    File(String),
}

pub struct CommandExecutorConfig {
    pub command: Vec<String>,
    pub input_delivery: InputDelivery,
    pub timeout: Duration,
    pub working_dir: Option<PathBuf>,
}

/// Per-run handle of a [`CommandExecutor`].
///
/// Owns the temp files for this run; dropping the handle at the end of the
/// pipeline pass removes them.
pub struct CommandTarget {
    input: Vec<u8>,
    input_file: Option<tempfile::NamedTempFile>,
    coverage_file: tempfile::NamedTempFile,
}

impl CommandTarget {
    /// Path the child process is told to dump its probe coverage to.
    pub fn coverage_path(&self) -> &Path {
        self.coverage_file.path()
    }
}

/// Runs the target as a subprocess, one spawn per input.
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    fn wait_with_timeout(&self, mut child: Child) -> ExecutionStatus {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return if status.success() {
                        ExecutionStatus::Ok
                    } else if let Some(code) = status.code() {
                        ExecutionStatus::Crash(format!("Exited with code {code}"))
                    } else {
                        #[cfg(unix)]
                        {
                            use std::os::unix::process::ExitStatusExt;
                            if let Some(signal) = status.signal() {
                                return ExecutionStatus::Crash(format!(
                                    "Terminated by signal {signal}"
                                ));
                            }
                        }
                        ExecutionStatus::Crash("Exited abnormally".to_string())
                    };
                }
                Ok(None) => {
                    if start_time.elapsed() > self.config.timeout {
                        if let Err(e) = child.kill() {
                            log::warn!("Failed to kill timed-out child process: {e}");
                            return ExecutionStatus::Error(format!(
                                "Failed to kill timed-out process: {e}"
                            ));
                        }
                        let _ = child.wait();
                        return ExecutionStatus::Timeout;
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return ExecutionStatus::Error(format!("Error waiting for child: {e}"));
                }
            }
        }
    }
}

impl<I> TargetExecutor<I> for CommandExecutor
where
    I: Input + AsRef<[u8]>,
{
    type Target = CommandTarget;

    fn initialize(&self, input: &I) -> Result<CommandTarget, ExecutorError> {
        let coverage_file = tempfile::NamedTempFile::new()
            .map_err(|e| ExecutorError::Initialize(format!("Failed to create temp file: {e}")))?;

        let input_file = match &self.config.input_delivery {
            InputDelivery::StdIn => None,
            InputDelivery::File(_) => {
                let mut file = tempfile::NamedTempFile::new().map_err(|e| {
                    ExecutorError::Initialize(format!("Failed to create temp file: {e}"))
                })?;
                file.write_all(input.as_ref()).map_err(|e| {
                    ExecutorError::Initialize(format!("Failed to write input file: {e}"))
                })?;
                file.flush().map_err(|e| {
                    ExecutorError::Initialize(format!("Failed to flush input file: {e}"))
                })?;
                Some(file)
            }
        };

        Ok(CommandTarget {
            input: input.as_ref().to_vec(),
            input_file,
            coverage_file,
        })
    }

    fn run(&self, target: &mut CommandTarget) -> ExecutionStatus {
        let mut cmd = Command::new(&self.config.command[0]);
        if self.config.command.len() > 1 {
            cmd.args(&self.config.command[1..]);
        }
        if let Some(cwd) = &self.config.working_dir {
            cmd.current_dir(cwd);
        }
        cmd.env(COVERAGE_FILE_ENV, target.coverage_file.path());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        match &self.config.input_delivery {
            InputDelivery::StdIn => {
                cmd.stdin(Stdio::piped());
            }
            InputDelivery::File(arg_template) => {
                let input_path = target
                    .input_file
                    .as_ref()
                    .map(|f| f.path().to_string_lossy().into_owned())
                    .unwrap_or_default();
                let final_arg = arg_template.replace("{}", &input_path);
                for part in final_arg.split_whitespace() {
                    cmd.arg(part);
                }
                cmd.stdin(Stdio::null());
            }
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionStatus::Error(format!(
                    "Failed to spawn command {:?}: {e}",
                    self.config.command
                ));
            }
        };

        if let InputDelivery::StdIn = self.config.input_delivery {
            match child.stdin.take() {
                Some(mut stdin) => {
                    if let Err(e) = stdin.write_all(&target.input) {
                        log::warn!("Error writing to child stdin: {e}. Killing child.");
                        let _ = child.kill();
                        let _ = child.wait();
                        return ExecutionStatus::Error(format!("Failed to write to stdin: {e}"));
                    }
                }
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ExecutionStatus::Error(
                        "Child stdin was not available after piping".to_string(),
                    );
                }
            }
        }

        self.wait_with_timeout(child)
    }
}

/// Prepares and runs one target execution for byte inputs. Test helper; the
/// pipeline is the real call site of this sequence.
#[cfg(test)]
fn exec_bytes<E: TargetExecutor<Vec<u8>>>(executor: &E, input: &[u8]) -> ExecutionStatus {
    let mut target = executor.initialize(&input.to_vec()).unwrap();
    executor.run(&mut target)
}
