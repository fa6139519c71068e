//! Invoker - runs stage operations
//!
//! External programs run with the install directory as their working
//! directory (set on the child only), stdio discarded, and an optional
//! timeout after which the child is killed. Functions run on the blocking
//! pool.
//!
//! Containerized runs get a unique `--name` so a timed out stage can stop
//! its container with `<engine> kill`. Killing the engine client alone
//! leaves the container running. A run dropped mid-flight (Ctrl-C) only
//! kills the client; pass `--init` in `execution.container.args` if the
//! image needs signal forwarding.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContainerConfig, StageParam};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::InvokeError;
use crate::operation::{Executable, StageOperation};

/// Grace period for `<engine> kill` after a timeout
const CONTAINER_KILL_TIMEOUT: Duration = Duration::from_secs(10);

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Container name unique within this host process
fn container_name() -> String {
    format!(
        "face-pipeline-{}-{}",
        std::process::id(),
        CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// A child process and, when containerized, the engine and container name
struct ProcessSpec {
    program: OsString,
    args: Vec<OsString>,
    container: Option<(String, String)>,
}

/// Runs stage operations in a fixed environment
#[derive(Debug, Clone)]
pub struct Invoker {
    install_dir: PathBuf,
    container: Option<ContainerConfig>,
    timeout: Option<Duration>,
}

impl Invoker {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            container: None,
            timeout: None,
        }
    }

    /// Run bundled executables through a container engine
    pub fn with_container(mut self, container: Option<ContainerConfig>) -> Self {
        self.container = container;
        self
    }

    /// Kill external processes running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// Program and arguments of an external operation
    fn argv(
        &self,
        executable: &Executable,
        leading_args: &[String],
        params: &[StageParam],
        container_name: Option<&str>,
    ) -> (OsString, Vec<OsString>) {
        let mut args: Vec<OsString> = Vec::new();
        let program = match (executable, &self.container) {
            (Executable::Bundled(name), Some(container)) => {
                args.extend(["run", "--rm"].map(OsString::from));
                if let Some(container_name) = container_name {
                    args.extend(["--name", container_name].map(OsString::from));
                }
                args.extend(container.args.iter().map(OsString::from));
                args.push(OsString::from(&container.image));
                args.push(self.install_dir.join(name).into_os_string());
                OsString::from(&container.engine)
            }
            (Executable::Bundled(name), None) => self.install_dir.join(name).into_os_string(),
            (Executable::System(program), _) => OsString::from(program),
        };
        args.extend(leading_args.iter().map(OsString::from));
        args.extend(params.iter().map(StageParam::as_arg));
        (program, args)
    }

    /// Human-readable command line recorded in sidecars
    pub fn command_line(&self, operation: &StageOperation, params: &[StageParam]) -> String {
        match operation {
            StageOperation::ExternalProcess {
                executable,
                leading_args,
            } => {
                let (program, args) = self.argv(executable, leading_args, params, None);
                std::iter::once(program)
                    .chain(args)
                    .map(|part| part.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            StageOperation::Function { name, .. } => format!("{name}()"),
        }
    }

    /// Run `operation` to completion
    pub async fn invoke(
        &self,
        operation: &StageOperation,
        params: &[StageParam],
    ) -> Result<(), InvokeError> {
        match operation {
            StageOperation::ExternalProcess {
                executable,
                leading_args,
            } => {
                let container = match (executable, &self.container) {
                    (Executable::Bundled(_), Some(config)) => {
                        Some((config.engine.clone(), container_name()))
                    }
                    _ => None,
                };
                let name = container.as_ref().map(|(_, name)| name.as_str());
                let (program, args) = self.argv(executable, leading_args, params, name);
                self.run_process(ProcessSpec {
                    program,
                    args,
                    container,
                })
                .await
            }
            StageOperation::Function { handle, .. } => {
                let handle = Arc::clone(handle);
                let params = params.to_vec();
                match tokio::task::spawn_blocking(move || handle(&params)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(InvokeError::Function(format!("{e:#}"))),
                    Err(_) => Err(InvokeError::Panicked),
                }
            }
        }
    }

    async fn run_process(&self, spec: ProcessSpec) -> Result<(), InvokeError> {
        let ProcessSpec {
            program,
            args,
            container,
        } = spec;
        debug!(program = %program.to_string_lossy(), args = args.len(), "Spawning process");

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&self.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        let status = match self.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(
                            program = %program.to_string_lossy(),
                            timeout_secs = limit.as_secs(),
                            "Process timed out, killing"
                        );
                        if let Err(e) = child.kill().await {
                            warn!(error = %e, "Failed to kill timed out process");
                        }
                        if let Some((engine, name)) = &container {
                            self.kill_container(engine, name).await;
                        }
                        return Err(InvokeError::TimedOut(limit));
                    }
                }
            }
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(InvokeError::ExitStatus { status })
        }
    }

    /// Stop a container whose engine client was killed
    async fn kill_container(&self, engine: &str, name: &str) {
        let killed = Command::new(engine)
            .args(["kill", name])
            .current_dir(&self.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(CONTAINER_KILL_TIMEOUT, killed).await {
            Ok(Ok(status)) if status.success() => {
                debug!(container = name, "Stopped timed out container");
            }
            Ok(Ok(status)) => warn!(container = name, %status, "Container kill failed"),
            Ok(Err(e)) => warn!(container = name, error = %e, "Could not run container kill"),
            Err(_) => warn!(container = name, "Container kill timed out"),
        }
    }
}
