//! Container runtime abstraction.
//!
//! The supervisor drives coding-task containers through this trait; the
//! production implementation speaks to Docker via `bollard`, and
//! [`StubRuntime`] backs tests and Docker-less development.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use swb_domain::error::{Error, Result};

pub type LineStream = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to start one task container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host path bind-mounted at `/workspace` inside the container.
    pub workspace_path: std::path::PathBuf,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Snapshot of a container's liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// An interactive shell attached to a running container.
pub struct ShellHandle {
    /// Bytes written to the shell's stdin.
    pub input: mpsc::Sender<String>,
    /// Shell output chunks.
    pub output: mpsc::Receiver<String>,
    /// Terminal geometry updates `(rows, cols)`.
    pub resize: mpsc::Sender<(u16, u16)>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a container; returns an opaque container ref.
    async fn start(&self, spec: &ContainerSpec) -> Result<String>;

    /// Probe liveness and exit state.
    async fn inspect(&self, container_ref: &str) -> Result<ContainerState>;

    async fn kill(&self, container_ref: &str) -> Result<()>;

    async fn remove(&self, container_ref: &str) -> Result<()>;

    /// Follow stdout+stderr as a stream of lines from the beginning.
    async fn follow_logs(&self, container_ref: &str) -> Result<LineStream>;

    /// Open an interactive shell (PTY) inside a running container.
    async fn open_shell(&self, container_ref: &str, rows: u16, cols: u16) -> Result<ShellHandle>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Docker implementation (bollard)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DockerRuntime {
    docker: bollard::Docker,
}

impl DockerRuntime {
    pub async fn connect() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| Error::Fatal(format!("failed to connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| Error::Fatal(format!("Docker ping failed: {e}")))?;
        tracing::info!("container runtime connected to Docker");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<String> {
        use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let bind = format!("{}:/workspace", spec.workspace_path.display());
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(bollard::service::HostConfig {
                binds: Some(vec![bind]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| Error::Http(format!("failed to create container: {e}")))?;

        self.docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Http(format!("failed to start container: {e}")))?;

        tracing::debug!(container = %spec.name, "container started");
        Ok(spec.name.clone())
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        let info = self
            .docker
            .inspect_container(container_ref, None)
            .await
            .map_err(|e| Error::Http(format!("inspect failed: {e}")))?;
        let state = info.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn kill(&self, container_ref: &str) -> Result<()> {
        self.docker
            .kill_container(
                container_ref,
                None::<bollard::container::KillContainerOptions<String>>,
            )
            .await
            .map_err(|e| Error::Http(format!("kill failed: {e}")))
    }

    async fn remove(&self, container_ref: &str) -> Result<()> {
        self.docker
            .remove_container(
                container_ref,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::Http(format!("remove failed: {e}")))
    }

    async fn follow_logs(&self, container_ref: &str) -> Result<LineStream> {
        use bollard::container::{LogOutput, LogsOptions};

        let stream = self.docker.logs(
            container_ref,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        // Chunks are not line-aligned; re-split on newlines.
        let lines = stream
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                        Some(String::from_utf8_lossy(&message).into_owned())
                    }
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(error = %e, "log stream error");
                        None
                    }
                }
            })
            .flat_map(|chunk| {
                let lines: Vec<String> = chunk
                    .split('\n')
                    .filter(|l| !l.is_empty())
                    .map(|l| l.trim_end_matches('\r').to_string())
                    .collect();
                futures_util::stream::iter(lines)
            });

        Ok(Box::pin(lines))
    }

    async fn open_shell(&self, container_ref: &str, rows: u16, cols: u16) -> Result<ShellHandle> {
        use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
        use tokio::io::AsyncWriteExt;

        let exec = self
            .docker
            .create_exec(
                container_ref,
                CreateExecOptions {
                    cmd: Some(vec!["/bin/bash".to_string()]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::Http(format!("create_exec failed: {e}")))?;

        let exec_id = exec.id.clone();
        let _ = self
            .docker
            .resize_exec(
                &exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await;

        let started = self
            .docker
            .start_exec(&exec_id, None)
            .await
            .map_err(|e| Error::Http(format!("start_exec failed: {e}")))?;

        let StartExecResults::Attached { mut output, mut input } = started else {
            return Err(Error::Http("exec did not attach".into()));
        };

        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);
        let (output_tx, output_rx) = mpsc::channel::<String>(64);
        let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(8);

        // stdin pump
        tokio::spawn(async move {
            while let Some(data) = input_rx.recv().await {
                if input.write_all(data.as_bytes()).await.is_err() {
                    break;
                }
                let _ = input.flush().await;
            }
        });

        // stdout pump
        tokio::spawn(async move {
            while let Some(Ok(chunk)) = output.next().await {
                let text = String::from_utf8_lossy(&chunk.into_bytes()).into_owned();
                if output_tx.send(text).await.is_err() {
                    break;
                }
            }
        });

        // resize pump
        let docker = self.docker.clone();
        tokio::spawn(async move {
            while let Some((rows, cols)) = resize_rx.recv().await {
                let _ = docker
                    .resize_exec(
                        &exec_id,
                        ResizeExecOptions {
                            height: rows,
                            width: cols,
                        },
                    )
                    .await;
            }
        });

        Ok(ShellHandle {
            input: input_tx,
            output: output_rx,
            resize: resize_tx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub implementation (tests, Docker-less development)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct StubContainer {
    state: ContainerState,
    log_lines: Vec<String>,
}

/// In-memory runtime: containers "run" until told to exit, logs come from
/// a scripted list, and the shell echoes its input.
#[derive(Default)]
pub struct StubRuntime {
    containers: Mutex<HashMap<String, StubContainer>>,
    /// Lines every new container emits on its log stream.
    scripted_logs: Mutex<Vec<String>>,
    /// Exit code containers report once `finish` is called.
    fail_start: Mutex<bool>,
}

impl StubRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_logs(&self, lines: Vec<String>) {
        *self.scripted_logs.lock() = lines;
    }

    /// Make the next `start` calls fail (container-start failure path).
    pub fn fail_next_start(&self, fail: bool) {
        *self.fail_start.lock() = fail;
    }

    /// Mark a container as exited.
    pub fn finish(&self, container_ref: &str, exit_code: i64) {
        if let Some(c) = self.containers.lock().get_mut(container_ref) {
            c.state = ContainerState {
                running: false,
                exit_code: Some(exit_code),
            };
        }
    }

    pub fn is_running(&self, container_ref: &str) -> bool {
        self.containers
            .lock()
            .get(container_ref)
            .map(|c| c.state.running)
            .unwrap_or(false)
    }
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<String> {
        if *self.fail_start.lock() {
            return Err(Error::Http("image pull failed".into()));
        }
        let log_lines = self.scripted_logs.lock().clone();
        self.containers.lock().insert(
            spec.name.clone(),
            StubContainer {
                state: ContainerState {
                    running: true,
                    exit_code: None,
                },
                log_lines,
            },
        );
        Ok(spec.name.clone())
    }

    async fn inspect(&self, container_ref: &str) -> Result<ContainerState> {
        self.containers
            .lock()
            .get(container_ref)
            .map(|c| c.state)
            .ok_or_else(|| Error::Permanent(format!("container {container_ref} not found")))
    }

    async fn kill(&self, container_ref: &str) -> Result<()> {
        if let Some(c) = self.containers.lock().get_mut(container_ref) {
            c.state = ContainerState {
                running: false,
                exit_code: Some(137),
            };
        }
        Ok(())
    }

    async fn remove(&self, container_ref: &str) -> Result<()> {
        self.containers.lock().remove(container_ref);
        Ok(())
    }

    async fn follow_logs(&self, container_ref: &str) -> Result<LineStream> {
        let lines = self
            .containers
            .lock()
            .get(container_ref)
            .map(|c| c.log_lines.clone())
            .unwrap_or_default();
        Ok(Box::pin(futures_util::stream::iter(lines)))
    }

    async fn open_shell(&self, _container_ref: &str, _rows: u16, _cols: u16) -> Result<ShellHandle> {
        let (input_tx, mut input_rx) = mpsc::channel::<String>(64);
        let (output_tx, output_rx) = mpsc::channel::<String>(64);
        let (resize_tx, mut resize_rx) = mpsc::channel::<(u16, u16)>(8);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = input_rx.recv() => match data {
                        Some(data) => {
                            if output_tx.send(data).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = resize_rx.recv() => {}
                }
            }
        });
        Ok(ShellHandle {
            input: input_tx,
            output: output_rx,
            resize: resize_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "switchboard/coder:latest".into(),
            workspace_path: "/tmp/ws".into(),
            command: vec!["run".into()],
            env: vec![],
        }
    }

    #[tokio::test]
    async fn stub_lifecycle() {
        let runtime = StubRuntime::new();
        let id = runtime.start(&spec("c1")).await.unwrap();
        assert!(runtime.inspect(&id).await.unwrap().running);

        runtime.finish(&id, 0);
        let state = runtime.inspect(&id).await.unwrap();
        assert!(!state.running);
        assert_eq!(state.exit_code, Some(0));

        runtime.remove(&id).await.unwrap();
        assert!(runtime.inspect(&id).await.is_err());
    }

    #[tokio::test]
    async fn stub_start_failure() {
        let runtime = StubRuntime::new();
        runtime.fail_next_start(true);
        assert!(runtime.start(&spec("c1")).await.is_err());
    }

    #[tokio::test]
    async fn stub_logs_replay_script() {
        let runtime = StubRuntime::new();
        runtime.script_logs(vec!["building".into(), "done".into()]);
        let id = runtime.start(&spec("c1")).await.unwrap();
        let lines: Vec<String> = runtime.follow_logs(&id).await.unwrap().collect().await;
        assert_eq!(lines, vec!["building", "done"]);
    }

    #[tokio::test]
    async fn stub_shell_echoes() {
        let runtime = StubRuntime::new();
        let id = runtime.start(&spec("c1")).await.unwrap();
        let mut shell = runtime.open_shell(&id, 24, 80).await.unwrap();
        shell.input.send("ls\n".into()).await.unwrap();
        assert_eq!(shell.output.recv().await.unwrap(), "ls\n");
    }
}
