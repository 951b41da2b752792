//! Worker subprocess handles
//!
//! Each worker is a child process speaking the line protocol over its
//! stdin/stdout. A reader task forwards every line it receives (and the final
//! end-of-stream) to the pool's event channel, tagged with the slot and
//! generation of the worker that produced it.

use super::protocol::{WorkerRequest, WorkerResponse, decode_line, encode_line};
use crate::error::DispatchError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// How long to wait for a killed worker to be reaped
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Program and arguments used to launch a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// The running executable's hidden `worker` subcommand
    pub fn current_exe() -> Result<Self, DispatchError> {
        let program = std::env::current_exe().map_err(|e| DispatchError::SpawnFailed {
            program: "<current executable>".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(program).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Everything the reader tasks report to the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A well-formed response line
    Message {
        slot: usize,
        generation: u64,
        response: WorkerResponse,
    },
    /// A line that is not a valid response
    Malformed {
        slot: usize,
        generation: u64,
        detail: String,
    },
    /// The worker's stdout closed
    Exited { slot: usize, generation: u64 },
}

impl PoolEvent {
    pub fn origin(&self) -> (usize, u64) {
        match self {
            PoolEvent::Message {
                slot, generation, ..
            }
            | PoolEvent::Malformed {
                slot, generation, ..
            }
            | PoolEvent::Exited { slot, generation } => (*slot, *generation),
        }
    }
}

/// A running worker subprocess
pub struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    reader: JoinHandle<()>,
    pid: u32,
    slot: usize,
    generation: u64,
}

impl WorkerProcess {
    /// Launch a worker and start forwarding its output to `events`
    pub fn spawn(
        command: &WorkerCommand,
        slot: usize,
        generation: u64,
        events: UnboundedSender<PoolEvent>,
    ) -> Result<Self, DispatchError> {
        let spawn_failed = |reason: String| DispatchError::SpawnFailed {
            program: command.program.display().to_string(),
            reason,
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_failed(e.to_string()))?;

        let pid = child.id().unwrap_or(0);
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("stdout not captured".to_string()))?;

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match decode_line::<WorkerResponse>(&line) {
                        Ok(response) => PoolEvent::Message {
                            slot,
                            generation,
                            response,
                        },
                        Err(e) => PoolEvent::Malformed {
                            slot,
                            generation,
                            detail: e.to_string(),
                        },
                    },
                    Ok(None) | Err(_) => {
                        let _ = events.send(PoolEvent::Exited { slot, generation });
                        break;
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        tracing::debug!(slot, generation, pid, "Spawned worker");

        Ok(Self {
            child,
            stdin,
            reader,
            pid,
            slot,
            generation,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Write one request line, giving up after `limit`
    pub async fn send(&mut self, request: &WorkerRequest, limit: Duration) -> Result<(), DispatchError> {
        let line = encode_line(request)?;
        let slot = self.slot;
        let stdin = &mut self.stdin;
        let write = async move {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };

        match tokio::time::timeout(limit, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DispatchError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("worker {} did not accept input within {:?}", slot, limit),
            ))),
        }
    }

    /// Force-terminate the process and reap it
    pub async fn kill(mut self) {
        self.reader.abort();

        if let Err(e) = self.child.start_kill() {
            tracing::debug!(slot = self.slot, pid = self.pid, error = %e, "Worker already gone");
        }

        match tokio::time::timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(slot = self.slot, pid = self.pid, %status, "Worker reaped")
            }
            Ok(Err(e)) => {
                tracing::warn!(slot = self.slot, pid = self.pid, error = %e, "Error waiting for worker")
            }
            Err(_) => {
                tracing::warn!(slot = self.slot, pid = self.pid, "Timeout waiting for worker to exit")
            }
        }
    }
}
