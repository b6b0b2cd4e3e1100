//! Process nodes: external programs inside a pipeline
//!
//! A process node spawns its program when the graph is built and adapts
//! the program's byte pipes to value streams. Three activities run
//! concurrently:
//!
//! - a writer task encodes input values as lines on the program's stdin and
//!   closes stdin when the input ends
//! - a capture task collects stderr, up to a configured limit
//! - the node task itself decodes stdout lines and sends them downstream
//!
//! When the program exits, the output stream is closed normally for exit
//! code zero and with a [`PipelineError::ProcessExit`] otherwise.

pub mod wire;

use crate::core::config::EngineConfig;
use crate::core::env::Environment;
use crate::core::error::{NodeRef, PipelineError};
use crate::core::state::{NodeExit, NodeState, NodeSummary};
use crate::core::stream::{StreamError, StreamReceiver, StreamSender};
use crate::core::template::ProcessSpec;
use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wire::{line_text, LineCodec, DEFAULT_SEPARATOR};

/// A spawned external program waiting to be wired into a graph
#[derive(Debug)]
pub struct ProcessNode {
    node: NodeRef,
    program: String,
    child: Child,
    codec: LineCodec,
    stderr_limit: usize,
    kill_grace: Duration,
}

/// How the stdin writer finished
#[derive(Debug)]
enum Feed {
    /// Input ended, or the program stopped reading
    Finished,
    Upstream(PipelineError),
    Cancelled,
    Failed(String),
}

/// How the stdout reader finished
#[derive(Debug)]
enum Drain {
    Eof,
    Downstream,
    Cancelled,
    ReadFailed(String),
    Protocol(String),
}

/// A resolved command line that has not been started yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    program: String,
    args: Vec<String>,
    separator: String,
}

impl ProcessCommand {
    /// Resolve the program and its arguments against the environment
    ///
    /// An unresolvable argument is a construction error naming the node.
    pub fn resolve(
        node: &NodeRef,
        spec: &ProcessSpec,
        env: &dyn Environment,
    ) -> Result<Self, PipelineError> {
        let construction = |reason: String| PipelineError::Construction {
            node: node.clone(),
            reason,
        };

        let program = spec.program.resolve(env).map_err(construction)?.to_text();
        let args = spec
            .args
            .iter()
            .map(|arg| arg.resolve(env).map(|value| value.to_text()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(construction)?;
        let separator = spec
            .separator
            .clone()
            .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string());

        Ok(Self {
            program,
            args,
            separator,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl ProcessNode {
    /// Resolve the command and spawn it in one step
    pub fn spawn(
        node: NodeRef,
        spec: &ProcessSpec,
        env: &dyn Environment,
        config: &EngineConfig,
    ) -> Result<Self, PipelineError> {
        let command = ProcessCommand::resolve(&node, spec, env)?;
        Self::start(node, command, config)
    }

    /// Spawn a resolved command with piped stdio
    ///
    /// A program that cannot be started is a construction error naming it.
    pub fn start(
        node: NodeRef,
        command: ProcessCommand,
        config: &EngineConfig,
    ) -> Result<Self, PipelineError> {
        let ProcessCommand {
            program,
            args,
            separator,
        } = command;

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Construction {
                node: node.clone(),
                reason: format!("failed to start '{}': {}", program, e),
            })?;

        debug!(
            "Spawned {} {:?} (pid {:?}) for {}",
            program,
            args,
            child.id(),
            node
        );

        Ok(Self {
            node,
            program,
            child,
            codec: LineCodec::new(separator),
            stderr_limit: config.stderr_limit,
            kill_grace: config.kill_grace,
        })
    }

    pub fn node(&self) -> &NodeRef {
        &self.node
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Pump values through the program until it exits, then close `output`
    pub async fn run(
        mut self,
        input: StreamReceiver,
        mut output: StreamSender,
        cancel: CancellationToken,
    ) -> NodeSummary {
        let exit = self.pump(input, &mut output, &cancel).await;

        match &exit {
            NodeExit::Completed | NodeExit::StoppedEarly => output.close_normally(),
            NodeExit::Failed(error) | NodeExit::UpstreamFailed(error) => {
                output.close_with_error(error.clone())
            }
            NodeExit::Cancelled => output.close_with_error(PipelineError::Cancelled),
        }

        debug!("{} finished: {:?}, {} value(s) sent", self.node, exit, output.sent());
        NodeSummary {
            node: self.node,
            exit,
            state: NodeState::Closed,
            sent: output.sent(),
        }
    }

    async fn pump(
        &mut self,
        input: StreamReceiver,
        output: &mut StreamSender,
        cancel: &CancellationToken,
    ) -> NodeExit {
        let (Some(stdin), Some(stdout), Some(stderr)) = (
            self.child.stdin.take(),
            self.child.stdout.take(),
            self.child.stderr.take(),
        ) else {
            return NodeExit::Failed(PipelineError::StreamProtocol {
                node: self.node.clone(),
                detail: "process pipes are not available".to_string(),
            });
        };

        // Fires when the graph is cancelled or the program has exited
        let exited = cancel.child_token();
        let writer = tokio::spawn(feed(input, stdin, self.codec.clone(), exited.clone()));
        let mut capture = tokio::spawn(capture_stderr(stderr, self.stderr_limit));

        let mut drain = Drain::Eof;
        let mut lines = BufReader::new(stdout).split(b'\n');
        loop {
            let segment = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drain = Drain::Cancelled;
                    break;
                }
                // A quiet program must not keep a departed consumer waiting
                _ = output.closed() => {
                    drain = Drain::Downstream;
                    break;
                }
                segment = lines.next_segment() => segment,
            };

            match segment {
                Ok(Some(bytes)) => {
                    let value = self.codec.decode(&line_text(&bytes));
                    match output.send(value).await {
                        Ok(()) => {}
                        Err(StreamError::Cancelled) => {
                            drain = Drain::Cancelled;
                            break;
                        }
                        Err(StreamError::Disconnected) => {
                            drain = Drain::Downstream;
                            break;
                        }
                        Err(StreamError::Closed) => {
                            drain = Drain::Protocol(StreamError::Closed.to_string());
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    drain = Drain::ReadFailed(e.to_string());
                    break;
                }
            }
        }
        drop(lines);

        let status = match drain {
            Drain::Eof => {
                let waited = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    status = self.child.wait() => Some(status),
                };
                match waited {
                    Some(status) => status.ok(),
                    None => {
                        drain = Drain::Cancelled;
                        self.terminate().await
                    }
                }
            }
            _ => self.terminate().await,
        };

        exited.cancel();
        let feed = match writer.await {
            Ok(feed) => feed,
            Err(e) => Feed::Failed(format!("stdin writer failed: {}", e)),
        };
        // A grandchild may hold stderr open after the program exits
        let stderr = match tokio::time::timeout(self.kill_grace, &mut capture).await {
            Ok(Ok(text)) => text,
            _ => {
                capture.abort();
                String::new()
            }
        };

        if let Feed::Upstream(error) = feed {
            return NodeExit::UpstreamFailed(error);
        }

        match drain {
            Drain::Cancelled => return NodeExit::Cancelled,
            Drain::Downstream => return NodeExit::StoppedEarly,
            Drain::ReadFailed(message) => {
                return NodeExit::Failed(PipelineError::Transform {
                    node: self.node.clone(),
                    message: format!("reading output of {}: {}", self.program, message),
                })
            }
            Drain::Protocol(detail) => {
                return NodeExit::Failed(PipelineError::StreamProtocol {
                    node: self.node.clone(),
                    detail,
                })
            }
            Drain::Eof => {}
        }
        if matches!(feed, Feed::Cancelled) {
            return NodeExit::Cancelled;
        }

        match status {
            Some(status) if status.success() => match feed {
                Feed::Failed(message) => NodeExit::Failed(PipelineError::Transform {
                    node: self.node.clone(),
                    message: format!("writing input of {}: {}", self.program, message),
                }),
                _ => NodeExit::Completed,
            },
            status => {
                let code = status.and_then(|s| s.code()).unwrap_or(-1);
                warn!(
                    "{} exited with code {}: {}",
                    self.program,
                    code,
                    stderr.trim()
                );
                NodeExit::Failed(PipelineError::ProcessExit {
                    node: self.node.clone(),
                    code,
                    stderr,
                })
            }
        }
    }

    /// Ask the program to stop, then kill it once the grace period is over
    async fn terminate(&mut self) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Some(status);
        }

        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if let Ok(status) = tokio::time::timeout(self.kill_grace, self.child.wait()).await {
                return status.ok();
            }
        }

        debug!("Killing {} after {:?}", self.program, self.kill_grace);
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill {}: {}", self.program, e);
        }
        self.child.wait().await.ok()
    }
}

/// Encode input values onto the program's stdin
async fn feed(
    mut input: StreamReceiver,
    mut stdin: ChildStdin,
    codec: LineCodec,
    exited: CancellationToken,
) -> Feed {
    loop {
        let next = tokio::select! {
            biased;
            _ = exited.cancelled() => {
                input.close();
                return Feed::Finished;
            }
            next = input.recv() => next,
        };

        match next {
            Ok(Some(value)) => {
                let line = codec.encode(&value);
                let written = tokio::select! {
                    biased;
                    _ = exited.cancelled() => {
                        input.close();
                        return Feed::Finished;
                    }
                    written = stdin.write_all(line.as_bytes()) => written,
                };
                if let Err(e) = written {
                    // The program stopped reading; stop our producer too
                    input.close();
                    if e.kind() == ErrorKind::BrokenPipe {
                        return Feed::Finished;
                    }
                    return Feed::Failed(e.to_string());
                }
            }
            Ok(None) => break,
            Err(PipelineError::Cancelled) => return Feed::Cancelled,
            Err(error) => return Feed::Upstream(error),
        }
    }

    if let Err(e) = stdin.flush().await {
        if e.kind() != ErrorKind::BrokenPipe {
            return Feed::Failed(e.to_string());
        }
    }
    // Dropping stdin signals end of input to the program
    Feed::Finished
}

/// Collect stderr up to `limit` bytes, discarding the rest
async fn capture_stderr(mut stderr: ChildStderr, limit: usize) -> String {
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 4096];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                if n > room {
                    truncated = true;
                }
                captured.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    let mut text = String::from_utf8_lossy(&captured).into_owned();
    if truncated {
        text.push_str("\n[stderr truncated]");
    }
    text
}
