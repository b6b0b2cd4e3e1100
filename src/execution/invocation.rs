//! A running template invocation whose output the caller pulls lazily

use crate::core::error::PipelineError;
use crate::core::state::{Outcome, RunReport};
use crate::core::stream::StreamReceiver;
use crate::core::value::Value;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Output side of a graph running in the background
///
/// Values arrive in order through [`Invocation::next`]. Dropping the
/// invocation before the run finished cancels the run.
pub struct Invocation {
    run_id: Uuid,
    output: StreamReceiver,
    cancel: CancellationToken,
    runner: Option<JoinHandle<RunReport>>,
}

impl Invocation {
    pub(crate) fn new(
        run_id: Uuid,
        output: StreamReceiver,
        cancel: CancellationToken,
        runner: JoinHandle<RunReport>,
    ) -> Self {
        Self {
            run_id,
            output,
            cancel,
            runner: Some(runner),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The next output value; `None` once the output ended normally
    pub async fn next(&mut self) -> Option<Result<Value, PipelineError>> {
        self.output.recv().await.transpose()
    }

    /// Request cancellation of the whole run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels the run from elsewhere, e.g. a signal handler
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain every output value, then settle the run
    ///
    /// On failure the run's primary error is returned, which is not
    /// necessarily the error that reached the output.
    pub async fn collect(mut self) -> Result<Vec<Value>, PipelineError> {
        let mut values = Vec::new();
        while let Some(next) = self.next().await {
            match next {
                Ok(value) => values.push(value),
                Err(_) => break,
            }
        }
        self.finish().await.into_result().map(|_| values)
    }

    /// Stop consuming and wait for every node to close
    pub async fn finish(mut self) -> RunReport {
        self.output.close();
        let run_id = self.run_id;
        let started_at = Utc::now();
        match self.runner.take() {
            Some(runner) => match runner.await {
                Ok(report) => report,
                Err(e) => RunReport {
                    run_id,
                    outcome: Outcome::Failure {
                        error: PipelineError::Aborted(format!("run task failed: {}", e)),
                        secondary: Vec::new(),
                    },
                    nodes: Vec::new(),
                    started_at,
                    finished_at: Utc::now(),
                },
            },
            None => RunReport {
                run_id,
                outcome: Outcome::Failure {
                    error: PipelineError::Aborted("run was already settled".to_string()),
                    secondary: Vec::new(),
                },
                nodes: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            },
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if let Some(runner) = &self.runner {
            if !runner.is_finished() {
                debug!("Invocation {} dropped while running, cancelling", self.run_id);
                self.cancel.cancel();
            }
        }
    }
}
