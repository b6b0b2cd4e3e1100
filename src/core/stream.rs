//! Bounded point-to-point value streams
//!
//! A stream connects exactly one producer node to exactly one consumer node.
//! The buffer is bounded, so `send` suspends while the consumer lags behind;
//! this is the only backpressure mechanism in the engine.
//!
//! A stream terminates exactly once, either normally (`close_normally`) or
//! with an error (`close_with_error`). The error is parked in a shared slot
//! rather than queued behind buffered values, so posting it never blocks: the
//! consumer sees every value sent before the error, then the error itself.
//!
//! Both ends observe the graph's cancellation token at every suspension
//! point, so cancelling a run unblocks all of its nodes.

use crate::core::error::{NodeRef, PipelineError};
use crate::core::value::Value;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default number of values a stream buffers before `send` suspends
pub const DEFAULT_CAPACITY: usize = 256;

/// Why a `send` did not deliver its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The producer already closed this stream
    #[error("send on a closed stream")]
    Closed,

    /// The consumer closed its end early; stop producing
    #[error("consumer closed the stream")]
    Disconnected,

    /// The run was cancelled
    #[error("stream cancelled")]
    Cancelled,
}

/// How a stream was terminated by its producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Open,
    Ended,
    Failed,
}

#[derive(Debug)]
struct Shared {
    producer: NodeRef,
    fault: Mutex<Option<PipelineError>>,
}

impl Shared {
    fn post(&self, error: PipelineError) {
        match self.fault.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }

    fn take(&self) -> Option<PipelineError> {
        match self.fault.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

/// Create a stream produced by `producer`, buffering at most `capacity` values
pub fn channel(
    producer: NodeRef,
    capacity: usize,
    cancel: CancellationToken,
) -> (StreamSender, StreamReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        producer,
        fault: Mutex::new(None),
    });

    let sender = StreamSender {
        tx: Some(tx),
        shared: shared.clone(),
        cancel: cancel.clone(),
        state: Termination::Open,
        sent: 0,
    };
    let receiver = StreamReceiver {
        rx,
        shared,
        cancel,
        done: false,
        received: 0,
    };
    (sender, receiver)
}

/// Producer end of a stream
#[derive(Debug)]
pub struct StreamSender {
    tx: Option<mpsc::Sender<Value>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    state: Termination,
    sent: usize,
}

impl StreamSender {
    /// Send one value, suspending while the buffer is full
    pub async fn send(&mut self, value: Value) -> Result<(), StreamError> {
        if self.state != Termination::Open {
            return Err(StreamError::Closed);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(StreamError::Closed);
        };

        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            result = tx.send(value) => result.is_ok(),
        };

        if delivered {
            self.sent += 1;
            Ok(())
        } else {
            Err(StreamError::Disconnected)
        }
    }

    /// End the stream normally. Has no effect once the stream is terminated.
    pub fn close_normally(&mut self) {
        if self.state == Termination::Open {
            self.state = Termination::Ended;
            self.tx = None;
        }
    }

    /// End the stream with an error. Has no effect once the stream is terminated.
    pub fn close_with_error(&mut self, error: PipelineError) {
        if self.state == Termination::Open {
            self.state = Termination::Failed;
            self.shared.post(error);
            self.tx = None;
        }
    }

    /// True once the consumer has closed its end
    pub fn is_disconnected(&self) -> bool {
        self.tx.as_ref().map_or(false, |tx| tx.is_closed())
    }

    /// Resolves once the consumer has closed its end
    ///
    /// Never resolves after this side terminated the stream.
    pub async fn closed(&self) {
        match self.tx.as_ref() {
            Some(tx) => tx.closed().await,
            None => std::future::pending::<()>().await,
        }
    }

    pub fn termination(&self) -> Termination {
        self.state
    }

    /// Number of values delivered so far
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn producer(&self) -> &NodeRef {
        &self.shared.producer
    }
}

impl Drop for StreamSender {
    fn drop(&mut self) {
        if self.state == Termination::Open {
            warn!(
                "Stream produced by {} dropped without being closed",
                self.shared.producer
            );
            let node = self.shared.producer.clone();
            self.close_with_error(PipelineError::StreamProtocol {
                node,
                detail: "stream dropped without being closed".to_string(),
            });
        }
    }
}

/// Consumer end of a stream
#[derive(Debug)]
pub struct StreamReceiver {
    rx: mpsc::Receiver<Value>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    done: bool,
    received: usize,
}

enum Polled {
    Cancelled,
    Next(Option<Value>),
}

impl StreamReceiver {
    /// Receive the next value
    ///
    /// Returns `Ok(None)` at end-of-stream, the producer's error if the
    /// stream failed, or [`PipelineError::Cancelled`]. Once terminated, every
    /// further call returns `Ok(None)`.
    pub async fn recv(&mut self) -> Result<Option<Value>, PipelineError> {
        if self.done {
            return Ok(None);
        }

        let cancel = self.cancel.clone();
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => Polled::Cancelled,
            next = self.rx.recv() => Polled::Next(next),
        };

        match polled {
            Polled::Cancelled => {
                self.close();
                Err(PipelineError::Cancelled)
            }
            Polled::Next(Some(value)) => {
                self.received += 1;
                Ok(Some(value))
            }
            Polled::Next(None) => {
                self.done = true;
                match self.shared.take() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
        }
    }

    /// Close the consumer side early; the producer's next `send` fails with
    /// [`StreamError::Disconnected`]. Idempotent.
    pub fn close(&mut self) {
        if !self.done {
            self.done = true;
            self.rx.close();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.done
    }

    /// Number of values received so far
    pub fn received(&self) -> usize {
        self.received
    }

    pub fn producer(&self) -> &NodeRef {
        &self.shared.producer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_channel(capacity: usize) -> (StreamSender, StreamReceiver, CancellationToken) {
        let cancel = CancellationToken::new();
        let (tx, rx) = channel(NodeRef::new(0, "test"), capacity, cancel.clone());
        (tx, rx, cancel)
    }

    #[tokio::test]
    async fn test_fifo_then_end() {
        let (mut tx, mut rx, _) = test_channel(8);
        for i in 0..5 {
            tx.send(Value::Int(i)).await.unwrap();
        }
        tx.close_normally();

        let mut seen = Vec::new();
        while let Some(v) = rx.recv().await.unwrap() {
            seen.push(v);
        }
        assert_eq!(seen, (0..5).map(Value::Int).collect::<Vec<_>>());
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let (mut tx, mut rx, _) = test_channel(4);
        tx.close_normally();
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_after_buffered_values() {
        let (mut tx, mut rx, _) = test_channel(4);
        tx.send(Value::Int(1)).await.unwrap();
        tx.close_with_error(PipelineError::Transform {
            node: NodeRef::new(0, "test"),
            message: "bad".into(),
        });

        assert_eq!(rx.recv().await.unwrap(), Some(Value::Int(1)));
        assert!(matches!(
            rx.recv().await,
            Err(PipelineError::Transform { .. })
        ));
        // Terminated streams never yield again
        assert_eq!(rx.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_exclusive() {
        let (mut tx, mut rx, _) = test_channel(4);
        tx.close_normally();
        tx.close_normally();
        tx.close_with_error(PipelineError::Cancelled);
        assert_eq!(tx.termination(), Termination::Ended);
        assert_eq!(tx.send(Value::Int(1)).await, Err(StreamError::Closed));
        assert_eq!(rx.recv().await.unwrap(), None);

        rx.close();
        rx.close();
        assert!(rx.is_terminated());
    }

    #[tokio::test]
    async fn test_backpressure_bounds_buffer() {
        let (mut tx, mut rx, _) = test_channel(2);
        tx.send(Value::Int(1)).await.unwrap();
        tx.send(Value::Int(2)).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(Value::Int(3))).await;
        assert!(blocked.is_err(), "third send should wait for the consumer");

        assert_eq!(rx.recv().await.unwrap(), Some(Value::Int(1)));
        tx.send(Value::Int(3)).await.unwrap();
        assert_eq!(tx.sent(), 3);
    }

    #[tokio::test]
    async fn test_consumer_close_disconnects_producer() {
        let (mut tx, mut rx, _) = test_channel(4);
        rx.close();
        assert!(tx.is_disconnected());
        assert_eq!(tx.send(Value::Int(1)).await, Err(StreamError::Disconnected));
        tx.close_normally();
    }

    #[tokio::test]
    async fn test_closed_resolves_when_consumer_leaves() {
        let (mut tx, mut rx, _) = test_channel(4);
        let pending = tokio::time::timeout(Duration::from_millis(20), tx.closed()).await;
        assert!(pending.is_err(), "consumer is still reading");

        rx.close();
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("closed should resolve once the consumer closes");
        tx.close_normally();
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_both_ends() {
        let (mut tx, mut rx, cancel) = test_channel(1);
        tx.send(Value::Int(1)).await.unwrap();
        cancel.cancel();
        assert_eq!(tx.send(Value::Int(2)).await, Err(StreamError::Cancelled));
        assert_eq!(rx.recv().await, Err(PipelineError::Cancelled));
        tx.close_normally();
    }

    #[tokio::test]
    async fn test_dropped_sender_is_protocol_error() {
        let (tx, mut rx, _) = test_channel(1);
        drop(tx);
        assert!(matches!(
            rx.recv().await,
            Err(PipelineError::StreamProtocol { .. })
        ));
    }
}
