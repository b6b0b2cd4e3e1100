//! Core domain models for pipeshell
//!
//! This module defines the values that flow through pipelines, the streams
//! that carry them, the environment operators evaluate against, and the
//! templates pipelines are built from.

pub mod callable;
pub mod config;
pub mod env;
pub mod error;
pub mod state;
pub mod stream;
pub mod template;
pub mod value;

pub use callable::{Callable, Expr, Pattern};
pub use config::{EngineConfig, PipelineFile};
pub use env::{Bindings, Environment, Scoped};
pub use error::{EvaluationError, NodeRef, OperatorError, PipelineError};
pub use state::*;
pub use stream::{StreamError, StreamReceiver, StreamSender};
pub use template::{Arg, NodeSpec, OperatorSpec, PipelineTemplate, ProcessSpec, Reducer, Role};
pub use value::{FileInfo, FileKind, HostObject, Value};
