//! pipeshell - a typed-stream command shell pipeline engine

pub mod cli;
pub mod core;
pub mod execution;
pub mod operators;
pub mod process;

// Re-export commonly used types
pub use core::{
    Bindings, Callable, EngineConfig, Environment, Expr, NodeSpec, OperatorSpec, Outcome,
    PipelineError, PipelineFile, PipelineTemplate, ProcessSpec, RunReport, Value,
};
pub use execution::{Engine, Graph, GraphEvent, Invocation};
pub use operators::sinks::Collector;
