//! Pipeline execution: graph construction, node driving and scheduling

pub mod engine;
pub mod graph;
pub mod invocation;
pub mod node;
pub mod scheduler;

pub use engine::{Engine, EventHandler, GraphEvent};
pub use graph::Graph;
pub use invocation::Invocation;
pub use node::Node;
