//! Evaluation
//!
//! Runs the dirty part of a [`Depsgraph`](crate::graph::Depsgraph) and
//! publishes the results.
//!
//! - [`Evaluator`]: flattens, schedules and dispatches operations, serially or
//!   on a worker pool.
//! - [`OperationContext`]: what an operation callback may read and write.
//! - [`EvaluatedId`]: the per-ID copy results are written into.
//! - Listeners: callbacks registered on the graph and told which IDs changed.

mod context;
mod evaluated;
mod listener;
mod scheduler;

pub use context::{CopyTable, OperationContext};
pub use evaluated::{EvaluatedId, GeometryResult, PoseResult};
pub(crate) use evaluated::{add, length, sub};
pub use listener::{ListenerId, UpdateListener, UpdateNotification};
pub use scheduler::{CancelToken, EvalReport, Evaluator, OperationFailure};
