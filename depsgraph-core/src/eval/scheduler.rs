//! Update Scheduler
//!
//! The evaluator runs every dirty operation of a graph in dependency order.
//!
//! # Algorithm
//!
//! 1. If the time changed, tag the time source.
//! 2. If relations changed since the last cycle pass, break cycles.
//! 3. Flatten: every dirty operation counts its pending dependencies, i.e.
//!    non-cyclic incoming relations whose source is dirty too. Clean sources
//!    count as satisfied.
//! 4. Repeatedly take the ready layer (zero pending, in node index order),
//!    run it, mark it `Done` and release its dependents.
//! 5. If nothing is ready while dirty operations remain, they are stuck on a
//!    cycle the graph pass did not see. One relation of it is ignored for the
//!    rest of the pass and reported.
//! 6. Reset finished operations to `Clean` and notify listeners.
//!
//! Only this thread touches node state. Workers receive a [`Job`] holding
//! everything the callback needs and hand back a result.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, trace, warn};

use super::{CopyTable, OperationContext, UpdateNotification};
use crate::config::EvaluatorConfig;
use crate::data::{DataBlock, DataBlockId};
use crate::error::{DepsgraphError, OperationError};
use crate::graph::{CycleReport, Depsgraph};
use crate::node::{
    EvalState, IdRecalc, Node, NodeIndex, OperationCallback, OperationFlags, OperationKey,
    OperationNode, RelationIndex,
};

/// Cooperative cancellation flag, checked between layers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Operations already running finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// An operation whose callback failed.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFailure {
    /// The operation.
    pub key: OperationKey,
    /// What went wrong.
    pub error: OperationError,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Evaluation time.
    pub time: f64,
    /// Callbacks invoked.
    pub operations_run: usize,
    /// Operations that reached `Done`, anchors included.
    pub operations_scheduled: usize,
    /// Layers dispatched.
    pub layers: usize,
    /// Failed callbacks, in completion order.
    pub failures: Vec<OperationFailure>,
    /// Relations discarded during this pass.
    pub broken_cycles: Vec<CycleReport>,
    /// The pass stopped early.
    pub cancelled: bool,
    /// Updated data-blocks with their recalc bits, in build order.
    pub updated: Vec<(DataBlockId, IdRecalc)>,
    /// Operations in the order they finished. Within a layer this is node
    /// index order regardless of the worker count.
    pub executed: Vec<OperationKey>,
}

impl EvalReport {
    /// Whether `key` ran this pass.
    pub fn ran(&self, key: &OperationKey) -> bool {
        self.executed.contains(key)
    }

    /// Position of `key` in [`executed`](Self::executed).
    pub fn position(&self, key: &OperationKey) -> Option<usize> {
        self.executed.iter().position(|k| k == key)
    }

    /// Whether any callback failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// The failure recorded for `key`.
    pub fn failure(&self, key: &OperationKey) -> Option<&OperationError> {
        self.failures
            .iter()
            .find(|failure| &failure.key == key)
            .map(|failure| &failure.error)
    }
}

/// Everything a worker needs to run one operation.
struct Job {
    index: NodeIndex,
    key: OperationKey,
    callback: Option<OperationCallback>,
    original: Weak<RwLock<DataBlock>>,
}

impl Job {
    fn run(&self, time: f64, copies: &CopyTable) -> Result<(), OperationError> {
        let Some(callback) = &self.callback else {
            return Ok(());
        };
        let owner = copies
            .get(&self.key.id)
            .ok_or(OperationError::MissingDependency(self.key.id))?;
        let mut ctx = OperationContext::new(&self.key, time, owner, &self.original, copies);
        match catch_unwind(AssertUnwindSafe(|| callback(&mut ctx))) {
            Ok(result) => result,
            Err(payload) => Err(OperationError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-pass scheduling state.
#[derive(Default)]
struct Pass {
    ready: BTreeSet<NodeIndex>,
    remaining: usize,
    discarded: HashSet<RelationIndex>,
    touched: HashSet<DataBlockId>,
}

/// Runs dirty operations.
///
/// With more than one worker thread the evaluator owns a tokio runtime whose
/// blocking pool executes callbacks. [`evaluate`](Self::evaluate) blocks on
/// that runtime, so it must not be called from inside an async task.
#[derive(Debug)]
pub struct Evaluator {
    config: EvaluatorConfig,
    runtime: Option<Runtime>,
}

impl Evaluator {
    /// Create an evaluator.
    pub fn new(config: EvaluatorConfig) -> Result<Self, DepsgraphError> {
        config.validate()?;
        let runtime = if config.worker_threads > 1 {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .max_blocking_threads(config.worker_threads)
                .thread_name("depsgraph-worker")
                .build()?;
            Some(runtime)
        } else {
            None
        };
        debug!(workers = config.worker_threads, "evaluator created");
        Ok(Self { config, runtime })
    }

    /// Single-threaded evaluator. Never fails.
    pub fn serial() -> Self {
        Self {
            config: EvaluatorConfig::serial(),
            runtime: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate every dirty operation at `time`.
    pub fn evaluate(&self, graph: &mut Depsgraph, time: f64) -> EvalReport {
        self.evaluate_with_cancel(graph, time, &CancelToken::new())
    }

    /// Like [`evaluate`](Self::evaluate), stopping before the next layer
    /// once `cancel` is set. Operations that did not run stay dirty.
    #[instrument(level = "debug", skip_all, fields(time = time, workers = self.config.worker_threads))]
    pub fn evaluate_with_cancel(
        &self,
        graph: &mut Depsgraph,
        time: f64,
        cancel: &CancelToken,
    ) -> EvalReport {
        let mut report = EvalReport {
            time,
            ..EvalReport::default()
        };

        if graph.ctime() != Some(time) {
            graph.tag_time_update(time);
        }
        if self.config.detect_cycles && graph.relations_dirty() {
            report.broken_cycles.extend(graph.detect_cycles());
        }

        let mut pass = flatten(graph);
        let copies: Arc<CopyTable> = Arc::new(
            graph
                .id_nodes()
                .map(|node| (node.id, Arc::clone(&node.evaluated)))
                .collect(),
        );
        debug!(dirty = pass.remaining, ready = pass.ready.len(), "flattened");

        while pass.remaining > 0 {
            if cancel.is_cancelled() {
                report.cancelled = true;
                info!(remaining = pass.remaining, "evaluation cancelled");
                break;
            }
            if pass.ready.is_empty() {
                self.release_stall(graph, &mut pass, &mut report);
                continue;
            }

            let layer: Vec<NodeIndex> = std::mem::take(&mut pass.ready).into_iter().collect();
            report.layers += 1;
            let jobs: Vec<Job> = layer.iter().filter_map(|&index| dispatch(graph, index)).collect();
            let mut results = self.run_layer(jobs, time, &copies);

            for index in layer {
                let result = results
                    .remove(&index)
                    .unwrap_or_else(|| Err(OperationError::Panicked("worker task lost".into())));
                self.complete(graph, index, result, &mut pass, &mut report);
            }
        }

        finish(graph, &mut pass, &mut report);

        if !report.updated.is_empty() {
            graph.notify_listeners(&UpdateNotification {
                time,
                updated: &report.updated,
            });
        }
        info!(
            run = report.operations_run,
            scheduled = report.operations_scheduled,
            layers = report.layers,
            failures = report.failures.len(),
            cycles = report.broken_cycles.len(),
            cancelled = report.cancelled,
            "evaluation pass finished"
        );
        report
    }

    fn run_layer(
        &self,
        jobs: Vec<Job>,
        time: f64,
        copies: &Arc<CopyTable>,
    ) -> HashMap<NodeIndex, Result<(), OperationError>> {
        let runtime = match &self.runtime {
            Some(runtime) if jobs.len() > 1 => runtime,
            _ => {
                return jobs
                    .iter()
                    .map(|job| (job.index, job.run(time, copies)))
                    .collect();
            }
        };

        runtime.block_on(async {
            let mut set = JoinSet::new();
            for job in jobs {
                let copies = Arc::clone(copies);
                set.spawn_blocking(move || (job.index, job.run(time, &copies)));
            }
            let mut results = HashMap::new();
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, result)) => {
                        results.insert(index, result);
                    }
                    Err(err) => warn!(error = %err, "worker task failed"),
                }
            }
            results
        })
    }

    fn complete(
        &self,
        graph: &mut Depsgraph,
        index: NodeIndex,
        result: Result<(), OperationError>,
        pass: &mut Pass,
        report: &mut EvalReport,
    ) {
        let Some(op) = graph.operation_at_mut(index) else {
            return;
        };
        op.state = EvalState::Done;
        op.flags.insert(OperationFlags::EVALUATED);
        let key = op.key.clone();
        let outlinks = op.outlinks.clone();
        if op.has_callback() {
            report.operations_run += 1;
        }
        pass.remaining = pass.remaining.saturating_sub(1);
        pass.touched.insert(key.id);
        report.operations_scheduled += 1;

        if self.config.log_operations {
            trace!(%key, ok = result.is_ok(), "operation finished");
        }
        if let Err(error) = result {
            warn!(%key, %error, "operation failed");
            report.failures.push(OperationFailure {
                key: key.clone(),
                error,
            });
        }
        report.executed.push(key);

        for rel in outlinks {
            if pass.discarded.contains(&rel) {
                continue;
            }
            match graph.relation(rel) {
                Some(relation) if !relation.is_cyclic() => {
                    let to = relation.to;
                    release(graph, to, &mut pass.ready);
                }
                _ => {}
            }
        }
    }

    /// Nothing is ready but work remains: ignore one relation of a cycle
    /// among the stuck operations.
    fn release_stall(&self, graph: &mut Depsgraph, pass: &mut Pass, report: &mut EvalReport) {
        let stuck = |index: NodeIndex| {
            graph
                .operation_at(index)
                .is_some_and(|op| op.state == EvalState::Dirty)
        };
        let cycle = graph
            .find_cycle(stuck, |rel| pass.discarded.contains(&rel))
            .and_then(|cycle| graph.break_cycle(&cycle));

        match cycle {
            Some(cycle) => {
                warn!(
                    relation = %cycle.name,
                    from = %cycle.from,
                    to = %cycle.to,
                    "evaluation stalled on a cycle, relation ignored for this pass"
                );
                pass.discarded.insert(cycle.relation);
                if let Some(to) = graph.relation(cycle.relation).map(|rel| rel.to) {
                    release(graph, to, &mut pass.ready);
                }
                report.broken_cycles.push(cycle);
            }
            None => {
                // Pending counts and relations disagree; run the first stuck
                // operation rather than spin.
                let first = graph
                    .operations()
                    .find(|(_, op)| op.state == EvalState::Dirty)
                    .map(|(index, _)| index);
                let Some(index) = first else {
                    pass.remaining = 0;
                    return;
                };
                if let Some(op) = graph.operation_at_mut(index) {
                    warn!(key = %op.key, "stuck operation released without a cycle");
                    op.num_links_pending = 0;
                }
                pass.ready.insert(index);
            }
        }
    }
}

/// Count pending dependencies of every dirty operation.
fn flatten(graph: &mut Depsgraph) -> Pass {
    for node in graph.nodes_mut() {
        if let Some(op) = node.as_operation_mut() {
            op.flags.remove(OperationFlags::EVALUATED);
        }
    }

    let counts: Vec<(NodeIndex, u32)> = graph
        .operations()
        .filter(|(_, op)| op.is_dirty())
        .map(|(index, op)| {
            let pending = op
                .inlinks
                .iter()
                .filter_map(|&rel| graph.relation(rel))
                .filter(|rel| !rel.is_cyclic())
                .filter(|rel| graph.operation_at(rel.from).is_some_and(OperationNode::is_dirty))
                .count();
            (index, pending as u32)
        })
        .collect();

    let mut pass = Pass {
        remaining: counts.len(),
        ..Pass::default()
    };
    for (index, pending) in counts {
        if let Some(op) = graph.operation_at_mut(index) {
            op.state = EvalState::Dirty;
            op.num_links_pending = pending;
        }
        if pending == 0 {
            pass.ready.insert(index);
        }
    }
    pass
}

/// Mark an operation scheduled and package it for a worker.
fn dispatch(graph: &mut Depsgraph, index: NodeIndex) -> Option<Job> {
    let original = graph
        .operation_owner(index)
        .map(|owner| owner.original.clone())
        .unwrap_or_default();
    let op = graph.operation_at_mut(index)?;
    op.state = EvalState::Scheduled;
    let job = Job {
        index,
        key: op.key.clone(),
        callback: op.callback.clone(),
        original,
    };
    op.state = EvalState::Running;
    Some(job)
}

/// One dependency of `to` finished.
fn release(graph: &mut Depsgraph, to: NodeIndex, ready: &mut BTreeSet<NodeIndex>) {
    if let Some(target) = graph.operation_at_mut(to) {
        if target.state == EvalState::Dirty && target.num_links_pending > 0 {
            target.num_links_pending -= 1;
            if target.num_links_pending == 0 {
                ready.insert(to);
            }
        }
    }
}

/// Reset finished operations and collect what was updated.
fn finish(graph: &mut Depsgraph, pass: &mut Pass, report: &mut EvalReport) {
    for op in graph.nodes_mut().iter_mut().filter_map(Node::as_operation_mut) {
        match op.state {
            EvalState::Done => op.clear(),
            EvalState::Clean => {}
            _ => {
                op.state = EvalState::Dirty;
                op.num_links_pending = 0;
            }
        }
    }

    let still_dirty: HashSet<DataBlockId> = graph
        .operations()
        .filter(|(_, op)| op.is_dirty())
        .map(|(_, op)| op.key.id)
        .collect();
    report.updated = graph
        .id_nodes()
        .filter(|node| pass.touched.contains(&node.id))
        .map(|node| (node.id, node.recalc))
        .collect();
    for id in pass.touched.drain() {
        if still_dirty.contains(&id) {
            continue;
        }
        if let Some(node) = graph.id_node_mut(id) {
            node.recalc = IdRecalc::empty();
        }
    }
}
