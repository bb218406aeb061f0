//! Dependency Graph
//!
//! [`Depsgraph`] owns every node and relation built for one evaluation
//! context, plus the bookkeeping that survives between passes: the current
//! time, build diagnostics and update listeners.
//!
//! # Storage
//!
//! Nodes and relations live in two arenas (`Vec`s) addressed by
//! [`NodeIndex`] and [`RelationIndex`]. Nothing is removed from an arena during
//! the lifetime of a graph; a rebuild produces a new graph. Lookups from
//! data-block identity go through an `IndexMap`, so iterating IDs follows
//! build order.
//!
//! # Submodules
//!
//! - `tag`: dirtiness tagging and flushing
//! - `cycle`: cycle detection and breaking
//! - `stats`: debug summaries

mod cycle;
mod stats;
mod tag;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::warn;

pub use cycle::CycleReport;
pub use stats::{GraphStats, RelationStat};
pub use tag::TagKind;

use crate::builder::PipelineKind;
use crate::data::{DataBlockId, SharedDataBlock};
use crate::error::BuildError;
use crate::eval::{EvaluatedId, ListenerId, UpdateListener, UpdateNotification};
use crate::node::{
    factory, ComponentKey, ComponentNode, EvalState, IdNode, Node, NodeIndex, NodePayload,
    NodeType, OperationCallback, OperationCode, OperationKey, OperationNode, Relation,
    RelationFlags, RelationIndex, RelationKind,
};

/// Which builder pass produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Node building.
    Nodes,
    /// Relation building.
    Relations,
}

/// A recoverable build problem recorded on the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildDiagnostic {
    /// Pass that found it.
    pub stage: BuildStage,
    /// What went wrong.
    pub error: BuildError,
}

impl fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.stage, self.error)
    }
}

/// The dependency graph.
pub struct Depsgraph {
    nodes: Vec<Node>,
    relations: Vec<Relation>,
    relation_set: HashSet<(NodeIndex, NodeIndex, RelationKind)>,
    id_map: IndexMap<DataBlockId, NodeIndex>,
    time_source: Option<NodeIndex>,
    ctime: Option<f64>,
    diagnostics: Vec<BuildDiagnostic>,
    relations_dirty: bool,
    pipeline: PipelineKind,
    listeners: Vec<(ListenerId, UpdateListener)>,
}

impl Depsgraph {
    /// Create an empty graph.
    pub fn new(pipeline: PipelineKind) -> Self {
        factory::init();
        Self {
            nodes: Vec::new(),
            relations: Vec::new(),
            relation_set: HashSet::new(),
            id_map: IndexMap::new(),
            time_source: None,
            ctime: None,
            diagnostics: Vec::new(),
            relations_dirty: false,
            pipeline,
            listeners: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Add the ID node for `block`, or return the existing one.
    pub fn add_id_node(&mut self, block: &SharedDataBlock) -> NodeIndex {
        let (id, name) = {
            let data = block.read();
            (data.id, data.name.clone())
        };
        if let Some(&index) = self.id_map.get(&id) {
            return index;
        }
        let mut node = factory::create(NodeType::Id, id, "", &name);
        if let Some(id_node) = node.as_id_mut() {
            id_node.bind(block);
        }
        let index = self.push_node(node);
        self.id_map.insert(id, index);
        index
    }

    /// Add a component to an existing ID node, or return the existing one.
    ///
    /// # Panics
    ///
    /// If `key.id` has no ID node.
    pub fn add_component(&mut self, key: &ComponentKey) -> NodeIndex {
        let Some(id_index) = self.find_id_node(key.id) else {
            panic!("component {key} added before the ID node of {}", key.id);
        };
        if let Some(existing) = self.id_node_at(id_index).and_then(|id| id.find_component(key.ty, &key.name)) {
            return existing;
        }

        let display = if key.name.is_empty() {
            key.ty.to_string()
        } else {
            format!("{} {}", key.ty, key.name)
        };
        let mut node = factory::create(key.ty, key.id, &key.name, &display);
        if let Some(component) = node.as_component_mut() {
            component.owner = id_index;
        }
        let index = self.push_node(node);

        let entry = self.push_operation(index, key.operation(OperationCode::Entry));
        let exit = self.push_operation(index, key.operation(OperationCode::Exit));
        if let Some(component) = self.nodes[index.index()].as_component_mut() {
            component.entry = entry;
            component.exit = exit;
        }
        if let Some(id_node) = self.nodes[id_index.index()].as_id_mut() {
            id_node.components.insert((key.ty, key.name.clone()), index);
        }
        index
    }

    /// Add an operation, creating its component if needed.
    ///
    /// If the operation already exists its callback is replaced and its
    /// state is kept.
    pub fn add_operation(
        &mut self,
        key: OperationKey,
        callback: Option<OperationCallback>,
    ) -> NodeIndex {
        let component_index = self.add_component(&key.component_key());
        let local = key.local_key();
        let existing = self
            .nodes[component_index.index()]
            .as_component()
            .and_then(|c| c.find_operation(local.0, &local.1, local.2));
        if let Some(index) = existing {
            if let Some(op) = self.nodes[index.index()].as_operation_mut() {
                op.callback = callback;
            }
            return index;
        }

        let is_time_source = key.code == OperationCode::TimeSource;
        let index = self.push_operation(component_index, key);
        if let Some(op) = self.nodes[index.index()].as_operation_mut() {
            op.callback = callback;
        }
        if let Some(component) = self.nodes[component_index.index()].as_component_mut() {
            component.operations.insert(local, index);
        }
        if is_time_source && self.time_source.is_none() {
            self.time_source = Some(index);
        }
        index
    }

    /// Add a relation between two operations.
    ///
    /// A relation identical in `(from, to, kind)` to an existing one is not
    /// added again; its flags are merged and the existing index returned. A
    /// relation from an operation to itself is kept but flagged
    /// [`RelationFlags::CYCLIC`], with a diagnostic.
    ///
    /// # Panics
    ///
    /// If either endpoint is not an operation node of this graph.
    pub fn add_relation(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: RelationKind,
        name: &str,
        mut flags: RelationFlags,
    ) -> RelationIndex {
        for endpoint in [from, to] {
            let is_operation = self
                .nodes
                .get(endpoint.index())
                .is_some_and(|node| node.as_operation().is_some());
            assert!(
                is_operation,
                "relation `{name}` endpoint {endpoint:?} is not an operation node"
            );
        }

        if self.relation_set.contains(&(from, to, kind)) {
            let existing = self.operation_at(from).and_then(|op| {
                op.outlinks.iter().copied().find(|rel| {
                    let relation = &self.relations[rel.index()];
                    relation.to == to && relation.kind == kind
                })
            });
            if let Some(index) = existing {
                // Tagging must still cross if either duplicate flushes.
                let merged = &mut self.relations[index.index()].flags;
                let no_flush = merged.contains(RelationFlags::NO_FLUSH)
                    && flags.contains(RelationFlags::NO_FLUSH);
                *merged |= flags;
                merged.set(RelationFlags::NO_FLUSH, no_flush);
                return index;
            }
        }

        if from == to {
            let key = self.operation_key(from).map(ToString::to_string).unwrap_or_default();
            warn!(relation = name, %key, "operation depends on itself");
            self.push_diagnostic(
                BuildStage::Relations,
                BuildError::SelfDependency {
                    relation: name.to_string(),
                    key,
                },
            );
            flags |= RelationFlags::CYCLIC;
        }

        let index = RelationIndex::new(self.relations.len());
        self.relations.push(Relation {
            from,
            to,
            kind,
            name: name.to_string(),
            flags,
        });
        self.relation_set.insert((from, to, kind));
        if let Some(op) = self.nodes[from.index()].as_operation_mut() {
            op.outlinks.push(index);
        }
        if let Some(op) = self.nodes[to.index()].as_operation_mut() {
            op.inlinks.push(index);
        }
        self.relations_dirty = true;
        index
    }

    /// Wire every component's entry anchor to its operations and its
    /// operations to the exit anchor.
    pub fn finalize_components(&mut self) {
        let components: Vec<(NodeIndex, NodeIndex, Vec<NodeIndex>)> = self
            .nodes
            .iter()
            .filter_map(Node::as_component)
            .map(|c| (c.entry, c.exit, c.operations.values().copied().collect()))
            .collect();

        for (entry, exit, operations) in components {
            if operations.is_empty() {
                self.add_relation(entry, exit, RelationKind::OrderingOnly, "Component", RelationFlags::empty());
                continue;
            }
            for op in operations {
                self.add_relation(entry, op, RelationKind::OrderingOnly, "Component entry", RelationFlags::empty());
                self.add_relation(op, exit, RelationKind::OrderingOnly, "Component exit", RelationFlags::empty());
            }
        }
    }

    /// Record a build diagnostic.
    pub fn push_diagnostic(&mut self, stage: BuildStage, error: BuildError) {
        self.diagnostics.push(BuildDiagnostic { stage, error });
    }

    fn push_node(&mut self, node: Node) -> NodeIndex {
        let index = NodeIndex::new(self.nodes.len());
        self.nodes.push(node);
        index
    }

    fn push_operation(&mut self, component: NodeIndex, key: OperationKey) -> NodeIndex {
        let name = key.to_string();
        self.push_node(Node::new(
            NodeType::Operation,
            name,
            NodePayload::Operation(OperationNode::new(component, key)),
        ))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Node at `index`.
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
    }

    /// Mutable node at `index`.
    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index.index())
    }

    /// Operation payload at `index`.
    pub fn operation_at(&self, index: NodeIndex) -> Option<&OperationNode> {
        self.node(index).and_then(Node::as_operation)
    }

    /// Mutable operation payload at `index`.
    pub fn operation_at_mut(&mut self, index: NodeIndex) -> Option<&mut OperationNode> {
        self.node_mut(index).and_then(Node::as_operation_mut)
    }

    /// Component payload at `index`.
    pub fn component_at(&self, index: NodeIndex) -> Option<&ComponentNode> {
        self.node(index).and_then(Node::as_component)
    }

    /// ID payload at `index`.
    pub fn id_node_at(&self, index: NodeIndex) -> Option<&IdNode> {
        self.node(index).and_then(Node::as_id)
    }

    /// Key of the operation at `index`.
    pub fn operation_key(&self, index: NodeIndex) -> Option<&OperationKey> {
        self.operation_at(index).map(|op| &op.key)
    }

    /// ID node index of a data-block.
    pub fn find_id_node(&self, id: DataBlockId) -> Option<NodeIndex> {
        self.id_map.get(&id).copied()
    }

    /// ID node of a data-block.
    pub fn id_node(&self, id: DataBlockId) -> Option<&IdNode> {
        self.find_id_node(id).and_then(|index| self.id_node_at(index))
    }

    /// Whether the graph has a node for `id`.
    pub fn contains_id(&self, id: DataBlockId) -> bool {
        self.id_map.contains_key(&id)
    }

    /// Component node index.
    pub fn find_component(&self, key: &ComponentKey) -> Option<NodeIndex> {
        self.id_node(key.id)?.find_component(key.ty, &key.name)
    }

    /// Operation node index, anchors included.
    pub fn find_operation(&self, key: &OperationKey) -> Option<NodeIndex> {
        let component = self.find_component(&key.component_key())?;
        self.component_at(component)?
            .find_operation(key.code, &key.name, key.name_tag)
    }

    /// Operation payload by key.
    pub fn operation(&self, key: &OperationKey) -> Option<&OperationNode> {
        self.find_operation(key).and_then(|index| self.operation_at(index))
    }

    /// Scheduling state of an operation.
    pub fn state(&self, key: &OperationKey) -> Option<EvalState> {
        self.operation(key).map(|op| op.state)
    }

    /// Every operation with its index, in arena order.
    pub fn operations(&self) -> impl Iterator<Item = (NodeIndex, &OperationNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, node)| node.as_operation().map(|op| (NodeIndex::new(i), op)))
    }

    /// Every ID node, in build order.
    pub fn id_nodes(&self) -> impl Iterator<Item = &IdNode> + '_ {
        self.id_map.values().filter_map(|&index| self.id_node_at(index))
    }

    /// IDs in the graph, in build order.
    pub fn ids(&self) -> impl Iterator<Item = DataBlockId> + '_ {
        self.id_map.keys().copied()
    }

    /// All relations.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Relation at `index`.
    pub fn relation(&self, index: RelationIndex) -> Option<&Relation> {
        self.relations.get(index.index())
    }

    /// Whether a relation `from -> to` of any kind exists between two keys.
    pub fn has_relation(&self, from: &OperationKey, to: &OperationKey) -> bool {
        match (self.find_operation(from), self.find_operation(to)) {
            (Some(from), Some(to)) => self
                .relations
                .iter()
                .any(|rel| rel.from == from && rel.to == to),
            _ => false,
        }
    }

    /// Number of nodes of every class.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of relations.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Number of operation nodes, anchors included.
    pub fn operation_count(&self) -> usize {
        self.operations().count()
    }

    /// Number of ID nodes.
    pub fn id_count(&self) -> usize {
        self.id_map.len()
    }

    /// The time source operation.
    pub fn time_source(&self) -> Option<NodeIndex> {
        self.time_source
    }

    /// Time of the last evaluation or time tag.
    pub fn ctime(&self) -> Option<f64> {
        self.ctime
    }

    pub(crate) fn set_ctime(&mut self, time: Option<f64>) {
        self.ctime = time;
    }

    /// Diagnostics from the last build.
    pub fn diagnostics(&self) -> &[BuildDiagnostic] {
        &self.diagnostics
    }

    /// Pipeline the graph was built with.
    pub fn pipeline(&self) -> PipelineKind {
        self.pipeline
    }

    /// Whether relations changed since the last cycle pass.
    pub fn relations_dirty(&self) -> bool {
        self.relations_dirty
    }

    pub(crate) fn clear_relations_dirty(&mut self) {
        self.relations_dirty = false;
    }

    /// Evaluated copy of a data-block.
    pub fn evaluated(&self, id: DataBlockId) -> Option<Arc<RwLock<EvaluatedId>>> {
        self.id_node(id).map(|node| Arc::clone(&node.evaluated))
    }

    /// Read an evaluated copy under its lock.
    pub fn read_evaluated<R>(&self, id: DataBlockId, f: impl FnOnce(&EvaluatedId) -> R) -> Option<R> {
        self.id_node(id).map(|node| f(&node.evaluated.read()))
    }

    /// ID node owning the operation at `index`.
    pub fn operation_owner(&self, index: NodeIndex) -> Option<&IdNode> {
        let component = self.operation_at(index)?.owner;
        let id_index = self.component_at(component)?.owner;
        self.id_node_at(id_index)
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub(crate) fn relations_mut(&mut self) -> &mut [Relation] {
        &mut self.relations
    }

    pub(crate) fn id_node_mut(&mut self, id: DataBlockId) -> Option<&mut IdNode> {
        let index = self.find_id_node(id)?;
        self.nodes.get_mut(index.index()).and_then(Node::as_id_mut)
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register a callback fired after every pass that updated something.
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: Fn(&UpdateNotification<'_>) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        before != self.listeners.len()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn notify_listeners(&self, notification: &UpdateNotification<'_>) {
        for (_, listener) in &self.listeners {
            listener(notification);
        }
    }

    pub(crate) fn take_listeners(&mut self) -> Vec<(ListenerId, UpdateListener)> {
        std::mem::take(&mut self.listeners)
    }

    pub(crate) fn adopt_listeners(&mut self, listeners: Vec<(ListenerId, UpdateListener)>) {
        self.listeners.extend(listeners);
    }
}

impl fmt::Debug for Depsgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Depsgraph")
            .field("pipeline", &self.pipeline)
            .field("ids", &self.id_map.len())
            .field("nodes", &self.nodes.len())
            .field("relations", &self.relations.len())
            .field("ctime", &self.ctime)
            .field("diagnostics", &self.diagnostics.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::data::{DataBlockKind, DataStore, Object};

    /// A graph with one object per name and a single generic operation each.
    pub(crate) fn flat_graph(names: &[&str]) -> (DataStore, Depsgraph, Vec<OperationKey>) {
        let mut store = DataStore::new();
        let mut graph = Depsgraph::new(PipelineKind::AllObjects);
        let mut keys = Vec::new();
        for name in names {
            let id = store.add(*name, DataBlockKind::Object(Object::default()));
            graph.add_id_node(store.get(id).unwrap());
            let key = OperationKey::new(id, NodeType::Parameters, OperationCode::Generic);
            graph.add_operation(key.clone(), None);
            keys.push(key);
        }
        (store, graph, keys)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::flat_graph;
    use super::*;

    #[test]
    fn components_get_anchors() {
        let (_store, graph, keys) = flat_graph(&["A"]);
        let component = graph.find_component(&keys[0].component_key()).unwrap();
        let component = graph.component_at(component).unwrap();
        assert!(!component.entry.is_invalid());
        assert!(!component.exit.is_invalid());
        assert_eq!(component.operations.len(), 1);
    }

    #[test]
    fn add_operation_reuses_existing_node() {
        let (_store, mut graph, keys) = flat_graph(&["A"]);
        let first = graph.find_operation(&keys[0]).unwrap();
        let count = graph.node_count();
        let again = graph.add_operation(keys[0].clone(), Some(crate::node::callback(|_| Ok(()))));
        assert_eq!(first, again);
        assert_eq!(graph.node_count(), count);
        assert!(graph.operation_at(first).unwrap().has_callback());
    }

    #[test]
    fn duplicate_relations_are_merged() {
        let (_store, mut graph, keys) = flat_graph(&["A", "B"]);
        let a = graph.find_operation(&keys[0]).unwrap();
        let b = graph.find_operation(&keys[1]).unwrap();
        let first = graph.add_relation(a, b, RelationKind::DataFlow, "x", RelationFlags::NO_FLUSH);
        let second = graph.add_relation(a, b, RelationKind::DataFlow, "x", RelationFlags::GODMODE);
        assert_eq!(first, second);
        assert_eq!(graph.relation_count(), 1);
        let flags = graph.relation(first).unwrap().flags;
        assert!(flags.contains(RelationFlags::GODMODE));
        assert!(!flags.contains(RelationFlags::NO_FLUSH));

        graph.add_relation(a, b, RelationKind::OrderingOnly, "y", RelationFlags::empty());
        assert_eq!(graph.relation_count(), 2);
    }

    #[test]
    fn self_relation_is_flagged_cyclic() {
        let (_store, mut graph, keys) = flat_graph(&["A"]);
        let a = graph.find_operation(&keys[0]).unwrap();
        let rel = graph.add_relation(a, a, RelationKind::DataFlow, "loop", RelationFlags::empty());
        assert!(graph.relation(rel).unwrap().is_cyclic());
        assert!(matches!(
            graph.diagnostics()[0].error,
            BuildError::SelfDependency { .. }
        ));
    }

    #[test]
    #[should_panic(expected = "is not an operation node")]
    fn relation_to_component_panics() {
        let (_store, mut graph, keys) = flat_graph(&["A"]);
        let a = graph.find_operation(&keys[0]).unwrap();
        let component = graph.find_component(&keys[0].component_key()).unwrap();
        graph.add_relation(a, component, RelationKind::DataFlow, "bad", RelationFlags::empty());
    }

    #[test]
    fn finalize_links_anchors() {
        let (_store, mut graph, keys) = flat_graph(&["A"]);
        graph.finalize_components();
        let entry = keys[0].component_key().operation(OperationCode::Entry);
        let exit = keys[0].component_key().operation(OperationCode::Exit);
        assert!(graph.has_relation(&entry, &keys[0]));
        assert!(graph.has_relation(&keys[0], &exit));
    }

    #[test]
    fn listeners_subscribe_and_unsubscribe() {
        let (_store, mut graph, _) = flat_graph(&[]);
        let id = graph.subscribe(|_| {});
        assert_eq!(graph.listener_count(), 1);
        assert!(graph.unsubscribe(id));
        assert!(!graph.unsubscribe(id));
    }
}
