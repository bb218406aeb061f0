//! Tagging
//!
//! Edits to scene data are announced with [`Depsgraph::tag_update`]. Tagging
//! marks the operations of the affected components dirty and flushes the
//! dirtiness forward along outgoing relations.
//!
//! # Flush rules
//!
//! - Breadth-first over outgoing relations, bounded by a per-flush visited
//!   flag, so flagged cycles cannot make it loop.
//! - Seeds always propagate. Any other node that was already dirty stops the
//!   walk: its dependents were flushed when it was tagged.
//! - Reaching an operation of another component also tags that component's
//!   entry anchor, so the whole component runs again and its operations see
//!   a consistent starting state.
//! - Relations flagged [`RelationFlags::NO_FLUSH`](crate::node::RelationFlags::NO_FLUSH)
//!   order evaluation but do not carry dirtiness.
//! - Every newly tagged operation adds its component's recalc bits to the
//!   owning ID.

use std::collections::VecDeque;

use smallvec::SmallVec;
use tracing::debug;

use super::Depsgraph;
use crate::data::DataBlockId;
use crate::node::{factory, NodeFlags, NodeIndex, NodeType, OperationFlags, OperationKey, RelationIndex};

/// Which aspect of a data-block an edit touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    /// Location, parent or constraints.
    Transform,
    /// Mesh data or modifiers.
    Geometry,
    /// Materials and node trees.
    Shading,
    /// Keyframes.
    Animation,
    /// Custom properties and drivers.
    Parameters,
    /// Pose channels and bone constraints.
    Pose,
    /// Only re-copy the original.
    CopyOnEval,
    /// A single component type, e.g. a custom one.
    Component(NodeType),
    /// Every component of the ID.
    All,
}

impl TagKind {
    fn matches(&self, ty: NodeType) -> bool {
        match self {
            TagKind::Transform => ty == NodeType::Transform,
            TagKind::Geometry => matches!(ty, NodeType::Geometry | NodeType::Instancing),
            TagKind::Shading => matches!(ty, NodeType::Shading | NodeType::NTreeOutput),
            TagKind::Animation => ty == NodeType::Animation,
            TagKind::Parameters => ty == NodeType::Parameters,
            TagKind::Pose => matches!(ty, NodeType::EvalPose | NodeType::Bone),
            TagKind::CopyOnEval => false,
            TagKind::Component(kind) => ty == *kind,
            TagKind::All => true,
        }
    }
}

impl Depsgraph {
    /// Tag the components of `id` selected by `kind` after an edit of the
    /// original data.
    ///
    /// The ID's copy-on-eval component is tagged as well, so the evaluated
    /// copy picks up the edit. Unknown IDs are ignored. Returns the number of
    /// operations that became dirty.
    pub fn tag_update(&mut self, id: DataBlockId, kind: TagKind) -> usize {
        let Some(id_node) = self.id_node(id) else {
            debug!(%id, ?kind, "tag ignored: data-block not in graph");
            return 0;
        };

        let components: Vec<NodeIndex> = id_node
            .components
            .iter()
            .filter(|((ty, _), _)| *ty == NodeType::CopyOnEval || kind.matches(*ty))
            .map(|(_, index)| *index)
            .collect();
        let seeds: Vec<NodeIndex> = components
            .into_iter()
            .filter_map(|index| self.component_at(index))
            .flat_map(|component| component.all_operations().collect::<Vec<_>>())
            .collect();

        debug!(%id, ?kind, seeds = seeds.len(), "tag update");
        self.flush_from(seeds, OperationFlags::DIRECTLY_MODIFIED | OperationFlags::USER_MODIFIED)
    }

    /// Tag a single operation and flush. Returns `false` for unknown keys.
    ///
    /// The owning component's entry anchor is tagged too, so the component
    /// re-runs from its first operation.
    pub fn tag_operation(&mut self, key: &OperationKey) -> bool {
        match self.find_operation(key) {
            Some(index) => {
                let entry = self
                    .operation_at(index)
                    .and_then(|op| self.component_at(op.owner))
                    .map(|component| component.entry)
                    .filter(|entry| !entry.is_invalid() && *entry != index);
                let seeds = entry.into_iter().chain([index]).collect();
                self.flush_from(seeds, OperationFlags::DIRECTLY_MODIFIED);
                true
            }
            None => {
                debug!(%key, "tag ignored: no such operation");
                false
            }
        }
    }

    /// Set the current time and tag the time source.
    pub fn tag_time_update(&mut self, time: f64) {
        self.set_ctime(Some(time));
        if let Some(source) = self.time_source() {
            debug!(time, "tag time source");
            self.flush_from(vec![source], OperationFlags::DIRECTLY_MODIFIED);
        }
    }

    /// Flush from every operation that is currently dirty.
    ///
    /// Used after a rebuild, where restored and new dirty operations may have
    /// dependents that did not exist when they were tagged.
    pub fn flush_pending(&mut self) -> usize {
        let seeds: Vec<NodeIndex> = self
            .operations()
            .filter(|(_, op)| op.is_dirty())
            .map(|(index, _)| index)
            .collect();
        self.flush_from(seeds, OperationFlags::empty())
    }

    /// Reset every operation to clean and drop all recalc bits.
    pub fn clear_tags(&mut self) {
        for node in self.nodes_mut() {
            if let Some(op) = node.as_operation_mut() {
                op.clear();
            } else if let Some(id) = node.as_id_mut() {
                id.recalc = Default::default();
            }
        }
    }

    fn flush_from(&mut self, seeds: Vec<NodeIndex>, seed_flags: OperationFlags) -> usize {
        let mut queue = VecDeque::new();
        let mut visited = Vec::new();
        let mut newly_dirty = 0;

        for seed in seeds {
            if !self.visit(seed, &mut visited) {
                continue;
            }
            if let Some(op) = self.operation_at_mut(seed) {
                if op.tag(false) {
                    newly_dirty += 1;
                }
                op.flags.insert(seed_flags);
            }
            self.add_recalc(seed);
            queue.push_back(seed);
        }

        while let Some(index) = queue.pop_front() {
            let outlinks: SmallVec<[RelationIndex; 4]> = match self.operation_at(index) {
                Some(op) => op.outlinks.clone(),
                None => continue,
            };
            for rel in outlinks {
                let Some(relation) = self.relation(rel) else {
                    continue;
                };
                if !relation.flushes() {
                    continue;
                }
                let to = relation.to;
                if !self.visit(to, &mut visited) {
                    continue;
                }
                let became_dirty = self
                    .operation_at_mut(to)
                    .is_some_and(|op| op.tag(false));
                if became_dirty {
                    newly_dirty += 1;
                    self.add_recalc(to);
                    queue.push_back(to);
                }

                // Entering another component re-runs all of it.
                let owners = (
                    self.operation_at(index).map(|op| op.owner),
                    self.operation_at(to).map(|op| op.owner),
                );
                let (Some(from_owner), Some(to_owner)) = owners else {
                    continue;
                };
                if from_owner == to_owner {
                    continue;
                }
                let Some(entry) = self.component_at(to_owner).map(|c| c.entry) else {
                    continue;
                };
                if entry.is_invalid() || !self.visit(entry, &mut visited) {
                    continue;
                }
                if self.operation_at_mut(entry).is_some_and(|op| op.tag(false)) {
                    newly_dirty += 1;
                    queue.push_back(entry);
                }
            }
        }

        for index in visited {
            if let Some(node) = self.node_mut(index) {
                node.flags.remove(NodeFlags::VISITED);
            }
        }
        newly_dirty
    }

    /// Mark `index` visited; `false` if it already was.
    fn visit(&mut self, index: NodeIndex, visited: &mut Vec<NodeIndex>) -> bool {
        let Some(node) = self.node_mut(index) else {
            return false;
        };
        if node.flags.contains(NodeFlags::VISITED) {
            return false;
        }
        node.flags.insert(NodeFlags::VISITED);
        visited.push(index);
        true
    }

    fn add_recalc(&mut self, op_index: NodeIndex) {
        let Some(component) = self.operation_at(op_index).and_then(|op| self.component_at(op.owner)) else {
            return;
        };
        let (ty, owner) = (component.ty, component.owner);
        let recalc = factory::id_recalc_tag(ty);
        if let Some(id) = self.node_mut(owner).and_then(|node| node.as_id_mut()) {
            id.recalc |= recalc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::flat_graph;
    use crate::node::{EvalState, RelationFlags, RelationKind};

    fn chain() -> (crate::data::DataStore, super::Depsgraph, Vec<crate::node::OperationKey>) {
        let (store, mut graph, keys) = flat_graph(&["A", "B", "C"]);
        let a = graph.find_operation(&keys[0]).unwrap();
        let b = graph.find_operation(&keys[1]).unwrap();
        let c = graph.find_operation(&keys[2]).unwrap();
        graph.add_relation(a, b, RelationKind::DataFlow, "a-b", RelationFlags::empty());
        graph.add_relation(b, c, RelationKind::DataFlow, "b-c", RelationFlags::empty());
        graph.clear_tags();
        (store, graph, keys)
    }

    #[test]
    fn tag_flushes_downstream_only() {
        let (_store, mut graph, keys) = chain();
        graph.tag_operation(&keys[1]);
        assert_eq!(graph.state(&keys[0]), Some(EvalState::Clean));
        assert_eq!(graph.state(&keys[1]), Some(EvalState::Dirty));
        assert_eq!(graph.state(&keys[2]), Some(EvalState::Dirty));
    }

    #[test]
    fn no_flush_relations_do_not_propagate() {
        let (_store, mut graph, keys) = flat_graph(&["A", "B"]);
        let a = graph.find_operation(&keys[0]).unwrap();
        let b = graph.find_operation(&keys[1]).unwrap();
        graph.add_relation(a, b, RelationKind::OrderingOnly, "order", RelationFlags::NO_FLUSH);
        graph.clear_tags();

        graph.tag_operation(&keys[0]);
        assert_eq!(graph.state(&keys[1]), Some(EvalState::Clean));
    }

    #[test]
    fn flush_terminates_on_cycles() {
        let (_store, mut graph, keys) = chain();
        let a = graph.find_operation(&keys[0]).unwrap();
        let c = graph.find_operation(&keys[2]).unwrap();
        graph.add_relation(c, a, RelationKind::DataFlow, "c-a", RelationFlags::empty());
        graph.clear_tags();

        graph.tag_operation(&keys[0]);
        for key in &keys {
            assert_eq!(graph.state(key), Some(EvalState::Dirty));
        }
    }

    #[test]
    fn tagging_twice_is_idempotent() {
        let (_store, mut graph, keys) = chain();
        let id = keys[0].id;
        let first = graph.tag_update(id, super::TagKind::Parameters);
        let second = graph.tag_update(id, super::TagKind::Parameters);
        assert!(first > 0);
        assert_eq!(second, 0);
    }

    #[test]
    fn unknown_id_is_ignored() {
        let (_store, mut graph, _) = chain();
        assert_eq!(
            graph.tag_update(crate::data::DataBlockId::new(999), super::TagKind::All),
            0
        );
    }

    #[test]
    fn recalc_bits_follow_component_type() {
        let (_store, mut graph, keys) = chain();
        graph.tag_operation(&keys[0]);
        let recalc = graph.id_node(keys[2].id).unwrap().recalc;
        assert!(recalc.contains(crate::node::IdRecalc::PARAMETERS));

        graph.clear_tags();
        assert!(graph.id_node(keys[2].id).unwrap().recalc.is_empty());
    }
}
