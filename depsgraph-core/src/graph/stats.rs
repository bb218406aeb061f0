//! Debug summaries of a graph.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Depsgraph;
use crate::error::DepsgraphError;
use crate::node::{NodeClass, NodeIndex, OperationKey, RelationFlags, RelationKind};

/// Serializable overview of a graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    /// Number of ID nodes.
    pub ids: usize,
    /// Number of component nodes.
    pub components: usize,
    /// Number of operation nodes, anchors included.
    pub operations: usize,
    /// Number of relations.
    pub relations: usize,
    /// Relations discarded to break cycles.
    pub cyclic_relations: usize,
    /// Component count per component type.
    pub components_by_type: BTreeMap<String, usize>,
    /// Every relation.
    pub relation_list: Vec<RelationStat>,
    /// Build diagnostics, rendered.
    pub diagnostics: Vec<String>,
}

/// One relation in [`GraphStats`].
#[derive(Debug, Clone, Serialize)]
pub struct RelationStat {
    /// Source key, rendered.
    pub from: String,
    /// Target key, rendered.
    pub to: String,
    /// Kind.
    pub kind: RelationKind,
    /// Description.
    pub name: String,
    /// Set flag names.
    pub flags: Vec<String>,
}

impl Depsgraph {
    /// Summarize the graph.
    pub fn stats(&self) -> GraphStats {
        let mut components = 0;
        let mut components_by_type = BTreeMap::new();
        for index in 0..self.node_count() {
            let Some(node) = self.node(NodeIndex::new(index)) else {
                continue;
            };
            if node.class() == NodeClass::Component {
                components += 1;
                *components_by_type.entry(node.ty.to_string()).or_insert(0) += 1;
            }
        }

        let relation_list = self
            .relations()
            .iter()
            .map(|rel| RelationStat {
                from: self.key_name(rel.from),
                to: self.key_name(rel.to),
                kind: rel.kind,
                name: rel.name.clone(),
                flags: rel
                    .flags
                    .iter_names()
                    .map(|(name, _)| name.to_string())
                    .collect(),
            })
            .collect();

        GraphStats {
            ids: self.id_count(),
            components,
            operations: self.operation_count(),
            relations: self.relation_count(),
            cyclic_relations: self.cyclic_relations().count(),
            components_by_type,
            relation_list,
            diagnostics: self.diagnostics().iter().map(ToString::to_string).collect(),
        }
    }

    /// [`stats`](Self::stats) as pretty JSON.
    pub fn to_json(&self) -> Result<String, DepsgraphError> {
        Ok(serde_json::to_string_pretty(&self.stats())?)
    }

    /// Every relation as `(from, to, kind)` keys, sorted. Two graphs built
    /// from the same data compare equal.
    pub fn relation_signatures(&self) -> Vec<(OperationKey, OperationKey, RelationKind)> {
        let mut signatures: Vec<_> = self
            .relations()
            .iter()
            .filter_map(|rel| {
                Some((
                    self.operation_key(rel.from)?.clone(),
                    self.operation_key(rel.to)?.clone(),
                    rel.kind,
                ))
            })
            .collect();
        signatures.sort();
        signatures
    }

    /// Every operation key, sorted.
    pub fn operation_keys(&self) -> Vec<OperationKey> {
        let mut keys: Vec<_> = self.operations().map(|(_, op)| op.key.clone()).collect();
        keys.sort();
        keys
    }

    /// Relations carrying `flag`, as keys.
    pub fn relations_with(&self, flag: RelationFlags) -> Vec<(OperationKey, OperationKey)> {
        self.relations()
            .iter()
            .filter(|rel| rel.flags.contains(flag))
            .filter_map(|rel| {
                Some((
                    self.operation_key(rel.from)?.clone(),
                    self.operation_key(rel.to)?.clone(),
                ))
            })
            .collect()
    }

    fn key_name(&self, index: NodeIndex) -> String {
        self.operation_key(index)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{index:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::flat_graph;

    #[test]
    fn stats_count_and_serialize() {
        let (_store, mut graph, _) = flat_graph(&["A", "B"]);
        graph.finalize_components();
        let stats = graph.stats();
        assert_eq!(stats.ids, 2);
        assert_eq!(stats.components, 2);
        assert_eq!(stats.operations, 6);
        assert_eq!(stats.relations, 4);
        assert_eq!(stats.components_by_type.get("Parameters"), Some(&2));

        let json = graph.to_json().unwrap();
        assert!(json.contains("\"Component entry\""));
    }

    #[test]
    fn signatures_are_sorted() {
        let (_store, mut graph, _) = flat_graph(&["A", "B"]);
        graph.finalize_components();
        let signatures = graph.relation_signatures();
        let mut sorted = signatures.clone();
        sorted.sort();
        assert_eq!(signatures, sorted);
        assert_eq!(graph.operation_keys().len(), 6);
    }
}
