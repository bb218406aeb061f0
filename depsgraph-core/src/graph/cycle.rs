//! Cycle Detection
//!
//! Relations are inserted as the scene data describes them, cycles included.
//! Before flattening, [`Depsgraph::detect_cycles`] finds each cycle and
//! discards one relation of it by flagging it
//! [`RelationFlags::CYCLIC`]. Scheduling ignores cyclic relations.
//!
//! # Which relation is discarded
//!
//! Among the relations of a cycle, those flagged
//! [`RelationFlags::GODMODE`] are only considered when nothing else is left.
//! Of the remaining candidates the one with the smallest
//! `(from, to, kind)` tuple is discarded. Node indices follow build order, so
//! the same scene always loses the same relation. The evaluator applies the
//! same rule when it stalls.

use serde::Serialize;
use tracing::warn;

use super::Depsgraph;
use crate::node::{NodeIndex, OperationKey, Relation, RelationFlags, RelationIndex};

/// A discarded relation and the cycle it was part of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// The discarded relation.
    pub relation: RelationIndex,
    /// Its source.
    pub from: OperationKey,
    /// Its target.
    pub to: OperationKey,
    /// Its description.
    pub name: String,
    /// Operations on the cycle, starting at the discarded relation's target.
    pub involved: Vec<OperationKey>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Pick the relation to discard from a cycle.
pub(crate) fn choose_relation<'a, I>(candidates: I) -> Option<RelationIndex>
where
    I: IntoIterator<Item = (RelationIndex, &'a Relation)>,
{
    let candidates: Vec<(RelationIndex, &Relation)> = candidates.into_iter().collect();
    let pool: Vec<&(RelationIndex, &Relation)> = {
        let regular: Vec<_> = candidates
            .iter()
            .filter(|(_, rel)| !rel.flags.contains(RelationFlags::GODMODE))
            .collect();
        if regular.is_empty() {
            candidates.iter().collect()
        } else {
            regular
        }
    };
    pool.into_iter()
        .min_by_key(|(_, rel)| rel.break_key())
        .map(|(index, _)| *index)
}

impl Depsgraph {
    /// Find and break every cycle. Returns one report per discarded relation,
    /// each also logged as a warning.
    pub fn detect_cycles(&mut self) -> Vec<CycleReport> {
        let mut reports = Vec::new();
        while let Some(cycle) = self.find_cycle(|_| true, |_| false) {
            let Some(report) = self.break_cycle(&cycle) else {
                break;
            };
            warn!(
                relation = %report.name,
                from = %report.from,
                to = %report.to,
                length = report.involved.len(),
                "dependency cycle detected, relation discarded"
            );
            self.relations_mut()[report.relation.index()].flags |= RelationFlags::CYCLIC;
            reports.push(report);
        }
        self.clear_relations_dirty();
        reports
    }

    /// Relations discarded so far.
    pub fn cyclic_relations(&self) -> impl Iterator<Item = (RelationIndex, &Relation)> + '_ {
        self.relations()
            .iter()
            .enumerate()
            .filter(|(_, rel)| rel.is_cyclic())
            .map(|(i, rel)| (RelationIndex::new(i), rel))
    }

    /// Build the report for the relation [`choose_relation`] picks from `cycle`.
    pub(crate) fn break_cycle(&self, cycle: &[RelationIndex]) -> Option<CycleReport> {
        let chosen = choose_relation(
            cycle
                .iter()
                .filter_map(|&index| self.relation(index).map(|rel| (index, rel))),
        )?;
        let relation = self.relation(chosen)?;

        // Rotate so the listing starts where the discarded relation lands.
        let start = cycle.iter().position(|&index| index == chosen).unwrap_or(0);
        let involved = cycle[start..]
            .iter()
            .chain(cycle[..start].iter())
            .filter_map(|&index| self.relation(index))
            .filter_map(|rel| self.operation_key(rel.to).cloned())
            .collect();

        Some(CycleReport {
            relation: chosen,
            from: self.operation_key(relation.from)?.clone(),
            to: self.operation_key(relation.to)?.clone(),
            name: relation.name.clone(),
            involved,
        })
    }

    /// Iterative depth-first search for one cycle among operations accepted by
    /// `include`, ignoring cyclic relations and those rejected by `skip`.
    ///
    /// Roots are tried in node order and edges in insertion order. Returns the
    /// relations of the cycle in path order.
    pub(crate) fn find_cycle(
        &self,
        include: impl Fn(NodeIndex) -> bool,
        skip: impl Fn(RelationIndex) -> bool,
    ) -> Option<Vec<RelationIndex>> {
        let mut color = vec![Color::White; self.node_count()];
        let mut stack: Vec<(NodeIndex, usize)> = Vec::new();
        let mut path: Vec<RelationIndex> = Vec::new();

        let roots: Vec<NodeIndex> = self
            .operations()
            .map(|(index, _)| index)
            .filter(|&index| include(index))
            .collect();

        for root in roots {
            if color[root.index()] != Color::White {
                continue;
            }
            color[root.index()] = Color::Gray;
            stack.push((root, 0));

            while let Some(&(node, next)) = stack.last() {
                let outlinks = match self.operation_at(node) {
                    Some(op) => &op.outlinks,
                    None => {
                        stack.pop();
                        continue;
                    }
                };

                if next >= outlinks.len() {
                    color[node.index()] = Color::Black;
                    stack.pop();
                    path.pop();
                    continue;
                }

                let rel_index = outlinks[next];
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let Some(relation) = self.relation(rel_index) else {
                    continue;
                };
                if relation.is_cyclic() || skip(rel_index) || !include(relation.to) {
                    continue;
                }

                match color[relation.to.index()] {
                    Color::White => {
                        color[relation.to.index()] = Color::Gray;
                        stack.push((relation.to, 0));
                        path.push(rel_index);
                    }
                    Color::Gray => {
                        // Back edge: the cycle runs from `relation.to` down the
                        // current path and back through `rel_index`.
                        let start = stack
                            .iter()
                            .position(|(index, _)| *index == relation.to)
                            .unwrap_or(0);
                        let mut cycle: Vec<RelationIndex> = path[start..].to_vec();
                        cycle.push(rel_index);
                        return Some(cycle);
                    }
                    Color::Black => {}
                }
            }
            path.clear();
        }
        None
    }
}
