//! Relations: directed edges between operations.

use serde::Serialize;

use super::NodeIndex;

/// Stable handle to a relation in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationIndex(u32);

impl RelationIndex {
    /// Wrap an arena position.
    ///
    /// # Panics
    ///
    /// If `index` does not fit in 32 bits.
    pub fn new(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(raw) => Self(raw),
            Err(_) => panic!("relation arena overflow: index {index} does not fit a RelationIndex"),
        }
    }

    /// Arena position.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// What a relation expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RelationKind {
    /// Pure ordering, no data is read (anchors, bookkeeping).
    OrderingOnly,
    /// The target reads what the source wrote.
    DataFlow,
}

bitflags::bitflags! {
    /// Relation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RelationFlags: u8 {
        /// Tagging does not propagate across this relation.
        const NO_FLUSH = 0b0000_0001;
        /// Structural relation; never picked to break a cycle while another
        /// relation in the same cycle can be.
        const GODMODE  = 0b0000_0010;
        /// Discarded to break a cycle; ignored by scheduling.
        const CYCLIC   = 0b0000_0100;
    }
}

/// A directed edge `from -> to` between two operation nodes.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Source operation.
    pub from: NodeIndex,
    /// Target operation.
    pub to: NodeIndex,
    /// Relation kind.
    pub kind: RelationKind,
    /// Human readable description.
    pub name: String,
    /// Flags.
    pub flags: RelationFlags,
}

impl Relation {
    /// Ordering key used to pick which relation of a cycle to discard.
    pub fn break_key(&self) -> (NodeIndex, NodeIndex, RelationKind) {
        (self.from, self.to, self.kind)
    }

    /// Whether the relation was discarded to break a cycle.
    pub fn is_cyclic(&self) -> bool {
        self.flags.contains(RelationFlags::CYCLIC)
    }

    /// Whether tagging propagates across this relation.
    pub fn flushes(&self) -> bool {
        !self.flags.contains(RelationFlags::NO_FLUSH)
    }
}
