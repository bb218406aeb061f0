//! ID nodes: one per data-block.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{NodeIndex, NodeType};
use crate::data::{DataBlock, DataBlockId, IdType, SharedDataBlock};
use crate::eval::EvaluatedId;

bitflags::bitflags! {
    /// What changed on a data-block since listeners were last notified.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct IdRecalc: u32 {
        /// Transform changed.
        const TRANSFORM    = 1 << 0;
        /// Geometry changed.
        const GEOMETRY     = 1 << 1;
        /// Shading changed.
        const SHADING      = 1 << 2;
        /// Animation changed.
        const ANIMATION    = 1 << 3;
        /// Parameters or drivers changed.
        const PARAMETERS   = 1 << 4;
        /// Original data was copied again.
        const COPY_ON_EVAL = 1 << 5;
        /// Pose changed.
        const POSE         = 1 << 6;
        /// Time changed.
        const TIME         = 1 << 7;
    }
}

/// A data-block in the graph.
#[derive(Debug)]
pub struct IdNode {
    /// Data-block identity.
    pub id: DataBlockId,

    /// Data-block type.
    pub id_type: IdType,

    /// Original data, not owned. Dead once the block leaves the store.
    pub original: Weak<RwLock<DataBlock>>,

    /// Evaluated copy, written only by this ID's operations.
    pub evaluated: Arc<RwLock<EvaluatedId>>,

    /// Components by `(type, name)`.
    pub components: IndexMap<(NodeType, String), NodeIndex>,

    /// Accumulated recalc bits.
    pub recalc: IdRecalc,

    /// Reached through a visible collection (as opposed to only as a dependency).
    pub visible: bool,
}

impl IdNode {
    /// An ID node not yet bound to its original.
    pub fn unbound(id: DataBlockId) -> Self {
        Self {
            id,
            id_type: IdType::Other(String::new()),
            original: Weak::new(),
            evaluated: Arc::new(RwLock::new(EvaluatedId::new(id))),
            components: IndexMap::new(),
            recalc: IdRecalc::empty(),
            visible: false,
        }
    }

    /// Bind to the original data-block.
    pub fn bind(&mut self, original: &SharedDataBlock) {
        self.id_type = original.read().id_type();
        self.original = Arc::downgrade(original);
    }

    /// The original, if it still exists.
    pub fn original(&self) -> Option<SharedDataBlock> {
        self.original.upgrade()
    }

    /// Find a component by type and name.
    pub fn find_component(&self, ty: NodeType, name: &str) -> Option<NodeIndex> {
        self.components.get(&(ty, name.to_string())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataBlockKind, DataStore, Object};

    #[test]
    fn binding_tracks_original_lifetime() {
        let mut store = DataStore::new();
        let id = store.add("Cube", DataBlockKind::Object(Object::default()));
        let mut node = IdNode::unbound(id);
        node.bind(store.get(id).unwrap());

        assert_eq!(node.id_type, IdType::Object);
        assert!(node.original().is_some());

        store.remove(id);
        assert!(node.original().is_none());
    }
}
