//! Component nodes.

use indexmap::IndexMap;

use super::{ComponentKey, NodeIndex, NodeType, OperationCode};
use crate::data::DataBlockId;

/// One evaluable aspect of a data-block.
///
/// Operations are kept in insertion order; that order is the scheduler's
/// tie-break between otherwise unordered operations.
#[derive(Debug)]
pub struct ComponentNode {
    /// Owning ID node.
    pub owner: NodeIndex,
    /// Owning data-block.
    pub id: DataBlockId,
    /// Component type.
    pub ty: NodeType,
    /// Component name (bone name for bone components).
    pub name: String,
    /// Operations by `(code, name, name_tag)`, excluding the anchors.
    pub operations: IndexMap<(OperationCode, String, i32), NodeIndex>,
    /// Entry anchor.
    pub entry: NodeIndex,
    /// Exit anchor.
    pub exit: NodeIndex,
}

impl ComponentNode {
    /// A detached component; the graph fills in owner and anchors.
    pub fn new(id: DataBlockId, ty: NodeType, name: impl Into<String>) -> Self {
        Self {
            owner: NodeIndex::INVALID,
            id,
            ty,
            name: name.into(),
            operations: IndexMap::new(),
            entry: NodeIndex::INVALID,
            exit: NodeIndex::INVALID,
        }
    }

    /// Identity key.
    pub fn key(&self) -> ComponentKey {
        ComponentKey::named(self.id, self.ty, self.name.clone())
    }

    /// Look up an operation, anchors included.
    pub fn find_operation(&self, code: OperationCode, name: &str, name_tag: i32) -> Option<NodeIndex> {
        match code {
            OperationCode::Entry => Some(self.entry),
            OperationCode::Exit => Some(self.exit),
            _ => self
                .operations
                .get(&(code, name.to_string(), name_tag))
                .copied(),
        }
    }

    /// Every operation index, anchors first.
    pub fn all_operations(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        [self.entry, self.exit]
            .into_iter()
            .chain(self.operations.values().copied())
            .filter(|idx| !idx.is_invalid())
    }
}
