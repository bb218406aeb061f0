//! Data Store
//!
//! The database of original data-blocks. Every block sits behind its own
//! `Arc<RwLock<_>>` so editors can mutate one block while the graph holds
//! non-owning references to all of them.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{DataBlock, DataBlockId, DataBlockKind, IdType};

/// Shared handle to an original data-block.
pub type SharedDataBlock = Arc<RwLock<DataBlock>>;

/// All data-blocks known to the application, in creation order.
#[derive(Debug, Default)]
pub struct DataStore {
    blocks: IndexMap<DataBlockId, SharedDataBlock>,
    next_id: u32,
}

impl DataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a data-block and return its id.
    pub fn add(&mut self, name: impl Into<String>, kind: DataBlockKind) -> DataBlockId {
        let id = DataBlockId::new(self.next_id);
        self.next_id += 1;
        self.blocks
            .insert(id, Arc::new(RwLock::new(DataBlock::new(id, name, kind))));
        id
    }

    /// Add a data-block and let `init` fill in properties or animation.
    pub fn add_with(
        &mut self,
        name: impl Into<String>,
        kind: DataBlockKind,
        init: impl FnOnce(&mut DataBlock),
    ) -> DataBlockId {
        let id = self.add(name, kind);
        if let Some(block) = self.blocks.get(&id) {
            init(&mut block.write());
        }
        id
    }

    /// Remove a data-block. Graph nodes referencing it lose their original.
    pub fn remove(&mut self, id: DataBlockId) -> Option<SharedDataBlock> {
        self.blocks.shift_remove(&id)
    }

    /// Shared handle to a data-block.
    pub fn get(&self, id: DataBlockId) -> Option<&SharedDataBlock> {
        self.blocks.get(&id)
    }

    /// Whether `id` exists.
    pub fn contains(&self, id: DataBlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Type of `id`.
    pub fn id_type(&self, id: DataBlockId) -> Option<IdType> {
        self.read(id, DataBlock::id_type)
    }

    /// Read a data-block under its lock.
    pub fn read<R>(&self, id: DataBlockId, f: impl FnOnce(&DataBlock) -> R) -> Option<R> {
        self.blocks.get(&id).map(|block| f(&block.read()))
    }

    /// Mutate a data-block under its lock.
    ///
    /// The graph is not told about the change; callers must follow up with
    /// [`Depsgraph::tag_update`](crate::graph::Depsgraph::tag_update).
    pub fn edit<R>(&self, id: DataBlockId, f: impl FnOnce(&mut DataBlock) -> R) -> Option<R> {
        self.blocks.get(&id).map(|block| f(&mut block.write()))
    }

    /// Ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = DataBlockId> + '_ {
        self.blocks.keys().copied()
    }

    /// Ids of a given type, in creation order.
    pub fn ids_of_type<'a>(&'a self, id_type: &'a IdType) -> impl Iterator<Item = DataBlockId> + 'a {
        self.blocks
            .iter()
            .filter(move |(_, block)| &block.read().id_type() == id_type)
            .map(|(id, _)| *id)
    }

    /// Number of data-blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
