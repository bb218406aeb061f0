//! The view of the graph an operation callback gets.
//!
//! Every accessor takes a closure and holds the relevant lock only while the
//! closure runs. Since the context is borrowed mutably, a callback can never
//! hold two locks at once, so cross-ID reads cannot deadlock.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::EvaluatedId;
use crate::data::{DataBlock, DataBlockId};
use crate::error::OperationError;
use crate::node::OperationKey;

/// Evaluated copies of every ID in the graph, shared with workers for a pass.
pub type CopyTable = IndexMap<DataBlockId, Arc<RwLock<EvaluatedId>>>;

/// Access handed to an operation callback.
pub struct OperationContext<'a> {
    key: &'a OperationKey,
    time: f64,
    owner: &'a RwLock<EvaluatedId>,
    original: &'a Weak<RwLock<DataBlock>>,
    copies: &'a CopyTable,
}

impl<'a> OperationContext<'a> {
    pub(crate) fn new(
        key: &'a OperationKey,
        time: f64,
        owner: &'a RwLock<EvaluatedId>,
        original: &'a Weak<RwLock<DataBlock>>,
        copies: &'a CopyTable,
    ) -> Self {
        Self {
            key,
            time,
            owner,
            original,
            copies,
        }
    }

    /// The data-block owning this operation.
    pub fn id(&self) -> DataBlockId {
        self.key.id
    }

    /// This operation's key.
    pub fn key(&self) -> &OperationKey {
        self.key
    }

    /// Evaluation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Read the owning ID's evaluated copy.
    pub fn owner<R>(&mut self, f: impl FnOnce(&EvaluatedId) -> R) -> R {
        f(&self.owner.read())
    }

    /// Write the owning ID's evaluated copy.
    pub fn owner_mut<R>(&mut self, f: impl FnOnce(&mut EvaluatedId) -> R) -> R {
        f(&mut self.owner.write())
    }

    /// Read another ID's evaluated copy.
    ///
    /// The caller must be ordered after the producer by a relation; the
    /// context does not check that.
    pub fn dependency<R>(
        &mut self,
        id: DataBlockId,
        f: impl FnOnce(&EvaluatedId) -> R,
    ) -> Result<R, OperationError> {
        if id == self.key.id {
            return Ok(self.owner(f));
        }
        let copy = self
            .copies
            .get(&id)
            .ok_or(OperationError::MissingDependency(id))?;
        let guard = copy.read();
        Ok(f(&guard))
    }

    /// Read the original data-block.
    pub fn original<R>(&mut self, f: impl FnOnce(&DataBlock) -> R) -> Result<R, OperationError> {
        let original = self
            .original
            .upgrade()
            .ok_or(OperationError::OriginalGone(self.key.id))?;
        let guard = original.read();
        Ok(f(&guard))
    }
}
