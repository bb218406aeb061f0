//! Error Types
//!
//! Errors are split by who has to deal with them:
//!
//! - [`BuildError`]: problems found while walking scene data. They are logged,
//!   stored on the graph as diagnostics, and never abort a build.
//! - [`OperationError`]: an operation callback reported a failure. The
//!   evaluator collects these per pass.
//! - [`FactoryError`]: node factory registry misuse. These indicate broken
//!   invariants and are escalated to panics by the registry helpers.
//! - [`DepsgraphError`]: everything else surfaced through `Result` (config
//!   parsing, runtime construction, debug export).

use thiserror::Error;

use crate::data::{DataBlockId, IdType};
use crate::node::NodeType;

/// Node factory registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    /// A factory for this node type is already registered.
    #[error("node factory for `{0}` is already registered")]
    AlreadyRegistered(NodeType),

    /// No factory is registered for this node type.
    #[error("no node factory registered for `{0}`")]
    NotRegistered(NodeType),
}

/// Recoverable problems found while building nodes or relations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// The data-block type has no evaluation semantics; it was skipped.
    #[error("{id} ({id_type}) is not evaluable and was skipped")]
    UnsupportedType {
        /// The skipped data-block.
        id: DataBlockId,
        /// Its type.
        id_type: IdType,
    },

    /// A data-block references another one that does not exist.
    #[error("{from} references missing data-block {to} ({what})")]
    DanglingReference {
        /// The referencing data-block.
        from: DataBlockId,
        /// The missing data-block.
        to: DataBlockId,
        /// What kind of reference this was.
        what: String,
    },

    /// A bone named by a parent or constraint does not exist in the armature.
    #[error("{id} has no bone named `{bone}` ({what})")]
    MissingBone {
        /// The armature object.
        id: DataBlockId,
        /// The bone name.
        bone: String,
        /// What kind of reference this was.
        what: String,
    },

    /// A relation endpoint was not built by the node pass.
    #[error("relation `{relation}` skipped: no node for {key}")]
    MissingNode {
        /// Relation description.
        relation: String,
        /// Display form of the missing key.
        key: String,
    },

    /// A node-tree link points at a node that does not exist.
    #[error("node tree {tree} has a link to unknown node `{node}`")]
    MalformedLink {
        /// The node tree.
        tree: DataBlockId,
        /// The unknown node name.
        node: String,
    },

    /// An operation was asked to depend on itself.
    #[error("relation `{relation}` connects {key} to itself; flagged as cyclic")]
    SelfDependency {
        /// Relation description.
        relation: String,
        /// Display form of the operation key.
        key: String,
    },
}

/// Failure reported by an operation callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    /// The callback tried to read an ID that has no evaluated copy.
    #[error("no evaluated copy for {0}")]
    MissingDependency(DataBlockId),

    /// The original data-block was removed from the store.
    #[error("original data-block {0} is gone")]
    OriginalGone(DataBlockId),

    /// The callback read a value that is not present.
    #[error("missing value: {0}")]
    MissingValue(String),

    /// Generic failure with a message.
    #[error("{0}")]
    Failed(String),

    /// The callback panicked; the payload message is kept.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Top-level error type for fallible public APIs.
#[derive(Debug, Error)]
pub enum DepsgraphError {
    /// Configuration or debug export (de)serialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The worker runtime could not be created.
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_errors_render_ids() {
        let err = BuildError::DanglingReference {
            from: DataBlockId::new(1),
            to: DataBlockId::new(9),
            what: "parent".into(),
        };
        assert_eq!(err.to_string(), "ID1 references missing data-block ID9 (parent)");
    }

    #[test]
    fn factory_error_names_type() {
        let err = FactoryError::AlreadyRegistered(NodeType::Transform);
        assert!(err.to_string().contains("Transform"));
    }
}
