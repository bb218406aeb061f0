//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! # Node Variants
//!
//! Every node shares a small header (type tag, diagnostic name, traversal
//! flags) and carries one of three payloads:
//!
//! - [`IdNode`]: one data-block. Owns its component nodes and the evaluated
//!   copy that operations write into.
//! - [`ComponentNode`]: one evaluable aspect of a data-block (transform,
//!   geometry, pose, ...). Owns its operations and an entry/exit anchor pair.
//! - [`OperationNode`]: the unit of scheduling. Wraps a callback plus the
//!   per-pass state machine.
//!
//! Nodes live in an arena owned by [`Depsgraph`](crate::graph::Depsgraph) and
//! refer to each other by [`NodeIndex`]; relations are stored in a second arena
//! and referenced by [`RelationIndex`].

mod component;
pub mod factory;
mod id_node;
mod key;
mod operation;
mod relation;

use std::fmt;

use serde::Serialize;

pub use component::ComponentNode;
pub use factory::{ComponentFactory, NodeFactory};
pub use id_node::{IdNode, IdRecalc};
pub use key::{ComponentKey, NodeKey, OperationKey};
pub use operation::{
    callback, EvalState, OperationCallback, OperationCode, OperationFlags, OperationNode};
pub use relation::{Relation, RelationFlags, RelationIndex, RelationKind};

/// Stable handle to a node in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// Placeholder for links that are filled in after creation.
    pub const INVALID: NodeIndex = NodeIndex(u32::MAX);

    /// Wrap an arena position.
    ///
    /// # Panics
    ///
    /// If `index` does not fit below [`NodeIndex::INVALID`].
    pub fn new(index: usize) -> Self {
        match u32::try_from(index) {
            Ok(raw) if raw != u32::MAX => Self(raw),
            _ => panic!("node arena overflow: index {index} does not fit a NodeIndex"),
        }
    }

    /// Arena position.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Whether this is [`NodeIndex::INVALID`].
    pub fn is_invalid(&self) -> bool {
        *self == Self::INVALID
    }
}

/// Node type tag.
///
/// Component types double as the keys of the node factory registry.
/// [`NodeType::Custom`] leaves room for component types registered outside
/// this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum NodeType {
    /// A data-block.
    Id,
    /// An operation inside a component.
    Operation,
    /// The scene's clock.
    TimeSource,
    /// Copies original data into the evaluated copy.
    CopyOnEval,
    /// Generic properties and drivers.
    Parameters,
    /// Keyframe animation.
    Animation,
    /// Object transform.
    Transform,
    /// Evaluated geometry.
    Geometry,
    /// Armature pose.
    EvalPose,
    /// A single bone of a pose; one component per bone name.
    Bone,
    /// Material and object shading.
    Shading,
    /// Node tree output.
    NTreeOutput,
    /// Instances generated by an object.
    Instancing,
    /// A component type registered by a client.
    Custom(u16),
}

impl NodeType {
    /// Component types with built-in factories.
    pub const BUILTIN_COMPONENTS: [NodeType; 11] = [
        NodeType::TimeSource,
        NodeType::CopyOnEval,
        NodeType::Parameters,
        NodeType::Animation,
        NodeType::Transform,
        NodeType::Geometry,
        NodeType::EvalPose,
        NodeType::Bone,
        NodeType::Shading,
        NodeType::NTreeOutput,
        NodeType::Instancing,
    ];

    /// Which payload a node of this type carries.
    pub fn class(&self) -> NodeClass {
        match self {
            NodeType::Id => NodeClass::Id,
            NodeType::Operation => NodeClass::Operation,
            _ => NodeClass::Component,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Custom(n) => write!(f, "Custom({n})"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Payload class of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// [`IdNode`] payload.
    Id,
    /// [`ComponentNode`] payload.
    Component,
    /// [`OperationNode`] payload.
    Operation,
}

bitflags::bitflags! {
    /// Traversal scratch flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u8 {
        /// Reached by the current flood fill.
        const VISITED = 0b0000_0001;
    }
}

/// Per-variant node data.
#[derive(Debug)]
pub enum NodePayload {
    /// A data-block.
    Id(IdNode),
    /// A component of a data-block.
    Component(ComponentNode),
    /// An operation of a component.
    Operation(OperationNode),
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Type tag.
    pub ty: NodeType,

    /// Diagnostic name.
    pub name: String,

    /// Traversal flags.
    pub flags: NodeFlags,

    /// Variant payload.
    pub payload: NodePayload,
}

impl Node {
    /// Create a node.
    pub fn new(ty: NodeType, name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            ty,
            name: name.into(),
            flags: NodeFlags::empty(),
            payload,
        }
    }

    /// Payload class.
    pub fn class(&self) -> NodeClass {
        match self.payload {
            NodePayload::Id(_) => NodeClass::Id,
            NodePayload::Component(_) => NodeClass::Component,
            NodePayload::Operation(_) => NodeClass::Operation,
        }
    }

    /// ID payload.
    pub fn as_id(&self) -> Option<&IdNode> {
        match &self.payload {
            NodePayload::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Mutable ID payload.
    pub fn as_id_mut(&mut self) -> Option<&mut IdNode> {
        match &mut self.payload {
            NodePayload::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Component payload.
    pub fn as_component(&self) -> Option<&ComponentNode> {
        match &self.payload {
            NodePayload::Component(component) => Some(component),
            _ => None,
        }
    }

    /// Mutable component payload.
    pub fn as_component_mut(&mut self) -> Option<&mut ComponentNode> {
        match &mut self.payload {
            NodePayload::Component(component) => Some(component),
            _ => None,
        }
    }

    /// Operation payload.
    pub fn as_operation(&self) -> Option<&OperationNode> {
        match &self.payload {
            NodePayload::Operation(op) => Some(op),
            _ => None,
        }
    }

    /// Mutable operation payload.
    pub fn as_operation_mut(&mut self) -> Option<&mut OperationNode> {
        match &mut self.payload {
            NodePayload::Operation(op) => Some(op),
            _ => None,
        }
    }
}
