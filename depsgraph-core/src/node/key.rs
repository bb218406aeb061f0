//! Identity keys for components and operations.
//!
//! Keys are how builders, tagging and tests address nodes without holding
//! arena indices, and how incremental rebuilds match new operations to old
//! ones.

use std::fmt;

use serde::Serialize;

use super::{NodeType, OperationCode};
use crate::data::DataBlockId;

/// Identity of a component: owning data-block, type and name.
///
/// The name is empty except for per-bone components, which use the bone name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ComponentKey {
    /// Owning data-block.
    pub id: DataBlockId,
    /// Component type.
    pub ty: NodeType,
    /// Component name.
    pub name: String,
}

impl ComponentKey {
    /// Unnamed component.
    pub fn new(id: DataBlockId, ty: NodeType) -> Self {
        Self {
            id,
            ty,
            name: String::new(),
        }
    }

    /// Named component, e.g. a bone.
    pub fn named(id: DataBlockId, ty: NodeType, name: impl Into<String>) -> Self {
        Self {
            id,
            ty,
            name: name.into(),
        }
    }

    /// Key of an operation inside this component.
    pub fn operation(&self, code: OperationCode) -> OperationKey {
        OperationKey {
            id: self.id,
            component: self.ty,
            component_name: self.name.clone(),
            code,
            name: String::new(),
            name_tag: -1,
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.ty)?;
        if !self.name.is_empty() {
            write!(f, "[{}]", self.name)?;
        }
        Ok(())
    }
}

/// Identity of an operation.
///
/// Ordering is lexicographic over the fields, which keeps sorted key lists
/// stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OperationKey {
    /// Owning data-block.
    pub id: DataBlockId,
    /// Owning component type.
    pub component: NodeType,
    /// Owning component name.
    pub component_name: String,
    /// Operation code.
    pub code: OperationCode,
    /// Distinguishes operations sharing a code (driver property path, IK root).
    pub name: String,
    /// Secondary discriminator, `-1` when unused.
    pub name_tag: i32,
}

impl OperationKey {
    /// Operation in an unnamed component.
    pub fn new(id: DataBlockId, component: NodeType, code: OperationCode) -> Self {
        ComponentKey::new(id, component).operation(code)
    }

    /// Operation of a bone component.
    pub fn bone(id: DataBlockId, bone: &str, code: OperationCode) -> Self {
        ComponentKey::named(id, NodeType::Bone, bone).operation(code)
    }

    /// Set the operation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the name tag.
    pub fn with_tag(mut self, tag: i32) -> Self {
        self.name_tag = tag;
        self
    }

    /// Key of the owning component.
    pub fn component_key(&self) -> ComponentKey {
        ComponentKey::named(self.id, self.component, self.component_name.clone())
    }

    /// Key used inside the owning component's operation map.
    pub fn local_key(&self) -> (OperationCode, String, i32) {
        (self.code, self.name.clone(), self.name_tag)
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component_key(), self.code)?;
        if !self.name.is_empty() {
            write!(f, "({})", self.name)?;
        }
        if self.name_tag >= 0 {
            write!(f, "#{}", self.name_tag)?;
        }
        Ok(())
    }
}

/// Either endpoint granularity accepted by the relation builder.
///
/// A component resolves to its exit anchor when used as a relation source and
/// to its entry anchor when used as a target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    /// A whole component.
    Component(ComponentKey),
    /// A single operation.
    Operation(OperationKey),
}

impl From<ComponentKey> for NodeKey {
    fn from(key: ComponentKey) -> Self {
        NodeKey::Component(key)
    }
}

impl From<OperationKey> for NodeKey {
    fn from(key: OperationKey) -> Self {
        NodeKey::Operation(key)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Component(key) => key.fmt(f),
            NodeKey::Operation(key) => key.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let id = DataBlockId::new(3);
        let key = OperationKey::bone(id, "hand", OperationCode::BoneDone);
        assert_eq!(key.to_string(), "ID3/Bone[hand]/BoneDone");

        let driver = OperationKey::new(id, NodeType::Parameters, OperationCode::Driver)
            .with_name("influence")
            .with_tag(0);
        assert_eq!(driver.to_string(), "ID3/Parameters/Driver(influence)#0");
    }

    #[test]
    fn component_key_round_trip() {
        let key = OperationKey::bone(DataBlockId::new(1), "arm", OperationCode::BoneReady);
        assert_eq!(
            key.component_key(),
            ComponentKey::named(DataBlockId::new(1), NodeType::Bone, "arm")
        );
    }
}
