//! Scene Data
//!
//! The authored data the dependency graph is built from. This is the
//! "original" side of the copy-on-eval split: editors mutate these
//! data-blocks, tag the graph, and evaluation writes results into separate
//! evaluated copies.
//!
//! # Overview
//!
//! - [`DataStore`] owns every data-block behind an `Arc<RwLock<_>>`. The graph
//!   keeps `Weak` references to originals, so removing a block from the store
//!   never leaves a dangling pointer in the graph.
//! - [`DataBlock`] holds the shared fields (name, custom properties, animation)
//!   plus a [`DataBlockKind`] payload per type.
//! - Property paths (`location.x`, custom names) are resolved by
//!   [`DataBlock::get_property`] / [`DataBlock::set_property`], which is what
//!   animation curves and drivers read and write.

mod anim;
mod armature;
mod blocks;
mod object;
mod store;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use anim::{AnimData, Driver, DriverKind, DriverTarget, DriverVariable, FCurve};
pub use armature::{Armature, Bone};
pub use blocks::{
    Collection, Material, Mesh, NodeTree, NodeTreeKind, Scene, TreeLink, TreeNode, TreeNodeKind,
};
pub use object::{
    Constraint, Modifier, Object, Parent, ParentKind, ParticleInstance, ParticleSystem,
    PoseChannel,
};
pub use store::{DataStore, SharedDataBlock};

/// Identity of a data-block.
///
/// Ids are handed out by the [`DataStore`] and never reused.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DataBlockId(u32);

impl DataBlockId {
    /// Wrap a raw id.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw id value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DataBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID{}", self.0)
    }
}

/// Data-block type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdType {
    /// A scene: time, camera, collections, compositor.
    Scene,
    /// An object placed in the scene.
    Object,
    /// Mesh geometry.
    Mesh,
    /// Bone hierarchy.
    Armature,
    /// Surface material.
    Material,
    /// Node tree (shader, geometry, compositor, texture).
    NodeTree,
    /// Group of objects and child collections.
    Collection,
    /// Image.
    Image,
    /// Text block. Not evaluable.
    Text,
    /// Any other type the engine knows nothing about.
    Other(String),
}

impl IdType {
    /// Whether the graph builder has evaluation semantics for this type.
    pub fn is_evaluable(&self) -> bool {
        !matches!(self, IdType::Text | IdType::Other(_))
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdType::Scene => f.write_str("Scene"),
            IdType::Object => f.write_str("Object"),
            IdType::Mesh => f.write_str("Mesh"),
            IdType::Armature => f.write_str("Armature"),
            IdType::Material => f.write_str("Material"),
            IdType::NodeTree => f.write_str("NodeTree"),
            IdType::Collection => f.write_str("Collection"),
            IdType::Image => f.write_str("Image"),
            IdType::Text => f.write_str("Text"),
            IdType::Other(name) => write!(f, "Other({name})"),
        }
    }
}

/// Per-type payload of a data-block.
#[derive(Debug, Clone)]
pub enum DataBlockKind {
    /// See [`Scene`].
    Scene(Scene),
    /// See [`Object`].
    Object(Object),
    /// See [`Mesh`].
    Mesh(Mesh),
    /// See [`Armature`].
    Armature(Armature),
    /// See [`Material`].
    Material(Material),
    /// See [`NodeTree`].
    NodeTree(NodeTree),
    /// See [`Collection`].
    Collection(Collection),
    /// An image; only its properties matter here.
    Image,
    /// A text block.
    Text(String),
    /// Unknown type, carried by name.
    Other(String),
}

/// A top-level addressable piece of scene data.
#[derive(Debug, Clone)]
pub struct DataBlock {
    /// Identity, assigned by the store.
    pub id: DataBlockId,

    /// Display name.
    pub name: String,

    /// Type-specific payload.
    pub kind: DataBlockKind,

    /// Custom properties, addressable by drivers and animation.
    pub properties: IndexMap<String, f64>,

    /// Keyframe animation and drivers.
    pub anim: Option<AnimData>,
}

impl DataBlock {
    /// Create a data-block without properties or animation.
    pub fn new(id: DataBlockId, name: impl Into<String>, kind: DataBlockKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            properties: IndexMap::new(),
            anim: None,
        }
    }

    /// The data-block's type.
    pub fn id_type(&self) -> IdType {
        match &self.kind {
            DataBlockKind::Scene(_) => IdType::Scene,
            DataBlockKind::Object(_) => IdType::Object,
            DataBlockKind::Mesh(_) => IdType::Mesh,
            DataBlockKind::Armature(_) => IdType::Armature,
            DataBlockKind::Material(_) => IdType::Material,
            DataBlockKind::NodeTree(_) => IdType::NodeTree,
            DataBlockKind::Collection(_) => IdType::Collection,
            DataBlockKind::Image => IdType::Image,
            DataBlockKind::Text(_) => IdType::Text,
            DataBlockKind::Other(name) => IdType::Other(name.clone()),
        }
    }

    /// Read a property by path.
    ///
    /// Objects resolve `location.x|y|z` to their location; every other path is
    /// looked up in the custom properties.
    pub fn get_property(&self, path: &str) -> Option<f64> {
        if let (DataBlockKind::Object(object), Some(axis)) = (&self.kind, location_axis(path)) {
            return Some(object.location[axis]);
        }
        self.properties.get(path).copied()
    }

    /// Write a property by path. Unknown custom paths are created.
    pub fn set_property(&mut self, path: &str, value: f64) {
        if let (DataBlockKind::Object(object), Some(axis)) = (&mut self.kind, location_axis(path)) {
            object.location[axis] = value;
            return;
        }
        self.properties.insert(path.to_string(), value);
    }

    /// Attach animation data, replacing any existing one.
    pub fn with_anim(mut self, anim: AnimData) -> Self {
        self.anim = Some(anim);
        self
    }

    /// Object payload, if this is an object.
    pub fn as_object(&self) -> Option<&Object> {
        match &self.kind {
            DataBlockKind::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Mutable object payload, if this is an object.
    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match &mut self.kind {
            DataBlockKind::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Armature payload.
    pub fn as_armature(&self) -> Option<&Armature> {
        match &self.kind {
            DataBlockKind::Armature(armature) => Some(armature),
            _ => None,
        }
    }

    /// Mesh payload.
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match &self.kind {
            DataBlockKind::Mesh(mesh) => Some(mesh),
            _ => None,
        }
    }

    /// Scene payload.
    pub fn as_scene(&self) -> Option<&Scene> {
        match &self.kind {
            DataBlockKind::Scene(scene) => Some(scene),
            _ => None,
        }
    }

    /// Collection payload.
    pub fn as_collection(&self) -> Option<&Collection> {
        match &self.kind {
            DataBlockKind::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Node tree payload.
    pub fn as_node_tree(&self) -> Option<&NodeTree> {
        match &self.kind {
            DataBlockKind::NodeTree(tree) => Some(tree),
            _ => None,
        }
    }

    /// Material payload.
    pub fn as_material(&self) -> Option<&Material> {
        match &self.kind {
            DataBlockKind::Material(material) => Some(material),
            _ => None,
        }
    }
}

/// Whether a property path addresses an object's location.
pub fn is_location_path(path: &str) -> bool {
    location_axis(path).is_some()
}

fn location_axis(path: &str) -> Option<usize> {
    match path {
        "location.x" => Some(0),
        "location.y" => Some(1),
        "location.z" => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_location_is_a_property() {
        let mut block = DataBlock::new(
            DataBlockId::new(1),
            "Cube",
            DataBlockKind::Object(Object::default()),
        );
        block.set_property("location.y", 2.5);
        assert_eq!(block.get_property("location.y"), Some(2.5));
        assert_eq!(block.as_object().unwrap().location, [0.0, 2.5, 0.0]);
        assert!(block.properties.is_empty());
    }

    #[test]
    fn custom_properties_are_created_on_write() {
        let mut block = DataBlock::new(DataBlockId::new(2), "Img", DataBlockKind::Image);
        assert_eq!(block.get_property("location.x"), None);
        block.set_property("location.x", 1.0);
        assert_eq!(block.properties.get("location.x"), Some(&1.0));
    }

    #[test]
    fn text_and_unknown_types_are_not_evaluable() {
        assert!(!IdType::Text.is_evaluable());
        assert!(!IdType::Other("Sound".into()).is_evaluable());
        assert!(IdType::NodeTree.is_evaluable());
    }
}
