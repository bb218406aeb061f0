//! Smaller data-block payloads: scenes, collections, meshes, materials and
//! node trees.

use indexmap::IndexMap;

use super::DataBlockId;

/// A scene.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    /// Root of the collection hierarchy.
    pub master_collection: Option<DataBlockId>,
    /// Active camera object.
    pub camera: Option<DataBlockId>,
    /// Compositor node tree.
    pub compositor_tree: Option<DataBlockId>,
    /// Current frame as authored.
    pub frame: f64,
}

/// A group of objects and child collections.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Member objects.
    pub objects: Vec<DataBlockId>,
    /// Child collections.
    pub children: Vec<DataBlockId>,
    /// Hidden in the viewport (view layer pipeline skips it).
    pub hide_viewport: bool,
    /// Hidden in renders (render pipeline skips it).
    pub hide_render: bool,
}

impl Collection {
    /// A visible collection of `objects`.
    pub fn of(objects: impl IntoIterator<Item = DataBlockId>) -> Self {
        Self {
            objects: objects.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Mesh geometry, reduced to what modifiers need.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Number of vertices.
    pub vertex_count: u64,
    /// Mesh-level material slots.
    pub materials: Vec<DataBlockId>,
}

/// A surface material.
#[derive(Debug, Clone, Default)]
pub struct Material {
    /// Shader node tree.
    pub tree: Option<DataBlockId>,
}

/// Node tree flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeTreeKind {
    /// Material shading.
    #[default]
    Shader,
    /// Geometry nodes, used by the nodes modifier.
    Geometry,
    /// Scene compositing.
    Compositor,
    /// Procedural texture.
    Texture,
}

/// A node tree. Only the nodes that reference other data-blocks matter to
/// the dependency graph; the rest is carried for link validation.
#[derive(Debug, Clone, Default)]
pub struct NodeTree {
    /// Tree flavour.
    pub kind: NodeTreeKind,
    /// Nodes by name.
    pub nodes: IndexMap<String, TreeNode>,
    /// Links between nodes.
    pub links: Vec<TreeLink>,
}

impl NodeTree {
    /// An empty tree of `kind`.
    pub fn new(kind: NodeTreeKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Add a node.
    pub fn with_node(mut self, name: &str, kind: TreeNodeKind) -> Self {
        self.nodes.insert(name.to_string(), TreeNode { kind });
        self
    }

    /// Add a link.
    pub fn with_link(mut self, from: &str, to: &str) -> Self {
        self.links.push(TreeLink {
            from_node: from.to_string(),
            to_node: to.to_string(),
        });
        self
    }
}

/// A node inside a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Node type.
    pub kind: TreeNodeKind,
}

/// Node types, as far as the dependency graph cares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TreeNodeKind {
    /// A node with no external references.
    Generic,
    /// Reads an object's transform.
    ObjectInfo(DataBlockId),
    /// Reads an image.
    Image(DataBlockId),
    /// Instances another node tree.
    Group(DataBlockId),
    /// Reads a scene's render result.
    RenderLayers(DataBlockId),
}

impl TreeNodeKind {
    /// The data-block this node references, if any.
    pub fn referenced_id(&self) -> Option<DataBlockId> {
        match self {
            TreeNodeKind::Generic => None,
            TreeNodeKind::ObjectInfo(id)
            | TreeNodeKind::Image(id)
            | TreeNodeKind::Group(id)
            | TreeNodeKind::RenderLayers(id) => Some(*id),
        }
    }
}

/// A link between two nodes of the same tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeLink {
    /// Source node name.
    pub from_node: String,
    /// Destination node name.
    pub to_node: String,
}
