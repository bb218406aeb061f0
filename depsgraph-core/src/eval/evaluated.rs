//! Evaluated copies: the per-ID results operations write into.

use indexmap::IndexMap;

use crate::data::{DataBlock, DataBlockId};

/// Working state of one data-block.
///
/// `data` is the copy-on-eval snapshot of the original, which animation and
/// drivers then modify. The remaining fields are derived results.
#[derive(Debug, Clone, Default)]
pub struct EvaluatedId {
    /// Owning data-block.
    pub id: DataBlockId,

    /// Copy of the original, with animation and drivers applied.
    pub data: Option<DataBlock>,

    /// World-space location (objects).
    pub world_location: [f64; 3],

    /// Incremented each time the transform is finalized.
    pub transform_revision: u64,

    /// Evaluated pose by bone name (armature objects).
    pub pose: IndexMap<String, PoseResult>,

    /// Evaluated geometry (meshes and mesh objects).
    pub geometry: Option<GeometryResult>,

    /// Incremented on each shading or material update.
    pub shading_revision: u64,

    /// Incremented on each node tree output update.
    pub tree_revision: u64,

    /// World-space positions of generated instances.
    pub instances: Vec<[f64; 3]>,

    /// Scene frame (scenes).
    pub frame: f64,
}

/// Evaluated state of one bone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseResult {
    /// Rest head plus pose offset, relative to the parent.
    pub local: [f64; 3],
    /// Head in armature space.
    pub head: [f64; 3],
    /// Positioned by an IK solver this pass.
    pub ik_solved: bool,
    /// Fully evaluated.
    pub done: bool,
}

/// Evaluated geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GeometryResult {
    /// Vertex count after modifiers.
    pub vertex_count: u64,
    /// Accumulated offset applied by modifiers.
    pub offset: [f64; 3],
    /// Deformed by an armature.
    pub deformed: bool,
}

impl EvaluatedId {
    /// Empty state for `id`.
    pub fn new(id: DataBlockId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Read an evaluated property.
    ///
    /// `world_location.x|y|z` and `frame` address results; every other path
    /// reads the evaluated data copy.
    pub fn property(&self, path: &str) -> Option<f64> {
        match path {
            "world_location.x" => Some(self.world_location[0]),
            "world_location.y" => Some(self.world_location[1]),
            "world_location.z" => Some(self.world_location[2]),
            "frame" => Some(self.frame),
            _ => self.data.as_ref()?.get_property(path),
        }
    }

    /// Write a property of the evaluated data copy. Without a copy this is a
    /// no-op and returns `false`.
    pub fn set_property(&mut self, path: &str, value: f64) -> bool {
        match self.data.as_mut() {
            Some(data) => {
                data.set_property(path, value);
                true
            }
            None => false,
        }
    }

    /// Head of `bone` in world space.
    pub fn bone_world_head(&self, bone: &str) -> Option<[f64; 3]> {
        let head = self.pose.get(bone)?.head;
        Some(add(self.world_location, head))
    }
}

pub(crate) fn add(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn length(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}
