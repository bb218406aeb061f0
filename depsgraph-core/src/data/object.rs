//! Objects, constraints and modifiers.

use indexmap::IndexMap;

use super::DataBlockId;

/// An object: a transform plus optional data (mesh or armature), constraint
/// and modifier stacks, and instancing.
#[derive(Debug, Clone, Default)]
pub struct Object {
    /// Local location.
    pub location: [f64; 3],

    /// Parent relationship, if any.
    pub parent: Option<Parent>,

    /// Object data: a mesh or an armature.
    pub data: Option<DataBlockId>,

    /// Object-level constraint stack.
    pub constraints: Vec<Constraint>,

    /// Geometry modifier stack, evaluated in order.
    pub modifiers: Vec<Modifier>,

    /// Object-level material slots.
    pub materials: Vec<DataBlockId>,

    /// Pose channels by bone name (armature objects only).
    pub pose: IndexMap<String, PoseChannel>,

    /// Collection instanced at this object's location.
    pub instance_collection: Option<DataBlockId>,

    /// Particle systems instancing other data.
    pub particle_systems: Vec<ParticleSystem>,
}

impl Object {
    /// An object at `location` with nothing else set.
    pub fn at(location: [f64; 3]) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    /// Parent this object to another object.
    pub fn with_parent(mut self, parent: DataBlockId) -> Self {
        self.parent = Some(Parent {
            object: parent,
            kind: ParentKind::Object,
        });
        self
    }

    /// Set the object data.
    pub fn with_data(mut self, data: DataBlockId) -> Self {
        self.data = Some(data);
        self
    }

    /// Append a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Append a modifier.
    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Pose channel for `bone`, created on demand.
    pub fn pose_channel_mut(&mut self, bone: &str) -> &mut PoseChannel {
        self.pose.entry(bone.to_string()).or_default()
    }
}

/// How an object is attached to its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Parent {
    /// The parent object.
    pub object: DataBlockId,
    /// Parent type.
    pub kind: ParentKind,
}

/// Parent type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParentKind {
    /// Follow the parent's transform.
    Object,
    /// Follow a bone of an armature parent.
    Bone(String),
    /// Follow the parent's evaluated geometry.
    Vertex,
}

/// Per-bone pose state authored on an armature object.
#[derive(Debug, Clone, Default)]
pub struct PoseChannel {
    /// Pose-space offset applied on top of the rest position.
    pub location: [f64; 3],
    /// Bone constraint stack.
    pub constraints: Vec<Constraint>,
}

/// Constraint types.
///
/// Targets are an object and, for armatures, an optional bone (`subtarget`).
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Snap to the target's location.
    CopyLocation {
        /// Target object.
        target: DataBlockId,
        /// Target bone.
        subtarget: Option<String>,
    },
    /// Stay within `distance` of the target.
    LimitDistance {
        /// Target object.
        target: DataBlockId,
        /// Target bone.
        subtarget: Option<String>,
        /// Maximum distance.
        distance: f64,
    },
    /// Project onto the target's surface; reads the target's geometry.
    ShrinkWrap {
        /// Target object with geometry.
        target: DataBlockId,
    },
    /// Inverse kinematics. Only meaningful on bones.
    Ik {
        /// Target object; `None` means targetless IK.
        target: Option<DataBlockId>,
        /// Target bone.
        subtarget: Option<String>,
        /// Bones in the chain, `0` for "up to the root".
        chain_len: u32,
        /// Whether the constrained bone itself is part of the chain.
        use_tip: bool,
    },
}

impl Constraint {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Constraint::CopyLocation { .. } => "Copy Location",
            Constraint::LimitDistance { .. } => "Limit Distance",
            Constraint::ShrinkWrap { .. } => "Shrinkwrap",
            Constraint::Ik { .. } => "IK",
        }
    }

    /// Target object and bone, if the constraint has one.
    pub fn target(&self) -> Option<(DataBlockId, Option<&str>)> {
        match self {
            Constraint::CopyLocation { target, subtarget }
            | Constraint::LimitDistance {
                target, subtarget, ..
            } => Some((*target, subtarget.as_deref())),
            Constraint::ShrinkWrap { target } => Some((*target, None)),
            Constraint::Ik {
                target, subtarget, ..
            } => target.map(|target| (target, subtarget.as_deref())),
        }
    }

    /// Whether the constraint reads the target's geometry rather than its transform.
    pub fn reads_geometry(&self) -> bool {
        matches!(self, Constraint::ShrinkWrap { .. })
    }

    /// Whether this is an IK constraint.
    pub fn is_ik(&self) -> bool {
        matches!(self, Constraint::Ik { .. })
    }
}

/// Geometry modifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    /// Subdivide `levels` times.
    Subdivision {
        /// Subdivision levels.
        levels: u32,
    },
    /// Repeat the geometry, optionally offset by another object's transform.
    Array {
        /// Number of copies.
        count: u32,
        /// Offset object.
        offset_object: Option<DataBlockId>,
    },
    /// Deform by an armature object's pose.
    Armature {
        /// Armature object.
        object: DataBlockId,
    },
    /// Combine with another object's geometry.
    Boolean {
        /// Operand object.
        object: DataBlockId,
    },
    /// Edit a vertex group of the object's own mesh.
    VertexWeight {
        /// Vertex group name.
        group: String,
    },
    /// Geometry generated by a node tree.
    Nodes {
        /// Geometry node tree.
        tree: DataBlockId,
    },
}

impl Modifier {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Modifier::Subdivision { .. } => "Subdivision",
            Modifier::Array { .. } => "Array",
            Modifier::Armature { .. } => "Armature",
            Modifier::Boolean { .. } => "Boolean",
            Modifier::VertexWeight { .. } => "VertexWeight",
            Modifier::Nodes { .. } => "Nodes",
        }
    }
}

/// A particle system instancing an object or a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystem {
    /// System name.
    pub name: String,
    /// What is instanced.
    pub instance: ParticleInstance,
    /// Number of particles.
    pub count: u32,
}

/// What a particle system instances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParticleInstance {
    /// One object per particle.
    Object(DataBlockId),
    /// One collection per particle.
    Collection(DataBlockId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_targets() {
        let ik = Constraint::Ik {
            target: None,
            subtarget: None,
            chain_len: 2,
            use_tip: true,
        };
        assert_eq!(ik.target(), None);

        let copy = Constraint::CopyLocation {
            target: DataBlockId::new(4),
            subtarget: Some("hand".into()),
        };
        assert_eq!(copy.target(), Some((DataBlockId::new(4), Some("hand"))));
        assert!(!copy.reads_geometry());
    }
}
