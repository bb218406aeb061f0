//! Armature data: the rest bone hierarchy.

use indexmap::IndexMap;

/// Bone hierarchy of an armature, keyed by bone name in creation order.
#[derive(Debug, Clone, Default)]
pub struct Armature {
    /// Bones by name.
    pub bones: IndexMap<String, Bone>,
}

/// A bone in rest position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bone {
    /// Parent bone name.
    pub parent: Option<String>,
    /// Rest head offset from the parent's head (or the armature origin).
    pub head: [f64; 3],
}

impl Armature {
    /// Add a bone. The parent should already exist.
    pub fn with_bone(mut self, name: &str, parent: Option<&str>, head: [f64; 3]) -> Self {
        self.bones.insert(
            name.to_string(),
            Bone {
                parent: parent.map(str::to_string),
                head,
            },
        );
        self
    }

    /// Parent of `bone`, if both exist.
    pub fn parent_of(&self, bone: &str) -> Option<&str> {
        self.bones.get(bone)?.parent.as_deref()
    }

    /// Whether the armature has a bone named `bone`.
    pub fn has_bone(&self, bone: &str) -> bool {
        self.bones.contains_key(bone)
    }

    /// Bones in the IK chain driven by an IK constraint on `bone`, walking
    /// towards the root. The last element is the chain root.
    ///
    /// With `use_tip` the constrained bone is part of the chain, otherwise the
    /// chain starts at its parent. A `chain_len` of `0` walks to the top of the
    /// hierarchy; chains are capped at 255 bones.
    pub fn ik_chain(&self, bone: &str, chain_len: u32, use_tip: bool) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = if use_tip {
            self.bones.get_key_value(bone).map(|(name, _)| name.as_str())
        } else {
            self.parent_of(bone)
        };
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            chain.push(name);
            if chain.len() as u32 == chain_len || chain.len() > 255 {
                break;
            }
            current = self.parent_of(name);
        }
        chain
    }
}
