//! Bone root lookup.
//!
//! Bones that belong to IK chains ending at the same root bone are solved
//! together, so a child of such a bone may start as soon as its parent is
//! ready instead of waiting for the parent to be fully done. Answering "do
//! these two bones share a root" by walking chains is O(depth) per query;
//! [`RootPChanMap`] precomputes it once per armature and per relation build.
//!
//! The map is scratch state of one relation build. It is created inside the
//! rig pass and handed down as a parameter, never stored globally.

use std::collections::HashMap;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::data::{Armature, Constraint, DataBlockId, PoseChannel};

/// Answers whether two bones share an IK root.
pub trait BoneRootLookup {
    /// Whether some IK chain containing `a` and some chain containing `b`
    /// end at the same root bone.
    fn has_common_root(&self, a: &str, b: &str) -> bool;
}

/// One IK chain of an armature.
#[derive(Debug, Clone, PartialEq)]
pub struct IkChain {
    /// Bone carrying the IK constraint.
    pub owner: String,
    /// Chain bones from the tip towards the root.
    pub bones: Vec<String>,
    /// Target object and bone.
    pub target: Option<(DataBlockId, Option<String>)>,
}

impl IkChain {
    /// The chain's root bone.
    pub fn root(&self) -> Option<&str> {
        self.bones.last().map(String::as_str)
    }

    /// The bone moved onto the target.
    pub fn tip(&self) -> Option<&str> {
        self.bones.first().map(String::as_str)
    }
}

/// Every IK chain of an armature, in bone order.
pub fn ik_chains(armature: &Armature, pose: &IndexMap<String, PoseChannel>) -> Vec<IkChain> {
    let mut chains = Vec::new();
    for (bone, channel) in pose {
        if !armature.has_bone(bone) {
            continue;
        }
        for constraint in &channel.constraints {
            if let Constraint::Ik {
                target,
                subtarget,
                chain_len,
                use_tip,
            } = constraint
            {
                let bones: Vec<String> = armature
                    .ik_chain(bone, *chain_len, *use_tip)
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                if bones.is_empty() {
                    continue;
                }
                chains.push(IkChain {
                    owner: bone.clone(),
                    bones,
                    target: target.map(|target| (target, subtarget.clone())),
                });
            }
        }
    }
    chains
}

/// Precomputed `bone -> roots` table.
#[derive(Debug, Clone, Default)]
pub struct RootPChanMap {
    roots: HashMap<String, SmallVec<[String; 2]>>,
}

impl RootPChanMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table for an armature.
    pub fn build(armature: &Armature, pose: &IndexMap<String, PoseChannel>) -> Self {
        let mut map = Self::new();
        for chain in ik_chains(armature, pose) {
            let Some(root) = chain.root() else {
                continue;
            };
            for bone in &chain.bones {
                map.add_bone(bone, root);
            }
        }
        map
    }

    /// Record that `bone` is in a chain ending at `root`.
    pub fn add_bone(&mut self, bone: &str, root: &str) {
        let roots = self.roots.entry(bone.to_string()).or_default();
        if !roots.iter().any(|r| r == root) {
            roots.push(root.to_string());
        }
    }

    /// Roots of the chains containing `bone`.
    pub fn roots(&self, bone: &str) -> &[String] {
        self.roots.get(bone).map(|roots| roots.as_slice()).unwrap_or(&[])
    }
}

impl BoneRootLookup for RootPChanMap {
    fn has_common_root(&self, a: &str, b: &str) -> bool {
        let roots_b = self.roots(b);
        self.roots(a).iter().any(|root| roots_b.contains(root))
    }
}

/// Reference lookup that walks the chains on every query.
#[derive(Debug, Clone, Copy)]
pub struct NaiveRootWalker<'a> {
    armature: &'a Armature,
    pose: &'a IndexMap<String, PoseChannel>,
}

impl<'a> NaiveRootWalker<'a> {
    /// Walker over an armature and its pose channels.
    pub fn new(armature: &'a Armature, pose: &'a IndexMap<String, PoseChannel>) -> Self {
        Self { armature, pose }
    }
}

impl BoneRootLookup for NaiveRootWalker<'_> {
    fn has_common_root(&self, a: &str, b: &str) -> bool {
        let chains = ik_chains(self.armature, self.pose);
        let containing = |bone: &str| {
            chains
                .iter()
                .filter(|chain| chain.bones.iter().any(|b| b == bone))
                .filter_map(IkChain::root)
                .collect::<Vec<_>>()
        };
        let roots_b = containing(b);
        containing(a).iter().any(|root| roots_b.contains(root))
    }
}
