//! Pose nodes of armature objects.

use indexmap::IndexMap;

use super::nodes::NodeBuilder;
use super::ops;
use super::root_map::{ik_chains, IkChain};
use crate::data::{Armature, DataBlockId, Object};
use crate::node::{NodeType, OperationCode, OperationKey};

impl NodeBuilder<'_> {
    /// Pose component plus one component per bone.
    ///
    /// IK chains sharing a root are solved by a single solver operation named
    /// after that root.
    pub(super) fn build_rig(&mut self, id: DataBlockId, object: &Object, armature: &Armature) {
        let pose = |code| OperationKey::new(id, NodeType::EvalPose, code);
        self.add_operation(pose(OperationCode::PoseInit), Some(ops::pose_init()));
        self.add_operation(pose(OperationCode::PoseInitIk), None);

        let mut solvers: IndexMap<String, Vec<IkChain>> = IndexMap::new();
        for chain in ik_chains(armature, &object.pose) {
            if let Some(root) = chain.root() {
                solvers.entry(root.to_string()).or_default().push(chain);
            }
        }
        for (root, chains) in solvers {
            self.add_operation(
                pose(OperationCode::PoseIkSolver).with_name(root),
                Some(ops::ik_solver(chains)),
            );
        }
        self.add_operation(pose(OperationCode::PoseCleanup), None);
        self.add_operation(pose(OperationCode::PoseDone), None);

        for (name, bone) in &armature.bones {
            let key = |code| OperationKey::bone(id, name, code);
            self.add_operation(
                key(OperationCode::BoneLocal),
                Some(ops::bone_local(name.clone())),
            );
            self.add_operation(
                key(OperationCode::BonePoseParent),
                Some(ops::bone_pose_parent(name.clone(), bone.parent.clone())),
            );
            let constraints: Vec<_> = object
                .pose
                .get(name)
                .map(|channel| {
                    channel
                        .constraints
                        .iter()
                        .filter(|c| !c.is_ik())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            if !constraints.is_empty() {
                self.add_operation(
                    key(OperationCode::BoneConstraints),
                    Some(ops::bone_constraints(name.clone(), constraints)),
                );
            }
            self.add_operation(key(OperationCode::BoneReady), None);
            self.add_operation(
                key(OperationCode::BoneDone),
                Some(ops::bone_done(name.clone())),
            );
        }

        for (name, channel) in &object.pose {
            for constraint in &channel.constraints {
                let Some((target, bone)) = constraint.target() else {
                    continue;
                };
                if !self.reference(id, target, constraint.type_name()) {
                    continue;
                }
                if target != id {
                    self.build_object(target, false);
                }
                if let Some(bone) = bone {
                    self.check_bone(target, bone, name);
                }
            }
        }
    }
}
