//! Pose relations of armature objects.
//!
//! Bones are chained parent to child. A child normally waits for its parent's
//! `BoneDone`; when both belong to IK chains ending at the same root it only
//! waits for `BoneReady`, because the shared solver runs between the two and
//! waiting for `BoneDone` would close a loop through it.

use indexmap::IndexMap;

use super::pipeline::RelationFilter;
use super::relations::RelationBuilder;
use super::root_map::{ik_chains, BoneRootLookup, IkChain, NaiveRootWalker, RootPChanMap};
use crate::config::RootLookup;
use crate::data::{Armature, DataBlockId, Object};
use crate::node::{ComponentKey, NodeType, OperationCode, OperationKey};

impl RelationBuilder<'_> {
    pub(super) fn build_rig(
        &mut self,
        id: DataBlockId,
        armature_id: DataBlockId,
        object: &Object,
        armature: &Armature,
    ) {
        let pose = |code| OperationKey::new(id, NodeType::EvalPose, code);
        let bone = |name: &str, code| OperationKey::bone(id, name, code);

        self.data_flow(
            ComponentKey::new(armature_id, NodeType::Parameters),
            pose(OperationCode::PoseInit),
            "Armature data",
        );
        self.data_flow(
            ComponentKey::new(id, NodeType::Transform),
            pose(OperationCode::PoseInit),
            "Armature transform",
        );
        self.ordering(
            pose(OperationCode::PoseInit),
            pose(OperationCode::PoseInitIk),
            "Pose init IK",
        );
        self.ordering(
            pose(OperationCode::PoseInitIk),
            pose(OperationCode::PoseCleanup),
            "Pose cleanup",
        );
        self.ordering(
            pose(OperationCode::PoseCleanup),
            pose(OperationCode::PoseDone),
            "Pose done",
        );

        let lookup: Box<dyn BoneRootLookup + '_> = match self.root_lookup {
            RootLookup::Precomputed => Box::new(RootPChanMap::build(armature, &object.pose)),
            RootLookup::Naive => Box::new(NaiveRootWalker::new(armature, &object.pose)),
        };

        for (name, data) in &armature.bones {
            self.data_flow(
                pose(OperationCode::PoseInit),
                bone(name, OperationCode::BoneLocal),
                "Pose init",
            );
            self.data_flow(
                bone(name, OperationCode::BoneLocal),
                bone(name, OperationCode::BonePoseParent),
                "Bone local",
            );
            if let Some(parent) = data.parent.as_deref().filter(|p| armature.has_bone(p)) {
                let code = if lookup.has_common_root(name, parent) {
                    OperationCode::BoneReady
                } else {
                    OperationCode::BoneDone
                };
                self.data_flow(
                    bone(parent, code),
                    bone(name, OperationCode::BonePoseParent),
                    "Parent bone",
                );
            }

            let has_constraints = self.has_operation(&bone(name, OperationCode::BoneConstraints));
            if has_constraints {
                self.data_flow(
                    bone(name, OperationCode::BonePoseParent),
                    bone(name, OperationCode::BoneConstraints),
                    "Bone constraints",
                );
                self.data_flow(
                    bone(name, OperationCode::BoneConstraints),
                    bone(name, OperationCode::BoneReady),
                    "Bone ready",
                );
            } else {
                self.data_flow(
                    bone(name, OperationCode::BonePoseParent),
                    bone(name, OperationCode::BoneReady),
                    "Bone ready",
                );
            }
            self.data_flow(
                bone(name, OperationCode::BoneReady),
                bone(name, OperationCode::BoneDone),
                "Bone done",
            );
            self.data_flow(
                bone(name, OperationCode::BoneDone),
                pose(OperationCode::PoseDone),
                "Pose done",
            );
        }

        let mut solvers: IndexMap<String, Vec<IkChain>> = IndexMap::new();
        for chain in ik_chains(armature, &object.pose) {
            if let Some(root) = chain.root() {
                solvers.entry(root.to_string()).or_default().push(chain);
            }
        }
        for (root, chains) in &solvers {
            let solver = pose(OperationCode::PoseIkSolver).with_name(root.clone());
            self.ordering(pose(OperationCode::PoseInitIk), solver.clone(), "IK init");
            self.ordering(solver.clone(), pose(OperationCode::PoseCleanup), "IK cleanup");
            for chain in chains {
                for member in &chain.bones {
                    self.data_flow(bone(member, OperationCode::BoneReady), solver.clone(), "IK chain");
                    self.data_flow(solver.clone(), bone(member, OperationCode::BoneDone), "IK result");
                }
                let Some((target, subtarget)) = &chain.target else {
                    continue;
                };
                self.build_object(*target);
                if !self.filter.contains(RelationFilter::CONSTRAINTS) {
                    continue;
                }
                match subtarget {
                    Some(target_bone) if *target == id => {
                        self.data_flow(
                            bone(target_bone, OperationCode::BoneReady),
                            solver.clone(),
                            "IK target bone",
                        );
                    }
                    _ if *target == id => {}
                    Some(target_bone) if self.has_component(*target, NodeType::Bone, target_bone) => {
                        self.data_flow(
                            ComponentKey::named(*target, NodeType::Bone, target_bone.clone()),
                            solver.clone(),
                            "IK target bone",
                        );
                    }
                    _ => {
                        self.data_flow(
                            ComponentKey::new(*target, NodeType::Transform),
                            solver.clone(),
                            "IK target",
                        );
                    }
                }
            }
        }

        for (name, channel) in &object.pose {
            if !armature.has_bone(name) {
                continue;
            }
            for constraint in channel.constraints.iter().filter(|c| !c.is_ik()) {
                let Some((target, subtarget)) = constraint.target() else {
                    continue;
                };
                self.build_object(target);
                if !self.filter.contains(RelationFilter::CONSTRAINTS) {
                    continue;
                }
                let to = bone(name, OperationCode::BoneConstraints);
                match subtarget {
                    Some(target_bone) if target == id && !constraint.reads_geometry() => {
                        self.data_flow(
                            bone(target_bone, OperationCode::BoneDone),
                            to,
                            constraint.type_name(),
                        );
                    }
                    _ if target == id => {}
                    _ => {
                        let source = self.constraint_source(target, subtarget, constraint);
                        self.data_flow(source, to, constraint.type_name());
                    }
                }
            }
        }
    }

    fn has_operation(&self, key: &OperationKey) -> bool {
        self.graph.find_operation(key).is_some()
    }
}
