//! Node Builder
//!
//! First pass of a build: walks the root set a pipeline chooses and creates
//! the ID, component and operation nodes of every reachable data-block.
//!
//! Every data-block is built at most once, keyed by identity, however many
//! objects, collections or particle systems reference it. Dangling references
//! and unsupported types become diagnostics on the graph and the walk goes on.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::ops;
use super::pipeline::{RelationFilter, Visibility};
use crate::data::{
    DataBlock, DataBlockId, DataBlockKind, DataStore, DriverTarget, IdType, Modifier, Object,
    ParentKind, ParticleInstance,
};
use crate::error::BuildError;
use crate::graph::{BuildStage, Depsgraph};
use crate::node::{NodeType, OperationCallback, OperationCode, OperationKey};

/// Creates nodes for a pipeline.
pub struct NodeBuilder<'a> {
    pub(super) store: &'a DataStore,
    pub(super) graph: &'a mut Depsgraph,
    pub(super) filter: RelationFilter,
    built: HashSet<DataBlockId>,
    walked: HashSet<(DataBlockId, bool)>,
}

impl<'a> NodeBuilder<'a> {
    /// Builder adding nodes to `graph`.
    pub fn new(store: &'a DataStore, graph: &'a mut Depsgraph, filter: RelationFilter) -> Self {
        Self {
            store,
            graph,
            filter,
            built: HashSet::new(),
            walked: HashSet::new(),
        }
    }

    /// The data being built from.
    pub fn store(&self) -> &'a DataStore {
        self.store
    }

    /// Whether `id` was visited by this builder.
    pub fn is_built(&self, id: DataBlockId) -> bool {
        self.built.contains(&id)
    }

    pub(super) fn add_operation(&mut self, key: OperationKey, callback: Option<OperationCallback>) {
        self.graph.add_operation(key, callback);
    }

    fn diagnostic(&mut self, error: BuildError) {
        warn!(%error, "node build diagnostic");
        self.graph.push_diagnostic(BuildStage::Nodes, error);
    }

    /// Check that `from` may reference `to`. Missing targets are reported.
    pub(super) fn reference(&mut self, from: DataBlockId, to: DataBlockId, what: &str) -> bool {
        if self.store.contains(to) {
            return true;
        }
        self.diagnostic(BuildError::DanglingReference {
            from,
            to,
            what: what.to_string(),
        });
        false
    }

    /// Check that armature object `object` has `bone`. Missing bones are reported.
    pub(super) fn check_bone(&mut self, object: DataBlockId, bone: &str, what: &str) -> bool {
        let armature = self
            .store
            .read(object, |block| block.as_object().and_then(|o| o.data))
            .flatten();
        let exists = armature
            .and_then(|armature| {
                self.store
                    .read(armature, |block| block.as_armature().map(|a| a.has_bone(bone)))
            })
            .flatten()
            .unwrap_or(false);
        if !exists {
            self.diagnostic(BuildError::MissingBone {
                id: object,
                bone: bone.to_string(),
                what: what.to_string(),
            });
        }
        exists
    }

    /// First visit of `id`: create its ID node with the components every
    /// data-block has. Returns the block on first visit of an evaluable type.
    fn begin(&mut self, id: DataBlockId) -> Option<DataBlock> {
        if !self.built.insert(id) {
            return None;
        }
        let store = self.store;
        let shared = store.get(id)?;
        let block = shared.read().clone();
        let id_type = block.id_type();
        if !id_type.is_evaluable() {
            self.diagnostic(BuildError::UnsupportedType { id, id_type });
            return None;
        }

        debug!(%id, name = %block.name, %id_type, "build id");
        self.graph.add_id_node(shared);
        self.add_operation(
            OperationKey::new(id, NodeType::CopyOnEval, OperationCode::CopyOnEval),
            Some(ops::copy_on_eval()),
        );
        self.add_operation(
            OperationKey::new(id, NodeType::Parameters, OperationCode::ParametersEval),
            None,
        );
        self.build_animdata(&block);
        Some(block)
    }

    fn mark_visible(&mut self, id: DataBlockId) {
        if let Some(node) = self.graph.id_node_mut(id) {
            node.visible = true;
        }
    }

    /// Build any data-block reached as a dependency.
    pub fn build_id(&mut self, id: DataBlockId) {
        let Some(id_type) = self.store.id_type(id) else {
            return;
        };
        match id_type {
            IdType::Scene => self.build_scene_parameters(id),
            IdType::Object => self.build_object(id, false),
            IdType::Mesh => self.build_mesh(id),
            IdType::Armature => self.build_armature(id),
            IdType::Material => self.build_material(id),
            IdType::NodeTree => self.build_node_tree(id),
            IdType::Collection => self.build_collection(id, Visibility::Instanced),
            IdType::Image => self.build_image(id),
            IdType::Text | IdType::Other(_) => {
                self.begin(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Scenes and collections
    // ------------------------------------------------------------------

    /// Build a scene: its clock, its collection hierarchy and its camera.
    pub fn build_scene(&mut self, scene: DataBlockId, visibility: Visibility) {
        self.build_scene_parameters(scene);
        let Some(data) = self
            .store
            .read(scene, |block| block.as_scene().cloned())
            .flatten()
        else {
            return;
        };
        if let Some(collection) = data.master_collection {
            if self.reference(scene, collection, "master collection") {
                self.build_collection(collection, visibility);
            }
        }
        if let Some(camera) = data.camera {
            if self.reference(scene, camera, "camera") {
                self.build_object(camera, true);
            }
        }
    }

    /// Build only the scene ID and its time source.
    pub fn build_scene_parameters(&mut self, scene: DataBlockId) {
        if self.begin(scene).is_none() {
            return;
        }
        self.add_operation(
            OperationKey::new(scene, NodeType::TimeSource, OperationCode::TimeSource),
            Some(ops::time_source()),
        );
    }

    /// Build the scene's compositor tree and what it references.
    pub fn build_compositor(&mut self, scene: DataBlockId) {
        let tree = self
            .store
            .read(scene, |block| block.as_scene().and_then(|s| s.compositor_tree))
            .flatten();
        if let Some(tree) = tree {
            if self.reference(scene, tree, "compositor") {
                self.build_node_tree(tree);
            }
        }
    }

    /// Build a collection and, recursively, its objects and children.
    pub fn build_collection(&mut self, collection: DataBlockId, visibility: Visibility) {
        let Some(data) = self
            .store
            .read(collection, |block| block.as_collection().cloned())
            .flatten()
        else {
            return;
        };
        if visibility.skips(data.hide_viewport, data.hide_render) {
            debug!(%collection, ?visibility, "hidden collection skipped");
            return;
        }
        self.begin(collection);
        if !self.walked.insert((collection, visibility.marks_visible())) {
            return;
        }
        for object in data.objects {
            if self.reference(collection, object, "collection object") {
                self.build_object(object, visibility.marks_visible());
            }
        }
        for child in data.children {
            if self.reference(collection, child, "child collection") {
                self.build_collection(child, visibility);
            }
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Build an object and everything it depends on.
    ///
    /// `visible` marks objects reached through a visible collection; an object
    /// first reached as a dependency is marked once it is also reached that way.
    pub fn build_object(&mut self, id: DataBlockId, visible: bool) {
        let first = self.begin(id);
        if visible {
            self.mark_visible(id);
        }
        let Some(block) = first else {
            return;
        };
        let Some(object) = block.as_object().cloned() else {
            return;
        };

        self.build_transform(id, &object);
        self.build_object_data(id, &object);
        self.build_modifiers(id, &object);
        self.build_shading(id, &object);
        if self.filter.contains(RelationFilter::INSTANCING) {
            self.build_instancing(id, &object);
        }
    }

    fn build_transform(&mut self, id: DataBlockId, object: &Object) {
        let key = |code| OperationKey::new(id, NodeType::Transform, code);
        self.add_operation(key(OperationCode::TransformInit), Some(ops::transform_init()));
        self.add_operation(key(OperationCode::TransformLocal), Some(ops::transform_local()));
        let parent = object
            .parent
            .clone()
            .filter(|parent| self.store.contains(parent.object));
        self.add_operation(
            key(OperationCode::TransformParent),
            Some(ops::transform_parent(parent)),
        );
        if !object.constraints.is_empty() {
            self.add_operation(
                key(OperationCode::TransformConstraints),
                Some(ops::transform_constraints(object.constraints.clone())),
            );
        }
        self.add_operation(key(OperationCode::TransformFinal), Some(ops::transform_final()));

        if let Some(parent) = &object.parent {
            if self.reference(id, parent.object, "parent") {
                self.build_object(parent.object, false);
                if let ParentKind::Bone(bone) = &parent.kind {
                    self.check_bone(parent.object, bone, "parent bone");
                }
            }
        }
        for constraint in &object.constraints {
            let Some((target, bone)) = constraint.target() else {
                continue;
            };
            if self.reference(id, target, constraint.type_name()) {
                self.build_object(target, false);
                if let Some(bone) = bone {
                    self.check_bone(target, bone, constraint.type_name());
                }
            }
        }
    }

    fn build_object_data(&mut self, id: DataBlockId, object: &Object) {
        let Some(data) = object.data else {
            return;
        };
        if !self.reference(id, data, "object data") {
            return;
        }
        self.build_id(data);
        match self.store.id_type(data) {
            Some(IdType::Mesh) => {
                let key = |code| OperationKey::new(id, NodeType::Geometry, code);
                self.add_operation(
                    key(OperationCode::GeometryEvalInit),
                    Some(ops::geometry_init(data)),
                );
                self.add_operation(
                    key(OperationCode::GeometryEval),
                    Some(ops::geometry_eval(object.modifiers.clone())),
                );
                self.add_operation(key(OperationCode::GeometryEvalDone), None);
            }
            Some(IdType::Armature) => {
                let armature = self
                    .store
                    .read(data, |block| block.as_armature().cloned())
                    .flatten()
                    .unwrap_or_default();
                self.build_rig(id, object, &armature);
            }
            _ => {}
        }
    }

    fn build_modifiers(&mut self, id: DataBlockId, object: &Object) {
        for modifier in &object.modifiers {
            let target = match modifier {
                Modifier::Armature { object } | Modifier::Boolean { object } => Some(*object),
                Modifier::Array { offset_object, .. } => *offset_object,
                Modifier::Nodes { tree } => Some(*tree),
                Modifier::Subdivision { .. } | Modifier::VertexWeight { .. } => None,
            };
            if let Some(target) = target {
                if self.reference(id, target, modifier.type_name()) {
                    self.build_id(target);
                }
            }
        }
    }

    /// Material slots of the object and of its mesh.
    pub(super) fn materials(store: &DataStore, object: &Object) -> Vec<DataBlockId> {
        let mut materials = object.materials.clone();
        if let Some(data) = object.data {
            let mesh_materials = store
                .read(data, |block| block.as_mesh().map(|m| m.materials.clone()))
                .flatten()
                .unwrap_or_default();
            for material in mesh_materials {
                if !materials.contains(&material) {
                    materials.push(material);
                }
            }
        }
        materials
    }

    fn build_shading(&mut self, id: DataBlockId, object: &Object) {
        let materials = Self::materials(self.store, object);
        if materials.is_empty() {
            return;
        }
        self.add_operation(
            OperationKey::new(id, NodeType::Shading, OperationCode::ShadingUpdate),
            Some(ops::shading_update()),
        );
        for material in materials {
            if self.reference(id, material, "material") {
                self.build_material(material);
            }
        }
    }

    /// Objects instanced by an object, with the number of copies each.
    pub(super) fn instance_sources(store: &DataStore, object: &Object) -> Vec<(DataBlockId, u32)> {
        let mut sources = Vec::new();
        if let Some(collection) = object.instance_collection {
            for member in collection_objects(store, collection) {
                sources.push((member, 1));
            }
        }
        for system in &object.particle_systems {
            match system.instance {
                ParticleInstance::Object(member) => sources.push((member, system.count)),
                ParticleInstance::Collection(collection) => {
                    for member in collection_objects(store, collection) {
                        sources.push((member, system.count));
                    }
                }
            }
        }
        sources
    }

    fn build_instancing(&mut self, id: DataBlockId, object: &Object) {
        let mut collections = Vec::new();
        let mut objects = Vec::new();
        collections.extend(object.instance_collection);
        for system in &object.particle_systems {
            match system.instance {
                ParticleInstance::Object(member) => objects.push(member),
                ParticleInstance::Collection(collection) => collections.push(collection),
            }
        }
        if collections.is_empty() && objects.is_empty() {
            return;
        }

        let sources = Self::instance_sources(self.store, object);
        self.add_operation(
            OperationKey::new(id, NodeType::Instancing, OperationCode::Instancer),
            Some(ops::instancer(sources)),
        );
        for collection in collections {
            if self.reference(id, collection, "instanced collection") {
                self.build_collection(collection, Visibility::Instanced);
            }
        }
        for member in objects {
            if self.reference(id, member, "particle object") {
                self.build_object(member, false);
            }
        }
    }

    // ------------------------------------------------------------------
    // Other data
    // ------------------------------------------------------------------

    /// Build mesh data.
    pub fn build_mesh(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        self.add_operation(
            OperationKey::new(id, NodeType::Geometry, OperationCode::GeometryEval),
            Some(ops::mesh_eval()),
        );
        if let DataBlockKind::Mesh(mesh) = &block.kind {
            for &material in &mesh.materials {
                if self.reference(id, material, "mesh material") {
                    self.build_material(material);
                }
            }
        }
    }

    /// Build armature data. The pose lives on the object.
    pub fn build_armature(&mut self, id: DataBlockId) {
        self.begin(id);
    }

    /// Build a material and its shader tree.
    pub fn build_material(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        self.add_operation(
            OperationKey::new(id, NodeType::Shading, OperationCode::MaterialUpdate),
            Some(ops::shading_update()),
        );
        if let Some(tree) = block.as_material().and_then(|m| m.tree) {
            if self.reference(id, tree, "material node tree") {
                self.build_node_tree(tree);
            }
        }
    }

    /// Build a node tree and every data-block its nodes reference.
    pub fn build_node_tree(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        self.add_operation(
            OperationKey::new(id, NodeType::NTreeOutput, OperationCode::NTreeOutput),
            Some(ops::ntree_output()),
        );
        let Some(tree) = block.as_node_tree() else {
            return;
        };
        for (name, node) in &tree.nodes {
            if let Some(referenced) = node.kind.referenced_id() {
                if self.reference(id, referenced, name) {
                    self.build_id(referenced);
                }
            }
        }
    }

    /// Build an image.
    pub fn build_image(&mut self, id: DataBlockId) {
        self.begin(id);
    }

    /// Animation component and one driver operation per driven property.
    fn build_animdata(&mut self, block: &DataBlock) {
        let Some(anim) = &block.anim else {
            return;
        };
        let id = block.id;
        if !anim.fcurves.is_empty() {
            self.add_operation(
                OperationKey::new(id, NodeType::Animation, OperationCode::AnimationEval),
                Some(ops::animation_eval()),
            );
        }
        for driver in &anim.drivers {
            self.add_operation(
                OperationKey::new(id, NodeType::Parameters, OperationCode::Driver)
                    .with_name(driver.property.clone()),
                Some(ops::driver(driver.property.clone())),
            );
            for variable in &driver.variables {
                if let DriverTarget::Property { id: target, .. } = &variable.target {
                    if *target != id && self.reference(id, *target, &variable.name) {
                        self.build_id(*target);
                    }
                }
            }
        }
    }
}

/// Objects of a collection and its children, depth first, each once.
pub(super) fn collection_objects(store: &DataStore, collection: DataBlockId) -> Vec<DataBlockId> {
    let mut objects = Vec::new();
    let mut stack = vec![collection];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        let Some(data) = store
            .read(current, |block| block.as_collection().cloned())
            .flatten()
        else {
            continue;
        };
        for object in data.objects {
            if store.contains(object) && !objects.contains(&object) {
                objects.push(object);
            }
        }
        stack.extend(data.children.into_iter().rev());
    }
    objects
}
