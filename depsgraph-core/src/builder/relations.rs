//! Relation Builder
//!
//! Second pass of a build: walks the same roots as the node pass and wires
//! operations together. Only data-blocks the node pass created are visited,
//! and every data-block is visited once.
//!
//! A relation whose endpoint does not exist is skipped. If both data-blocks
//! are in the graph that means the node pass and this pass disagree, which
//! is recorded as a [`BuildError::MissingNode`] diagnostic.
//!
//! A node tree evaluates as a single `NTreeOutput` operation, so links
//! between its own nodes have nothing to order. They are only checked for
//! unknown endpoints; tree nodes that reference other data-blocks feed the
//! output operation.

use std::collections::HashSet;

use tracing::{trace, warn};

use super::nodes::NodeBuilder;
use super::pipeline::{RelationFilter, Visibility};
use crate::config::RootLookup;
use crate::data::{
    is_location_path, Constraint, DataBlock, DataBlockId, DataStore, DriverTarget, IdType,
    Modifier, Object, ParentKind, ParticleInstance, TreeNodeKind,
};
use crate::error::BuildError;
use crate::graph::{BuildStage, Depsgraph};
use crate::node::{
    ComponentKey, NodeIndex, NodeKey, NodeType, OperationCode, OperationKey, RelationFlags,
    RelationIndex, RelationKind,
};

fn key_id(key: &NodeKey) -> DataBlockId {
    match key {
        NodeKey::Component(key) => key.id,
        NodeKey::Operation(key) => key.id,
    }
}

/// Creates relations for a pipeline.
pub struct RelationBuilder<'a> {
    pub(super) store: &'a DataStore,
    pub(super) graph: &'a mut Depsgraph,
    pub(super) filter: RelationFilter,
    pub(super) root_lookup: RootLookup,
    built: HashSet<DataBlockId>,
}

impl<'a> RelationBuilder<'a> {
    /// Builder wiring the nodes already in `graph`.
    pub fn new(
        store: &'a DataStore,
        graph: &'a mut Depsgraph,
        filter: RelationFilter,
        root_lookup: RootLookup,
    ) -> Self {
        Self {
            store,
            graph,
            filter,
            root_lookup,
            built: HashSet::new(),
        }
    }

    /// The data being built from.
    pub fn store(&self) -> &'a DataStore {
        self.store
    }

    fn resolve(&self, key: &NodeKey, as_source: bool) -> Option<NodeIndex> {
        match key {
            NodeKey::Component(key) => {
                let component = self.graph.component_at(self.graph.find_component(key)?)?;
                Some(if as_source {
                    component.exit
                } else {
                    component.entry
                })
            }
            NodeKey::Operation(key) => self.graph.find_operation(key),
        }
    }

    /// Add a relation between two nodes.
    ///
    /// Components resolve to their exit anchor as a source and to their entry
    /// anchor as a target.
    pub fn add_relation(
        &mut self,
        from: impl Into<NodeKey>,
        to: impl Into<NodeKey>,
        name: &str,
        kind: RelationKind,
        flags: RelationFlags,
    ) -> Option<RelationIndex> {
        let (from, to) = (from.into(), to.into());
        let endpoints = (self.resolve(&from, true), self.resolve(&to, false));
        let (Some(source), Some(target)) = endpoints else {
            let both_built =
                self.graph.contains_id(key_id(&from)) && self.graph.contains_id(key_id(&to));
            if both_built {
                let missing = if endpoints.0.is_none() { &from } else { &to };
                warn!(relation = name, key = %missing, "relation endpoint missing");
                self.graph.push_diagnostic(
                    BuildStage::Relations,
                    BuildError::MissingNode {
                        relation: name.to_string(),
                        key: missing.to_string(),
                    },
                );
            }
            return None;
        };
        trace!(relation = name, %from, %to, "add relation");
        Some(self.graph.add_relation(source, target, kind, name, flags))
    }

    /// Data-flow relation without flags.
    pub(super) fn data_flow(
        &mut self,
        from: impl Into<NodeKey>,
        to: impl Into<NodeKey>,
        name: &str,
    ) -> Option<RelationIndex> {
        self.add_relation(from, to, name, RelationKind::DataFlow, RelationFlags::empty())
    }

    /// Ordering-only relation without flags.
    pub(super) fn ordering(
        &mut self,
        from: impl Into<NodeKey>,
        to: impl Into<NodeKey>,
        name: &str,
    ) -> Option<RelationIndex> {
        self.add_relation(from, to, name, RelationKind::OrderingOnly, RelationFlags::empty())
    }

    pub(super) fn has_component(&self, id: DataBlockId, ty: NodeType, name: &str) -> bool {
        self.graph
            .id_node(id)
            .is_some_and(|node| node.find_component(ty, name).is_some())
    }

    /// First visit of a data-block the node pass built.
    fn begin(&mut self, id: DataBlockId) -> Option<DataBlock> {
        if !self.graph.contains_id(id) || !self.built.insert(id) {
            return None;
        }
        let block = self.store.read(id, DataBlock::clone)?;
        self.build_copy_on_eval(id);
        self.build_animdata(&block);
        Some(block)
    }

    /// Wire a chain of operations of one component in order.
    fn chain(&mut self, keys: &[OperationKey], name: &str) {
        for pair in keys.windows(2) {
            self.data_flow(pair[0].clone(), pair[1].clone(), name);
        }
    }

    /// Relations of any data-block reached as a dependency.
    pub fn build_id(&mut self, id: DataBlockId) {
        let Some(id_type) = self.store.id_type(id) else {
            return;
        };
        match id_type {
            IdType::Scene => self.build_scene_parameters(id),
            IdType::Object => self.build_object(id),
            IdType::Mesh => self.build_mesh(id),
            IdType::Material => self.build_material(id),
            IdType::NodeTree => self.build_node_tree(id),
            IdType::Collection => self.build_collection(id, Visibility::Instanced),
            IdType::Armature | IdType::Image | IdType::Text | IdType::Other(_) => {
                self.begin(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-ID
    // ------------------------------------------------------------------

    /// The copy-on-eval operation runs before anything else of the ID.
    ///
    /// These relations are structural and never chosen to break a cycle.
    /// Only animation and parameters re-run when just the copy was tagged.
    fn build_copy_on_eval(&mut self, id: DataBlockId) {
        let Some(node) = self.graph.id_node(id) else {
            return;
        };
        let components: Vec<ComponentKey> = node
            .components
            .keys()
            .filter(|(ty, _)| *ty != NodeType::CopyOnEval)
            .map(|(ty, name)| ComponentKey::named(id, *ty, name.clone()))
            .collect();
        let source = ComponentKey::new(id, NodeType::CopyOnEval);
        for component in components {
            let mut flags = RelationFlags::GODMODE;
            if !matches!(component.ty, NodeType::Animation | NodeType::Parameters) {
                flags |= RelationFlags::NO_FLUSH;
            }
            self.add_relation(
                source.clone(),
                component,
                "Copy-on-eval",
                RelationKind::DataFlow,
                flags,
            );
        }
    }

    fn time_source_key(&self) -> Option<OperationKey> {
        let index = self.graph.time_source()?;
        self.graph.operation_key(index).cloned()
    }

    fn build_animdata(&mut self, block: &DataBlock) {
        let id = block.id;
        let Some(anim) = &block.anim else {
            return;
        };
        let params = ComponentKey::new(id, NodeType::Parameters);
        if self.has_component(id, NodeType::Animation, "") {
            let animation = ComponentKey::new(id, NodeType::Animation);
            if self.filter.contains(RelationFilter::ANIMATION) {
                if let Some(time) = self.time_source_key() {
                    self.data_flow(time, animation.clone(), "Time -> Animation");
                }
            }
            self.data_flow(animation, params.clone(), "Animation -> Parameters");
        }

        if !self.filter.contains(RelationFilter::DRIVERS) {
            return;
        }
        for driver in &anim.drivers {
            let driver_key = OperationKey::new(id, NodeType::Parameters, OperationCode::Driver)
                .with_name(driver.property.clone());
            for variable in &driver.variables {
                let source: Option<NodeKey> = match &variable.target {
                    DriverTarget::Time => self.time_source_key().map(Into::into),
                    DriverTarget::Property { id: target, .. } if *target == id => None,
                    DriverTarget::Property { id: target, path } => {
                        match self.store.id_type(*target) {
                            Some(IdType::Object)
                                if is_location_path(path) || path.starts_with("world_location.") =>
                            {
                                Some(ComponentKey::new(*target, NodeType::Transform).into())
                            }
                            Some(IdType::Scene) if path == "frame" => {
                                self.time_source_key().map(Into::into)
                            }
                            Some(_) => Some(ComponentKey::new(*target, NodeType::Parameters).into()),
                            None => None,
                        }
                    }
                };
                if let DriverTarget::Property { id: target, .. } = &variable.target {
                    if *target != id {
                        self.build_id(*target);
                    }
                }
                if let Some(source) = source {
                    self.data_flow(source, driver_key.clone(), &format!("Driver {}", variable.name));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Scenes and collections
    // ------------------------------------------------------------------

    /// Relations of a scene, its collections and its camera.
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
            self.build_collection(collection, visibility);
        }
        if let Some(camera) = data.camera {
            self.build_object(camera);
        }
    }

    /// Relations of the scene ID alone.
    pub fn build_scene_parameters(&mut self, scene: DataBlockId) {
        self.begin(scene);
    }

    /// Relations of the scene's compositor tree.
    pub fn build_compositor(&mut self, scene: DataBlockId) {
        let tree = self
            .store
            .read(scene, |block| block.as_scene().and_then(|s| s.compositor_tree))
            .flatten();
        if let Some(tree) = tree {
            self.build_node_tree(tree);
        }
    }

    /// Relations of a collection's objects and children.
    pub fn build_collection(&mut self, collection: DataBlockId, visibility: Visibility) {
        let Some(data) = self
            .store
            .read(collection, |block| block.as_collection().cloned())
            .flatten()
        else {
            return;
        };
        if visibility.skips(data.hide_viewport, data.hide_render) {
            return;
        }
        if self.begin(collection).is_none() {
            return;
        }
        for object in data.objects {
            self.build_object(object);
        }
        for child in data.children {
            self.build_collection(child, visibility);
        }
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    /// Relations of an object and everything it depends on.
    pub fn build_object(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        let Some(object) = block.as_object() else {
            return;
        };

        // Drivers may write the location.
        self.data_flow(
            ComponentKey::new(id, NodeType::Parameters),
            ComponentKey::new(id, NodeType::Transform),
            "Parameters -> Transform",
        );
        self.build_transform(id, object);
        self.build_object_data(id, object);
        self.build_modifiers(id, object);
        self.build_shading(id, object);
        if self.filter.contains(RelationFilter::INSTANCING) {
            self.build_instancing(id, object);
        }
    }

    fn build_transform(&mut self, id: DataBlockId, object: &Object) {
        let key = |code| OperationKey::new(id, NodeType::Transform, code);
        let mut chain = vec![
            key(OperationCode::TransformInit),
            key(OperationCode::TransformLocal),
            key(OperationCode::TransformParent),
        ];
        if !object.constraints.is_empty() {
            chain.push(key(OperationCode::TransformConstraints));
        }
        chain.push(key(OperationCode::TransformFinal));
        self.chain(&chain, "Transform chain");

        if let Some(parent) = &object.parent {
            self.build_object(parent.object);
            if self.filter.contains(RelationFilter::PARENTING) {
                let target = key(OperationCode::TransformParent);
                let parent_transform = ComponentKey::new(parent.object, NodeType::Transform);
                match &parent.kind {
                    ParentKind::Object => {
                        self.data_flow(parent_transform, target, "Object parent");
                    }
                    ParentKind::Bone(bone) => {
                        if self.has_component(parent.object, NodeType::Bone, bone) {
                            self.data_flow(
                                ComponentKey::named(parent.object, NodeType::Bone, bone.clone()),
                                target.clone(),
                                "Bone parent",
                            );
                        }
                        self.data_flow(parent_transform, target, "Armature parent");
                    }
                    ParentKind::Vertex => {
                        self.data_flow(
                            ComponentKey::new(parent.object, NodeType::Geometry),
                            target.clone(),
                            "Vertex parent",
                        );
                        self.data_flow(parent_transform, target, "Vertex parent transform");
                    }
                }
            }
        }

        for constraint in &object.constraints {
            let Some((target, bone)) = constraint.target() else {
                continue;
            };
            self.build_object(target);
            if !self.filter.contains(RelationFilter::CONSTRAINTS) {
                continue;
            }
            let source = self.constraint_source(target, bone, constraint);
            self.data_flow(source, key(OperationCode::TransformConstraints), constraint.type_name());
        }
    }

    /// What a constraint reads on its target.
    pub(super) fn constraint_source(
        &self,
        target: DataBlockId,
        bone: Option<&str>,
        constraint: &Constraint,
    ) -> ComponentKey {
        if constraint.reads_geometry() {
            return ComponentKey::new(target, NodeType::Geometry);
        }
        match bone {
            Some(bone) if self.has_component(target, NodeType::Bone, bone) => {
                ComponentKey::named(target, NodeType::Bone, bone)
            }
            _ => ComponentKey::new(target, NodeType::Transform),
        }
    }

    fn build_object_data(&mut self, id: DataBlockId, object: &Object) {
        let Some(data) = object.data else {
            return;
        };
        self.build_id(data);
        match self.store.id_type(data) {
            Some(IdType::Mesh) => {
                let key = |code| OperationKey::new(id, NodeType::Geometry, code);
                self.data_flow(
                    ComponentKey::new(data, NodeType::Geometry),
                    key(OperationCode::GeometryEvalInit),
                    "Object data",
                );
                self.chain(
                    &[
                        key(OperationCode::GeometryEvalInit),
                        key(OperationCode::GeometryEval),
                        key(OperationCode::GeometryEvalDone),
                    ],
                    "Geometry chain",
                );
            }
            Some(IdType::Armature) if self.filter.contains(RelationFilter::RIG) => {
                let armature = self
                    .store
                    .read(data, |block| block.as_armature().cloned())
                    .flatten()
                    .unwrap_or_default();
                self.build_rig(id, data, object, &armature);
            }
            _ => {}
        }
    }

    fn build_modifiers(&mut self, id: DataBlockId, object: &Object) {
        let has_geometry = self.has_component(id, NodeType::Geometry, "");
        let eval = OperationKey::new(id, NodeType::Geometry, OperationCode::GeometryEval);
        for modifier in &object.modifiers {
            let sources: Vec<ComponentKey> = match modifier {
                Modifier::Armature { object } => vec![
                    ComponentKey::new(*object, NodeType::EvalPose),
                    ComponentKey::new(*object, NodeType::Transform),
                ],
                Modifier::Array {
                    offset_object: Some(object),
                    ..
                } => vec![ComponentKey::new(*object, NodeType::Transform)],
                Modifier::Boolean { object } => vec![
                    ComponentKey::new(*object, NodeType::Geometry),
                    ComponentKey::new(*object, NodeType::Transform),
                ],
                Modifier::Nodes { tree } => vec![ComponentKey::new(*tree, NodeType::NTreeOutput)],
                Modifier::Array { .. }
                | Modifier::Subdivision { .. }
                | Modifier::VertexWeight { .. } => Vec::new(),
            };
            for source in sources {
                self.build_id(source.id);
                if has_geometry && self.filter.contains(RelationFilter::MODIFIERS) {
                    self.data_flow(source, eval.clone(), modifier.type_name());
                }
            }
        }
    }

    fn build_shading(&mut self, id: DataBlockId, object: &Object) {
        if !self.has_component(id, NodeType::Shading, "") {
            return;
        }
        let update = OperationKey::new(id, NodeType::Shading, OperationCode::ShadingUpdate);
        for material in NodeBuilder::materials(self.store, object) {
            self.build_material(material);
            if self.filter.contains(RelationFilter::SHADING) {
                self.data_flow(
                    ComponentKey::new(material, NodeType::Shading),
                    update.clone(),
                    "Material",
                );
            }
        }
        if self.has_component(id, NodeType::Geometry, "") {
            self.data_flow(
                ComponentKey::new(id, NodeType::Geometry),
                ComponentKey::new(id, NodeType::Shading),
                "Geometry -> Shading",
            );
        }
    }

    fn build_instancing(&mut self, id: DataBlockId, object: &Object) {
        if !self.has_component(id, NodeType::Instancing, "") {
            return;
        }
        let instancer = OperationKey::new(id, NodeType::Instancing, OperationCode::Instancer);
        let mut collections: Vec<DataBlockId> = object.instance_collection.into_iter().collect();
        for system in &object.particle_systems {
            match system.instance {
                ParticleInstance::Object(member) => self.build_object(member),
                ParticleInstance::Collection(collection) => collections.push(collection),
            }
        }
        for &collection in &collections {
            self.build_collection(collection, Visibility::Instanced);
            self.data_flow(
                ComponentKey::new(collection, NodeType::Parameters),
                instancer.clone(),
                "Instanced collection",
            );
        }
        for (member, _) in NodeBuilder::instance_sources(self.store, object) {
            self.data_flow(
                ComponentKey::new(member, NodeType::Transform),
                instancer.clone(),
                "Instanced object",
            );
        }
        self.data_flow(
            ComponentKey::new(id, NodeType::Transform),
            instancer,
            "Instancer transform",
        );
    }

    // ------------------------------------------------------------------
    // Other data
    // ------------------------------------------------------------------

    /// Relations of mesh data and its materials.
    pub fn build_mesh(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        let materials = block.as_mesh().map(|m| m.materials.clone()).unwrap_or_default();
        for material in materials {
            self.build_material(material);
        }
    }

    /// Relations of a material and its shader tree.
    pub fn build_material(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        let Some(tree) = block.as_material().and_then(|m| m.tree) else {
            return;
        };
        self.build_node_tree(tree);
        if self.filter.contains(RelationFilter::NODE_TREES) {
            self.data_flow(
                ComponentKey::new(tree, NodeType::NTreeOutput),
                OperationKey::new(id, NodeType::Shading, OperationCode::MaterialUpdate),
                "Material node tree",
            );
        }
    }

    /// Relations of a node tree: every referenced data-block feeds its output.
    pub fn build_node_tree(&mut self, id: DataBlockId) {
        let Some(block) = self.begin(id) else {
            return;
        };
        let Some(tree) = block.as_node_tree() else {
            return;
        };

        for link in &tree.links {
            for node in [&link.from_node, &link.to_node] {
                if !tree.nodes.contains_key(node) {
                    warn!(tree = %id, node = %node, "link to unknown node");
                    self.graph.push_diagnostic(
                        BuildStage::Relations,
                        BuildError::MalformedLink {
                            tree: id,
                            node: node.clone(),
                        },
                    );
                }
            }
        }

        let output = OperationKey::new(id, NodeType::NTreeOutput, OperationCode::NTreeOutput);
        for (name, node) in &tree.nodes {
            let Some(referenced) = node.kind.referenced_id() else {
                continue;
            };
            self.build_id(referenced);
            if !self.filter.contains(RelationFilter::NODE_TREES) {
                continue;
            }
            let source = match node.kind {
                TreeNodeKind::ObjectInfo(object) => ComponentKey::new(object, NodeType::Transform),
                TreeNodeKind::Group(group) => ComponentKey::new(group, NodeType::NTreeOutput),
                TreeNodeKind::Image(other) | TreeNodeKind::RenderLayers(other) => {
                    ComponentKey::new(other, NodeType::Parameters)
                }
                TreeNodeKind::Generic => continue,
            };
            self.data_flow(source, output.clone(), name);
        }
    }
}
