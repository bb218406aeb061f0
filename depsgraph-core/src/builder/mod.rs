//! Graph Builder
//!
//! Turns scene data into a [`Depsgraph`] in two passes over the same roots:
//!
//! 1. [`NodeBuilder`] creates ID, component and operation nodes.
//! 2. [`RelationBuilder`] wires operations together, including the pose
//!    chains of armatures (see [`RootPChanMap`]).
//!
//! Which roots are walked, and which relation categories are wired, is up
//! to the [`BuilderPipeline`].
//!
//! # Rebuilds
//!
//! Passing the previous graph to [`build_graph`] carries over what a user
//! expects to survive a relations update: evaluated copies, operation
//! state for keys that still exist, current time and listeners. Operations
//! that are new start dirty.

mod nodes;
mod nodes_rig;
mod ops;
mod pipeline;
mod relations;
mod relations_rig;
mod root_map;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, instrument};

pub use nodes::NodeBuilder;
pub use pipeline::{
    AllObjectsPipeline, BuilderPipeline, CompositorPipeline, PipelineKind, RelationFilter,
    RenderPipeline, ViewLayerPipeline, Visibility,
};
pub use relations::RelationBuilder;
pub use root_map::{ik_chains, BoneRootLookup, IkChain, NaiveRootWalker, RootPChanMap};

use crate::config::BuildConfig;
use crate::data::{DataBlockId, DataStore};
use crate::eval::EvaluatedId;
use crate::graph::Depsgraph;
use crate::node::{EvalState, IdRecalc, OperationFlags, OperationKey};

/// What a rebuild keeps from the graph it replaces.
#[derive(Default)]
struct SavedState {
    operations: HashMap<OperationKey, (OperationFlags, bool)>,
    ids: HashMap<DataBlockId, (Arc<RwLock<EvaluatedId>>, IdRecalc)>,
}

impl SavedState {
    fn capture(graph: &Depsgraph) -> Self {
        let operations = graph
            .operations()
            .map(|(_, op)| (op.key.clone(), (op.flags, op.is_dirty())))
            .collect();
        let ids = graph
            .id_nodes()
            .map(|node| (node.id, (Arc::clone(&node.evaluated), node.recalc)))
            .collect();
        Self { operations, ids }
    }

    fn restore(self, graph: &mut Depsgraph) -> usize {
        let mut restored = 0;
        for node in graph.nodes_mut() {
            if let Some(op) = node.as_operation_mut() {
                if let Some(&(flags, dirty)) = self.operations.get(&op.key) {
                    op.flags = flags;
                    op.state = if dirty { EvalState::Dirty } else { EvalState::Clean };
                    restored += 1;
                }
            } else if let Some(id) = node.as_id_mut() {
                if let Some((evaluated, recalc)) = self.ids.get(&id.id) {
                    id.evaluated = Arc::clone(evaluated);
                    id.recalc = *recalc;
                }
            }
        }
        restored
    }
}

/// Build a graph with the default [`BuildConfig`].
pub fn build_graph(
    store: &DataStore,
    pipeline: &dyn BuilderPipeline,
    previous: Option<Depsgraph>,
) -> Depsgraph {
    build_graph_with(store, pipeline, previous, &BuildConfig::default())
}

/// Build a graph for `pipeline`, replacing `previous` if given.
///
/// Build problems never abort the build; they are available afterwards
/// through [`Depsgraph::diagnostics`].
#[instrument(level = "debug", skip_all, fields(pipeline = ?pipeline.kind()))]
pub fn build_graph_with(
    store: &DataStore,
    pipeline: &dyn BuilderPipeline,
    previous: Option<Depsgraph>,
    config: &BuildConfig,
) -> Depsgraph {
    let mut graph = Depsgraph::new(pipeline.kind());
    let saved = match previous {
        Some(mut previous) => {
            graph.adopt_listeners(previous.take_listeners());
            graph.set_ctime(previous.ctime());
            Some(SavedState::capture(&previous))
        }
        None => None,
    };

    let filter = pipeline.filter();
    pipeline.build_nodes(&mut NodeBuilder::new(store, &mut graph, filter));
    pipeline.build_relations(&mut RelationBuilder::new(
        store,
        &mut graph,
        filter,
        config.root_lookup,
    ));
    graph.finalize_components();

    let restored = saved.map_or(0, |saved| saved.restore(&mut graph));
    if config.flush_after_rebuild && restored > 0 {
        graph.flush_pending();
    }

    info!(
        ids = graph.id_count(),
        operations = graph.operation_count(),
        relations = graph.relation_count(),
        diagnostics = graph.diagnostics().len(),
        restored,
        "graph built"
    );
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootLookup;
    use crate::data::{Collection, DataBlockKind, Object, Scene};
    use crate::node::{NodeType, OperationCode};

    fn scene_with(objects: Vec<Object>) -> (DataStore, DataBlockId, Vec<DataBlockId>) {
        let mut store = DataStore::new();
        let ids: Vec<DataBlockId> = objects
            .into_iter()
            .enumerate()
            .map(|(i, object)| store.add(format!("OB{i}"), DataBlockKind::Object(object)))
            .collect();
        let collection = store.add(
            "Master",
            DataBlockKind::Collection(Collection::of(ids.clone())),
        );
        let scene = store.add(
            "Scene",
            DataBlockKind::Scene(Scene {
                master_collection: Some(collection),
                ..Scene::default()
            }),
        );
        (store, scene, ids)
    }

    #[test]
    fn parent_feeds_child_transform() {
        let mut store = DataStore::new();
        let parent = store.add("Parent", DataBlockKind::Object(Object::default()));
        let child = store.add(
            "Child",
            DataBlockKind::Object(Object::default().with_parent(parent)),
        );
        let collection = store.add("Master", DataBlockKind::Collection(Collection::of([child])));
        let scene = store.add(
            "Scene",
            DataBlockKind::Scene(Scene {
                master_collection: Some(collection),
                ..Scene::default()
            }),
        );

        let graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
        assert!(graph.contains_id(parent));
        assert!(!graph.id_node(parent).unwrap().visible);
        assert!(graph.id_node(child).unwrap().visible);
        assert!(graph.has_relation(
            &OperationKey::new(parent, NodeType::Transform, OperationCode::Exit),
            &OperationKey::new(child, NodeType::Transform, OperationCode::TransformParent),
        ));
    }

    #[test]
    fn rebuild_keeps_evaluated_copies() {
        let (store, scene, ids) = scene_with(vec![Object::at([1.0, 0.0, 0.0])]);
        let first = build_graph(&store, &ViewLayerPipeline { scene }, None);
        let copy = first.evaluated(ids[0]).unwrap();

        let second = build_graph(&store, &ViewLayerPipeline { scene }, Some(first));
        assert!(Arc::ptr_eq(&copy, &second.evaluated(ids[0]).unwrap()));
    }

    #[test]
    fn naive_lookup_is_configurable() {
        let (store, scene, _) = scene_with(vec![Object::default()]);
        let config = BuildConfig {
            root_lookup: RootLookup::Naive,
            ..BuildConfig::default()
        };
        let naive = build_graph_with(&store, &ViewLayerPipeline { scene }, None, &config);
        let default = build_graph(&store, &ViewLayerPipeline { scene }, None);
        assert_eq!(naive.relation_signatures(), default.relation_signatures());
    }
}
