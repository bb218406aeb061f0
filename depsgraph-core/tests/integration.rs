//! Integration Tests for Graph Building and Evaluation
//!
//! These tests build graphs from small scenes and verify that evaluation
//! follows relations, re-runs only what tagging invalidated, and survives
//! cycles, failures, cancellation and rebuilds.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use depsgraph_core::builder::{
    build_graph, AllObjectsPipeline, CompositorPipeline, RenderPipeline, ViewLayerPipeline,
};
use depsgraph_core::config::EvaluatorConfig;
use depsgraph_core::data::{
    AnimData, Collection, Constraint, DataBlockId, DataBlockKind, DataStore, Driver, DriverKind,
    FCurve, Mesh, NodeTree, NodeTreeKind, Object, ParticleInstance, ParticleSystem, Scene,
    TreeNodeKind,
};
use depsgraph_core::error::{BuildError, OperationError};
use depsgraph_core::eval::{CancelToken, Evaluator};
use depsgraph_core::graph::{Depsgraph, TagKind};
use depsgraph_core::node::{
    callback, EvalState, IdRecalc, NodeType, OperationCode, OperationKey, RelationFlags,
    RelationKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Add a scene whose master collection holds `objects`.
fn add_scene(store: &mut DataStore, objects: &[DataBlockId]) -> DataBlockId {
    let collection = store.add(
        "Master",
        DataBlockKind::Collection(Collection::of(objects.iter().copied())),
    );
    store.add(
        "Scene",
        DataBlockKind::Scene(Scene {
            master_collection: Some(collection),
            ..Scene::default()
        }),
    )
}

fn transform(id: DataBlockId, code: OperationCode) -> OperationKey {
    OperationKey::new(id, NodeType::Transform, code)
}

fn world(graph: &Depsgraph, id: DataBlockId) -> [f64; 3] {
    graph
        .read_evaluated(id, |e| e.world_location)
        .expect("object is in the graph")
}

fn all_clean(graph: &Depsgraph) -> bool {
    graph.operations().all(|(_, op)| op.is_clean())
}

/// A parent `A` at x=1 and a child `B` offset by y=1.
fn parent_scene() -> (DataStore, DataBlockId, DataBlockId, DataBlockId) {
    let mut store = DataStore::new();
    let a = store.add("A", DataBlockKind::Object(Object::at([1.0, 0.0, 0.0])));
    let b = store.add(
        "B",
        DataBlockKind::Object(Object::at([0.0, 1.0, 0.0]).with_parent(a)),
    );
    let scene = add_scene(&mut store, &[a, b]);
    (store, scene, a, b)
}

/// A richer scene: parenting, a constraint, a mesh with modifiers and a
/// material with a shader tree.
fn mixed_scene() -> (DataStore, DataBlockId) {
    let mut store = DataStore::new();
    let tree = store.add(
        "Shader",
        DataBlockKind::NodeTree(
            NodeTree::new(NodeTreeKind::Shader)
                .with_node("Principled", TreeNodeKind::Generic)
                .with_node("Output", TreeNodeKind::Generic)
                .with_link("Principled", "Output"),
        ),
    );
    let material = store.add(
        "Material",
        DataBlockKind::Material(depsgraph_core::data::Material { tree: Some(tree) }),
    );
    let mesh = store.add(
        "Mesh",
        DataBlockKind::Mesh(Mesh {
            vertex_count: 8,
            materials: vec![material],
        }),
    );
    let base = store.add("Base", DataBlockKind::Object(Object::at([0.0, 0.0, 2.0])));
    let cube = store.add(
        "Cube",
        DataBlockKind::Object(
            Object::at([1.0, 0.0, 0.0])
                .with_parent(base)
                .with_data(mesh)
                .with_modifier(depsgraph_core::data::Modifier::Subdivision { levels: 1 })
                .with_modifier(depsgraph_core::data::Modifier::Array {
                    count: 2,
                    offset_object: Some(base),
                }),
        ),
    );
    let follower = store.add(
        "Follower",
        DataBlockKind::Object(Object::default().with_constraint(Constraint::CopyLocation {
            target: cube,
            subtarget: None,
        })),
    );
    let scene = add_scene(&mut store, &[base, cube, follower]);
    (store, scene)
}

/// Test that a child is re-evaluated after its parent moves, without
/// re-copying the child.
#[test]
fn parent_edit_reaches_child() {
    init_tracing();
    let (store, scene, a, b) = parent_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();

    // First pass evaluates everything
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(!report.has_failures());
    assert_eq!(world(&graph, b), [1.0, 1.0, 0.0]);

    // Move the parent and tag it
    store.edit(a, |block| block.set_property("location.x", 2.0));
    graph.tag_update(a, TagKind::Transform);
    let report = evaluator.evaluate(&mut graph, 1.0);

    // The child's parent step ran after the parent's final transform
    let parent_done = report
        .position(&transform(a, OperationCode::TransformFinal))
        .expect("parent transform ran");
    let child_parent = report
        .position(&transform(b, OperationCode::TransformParent))
        .expect("child parent step ran");
    assert!(parent_done < child_parent);

    // The child's copy was not refreshed, its transform was
    assert!(!report.ran(&OperationKey::new(b, NodeType::CopyOnEval, OperationCode::CopyOnEval)));
    assert_eq!(world(&graph, a), [2.0, 0.0, 0.0]);
    assert_eq!(world(&graph, b), [2.0, 1.0, 0.0]);
}

/// Test that tagging one step of a transform re-runs its whole component
/// instead of accumulating onto the previous result.
#[test]
fn tagged_operation_restarts_its_component() {
    init_tracing();
    let (store, scene, a, b) = parent_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();
    evaluator.evaluate(&mut graph, 1.0);

    // Re-run a middle step without editing anything
    assert!(graph.tag_operation(&transform(a, OperationCode::TransformLocal)));
    assert_eq!(graph.state(&transform(a, OperationCode::TransformInit)), Some(EvalState::Dirty));
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(report.ran(&transform(a, OperationCode::TransformInit)));
    assert_eq!(world(&graph, a), [1.0, 0.0, 0.0]);
    assert_eq!(world(&graph, b), [1.0, 1.0, 0.0]);

    // Same for an accumulating step of the child
    assert!(graph.tag_operation(&transform(b, OperationCode::TransformParent)));
    evaluator.evaluate(&mut graph, 1.0);
    assert_eq!(world(&graph, b), [1.0, 1.0, 0.0]);
}

/// Test that a driver follows the property it reads, and that tagging the
/// driven object does not re-run its driver's source.
#[test]
fn driver_follows_source_property() {
    init_tracing();
    let mut store = DataStore::new();
    let y = store.add_with("Y", DataBlockKind::Object(Object::default()), |block| {
        block.set_property("value", 3.0);
    });
    let x = store.add_with("X", DataBlockKind::Object(Object::default()), |block| {
        block.anim = Some(AnimData::default().with_driver(
            Driver::new("influence", DriverKind::Sum).reading("v", y, "value"),
        ));
    });
    let scene = add_scene(&mut store, &[x, y]);
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();
    let influence = |graph: &Depsgraph| graph.read_evaluated(x, |e| e.property("influence")).flatten();

    evaluator.evaluate(&mut graph, 1.0);
    assert_eq!(influence(&graph), Some(3.0));

    // Edit the source property
    store.edit(y, |block| block.set_property("value", 5.0));
    graph.tag_update(y, TagKind::Parameters);
    let report = evaluator.evaluate(&mut graph, 1.0);
    let driver = OperationKey::new(x, NodeType::Parameters, OperationCode::Driver).with_name("influence");
    assert!(report.ran(&driver));
    assert_eq!(influence(&graph), Some(5.0));

    // Tagging the driven object leaves the source alone
    graph.tag_update(x, TagKind::Parameters);
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(report.ran(&driver));
    assert!(report.executed.iter().all(|key| key.id != y));
}

/// Test that a driver reading the scene time re-runs on every time change.
#[test]
fn time_driver_tracks_frame() {
    init_tracing();
    let mut store = DataStore::new();
    let x = store.add_with("X", DataBlockKind::Object(Object::default()), |block| {
        block.anim = Some(
            AnimData::default()
                .with_driver(Driver::new("location.z", DriverKind::Average).reading_time("frame")),
        );
    });
    let scene = add_scene(&mut store, &[x]);
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();

    evaluator.evaluate(&mut graph, 3.0);
    assert_eq!(world(&graph, x), [0.0, 0.0, 3.0]);

    evaluator.evaluate(&mut graph, 7.0);
    assert_eq!(world(&graph, x), [0.0, 0.0, 7.0]);
}

/// Test that a time change re-runs keyframe animation and what depends on
/// it, but nothing static.
#[test]
fn time_change_reevaluates_animation() {
    init_tracing();
    let mut store = DataStore::new();
    let animated = store.add_with("Animated", DataBlockKind::Object(Object::default()), |block| {
        block.anim = Some(
            AnimData::default().with_fcurve(FCurve::new("location.x", vec![(0.0, 0.0), (10.0, 10.0)])),
        );
    });
    let still = store.add("Still", DataBlockKind::Object(Object::at([4.0, 0.0, 0.0])));
    let scene = add_scene(&mut store, &[animated, still]);
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();

    evaluator.evaluate(&mut graph, 0.0);
    assert_eq!(world(&graph, animated), [0.0, 0.0, 0.0]);

    // Advance the clock
    let report = evaluator.evaluate(&mut graph, 5.0);
    assert!(report.ran(&OperationKey::new(animated, NodeType::Animation, OperationCode::AnimationEval)));
    assert!(report.ran(&transform(animated, OperationCode::TransformFinal)));
    assert!(!report.ran(&transform(still, OperationCode::TransformLocal)));
    assert_eq!(world(&graph, animated), [5.0, 0.0, 0.0]);
    assert_eq!(world(&graph, still), [4.0, 0.0, 0.0]);
}

/// Test that a cycle injected into a built graph is broken once and
/// evaluation still completes.
#[test]
fn injected_cycle_is_broken() {
    init_tracing();
    let (store, a, c) = two_objects();
    let mut graph = build_graph(&store, &AllObjectsPipeline, None);
    inject_cycle(&mut graph, a, c);

    let evaluator = Evaluator::serial();
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert_eq!(report.broken_cycles.len(), 1);
    assert_eq!(graph.cyclic_relations().count(), 1);
    assert!(all_clean(&graph));

    // The break is permanent: later passes do not report it again
    graph.tag_update(a, TagKind::Transform);
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(report.broken_cycles.is_empty());
    assert!(report.ran(&transform(c, OperationCode::TransformFinal)));
    assert!(all_clean(&graph));
}

/// Wire `a`'s final transform into `c`'s transform and back.
fn inject_cycle(graph: &mut Depsgraph, a: DataBlockId, c: DataBlockId) {
    let index = |graph: &Depsgraph, id, code| {
        graph
            .find_operation(&transform(id, code))
            .expect("transform operation exists")
    };
    let a_final = index(graph, a, OperationCode::TransformFinal);
    let a_init = index(graph, a, OperationCode::TransformInit);
    let c_final = index(graph, c, OperationCode::TransformFinal);
    let c_init = index(graph, c, OperationCode::TransformInit);
    graph.add_relation(a_final, c_init, RelationKind::DataFlow, "a-c", RelationFlags::empty());
    graph.add_relation(c_final, a_init, RelationKind::DataFlow, "c-a", RelationFlags::empty());
}

fn two_objects() -> (DataStore, DataBlockId, DataBlockId) {
    let mut store = DataStore::new();
    let a = store.add("A", DataBlockKind::Object(Object::at([1.0, 0.0, 0.0])));
    let c = store.add("C", DataBlockKind::Object(Object::at([0.0, 0.0, 1.0])));
    (store, a, c)
}

/// Test that the relation discarded for a cycle is the same across builds
/// and whether it is found up front or when evaluation stalls.
#[test]
fn cycle_breaking_is_deterministic() {
    init_tracing();
    let broken = |config: EvaluatorConfig| {
        let (store, a, c) = two_objects();
        let mut graph = build_graph(&store, &AllObjectsPipeline, None);
        inject_cycle(&mut graph, a, c);
        let evaluator = Evaluator::new(config).expect("valid config");
        let report = evaluator.evaluate(&mut graph, 1.0);
        assert!(all_clean(&graph));
        report
            .broken_cycles
            .iter()
            .map(|cycle| (cycle.from.clone(), cycle.to.clone()))
            .collect::<Vec<_>>()
    };

    let first = broken(EvaluatorConfig::serial());
    let second = broken(EvaluatorConfig::serial());
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);

    // Same choice when the evaluator has to find the cycle itself
    let stalled = broken(EvaluatorConfig {
        detect_cycles: false,
        ..EvaluatorConfig::serial()
    });
    assert_eq!(first, stalled);
}

/// Test that independent objects evaluate on a worker pool.
#[test]
fn parallel_evaluation_completes() {
    init_tracing();
    let (store, scene) = mixed_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::new(EvaluatorConfig::with_threads(4)).expect("runtime starts");

    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(!report.has_failures());
    assert!(all_clean(&graph));

    // Same results as a serial pass over a fresh graph
    let mut serial = build_graph(&store, &ViewLayerPipeline { scene }, None);
    Evaluator::serial().evaluate(&mut serial, 1.0);
    for id in graph.ids().collect::<Vec<_>>() {
        assert_eq!(world(&graph, id), world(&serial, id));
    }
}

/// Test that evaluating twice without edits runs nothing the second time.
#[test]
fn second_pass_is_empty() {
    init_tracing();
    let (store, scene) = mixed_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();

    let first = evaluator.evaluate(&mut graph, 1.0);
    assert!(first.operations_run > 0);
    let second = evaluator.evaluate(&mut graph, 1.0);
    assert_eq!(second.operations_run, 0);
    assert!(second.updated.is_empty());
}

/// Test that every operation ran after every operation it depends on.
#[test]
fn execution_respects_relations() {
    init_tracing();
    let (store, scene) = mixed_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    assert!(all_clean(&graph));

    for (from, to, _) in graph.relation_signatures() {
        if let (Some(before), Some(after)) = (report.position(&from), report.position(&to)) {
            assert!(before < after, "{from} ran after {to}");
        }
    }
}

/// Test that the constrained and modified objects see their inputs.
#[test]
fn mixed_scene_values() {
    init_tracing();
    let (store, scene) = mixed_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    assert!(!report.has_failures());

    let ids: Vec<DataBlockId> = graph.ids().collect();
    let find = |name: &str| {
        ids.iter()
            .copied()
            .find(|id| store.read(*id, |b| b.name == name).unwrap_or(false))
            .expect("named block is in the graph")
    };
    let (cube, follower) = (find("Cube"), find("Follower"));

    // Parented to Base at z=2
    assert_eq!(world(&graph, cube), [1.0, 0.0, 2.0]);
    // Copy Location snaps to the cube
    assert_eq!(world(&graph, follower), [1.0, 0.0, 2.0]);
    // 8 vertices, subdivided once, arrayed twice
    let geometry = graph
        .read_evaluated(cube, |e| e.geometry)
        .flatten()
        .expect("cube has geometry");
    assert_eq!(geometry.vertex_count, 64);
}

/// Test that a rebuild produces the same graph and keeps evaluation state.
#[test]
fn rebuild_is_stable() {
    init_tracing();
    let (store, scene) = mixed_scene();
    let pipeline = ViewLayerPipeline { scene };
    let first = build_graph(&store, &pipeline, None);
    let second = build_graph(&store, &pipeline, None);
    assert_eq!(first.operation_keys(), second.operation_keys());
    assert_eq!(first.relation_signatures(), second.relation_signatures());

    // Rebuilding an evaluated graph leaves nothing to do
    let mut graph = second;
    let evaluator = Evaluator::serial();
    evaluator.evaluate(&mut graph, 1.0);
    let mut rebuilt = build_graph(&store, &pipeline, Some(graph));
    assert_eq!(rebuilt.operation_keys(), first.operation_keys());
    let report = evaluator.evaluate(&mut rebuilt, 1.0);
    assert_eq!(report.operations_run, 0);
}

/// Test that a rebuild after adding an object evaluates only what is new.
#[test]
fn rebuild_runs_new_operations() {
    init_tracing();
    let (mut store, scene, a, _) = parent_scene();
    let pipeline = ViewLayerPipeline { scene };
    let mut graph = build_graph(&store, &pipeline, None);
    let evaluator = Evaluator::serial();
    evaluator.evaluate(&mut graph, 1.0);

    // Add a child of A to the master collection
    let d = store.add(
        "D",
        DataBlockKind::Object(Object::at([0.0, 0.0, 3.0]).with_parent(a)),
    );
    let master = store
        .read(scene, |b| b.as_scene().and_then(|s| s.master_collection))
        .flatten()
        .expect("scene has a master collection");
    store.edit(master, |block| {
        if let DataBlockKind::Collection(collection) = &mut block.kind {
            collection.objects.push(d);
        }
    });

    let mut graph = build_graph(&store, &pipeline, Some(graph));
    let report = evaluator.evaluate(&mut graph, 1.0);
    assert!(report.ran(&transform(d, OperationCode::TransformFinal)));
    assert!(!report.ran(&transform(a, OperationCode::TransformLocal)));
    assert_eq!(world(&graph, d), [1.0, 0.0, 3.0]);
}

/// Test that independent operations run in insertion order, the same way
/// every time.
#[test]
fn ready_operations_keep_insertion_order() {
    init_tracing();
    let run = || {
        let (store, a, c) = two_objects();
        let mut graph = build_graph(&store, &AllObjectsPipeline, None);
        let report = Evaluator::serial().evaluate(&mut graph, 1.0);
        (report, a, c)
    };
    let (first, a, c) = run();
    let (second, _, _) = run();
    assert_eq!(first.executed, second.executed);

    let copy = |id| OperationKey::new(id, NodeType::CopyOnEval, OperationCode::CopyOnEval);
    assert!(first.position(&copy(a)) < first.position(&copy(c)));
}

/// Test that a cancelled pass stops between layers and the next pass
/// finishes the work.
#[test]
fn cancellation_resumes() {
    init_tracing();
    let (store, scene, a, b) = parent_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let token = CancelToken::new();

    // An operation that cancels the pass it runs in
    let trigger = token.clone();
    graph.add_operation(
        OperationKey::new(a, NodeType::Parameters, OperationCode::Generic),
        Some(callback(move |_| {
            trigger.cancel();
            Ok(())
        })),
    );

    let evaluator = Evaluator::serial();
    let report = evaluator.evaluate_with_cancel(&mut graph, 1.0, &token);
    assert!(report.cancelled);
    assert_eq!(
        graph.state(&transform(b, OperationCode::TransformFinal)),
        Some(EvalState::Dirty)
    );

    // Resume
    token.reset();
    let report = evaluator.evaluate_with_cancel(&mut graph, 1.0, &token);
    assert!(!report.cancelled);
    assert!(all_clean(&graph));
    assert_eq!(world(&graph, b), [1.0, 1.0, 0.0]);
}

/// Test that a failing operation is reported and its dependents still run.
#[test]
fn failures_are_reported() {
    init_tracing();
    let mut store = DataStore::new();
    let empty = store.add("Empty", DataBlockKind::Object(Object::at([0.0, 0.0, 5.0])));
    let wrapped = store.add(
        "Wrapped",
        DataBlockKind::Object(Object::default().with_constraint(Constraint::ShrinkWrap { target: empty })),
    );
    let scene = add_scene(&mut store, &[empty, wrapped]);
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);

    // The target has no geometry to wrap onto
    assert!(graph
        .diagnostics()
        .iter()
        .any(|d| matches!(d.error, BuildError::MissingNode { .. })));

    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    let failed = transform(wrapped, OperationCode::TransformConstraints);
    assert!(matches!(report.failure(&failed), Some(OperationError::MissingValue(_))));
    assert_eq!(report.failures.len(), 1);
    assert!(report.ran(&transform(wrapped, OperationCode::TransformFinal)));
    assert!(all_clean(&graph));
}

/// Test that an object instanced from several places gets one ID node.
#[test]
fn instanced_object_has_one_node() {
    init_tracing();
    let mut store = DataStore::new();
    let leaf = store.add("Leaf", DataBlockKind::Object(Object::at([0.0, 0.0, 1.0])));
    let group = store.add("Group", DataBlockKind::Collection(Collection::of([leaf])));
    let particles = |count| ParticleSystem {
        name: "Particles".into(),
        instance: ParticleInstance::Object(leaf),
        count,
    };
    let mut emitter = Object::at([2.0, 0.0, 0.0]);
    emitter.particle_systems.push(particles(3));
    emitter.instance_collection = Some(group);
    let emitter = store.add("Emitter", DataBlockKind::Object(emitter));
    let mut other = Object::default();
    other.particle_systems.push(particles(2));
    let other = store.add("Other", DataBlockKind::Object(other));
    let scene = add_scene(&mut store, &[emitter, other]);

    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    assert_eq!(graph.ids().filter(|id| *id == leaf).count(), 1);
    assert!(!graph.id_node(leaf).expect("leaf built").visible);

    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    assert!(!report.has_failures());
    let instances = graph
        .read_evaluated(emitter, |e| e.instances.clone())
        .expect("emitter evaluated");
    assert_eq!(instances.len(), 4);
    assert!(instances.iter().all(|p| *p == [2.0, 0.0, 1.0]));
}

/// Test that data-blocks without evaluation semantics and dangling
/// references are reported, not built.
#[test]
fn unsupported_and_dangling_are_diagnosed() {
    init_tracing();
    let mut store = DataStore::new();
    let text = store.add("Notes", DataBlockKind::Text("hello".into()));
    let gone = store.add("Gone", DataBlockKind::Object(Object::default()));
    let orphan = store.add("Orphan", DataBlockKind::Object(Object::default().with_parent(gone)));
    store.remove(gone);
    let scene = add_scene(&mut store, &[text, orphan]);

    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    assert!(!graph.contains_id(text));
    assert!(graph.contains_id(orphan));
    let errors: Vec<&BuildError> = graph.diagnostics().iter().map(|d| &d.error).collect();
    assert!(errors
        .iter()
        .any(|e| matches!(e, BuildError::UnsupportedType { id, .. } if *id == text)));
    assert!(errors
        .iter()
        .any(|e| matches!(e, BuildError::DanglingReference { to, .. } if *to == gone)));

    // The rest of the scene still evaluates
    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    assert!(all_clean(&graph));
    assert!(report.ran(&transform(orphan, OperationCode::TransformFinal)));
}

/// Test that a node tree's internal links are validated but only the
/// data-blocks its nodes reference feed the tree output.
#[test]
fn node_tree_links_are_checked() {
    init_tracing();
    let mut store = DataStore::new();
    let lamp = store.add("Lamp", DataBlockKind::Object(Object::at([0.0, 0.0, 3.0])));
    let tree = store.add(
        "Shader",
        DataBlockKind::NodeTree(
            NodeTree::new(NodeTreeKind::Shader)
                .with_node("Info", TreeNodeKind::ObjectInfo(lamp))
                .with_node("Output", TreeNodeKind::Generic)
                .with_link("Info", "Output")
                .with_link("Output", "Ghost"),
        ),
    );
    let material = store.add(
        "Material",
        DataBlockKind::Material(depsgraph_core::data::Material { tree: Some(tree) }),
    );
    let cube = store.add(
        "Cube",
        DataBlockKind::Object(Object {
            materials: vec![material],
            ..Object::default()
        }),
    );
    let scene = add_scene(&mut store, &[lamp, cube]);
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);

    // The dangling link is reported
    assert!(graph.diagnostics().iter().any(|d| matches!(
        &d.error,
        BuildError::MalformedLink { tree: t, node } if *t == tree && node == "Ghost"
    )));

    // The referenced object feeds the single output operation
    let output = OperationKey::new(tree, NodeType::NTreeOutput, OperationCode::NTreeOutput);
    assert!(graph.has_relation(&transform(lamp, OperationCode::Exit), &output));

    let report = Evaluator::serial().evaluate(&mut graph, 1.0);
    assert!(!report.has_failures(), "{:?}", report.failures);
    assert!(report.ran(&output));
}

/// Test that the compositor pipeline only pulls in what the tree reads,
/// while the render pipeline builds the whole scene.
#[test]
fn compositor_builds_referenced_subset() {
    init_tracing();
    let mut store = DataStore::new();
    let a = store.add("A", DataBlockKind::Object(Object::default()));
    let b = store.add("B", DataBlockKind::Object(Object::at([0.0, 2.0, 0.0])));
    let image = store.add("Plate", DataBlockKind::Image);
    let tree = store.add(
        "Compositing",
        DataBlockKind::NodeTree(
            NodeTree::new(NodeTreeKind::Compositor)
                .with_node("Info", TreeNodeKind::ObjectInfo(b))
                .with_node("Plate", TreeNodeKind::Image(image))
                .with_node("Composite", TreeNodeKind::Generic)
                .with_link("Info", "Composite")
                .with_link("Plate", "Composite"),
        ),
    );
    let collection = store.add("Master", DataBlockKind::Collection(Collection::of([a])));
    let scene = store.add(
        "Scene",
        DataBlockKind::Scene(Scene {
            master_collection: Some(collection),
            compositor_tree: Some(tree),
            ..Scene::default()
        }),
    );

    let mut compositor = build_graph(&store, &CompositorPipeline { scene }, None);
    for id in [scene, tree, b, image] {
        assert!(compositor.contains_id(id), "{id} missing from compositor graph");
    }
    assert!(!compositor.contains_id(a));
    assert!(compositor.has_relation(
        &transform(b, OperationCode::Exit),
        &OperationKey::new(tree, NodeType::NTreeOutput, OperationCode::NTreeOutput),
    ));
    let report = Evaluator::serial().evaluate(&mut compositor, 1.0);
    assert!(!report.has_failures());

    let render = build_graph(&store, &RenderPipeline { scene }, None);
    for id in [scene, tree, a, b, image] {
        assert!(render.contains_id(id));
    }
}

/// Test that listeners hear about every updated data-block once per pass.
#[test]
fn listeners_receive_updates() {
    init_tracing();
    let (store, scene, a, b) = parent_scene();
    let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
    let evaluator = Evaluator::serial();
    evaluator.evaluate(&mut graph, 1.0);

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (calls_clone, seen_clone) = (Arc::clone(&calls), Arc::clone(&seen));
    let listener = graph.subscribe(move |notification| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        seen_clone.lock().extend_from_slice(notification.updated);
    });

    store.edit(a, |block| block.set_property("location.y", 4.0));
    graph.tag_update(a, TagKind::Transform);
    evaluator.evaluate(&mut graph, 1.0);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let seen = seen.lock().clone();
    let recalc = |id| seen.iter().find(|(seen_id, _)| *seen_id == id).map(|(_, r)| *r);
    assert!(recalc(a).is_some_and(|r| r.contains(IdRecalc::TRANSFORM)));
    assert!(recalc(b).is_some_and(|r| r.contains(IdRecalc::TRANSFORM)));

    // A pass with nothing to do stays silent
    evaluator.evaluate(&mut graph, 1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(graph.unsubscribe(listener));
    assert_eq!(graph.listener_count(), 0);
}
