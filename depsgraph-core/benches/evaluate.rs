use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use depsgraph_core::builder::{build_graph, build_graph_with, ViewLayerPipeline};
use depsgraph_core::config::{BuildConfig, EvaluatorConfig, RootLookup};
use depsgraph_core::data::{
    Armature, Collection, Constraint, DataBlockId, DataBlockKind, DataStore, Object, Scene,
};
use depsgraph_core::eval::Evaluator;
use depsgraph_core::graph::TagKind;

/// `chains` parent chains of `depth` objects each.
fn chain_scene(chains: usize, depth: usize) -> (DataStore, DataBlockId, Vec<DataBlockId>) {
    let mut store = DataStore::new();
    let mut objects = Vec::with_capacity(chains * depth);
    let mut roots = Vec::with_capacity(chains);
    for chain in 0..chains {
        let mut parent: Option<DataBlockId> = None;
        for level in 0..depth {
            let mut object = Object::at([1.0, 0.0, 0.0]);
            if let Some(parent) = parent {
                object = object.with_parent(parent);
            }
            let id = store.add(format!("OB{chain}.{level}"), DataBlockKind::Object(object));
            if parent.is_none() {
                roots.push(id);
            }
            parent = Some(id);
            objects.push(id);
        }
    }
    let scene = add_scene(&mut store, objects);
    (store, scene, roots)
}

/// One armature with `bones` bones in a single hierarchy and an IK chain
/// every eight bones.
fn rig_scene(bones: usize) -> (DataStore, DataBlockId) {
    let mut store = DataStore::new();
    let mut armature = Armature::default();
    for i in 0..bones {
        let parent = i.checked_sub(1).map(|p| format!("bone{p}"));
        armature = armature.with_bone(&format!("bone{i}"), parent.as_deref(), [0.0, 0.0, 1.0]);
    }
    let armature = store.add("Skeleton", DataBlockKind::Armature(armature));
    let target = store.add("Target", DataBlockKind::Object(Object::at([3.0, 0.0, 3.0])));

    let mut object = Object::default().with_data(armature);
    for i in (7..bones).step_by(8) {
        object.pose_channel_mut(&format!("bone{i}")).constraints.push(Constraint::Ik {
            target: Some(target),
            subtarget: None,
            chain_len: 4,
            use_tip: true,
        });
    }
    let rig = store.add("Rig", DataBlockKind::Object(object));
    let scene = add_scene(&mut store, vec![rig, target]);
    (store, scene)
}

fn add_scene(store: &mut DataStore, objects: Vec<DataBlockId>) -> DataBlockId {
    let collection = store.add("Master", DataBlockKind::Collection(Collection::of(objects)));
    store.add(
        "Scene",
        DataBlockKind::Scene(Scene {
            master_collection: Some(collection),
            ..Scene::default()
        }),
    )
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    group.sample_size(30);

    let (store, scene, _) = chain_scene(64, 8);
    group.bench_function("chains(64x8)", |b| {
        b.iter(|| black_box(build_graph(&store, &ViewLayerPipeline { scene }, None)));
    });

    let (store, scene) = rig_scene(256);
    for lookup in [RootLookup::Precomputed, RootLookup::Naive] {
        let config = BuildConfig {
            root_lookup: lookup,
            ..BuildConfig::default()
        };
        group.bench_function(format!("rig(256, {lookup:?})"), |b| {
            b.iter(|| {
                black_box(build_graph_with(
                    &store,
                    &ViewLayerPipeline { scene },
                    None,
                    &config,
                ))
            });
        });
    }
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    group.sample_size(30);

    let (store, scene, roots) = chain_scene(64, 8);
    let pipeline = ViewLayerPipeline { scene };
    let evaluators = [
        ("serial", Evaluator::serial()),
        (
            "pooled",
            Evaluator::new(
                EvaluatorConfig::with_threads(4)
                    .with_env_overrides()
                    .expect("valid DEPSGRAPH_THREADS"),
            )
            .expect("runtime starts"),
        ),
    ];

    for (name, evaluator) in &evaluators {
        group.bench_function(format!("full_pass({name})"), |b| {
            b.iter_batched(
                || build_graph(&store, &pipeline, None),
                |mut graph| black_box(evaluator.evaluate(&mut graph, 1.0)),
                BatchSize::LargeInput,
            );
        });

        group.bench_function(format!("tagged_root({name})"), |b| {
            let mut graph = build_graph(&store, &pipeline, None);
            evaluator.evaluate(&mut graph, 1.0);
            b.iter(|| {
                graph.tag_update(roots[0], TagKind::Transform);
                black_box(evaluator.evaluate(&mut graph, 1.0))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_evaluate);
criterion_main!(benches);
