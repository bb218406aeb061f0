//! Builder pipelines.
//!
//! A pipeline decides which data-blocks a graph is built from and which
//! relation categories are wired. The node and relation model is the same for
//! every pipeline.

use serde::{Deserialize, Serialize};

use super::{NodeBuilder, RelationBuilder};
use crate::data::{DataBlockId, DataStore, IdType};

/// Which pipeline built a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineKind {
    /// Everything visible in the viewport of one scene.
    ViewLayer,
    /// Every object in the store.
    AllObjects,
    /// Everything a final render of one scene needs.
    Render,
    /// Only what a scene's compositor tree reads.
    Compositor,
}

bitflags::bitflags! {
    /// Relation categories a pipeline wires.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RelationFilter: u16 {
        /// Time source to keyframe animation.
        const ANIMATION   = 1 << 0;
        /// Driver variables.
        const DRIVERS     = 1 << 1;
        /// Object, bone and vertex parents.
        const PARENTING   = 1 << 2;
        /// Object constraint targets.
        const CONSTRAINTS = 1 << 3;
        /// Modifier inputs.
        const MODIFIERS   = 1 << 4;
        /// Armature pose and bone chains.
        const RIG         = 1 << 5;
        /// Materials to shading.
        const SHADING     = 1 << 6;
        /// Node tree references.
        const NODE_TREES  = 1 << 7;
        /// Collection and particle instancing.
        const INSTANCING  = 1 << 8;
    }
}

/// How collection visibility is interpreted while walking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Skip collections hidden in the viewport.
    Viewport,
    /// Skip collections hidden in renders.
    Render,
    /// Walk everything; objects count as visible.
    All,
    /// Walk everything; objects are only instanced, not visible themselves.
    Instanced,
}

impl Visibility {
    /// Whether a collection with these flags is skipped.
    pub fn skips(&self, hide_viewport: bool, hide_render: bool) -> bool {
        match self {
            Visibility::Viewport => hide_viewport,
            Visibility::Render => hide_render,
            Visibility::All | Visibility::Instanced => false,
        }
    }

    /// Whether objects reached this way are marked visible.
    pub fn marks_visible(&self) -> bool {
        !matches!(self, Visibility::Instanced)
    }
}

/// A builder configuration.
///
/// Both passes must walk the same roots; relation building only visits
/// data-blocks the node pass created.
pub trait BuilderPipeline {
    /// Identifies the pipeline on the built graph.
    fn kind(&self) -> PipelineKind;

    /// Relation categories to wire.
    fn filter(&self) -> RelationFilter {
        RelationFilter::all()
    }

    /// Create nodes for the root set.
    fn build_nodes(&self, builder: &mut NodeBuilder<'_>);

    /// Create relations for the root set.
    fn build_relations(&self, builder: &mut RelationBuilder<'_>);
}

/// Objects in the viewport-visible collections of a scene, plus its camera.
#[derive(Debug, Clone, Copy)]
pub struct ViewLayerPipeline {
    /// The scene.
    pub scene: DataBlockId,
}

impl BuilderPipeline for ViewLayerPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::ViewLayer
    }

    fn build_nodes(&self, builder: &mut NodeBuilder<'_>) {
        builder.build_scene(self.scene, Visibility::Viewport);
    }

    fn build_relations(&self, builder: &mut RelationBuilder<'_>) {
        builder.build_scene(self.scene, Visibility::Viewport);
    }
}

/// Every scene and every object in the store, regardless of visibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllObjectsPipeline;

impl AllObjectsPipeline {
    fn roots(store: &DataStore) -> (Vec<DataBlockId>, Vec<DataBlockId>) {
        (
            store.ids_of_type(&IdType::Scene).collect(),
            store.ids_of_type(&IdType::Object).collect(),
        )
    }
}

impl BuilderPipeline for AllObjectsPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::AllObjects
    }

    fn build_nodes(&self, builder: &mut NodeBuilder<'_>) {
        let (scenes, objects) = Self::roots(builder.store());
        for scene in scenes {
            builder.build_scene(scene, Visibility::All);
        }
        for object in objects {
            builder.build_object(object, true);
        }
    }

    fn build_relations(&self, builder: &mut RelationBuilder<'_>) {
        let (scenes, objects) = Self::roots(builder.store());
        for scene in scenes {
            builder.build_scene(scene, Visibility::All);
        }
        for object in objects {
            builder.build_object(object);
        }
    }
}

/// Render-visible objects, the camera and the compositor of a scene.
#[derive(Debug, Clone, Copy)]
pub struct RenderPipeline {
    /// The scene.
    pub scene: DataBlockId,
}

impl BuilderPipeline for RenderPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Render
    }

    fn build_nodes(&self, builder: &mut NodeBuilder<'_>) {
        builder.build_scene(self.scene, Visibility::Render);
        builder.build_compositor(self.scene);
    }

    fn build_relations(&self, builder: &mut RelationBuilder<'_>) {
        builder.build_scene(self.scene, Visibility::Render);
        builder.build_compositor(self.scene);
    }
}

/// The scene clock and the compositor tree with what it references.
///
/// Objects only enter the graph when a tree node reads them, and instancing
/// is never evaluated.
#[derive(Debug, Clone, Copy)]
pub struct CompositorPipeline {
    /// The scene.
    pub scene: DataBlockId,
}

impl BuilderPipeline for CompositorPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Compositor
    }

    fn filter(&self) -> RelationFilter {
        RelationFilter::all() - RelationFilter::INSTANCING
    }

    fn build_nodes(&self, builder: &mut NodeBuilder<'_>) {
        builder.build_scene_parameters(self.scene);
        builder.build_compositor(self.scene);
    }

    fn build_relations(&self, builder: &mut RelationBuilder<'_>) {
        builder.build_scene_parameters(self.scene);
        builder.build_compositor(self.scene);
    }
}
