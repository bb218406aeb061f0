//! Depsgraph Core
//!
//! A dependency graph for scene data. Given a store of data-blocks (objects,
//! meshes, armatures, materials, node trees, collections, scenes) it builds a
//! graph of fine-grained operations and the relations between them, then
//! re-evaluates only what an edit or a time change invalidated.
//!
//! # Architecture
//!
//! - `data`: the original scene data the graph is built from
//! - `node`: ID, component and operation nodes, relations, the node factory
//! - `graph`: the [`Depsgraph`] container, tagging and cycle handling
//! - `builder`: node and relation builders plus the pipelines driving them
//! - `eval`: the evaluator, evaluated copies and update listeners
//! - `config`: builder and evaluator settings
//!
//! # Example
//!
//! ```rust,ignore
//! use depsgraph_core::builder::{build_graph, ViewLayerPipeline};
//! use depsgraph_core::eval::Evaluator;
//! use depsgraph_core::graph::TagKind;
//!
//! let mut graph = build_graph(&store, &ViewLayerPipeline { scene }, None);
//! let evaluator = Evaluator::serial();
//! evaluator.evaluate(&mut graph, 1.0);
//!
//! // Move an object and re-evaluate what depends on it.
//! store.edit(cube, |block| block.set_property("location.x", 2.0));
//! graph.tag_update(cube, TagKind::Transform);
//! let report = evaluator.evaluate(&mut graph, 1.0);
//! ```

pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod graph;
pub mod node;

pub use builder::{build_graph, build_graph_with, BuilderPipeline, PipelineKind};
pub use config::{BuildConfig, EvaluatorConfig};
pub use data::{DataBlockId, DataStore};
pub use error::{BuildError, DepsgraphError, OperationError};
pub use eval::{EvalReport, Evaluator};
pub use graph::{Depsgraph, TagKind};
pub use node::OperationKey;
