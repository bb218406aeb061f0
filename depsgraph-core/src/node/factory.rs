//! Node Factory Registry
//!
//! Process-wide table mapping a node type to the factory that constructs it.
//! Builders never switch over component types; they ask the registry, so a new
//! component type only needs a registered factory.
//!
//! # Lifecycle
//!
//! 1. [`init`] registers the built-in factories. It runs once per process no
//!    matter how many threads call it, and every lookup calls it first.
//! 2. Clients may [`register`] additional factories for
//!    [`NodeType::Custom`] types, ideally at startup.
//! 3. Registering the same type twice is a programming error: [`register`]
//!    panics, [`try_register`] returns the error for callers that want to
//!    report it themselves.

use std::sync::{Arc, Once, OnceLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{ComponentNode, IdNode, IdRecalc, Node, NodePayload, NodeType};
use crate::data::DataBlockId;
use crate::error::FactoryError;

/// Constructor and metadata for one node type.
pub trait NodeFactory: Send + Sync {
    /// Type this factory builds.
    fn ty(&self) -> NodeType;

    /// Human readable type name.
    fn type_name(&self) -> &str;

    /// Bits set on the owning ID when a node of this type is tagged.
    fn id_recalc_tag(&self) -> IdRecalc;

    /// Build a detached node. `subdata` is the component name (bone name for
    /// bones), `name` the diagnostic name.
    fn create(&self, id: DataBlockId, subdata: &str, name: &str) -> Node;
}

/// Factory for component nodes.
#[derive(Debug, Clone)]
pub struct ComponentFactory {
    ty: NodeType,
    type_name: String,
    recalc: IdRecalc,
}

impl ComponentFactory {
    /// A factory producing components of `ty`.
    pub fn new(ty: NodeType, type_name: impl Into<String>, recalc: IdRecalc) -> Self {
        Self {
            ty,
            type_name: type_name.into(),
            recalc,
        }
    }
}

impl NodeFactory for ComponentFactory {
    fn ty(&self) -> NodeType {
        self.ty
    }

    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn id_recalc_tag(&self) -> IdRecalc {
        self.recalc
    }

    fn create(&self, id: DataBlockId, subdata: &str, name: &str) -> Node {
        Node::new(
            self.ty,
            name,
            NodePayload::Component(ComponentNode::new(id, self.ty, subdata)),
        )
    }
}

struct IdFactory;

impl NodeFactory for IdFactory {
    fn ty(&self) -> NodeType {
        NodeType::Id
    }

    fn type_name(&self) -> &str {
        "ID Node"
    }

    fn id_recalc_tag(&self) -> IdRecalc {
        IdRecalc::empty()
    }

    fn create(&self, id: DataBlockId, _subdata: &str, name: &str) -> Node {
        Node::new(NodeType::Id, name, NodePayload::Id(IdNode::unbound(id)))
    }
}

// Global factory table, filled by `init` and client registrations.
static REGISTRY: OnceLock<DashMap<NodeType, Arc<dyn NodeFactory>>> = OnceLock::new();
static BUILTINS: Once = Once::new();

fn get_registry() -> &'static DashMap<NodeType, Arc<dyn NodeFactory>> {
    REGISTRY.get_or_init(DashMap::new)
}

fn builtin_recalc(ty: NodeType) -> IdRecalc {
    match ty {
        NodeType::TimeSource => IdRecalc::TIME,
        NodeType::CopyOnEval => IdRecalc::COPY_ON_EVAL,
        NodeType::Animation => IdRecalc::ANIMATION,
        NodeType::Transform => IdRecalc::TRANSFORM,
        NodeType::Geometry | NodeType::Instancing => IdRecalc::GEOMETRY,
        NodeType::EvalPose | NodeType::Bone => IdRecalc::POSE,
        NodeType::Shading | NodeType::NTreeOutput => IdRecalc::SHADING,
        _ => IdRecalc::PARAMETERS,
    }
}

/// Register the built-in factories. Idempotent and thread-safe.
pub fn init() {
    BUILTINS.call_once(|| {
        register(Arc::new(IdFactory));
        for ty in NodeType::BUILTIN_COMPONENTS {
            register(Arc::new(ComponentFactory::new(
                ty,
                ty.to_string(),
                builtin_recalc(ty),
            )));
        }
    });
}

/// Register a factory, reporting duplicates as an error.
pub fn try_register(factory: Arc<dyn NodeFactory>) -> Result<(), FactoryError> {
    let ty = factory.ty();
    match get_registry().entry(ty) {
        Entry::Occupied(_) => Err(FactoryError::AlreadyRegistered(ty)),
        Entry::Vacant(slot) => {
            slot.insert(factory);
            Ok(())
        }
    }
}

/// Register a factory.
///
/// # Panics
///
/// If a factory for the same type is already registered.
pub fn register(factory: Arc<dyn NodeFactory>) {
    if let Err(err) = try_register(factory) {
        panic!("{err}");
    }
}

/// Look up the factory for `ty`.
pub fn get(ty: NodeType) -> Result<Arc<dyn NodeFactory>, FactoryError> {
    init();
    get_registry()
        .get(&ty)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or(FactoryError::NotRegistered(ty))
}

/// Whether a factory for `ty` is registered.
pub fn is_registered(ty: NodeType) -> bool {
    get(ty).is_ok()
}

/// Build a node through its factory.
///
/// # Panics
///
/// If no factory is registered for `ty`.
pub fn create(ty: NodeType, id: DataBlockId, subdata: &str, name: &str) -> Node {
    match get(ty) {
        Ok(factory) => factory.create(id, subdata, name),
        Err(err) => panic!("{err}"),
    }
}

/// Recalc bits for tagging a node of type `ty`. Unregistered types fall back
/// to [`IdRecalc::PARAMETERS`].
pub fn id_recalc_tag(ty: NodeType) -> IdRecalc {
    get(ty)
        .map(|factory| factory.id_recalc_tag())
        .unwrap_or(IdRecalc::PARAMETERS)
}
