//! Operation Nodes
//!
//! The atomic unit of evaluation. An operation wraps a callback and carries
//! the scheduling state machine:
//!
//! ```text
//! Clean --tag--> Dirty --selected--> Scheduled --dispatched--> Running --> Done
//!   ^                                                                      |
//!   +---------------------------- end of pass ----------------------------+
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use smallvec::SmallVec;

use super::{NodeIndex, OperationKey, RelationIndex};
use crate::error::OperationError;
use crate::eval::OperationContext;

/// Operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum OperationCode {
    /// Component entry anchor.
    Entry,
    /// Component exit anchor.
    Exit,

    /// Copy original data into the evaluated copy.
    CopyOnEval,
    /// Generic parameter update.
    ParametersEval,
    /// Advance the scene clock.
    TimeSource,
    /// Apply keyframe animation.
    AnimationEval,
    /// Evaluate one driver.
    Driver,

    /// Reset the transform.
    TransformInit,
    /// Apply the local location.
    TransformLocal,
    /// Apply the parent transform.
    TransformParent,
    /// Apply the object constraint stack.
    TransformConstraints,
    /// Publish the final transform.
    TransformFinal,

    /// Fetch base geometry.
    GeometryEvalInit,
    /// Run the modifier stack.
    GeometryEval,
    /// Publish evaluated geometry.
    GeometryEvalDone,

    /// Reset the pose from rest data.
    PoseInit,
    /// Prepare IK solving.
    PoseInitIk,
    /// Solve one IK tree; named after its root bone.
    PoseIkSolver,
    /// Release IK scratch state.
    PoseCleanup,
    /// Pose fully evaluated.
    PoseDone,

    /// Bone local offset.
    BoneLocal,
    /// Bone parent transform.
    BonePoseParent,
    /// Bone constraint stack.
    BoneConstraints,
    /// Bone ready for IK and children sharing its root.
    BoneReady,
    /// Bone fully evaluated.
    BoneDone,

    /// Object shading update.
    ShadingUpdate,
    /// Material update.
    MaterialUpdate,
    /// Node tree output.
    NTreeOutput,
    /// Generate instances.
    Instancer,

    /// Client-defined operation.
    Generic,
}

impl OperationCode {
    /// Whether this is a component entry or exit anchor.
    pub fn is_anchor(&self) -> bool {
        matches!(self, OperationCode::Entry | OperationCode::Exit)
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags::bitflags! {
    /// Per-operation tag flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OperationFlags: u8 {
        /// Must run in the next pass.
        const NEEDS_UPDATE      = 0b0000_0001;
        /// Tagged directly rather than reached by the flush.
        const DIRECTLY_MODIFIED = 0b0000_0010;
        /// Tagged as the result of a user edit.
        const USER_MODIFIED     = 0b0000_0100;
        /// Ran during the last pass.
        const EVALUATED         = 0b0000_1000;
    }
}

/// Scheduling state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalState {
    /// Up to date.
    Clean,
    /// Tagged; must run in the next pass.
    Dirty,
    /// All dependencies satisfied; queued for dispatch.
    Scheduled,
    /// A worker is executing the callback.
    Running,
    /// Finished in the current pass (successfully or not).
    Done,
}

/// Callback run by an operation.
pub type OperationCallback =
    Arc<dyn Fn(&mut OperationContext<'_>) -> Result<(), OperationError> + Send + Sync>;

/// Wrap a closure as an [`OperationCallback`].
pub fn callback<F>(f: F) -> OperationCallback
where
    F: Fn(&mut OperationContext<'_>) -> Result<(), OperationError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An operation node.
pub struct OperationNode {
    /// Owning component.
    pub owner: NodeIndex,

    /// Identity.
    pub key: OperationKey,

    /// Work to do. Anchors and pure ordering points have none.
    pub callback: Option<OperationCallback>,

    /// Tag flags.
    pub flags: OperationFlags,

    /// Scheduling state.
    pub state: EvalState,

    /// Relations ending at this operation.
    pub inlinks: SmallVec<[RelationIndex; 4]>,

    /// Relations starting at this operation.
    pub outlinks: SmallVec<[RelationIndex; 4]>,

    /// Unfinished dirty dependencies during flattening.
    pub num_links_pending: u32,
}

impl OperationNode {
    /// A new operation. New operations start dirty so their first pass runs them.
    pub fn new(owner: NodeIndex, key: OperationKey) -> Self {
        Self {
            owner,
            key,
            callback: None,
            flags: OperationFlags::NEEDS_UPDATE,
            state: EvalState::Dirty,
            inlinks: SmallVec::new(),
            outlinks: SmallVec::new(),
            num_links_pending: 0,
        }
    }

    /// Whether the operation must run in the next pass.
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(OperationFlags::NEEDS_UPDATE)
    }

    /// Whether the operation is up to date.
    pub fn is_clean(&self) -> bool {
        self.state == EvalState::Clean
    }

    /// Mark dirty. Returns `false` if it already was.
    pub fn tag(&mut self, direct: bool) -> bool {
        let was_dirty = self.is_dirty();
        self.flags.insert(OperationFlags::NEEDS_UPDATE);
        if direct {
            self.flags.insert(OperationFlags::DIRECTLY_MODIFIED);
        }
        self.state = EvalState::Dirty;
        !was_dirty
    }

    /// Mark clean, dropping every tag flag.
    pub fn clear(&mut self) {
        self.flags.remove(
            OperationFlags::NEEDS_UPDATE
                | OperationFlags::DIRECTLY_MODIFIED
                | OperationFlags::USER_MODIFIED,
        );
        self.state = EvalState::Clean;
        self.num_links_pending = 0;
    }

    /// Whether a callback is attached.
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl fmt::Debug for OperationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationNode")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("callback", &self.callback.is_some())
            .field("flags", &self.flags)
            .field("state", &self.state)
            .field("inlinks", &self.inlinks.len())
            .field("outlinks", &self.outlinks.len())
            .finish()
    }
}
