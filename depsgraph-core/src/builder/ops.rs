//! Operation callbacks.
//!
//! Constructors for the callbacks the node builder attaches. Per-build
//! context (parents, constraint stacks, modifier stacks, IK chains) is
//! captured by value when the graph is built, which is why a rebuild replaces
//! callbacks. Everything that can be animated is read from evaluated copies
//! at run time.

use indexmap::IndexMap;

use super::root_map::IkChain;
use crate::data::{
    Constraint, DataBlock, DataBlockId, DriverTarget, Modifier, Parent, ParentKind,
};
use crate::error::OperationError;
use crate::eval::{add, length, sub, GeometryResult, OperationContext, PoseResult};
use crate::node::{callback, OperationCallback};

fn missing(what: impl Into<String>) -> OperationError {
    OperationError::MissingValue(what.into())
}

/// World-space position of an object, or of one of its bones.
fn target_world(
    ctx: &mut OperationContext<'_>,
    target: DataBlockId,
    bone: Option<&str>,
) -> Result<[f64; 3], OperationError> {
    match bone {
        Some(bone) => ctx
            .dependency(target, |e| e.bone_world_head(bone))?
            .ok_or_else(|| missing(format!("{target} bone `{bone}`"))),
        None => ctx.dependency(target, |e| e.world_location),
    }
}

/// Move `position` to within `distance` of `target`.
fn limit_distance(position: [f64; 3], target: [f64; 3], distance: f64) -> [f64; 3] {
    let offset = sub(position, target);
    let current = length(offset);
    if current <= distance || current == 0.0 {
        return position;
    }
    let scale = distance / current;
    add(target, [offset[0] * scale, offset[1] * scale, offset[2] * scale])
}

// ----------------------------------------------------------------------
// Per-ID
// ----------------------------------------------------------------------

/// Copy the original into the evaluated copy.
pub fn copy_on_eval() -> OperationCallback {
    callback(|ctx| {
        let copy = ctx.original(DataBlock::clone)?;
        ctx.owner_mut(|e| e.data = Some(copy));
        Ok(())
    })
}

/// Apply keyframed curves at the current time.
pub fn animation_eval() -> OperationCallback {
    callback(|ctx| {
        let time = ctx.time();
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            let values: Vec<(String, f64)> = e
                .data
                .as_ref()
                .and_then(|data| data.anim.as_ref())
                .map(|anim| {
                    anim.fcurves
                        .iter()
                        .map(|curve| (curve.property.clone(), curve.evaluate(time)))
                        .collect()
                })
                .ok_or_else(|| missing("animation data"))?;
            for (property, value) in values {
                e.set_property(&property, value);
            }
            Ok(())
        })
    })
}

/// Evaluate the driver writing `property`.
pub fn driver(property: String) -> OperationCallback {
    callback(move |ctx| {
        let driver = ctx
            .owner(|e| {
                e.data
                    .as_ref()
                    .and_then(|data| data.anim.as_ref())
                    .and_then(|anim| anim.drivers.iter().find(|d| d.property == property))
                    .cloned()
            })
            .ok_or_else(|| missing(format!("driver for `{property}`")))?;

        let mut values = Vec::with_capacity(driver.variables.len());
        for variable in &driver.variables {
            let value = match &variable.target {
                DriverTarget::Time => ctx.time(),
                DriverTarget::Property { id, path } => ctx
                    .dependency(*id, |e| e.property(path))?
                    .ok_or_else(|| missing(format!("{id} `{path}`")))?,
            };
            values.push(value);
        }

        let value = driver.kind.combine(&values);
        if !ctx.owner_mut(|e| e.set_property(&property, value)) {
            return Err(missing("evaluated data"));
        }
        Ok(())
    })
}

/// Advance the scene clock.
pub fn time_source() -> OperationCallback {
    callback(|ctx| {
        let time = ctx.time();
        ctx.owner_mut(|e| e.frame = time);
        Ok(())
    })
}

// ----------------------------------------------------------------------
// Transform
// ----------------------------------------------------------------------

/// Reset the world location.
pub fn transform_init() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| e.world_location = [0.0; 3]);
        Ok(())
    })
}

/// Apply the (possibly animated) local location.
pub fn transform_local() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            let location = e
                .data
                .as_ref()
                .and_then(DataBlock::as_object)
                .map(|object| object.location)
                .ok_or_else(|| missing("object data"))?;
            e.world_location = add(e.world_location, location);
            Ok(())
        })
    })
}

/// Offset by the parent.
pub fn transform_parent(parent: Option<Parent>) -> OperationCallback {
    callback(move |ctx| {
        let Some(parent) = &parent else {
            return Ok(());
        };
        let origin = match &parent.kind {
            ParentKind::Object => target_world(ctx, parent.object, None)?,
            ParentKind::Bone(bone) => target_world(ctx, parent.object, Some(bone))?,
            ParentKind::Vertex => {
                let (world, geometry) =
                    ctx.dependency(parent.object, |e| (e.world_location, e.geometry))?;
                let geometry =
                    geometry.ok_or_else(|| missing(format!("{} geometry", parent.object)))?;
                add(world, geometry.offset)
            }
        };
        ctx.owner_mut(|e| e.world_location = add(e.world_location, origin));
        Ok(())
    })
}

/// Apply an object constraint stack in order.
pub fn transform_constraints(constraints: Vec<Constraint>) -> OperationCallback {
    callback(move |ctx| {
        let mut world = ctx.owner(|e| e.world_location);
        for constraint in &constraints {
            match constraint {
                Constraint::CopyLocation { target, subtarget } => {
                    world = target_world(ctx, *target, subtarget.as_deref())?;
                }
                Constraint::LimitDistance {
                    target,
                    subtarget,
                    distance,
                } => {
                    let anchor = target_world(ctx, *target, subtarget.as_deref())?;
                    world = limit_distance(world, anchor, *distance);
                }
                Constraint::ShrinkWrap { target } => {
                    let (anchor, geometry) =
                        ctx.dependency(*target, |e| (e.world_location, e.geometry))?;
                    let geometry = geometry.ok_or_else(|| missing(format!("{target} geometry")))?;
                    world[2] = anchor[2] + geometry.offset[2];
                }
                Constraint::Ik { .. } => {}
            }
        }
        ctx.owner_mut(|e| e.world_location = world);
        Ok(())
    })
}

/// Publish the transform.
pub fn transform_final() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| e.transform_revision += 1);
        Ok(())
    })
}

// ----------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------

/// Mesh data: base geometry from the mesh's evaluated copy.
pub fn mesh_eval() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            let vertex_count = e
                .data
                .as_ref()
                .and_then(DataBlock::as_mesh)
                .map(|mesh| mesh.vertex_count)
                .ok_or_else(|| missing("mesh data"))?;
            e.geometry = Some(GeometryResult {
                vertex_count,
                ..GeometryResult::default()
            });
            Ok(())
        })
    })
}

/// Object geometry: start from the mesh.
pub fn geometry_init(mesh: DataBlockId) -> OperationCallback {
    callback(move |ctx| {
        let base = ctx
            .dependency(mesh, |e| e.geometry)?
            .ok_or_else(|| missing(format!("{mesh} geometry")))?;
        ctx.owner_mut(|e| e.geometry = Some(base));
        Ok(())
    })
}

/// Run the modifier stack.
pub fn geometry_eval(modifiers: Vec<Modifier>) -> OperationCallback {
    callback(move |ctx| {
        let (world, geometry) = ctx.owner(|e| (e.world_location, e.geometry));
        let mut geometry = geometry.ok_or_else(|| missing("base geometry"))?;

        for modifier in &modifiers {
            match modifier {
                Modifier::Subdivision { levels } => {
                    let factor = 4u64.saturating_pow(*levels);
                    geometry.vertex_count = geometry.vertex_count.saturating_mul(factor);
                }
                Modifier::Array {
                    count,
                    offset_object,
                } => {
                    geometry.vertex_count = geometry.vertex_count.saturating_mul(u64::from(*count));
                    if let Some(offset) = offset_object {
                        let other = target_world(ctx, *offset, None)?;
                        geometry.offset = add(geometry.offset, sub(other, world));
                    }
                }
                Modifier::Armature { object } => {
                    let posed = ctx.dependency(*object, |e| {
                        !e.pose.is_empty() && e.pose.values().all(|bone| bone.done)
                    })?;
                    if !posed {
                        return Err(OperationError::Failed(format!(
                            "armature {object} pose is not evaluated"
                        )));
                    }
                    geometry.deformed = true;
                }
                Modifier::Boolean { object } => {
                    let operand = ctx
                        .dependency(*object, |e| e.geometry)?
                        .ok_or_else(|| missing(format!("{object} geometry")))?;
                    geometry.vertex_count =
                        geometry.vertex_count.saturating_add(operand.vertex_count);
                }
                Modifier::VertexWeight { .. } => {}
                Modifier::Nodes { tree } => {
                    let revision = ctx.dependency(*tree, |e| e.tree_revision)?;
                    if revision == 0 {
                        return Err(OperationError::Failed(format!(
                            "node tree {tree} has no output"
                        )));
                    }
                }
            }
        }

        ctx.owner_mut(|e| e.geometry = Some(geometry));
        Ok(())
    })
}

// ----------------------------------------------------------------------
// Shading, node trees, instancing
// ----------------------------------------------------------------------

/// Bump the shading revision. Used for both objects and materials.
pub fn shading_update() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| e.shading_revision += 1);
        Ok(())
    })
}

/// Bump the node tree output revision.
pub fn ntree_output() -> OperationCallback {
    callback(|ctx| {
        ctx.owner_mut(|e| e.tree_revision += 1);
        Ok(())
    })
}

/// Place instances: one per `(object, copies)` entry and copy.
pub fn instancer(sources: Vec<(DataBlockId, u32)>) -> OperationCallback {
    callback(move |ctx| {
        let origin = ctx.owner(|e| e.world_location);
        let mut instances = Vec::new();
        for (object, copies) in &sources {
            let position = add(origin, target_world(ctx, *object, None)?);
            instances.extend(std::iter::repeat(position).take(*copies as usize));
        }
        ctx.owner_mut(|e| e.instances = instances);
        Ok(())
    })
}

// ----------------------------------------------------------------------
// Pose
// ----------------------------------------------------------------------

/// Reset the pose from the armature's rest bones and the pose channels.
pub fn pose_init() -> OperationCallback {
    callback(|ctx| {
        let (armature, channels) = ctx
            .owner(|e| {
                e.data
                    .as_ref()
                    .and_then(DataBlock::as_object)
                    .map(|object| (object.data, object.pose.clone()))
            })
            .ok_or_else(|| missing("armature object data"))?;
        let armature = armature.ok_or_else(|| missing("armature"))?;
        let bones = ctx
            .dependency(armature, |e| {
                e.data
                    .as_ref()
                    .and_then(DataBlock::as_armature)
                    .map(|armature| armature.bones.clone())
            })?
            .ok_or_else(|| missing(format!("{armature} bones")))?;

        let pose = bones
            .into_iter()
            .map(|(name, bone)| {
                let offset = channels
                    .get(&name)
                    .map(|channel| channel.location)
                    .unwrap_or_default();
                let local = add(bone.head, offset);
                let result = PoseResult {
                    local,
                    head: local,
                    ik_solved: false,
                    done: false,
                };
                (name, result)
            })
            .collect();
        ctx.owner_mut(|e| e.pose = pose);
        Ok(())
    })
}

fn pose_bone_mut<'a>(
    pose: &'a mut IndexMap<String, PoseResult>,
    bone: &str,
) -> Result<&'a mut PoseResult, OperationError> {
    pose.get_mut(bone)
        .ok_or_else(|| missing(format!("pose bone `{bone}`")))
}

/// Bone local offset.
pub fn bone_local(bone: String) -> OperationCallback {
    callback(move |ctx| {
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            let result = pose_bone_mut(&mut e.pose, &bone)?;
            result.head = result.local;
            Ok(())
        })
    })
}

/// Offset a bone by its parent's head.
pub fn bone_pose_parent(bone: String, parent: Option<String>) -> OperationCallback {
    callback(move |ctx| {
        let Some(parent) = &parent else {
            return Ok(());
        };
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            let parent_head = e
                .pose
                .get(parent)
                .map(|p| p.head)
                .ok_or_else(|| missing(format!("pose bone `{parent}`")))?;
            let result = pose_bone_mut(&mut e.pose, &bone)?;
            result.head = add(parent_head, result.local);
            Ok(())
        })
    })
}

/// Apply a bone constraint stack. IK constraints are handled by solvers.
pub fn bone_constraints(bone: String, constraints: Vec<Constraint>) -> OperationCallback {
    callback(move |ctx| {
        let (world, mut head) = ctx.owner(|e| {
            (e.world_location, e.pose.get(&bone).map(|result| result.head))
        });
        let Some(current) = head.as_mut() else {
            return Err(missing(format!("pose bone `{bone}`")));
        };
        for constraint in &constraints {
            match constraint {
                Constraint::CopyLocation { target, subtarget } => {
                    let anchor = target_world(ctx, *target, subtarget.as_deref())?;
                    *current = sub(anchor, world);
                }
                Constraint::LimitDistance {
                    target,
                    subtarget,
                    distance,
                } => {
                    let anchor = sub(target_world(ctx, *target, subtarget.as_deref())?, world);
                    *current = limit_distance(*current, anchor, *distance);
                }
                Constraint::ShrinkWrap { .. } | Constraint::Ik { .. } => {}
            }
        }
        let head = *current;
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            pose_bone_mut(&mut e.pose, &bone)?.head = head;
            Ok(())
        })
    })
}

/// Solve the IK chains sharing one root: every chain bone is marked solved
/// and the tip snaps to the target.
pub fn ik_solver(chains: Vec<IkChain>) -> OperationCallback {
    callback(move |ctx| {
        let world = ctx.owner(|e| e.world_location);
        let mut goals = Vec::with_capacity(chains.len());
        for chain in &chains {
            let goal = match &chain.target {
                Some((target, bone)) => Some(sub(target_world(ctx, *target, bone.as_deref())?, world)),
                None => None,
            };
            goals.push(goal);
        }
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            for (chain, goal) in chains.iter().zip(goals) {
                for bone in &chain.bones {
                    pose_bone_mut(&mut e.pose, bone)?.ik_solved = true;
                }
                if let (Some(tip), Some(goal)) = (chain.tip(), goal) {
                    pose_bone_mut(&mut e.pose, tip)?.head = goal;
                }
            }
            Ok(())
        })
    })
}

/// Mark a bone fully evaluated.
pub fn bone_done(bone: String) -> OperationCallback {
    callback(move |ctx| {
        ctx.owner_mut(|e| -> Result<(), OperationError> {
            pose_bone_mut(&mut e.pose, &bone)?.done = true;
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_distance_clamps() {
        let moved = limit_distance([4.0, 0.0, 0.0], [0.0; 3], 2.0);
        assert_eq!(moved, [2.0, 0.0, 0.0]);
        let kept = limit_distance([1.0, 0.0, 0.0], [0.0; 3], 2.0);
        assert_eq!(kept, [1.0, 0.0, 0.0]);
    }
}
