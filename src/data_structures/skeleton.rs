//! Joint hierarchies for GPU skinning and the resolver that binds them to
//! actors.

use std::{collections::HashMap, sync::Arc};

use log::warn;

use crate::{
    data_structures::{
        actor::{Actor, UniformValue, uniform_names},
        scene_graph::SceneDocument,
        transform::{Mat4, Transform, identity, inverse_or_identity},
    },
    error::ViewerError,
    resources::animation::{AnimationClip, Pose},
};

#[derive(Clone, Debug, PartialEq)]
pub struct Joint {
    /// Scene node driving this joint; animation channels target it.
    pub node: usize,
    pub name: Option<String>,
    /// Index of the parent joint inside the same skeleton.
    pub parent: Option<usize>,
    /// Local transform in bind pose.
    pub rest: Transform,
    /// Transform of the non-joint ancestors, only used for root joints.
    pub root_offset: Mat4,
}

/// Per-joint matrices for one instant.
#[derive(Clone, Debug, PartialEq)]
pub struct JointMatrices {
    pub joint_to_world: Vec<Mat4>,
    pub world_to_joint: Vec<Mat4>,
}

impl JointMatrices {
    /// Uniform arrays of exactly `max_joints` entries; unused slots stay
    /// identity, surplus joints are dropped.
    pub fn to_uniforms(&self, max_joints: usize) -> [(&'static str, UniformValue); 2] {
        if self.joint_to_world.len() > max_joints {
            warn!(
                "skeleton has {} joints, only the first {} are passed to the shader",
                self.joint_to_world.len(),
                max_joints
            );
        }
        let pad = |matrices: &[Mat4]| {
            let mut padded: Vec<Mat4> = matrices.iter().take(max_joints).cloned().collect();
            padded.resize(max_joints, identity());
            UniformValue::MatrixArray(padded)
        };
        [
            (uniform_names::JOINT_TO_WORLD, pad(&self.joint_to_world)),
            (uniform_names::WORLD_TO_JOINT, pad(&self.world_to_joint)),
        ]
    }
}

/// A joint hierarchy with its bind data. Shared between actors, never
/// mutated after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Skeleton {
    joints: Vec<Joint>,
    inverse_bind: Vec<Mat4>,
    // joint indices sorted so parents come before their children
    order: Vec<usize>,
}

impl Skeleton {
    pub fn new(joints: Vec<Joint>, inverse_bind: Option<Vec<Mat4>>) -> Result<Self, String> {
        if joints.is_empty() {
            return Err("skin has no joints".to_string());
        }
        let mut depths = Vec::with_capacity(joints.len());
        for (idx, joint) in joints.iter().enumerate() {
            let mut depth = 0;
            let mut parent = joint.parent;
            while let Some(p) = parent {
                let Some(parent_joint) = joints.get(p) else {
                    return Err(format!("joint {} has unknown parent {}", idx, p));
                };
                depth += 1;
                if depth > joints.len() {
                    return Err(format!("joint {} is part of a cycle", idx));
                }
                parent = parent_joint.parent;
            }
            depths.push(depth);
        }
        let mut order: Vec<usize> = (0..joints.len()).collect();
        order.sort_by_key(|&idx| depths[idx]);

        let mut skeleton = Self {
            inverse_bind: Vec::new(),
            joints,
            order,
        };
        skeleton.inverse_bind = match inverse_bind {
            Some(matrices) if matrices.len() == skeleton.joints.len() => matrices,
            Some(matrices) => {
                return Err(format!(
                    "{} inverse bind matrices for {} joints",
                    matrices.len(),
                    skeleton.joints.len()
                ));
            }
            None => skeleton
                .world_transforms(None)
                .iter()
                .map(inverse_or_identity)
                .collect(),
        };
        Ok(skeleton)
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn contains_node(&self, node: usize) -> bool {
        self.joints.iter().any(|joint| joint.node == node)
    }

    /// World transform of every joint for `pose`, or the bind pose for `None`.
    pub fn world_transforms(&self, pose: Option<&Pose>) -> Vec<Mat4> {
        let mut world = vec![identity(); self.joints.len()];
        for &idx in &self.order {
            let joint = &self.joints[idx];
            let local = match pose {
                Some(pose) => pose.apply(joint.node, &joint.rest),
                None => joint.rest,
            };
            let parent = match joint.parent {
                Some(parent) => world[parent],
                None => joint.root_offset,
            };
            world[idx] = parent * local.to_matrix();
        }
        world
    }

    pub fn joint_matrices(&self, pose: Option<&Pose>) -> JointMatrices {
        JointMatrices {
            joint_to_world: self.world_transforms(pose),
            world_to_joint: self.inverse_bind.clone(),
        }
    }

    pub fn bind_pose(&self) -> JointMatrices {
        self.joint_matrices(None)
    }
}

/// Resolves skins of a parsed document into shared skeletons and attaches
/// them to actors.
///
/// Each skin is resolved at most once; actors using the same skin receive
/// the same `Arc`.
pub struct SkeletonResolver<'d> {
    doc: &'d SceneDocument,
    max_joints: usize,
    resolved: HashMap<usize, Option<(Arc<Skeleton>, Option<Arc<AnimationClip>>)>>,
}

impl<'d> SkeletonResolver<'d> {
    pub fn new(doc: &'d SceneDocument, max_joints: usize) -> Self {
        Self {
            doc,
            max_joints,
            resolved: HashMap::new(),
        }
    }

    /// Attaches the skeleton of `skin` to `actor`. A skin that fails to
    /// resolve is logged and the actor stays unskinned.
    pub fn bind(&mut self, actor: &mut Actor, skin: usize) {
        let doc = self.doc;
        let entry = self.resolved.entry(skin).or_insert_with(|| {
            match resolve_skeleton(doc, skin) {
                Ok(skeleton) => {
                    let animation = first_clip_for(doc, &skeleton);
                    Some((Arc::new(skeleton), animation))
                }
                Err(e) => {
                    warn!("{}, continuing without a skeleton", e);
                    None
                }
            }
        });
        let Some((skeleton, animation)) = entry else {
            return;
        };
        for (name, value) in skeleton.bind_pose().to_uniforms(self.max_joints) {
            actor.uniforms.insert(name.to_string(), value);
        }
        actor.skeleton = Some(skeleton.clone());
        actor.animation = animation.clone();
    }
}

/// Builds the skeleton of skin `skin` from the node hierarchy of `doc`.
pub fn resolve_skeleton(doc: &SceneDocument, skin: usize) -> Result<Skeleton, ViewerError> {
    let fail = |reason: String| ViewerError::SkeletonResolution { skin, reason };
    let data = doc
        .skins
        .get(skin)
        .ok_or_else(|| fail(format!("only {} skins in the scene", doc.skins.len())))?;

    let parents = doc.parent_map();
    let joint_of_node: HashMap<usize, usize> = data
        .joints
        .iter()
        .enumerate()
        .map(|(joint, &node)| (node, joint))
        .collect();

    let mut joints = Vec::with_capacity(data.joints.len());
    for &node_idx in &data.joints {
        let node = doc
            .nodes
            .get(node_idx)
            .ok_or_else(|| fail(format!("joint references missing node {}", node_idx)))?;
        let parent = parents
            .get(&node_idx)
            .and_then(|parent_node| joint_of_node.get(parent_node))
            .copied();
        let root_offset = match parent {
            Some(_) => identity(),
            None => doc.ancestor_transform(node_idx, &parents),
        };
        joints.push(Joint {
            node: node_idx,
            name: node.name.clone(),
            parent,
            rest: node.transform,
            root_offset,
        });
    }

    Skeleton::new(joints, data.inverse_bind_matrices.clone()).map_err(fail)
}

/// First clip of the document animating any joint of `skeleton`.
fn first_clip_for(doc: &SceneDocument, skeleton: &Skeleton) -> Option<Arc<AnimationClip>> {
    doc.animations
        .iter()
        .find(|clip| clip.target_nodes().any(|node| skeleton.contains_node(node)))
        .cloned()
}
