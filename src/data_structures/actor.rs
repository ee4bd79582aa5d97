//! Actors: the flat render units produced from a scene graph.

use std::{collections::HashMap, sync::Arc};

use crate::{
    data_structures::{
        skeleton::Skeleton,
        transform::{Mat4, Vec3},
    },
    resources::animation::AnimationClip,
};

/// Uniform names shared by the render builder and the default shader.
pub mod uniform_names {
    pub const LOCAL_TO_WORLD: &str = "LocalToWorldTransform";
    pub const WORLD_TO_CAMERA: &str = "WorldToCameraTransform";
    pub const CAMERA_PROJECTION: &str = "CameraProjectionTransform";
    pub const TIME: &str = "Time";
    pub const JOINT_TO_WORLD: &str = "JointToWorldMatrixes";
    pub const WORLD_TO_JOINT: &str = "WorldToJointMatrixes";
}

/// Value of a single shader uniform.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix(Mat4),
    MatrixArray(Vec<Mat4>),
}

impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        UniformValue::Float(v)
    }
}

impl From<[f32; 3]> for UniformValue {
    fn from(v: [f32; 3]) -> Self {
        UniformValue::Vec3(v)
    }
}

impl From<[f32; 4]> for UniformValue {
    fn from(v: [f32; 4]) -> Self {
        UniformValue::Vec4(v)
    }
}

impl From<Mat4> for UniformValue {
    fn from(m: Mat4) -> Self {
        UniformValue::Matrix(m)
    }
}

impl From<Vec<Mat4>> for UniformValue {
    fn from(ms: Vec<Mat4>) -> Self {
        UniformValue::MatrixArray(ms)
    }
}

pub type Uniforms = HashMap<String, UniformValue>;

/// One renderable instance derived from a scene node and one of its
/// primitive groups.
///
/// Skeletons and clips belong to the parsed scene; actors only hold shared
/// handles and never mutate them.
#[derive(Clone, Debug)]
pub struct Actor {
    /// Asset store name of the compiled geometry.
    pub geometry: String,
    /// Per-actor overrides, merged over the computed uniforms each frame.
    pub uniforms: Uniforms,
    /// Explicit world position; falls back to the [`PlacementPolicy`].
    pub translation: Option<Vec3>,
    /// Position of the owning node in the traversal order.
    pub ordinal: usize,
    pub skeleton: Option<Arc<Skeleton>>,
    pub animation: Option<Arc<AnimationClip>>,
}

impl Actor {
    pub fn new(geometry: impl Into<String>, ordinal: usize) -> Self {
        Self {
            geometry: geometry.into(),
            uniforms: Uniforms::new(),
            translation: None,
            ordinal,
            skeleton: None,
            animation: None,
        }
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = Some(translation);
        self
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.uniforms.insert(name.into(), value.into());
        self
    }

    pub fn world_position(&self, placement: &PlacementPolicy) -> Vec3 {
        self.translation
            .unwrap_or_else(|| placement.place(self.ordinal))
    }
}

/// Where actors without an explicit translation end up.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlacementPolicy {
    /// Lays ordinals out row by row on the xz plane.
    Grid { columns: usize, spacing: f32 },
    Origin,
}

impl PlacementPolicy {
    pub fn place(&self, ordinal: usize) -> Vec3 {
        match *self {
            PlacementPolicy::Grid { columns, spacing } => {
                let columns = columns.max(1);
                let x = (ordinal % columns) as f32 * spacing;
                let z = (ordinal / columns) as f32 * spacing;
                Vec3::new(x, 0.0, z)
            }
            PlacementPolicy::Origin => Vec3::new(0.0, 0.0, 0.0),
        }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        PlacementPolicy::Grid {
            columns: 8,
            spacing: 2.0,
        }
    }
}
