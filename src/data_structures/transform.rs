//! Transform math used by the viewer.
//!
//! Everything matrix related goes through `cgmath`; this module only adds a
//! TRS transform that can be composed like the nodes of a scene graph and a
//! handful of helpers with the fallbacks the render path needs.

use std::ops::Mul;

use cgmath::{InnerSpace, Matrix4, One, SquareMatrix, VectorSpace};

pub type Mat4 = Matrix4<f32>;
pub type Vec3 = cgmath::Vector3<f32>;
pub type Quat = cgmath::Quaternion<f32>;

/// Local transformation: translation, rotation (as quaternion), and scale.
///
/// Joints of a skeleton and nodes of a parsed scene carry one of these. A
/// parent transform applied to a child transform (`parent * child`) yields
/// the child's transform in the parent's space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            translation: Vec3::new(0.0, 0.0, 0.0),
            rotation: Quat::one(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }

    /// Builds a transform from glTF style `(translation, [x, y, z, w], scale)`.
    pub fn from_decomposed((t, r, s): ([f32; 3], [f32; 4], [f32; 3])) -> Self {
        Self {
            translation: t.into(),
            // cgmath stores the scalar part first
            rotation: Quat::new(r[3], r[0], r[1], r[2]),
            scale: s.into(),
        }
    }

    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.translation)
            * Mat4::from(self.rotation)
            * Mat4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec3> for Transform {
    fn from(translation: Vec3) -> Self {
        Transform {
            translation,
            ..Default::default()
        }
    }
}

impl<'a, 'b> Mul<&'b Transform> for &'a Transform {
    type Output = Transform;

    fn mul(self, rhs: &'b Transform) -> Self::Output {
        let scaled_rhs_pos = Vec3::new(
            self.scale.x * rhs.translation.x,
            self.scale.y * rhs.translation.y,
            self.scale.z * rhs.translation.z,
        );
        Transform {
            translation: self.translation + (self.rotation * scaled_rhs_pos),
            rotation: self.rotation * rhs.rotation,
            scale: Vec3::new(
                self.scale.x * rhs.scale.x,
                self.scale.y * rhs.scale.y,
                self.scale.z * rhs.scale.z,
            ),
        }
    }
}

impl Mul<Transform> for Transform {
    type Output = Self;

    fn mul(self, rhs: Transform) -> Self::Output {
        &self * &rhs
    }
}

pub fn identity() -> Mat4 {
    Mat4::identity()
}

pub fn translation(v: Vec3) -> Mat4 {
    Mat4::from_translation(v)
}

/// Inverse of `m`, or identity when `m` is singular.
pub fn inverse_or_identity(m: &Mat4) -> Mat4 {
    m.invert().unwrap_or_else(|| {
        log::warn!("tried to invert a singular matrix, using identity instead");
        Mat4::identity()
    })
}

pub fn lerp(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a.lerp(b, t)
}

/// Spherical interpolation along the shortest arc.
pub fn slerp(a: Quat, b: Quat, t: f32) -> Quat {
    let b = if a.dot(b) < 0.0 { -b } else { b };
    a.slerp(b, t)
}

/// Column major float array as expected by GPU uniform buffers.
pub fn to_cols(m: &Mat4) -> [[f32; 4]; 4] {
    (*m).into()
}
