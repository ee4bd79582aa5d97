//! Animation clips and the sampler producing poses from them.

use std::{
    collections::HashMap,
    ops::{Add, Mul},
};

use cgmath::InnerSpace;

use crate::{
    data_structures::transform::{Quat, Transform, Vec3, lerp, slerp},
    error::ViewerError,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Keyframes {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
    // morph target weights are read but never applied
    Other,
}

/// How values between two keyframes are computed. This is a property of
/// every channel, glTF allows mixing them inside one clip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Linear,
    Step,
    /// Values are stored as `(in tangent, value, out tangent)` triples.
    CubicSpline,
}

/// Keyframes of one property of one node.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub node: usize,
    pub interpolation: Interpolation,
    pub timestamps: Vec<f32>,
    pub keyframes: Keyframes,
}

impl Channel {
    fn last_timestamp(&self) -> f32 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }

    fn sample_into(&self, time: f32, pose: &mut NodePose) {
        match &self.keyframes {
            Keyframes::Translation(values) => {
                if let Some(v) = self.sample_values(values, time, lerp) {
                    pose.translation = Some(v);
                }
            }
            Keyframes::Scale(values) => {
                if let Some(v) = self.sample_values(values, time, lerp) {
                    pose.scale = Some(v);
                }
            }
            Keyframes::Rotation(values) => {
                if let Some(q) = self.sample_values(values, time, slerp) {
                    pose.rotation = Some(q.normalize());
                }
            }
            Keyframes::Other => (),
        }
    }

    /**
     * Finds the keyframes around `time` and blends them according to the
     * channel's interpolation. Times outside the keyframe range clamp to the
     * first/last value.
     */
    fn sample_values<T>(&self, values: &[T], time: f32, blend: fn(T, T, f32) -> T) -> Option<T>
    where
        T: Copy + Add<Output = T> + Mul<f32, Output = T>,
    {
        let len = self.timestamps.len();
        let stride = match self.interpolation {
            Interpolation::CubicSpline => 3,
            _ => 1,
        };
        if len == 0 || values.len() < len * stride {
            log::warn!(
                "channel of node {} has {} values for {} keyframes, ignoring it",
                self.node,
                values.len(),
                len
            );
            return None;
        }
        let value = |k: usize| match self.interpolation {
            Interpolation::CubicSpline => values[k * 3 + 1],
            _ => values[k],
        };

        let next = self.timestamps.partition_point(|&t| t <= time);
        if next == 0 {
            return Some(value(0));
        }
        if next == len {
            return Some(value(len - 1));
        }
        let prev = next - 1;
        let (t0, t1) = (self.timestamps[prev], self.timestamps[next]);
        let dt = t1 - t0;
        let factor = if dt > 0.0 { (time - t0) / dt } else { 0.0 };

        let sampled = match self.interpolation {
            Interpolation::Step => value(prev),
            Interpolation::Linear => blend(value(prev), value(next), factor),
            Interpolation::CubicSpline => {
                let out_tangent = values[prev * 3 + 2];
                let in_tangent = values[next * 3];
                let t2 = factor * factor;
                let t3 = t2 * factor;
                value(prev) * (2.0 * t3 - 3.0 * t2 + 1.0)
                    + out_tangent * ((t3 - 2.0 * t2 + factor) * dt)
                    + value(next) * (-2.0 * t3 + 3.0 * t2)
                    + in_tangent * ((t3 - t2) * dt)
            }
        };
        Some(sampled)
    }
}

/// A named animation. Clips belong to the parsed scene and are shared by
/// every actor playing them.
#[derive(Clone, Debug, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        Self {
            name: name.into(),
            channels,
        }
    }

    /// Time of the last keyframe over all channels, which is the clip's
    /// duration.
    pub fn last_keyframe_time(&self) -> f32 {
        self.channels
            .iter()
            .map(Channel::last_timestamp)
            .fold(0.0, f32::max)
    }

    pub fn duration(&self) -> f32 {
        self.last_keyframe_time()
    }

    pub fn target_nodes(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels.iter().map(|channel| channel.node)
    }

    /// Wraps `time_seconds` into `[0, duration)`.
    ///
    /// Wrapping happens in `f64` so clips stay smooth no matter how long the
    /// viewer has been running.
    pub fn local_time(&self, time_seconds: f64) -> Result<f32, ViewerError> {
        let duration = self.duration();
        if !(duration > 0.0) {
            return Err(ViewerError::InvalidClip {
                name: self.name.clone(),
                duration,
            });
        }
        let local = time_seconds.rem_euclid(f64::from(duration)) as f32;
        // rem_euclid may round up to `duration` for tiny negative inputs
        Ok(if local >= duration { 0.0 } else { local })
    }

    /// Samples every channel at the wrapped `time_seconds`.
    pub fn get_frame(&self, time_seconds: f64) -> Result<Pose, ViewerError> {
        let local = self.local_time(time_seconds)?;
        let mut pose = Pose::default();
        for channel in &self.channels {
            let node_pose = pose.nodes.entry(channel.node).or_default();
            channel.sample_into(local, node_pose);
        }
        Ok(pose)
    }
}

/// Free function form of [`AnimationClip::get_frame`].
pub fn get_frame(clip: &AnimationClip, time_seconds: f64) -> Result<Pose, ViewerError> {
    clip.get_frame(time_seconds)
}

/// Animated properties of one node. Missing properties keep the node's rest
/// value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NodePose {
    pub translation: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
}

/// Local transforms of the animated nodes for one instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    pub nodes: HashMap<usize, NodePose>,
}

impl Pose {
    pub fn get(&self, node: usize) -> Option<&NodePose> {
        self.nodes.get(&node)
    }

    /// Local transform of `node`: the rest transform with animated
    /// properties replaced.
    pub fn apply(&self, node: usize, rest: &Transform) -> Transform {
        match self.nodes.get(&node) {
            Some(animated) => Transform {
                translation: animated.translation.unwrap_or(rest.translation),
                rotation: animated.rotation.unwrap_or(rest.rotation),
                scale: animated.scale.unwrap_or(rest.scale),
            },
            None => *rest,
        }
    }
}
