//! Render commands and their per-frame synthesis.
//!
//! A frame is described as an ordered list of [`RenderCommand`]s: one
//! `SetRenderTarget` followed by one `Draw` per visible actor. The list is
//! handed to a [`RenderBackend`], which owns all GPU state.
//!
//! # Key types
//!
//! - [`RenderBackend`] creates geometry/shader handles and executes command lists
//! - [`RenderCommand`] is a single backend directive
//! - [`FrameInputs`] bundles camera, screen and time for [`build_commands`]
//!

use std::borrow::Cow;

use log::warn;
use wgpu::Color;

use crate::{
    camera::{ViewCamera, Viewport},
    context::{AssetStore, SHADER_ASSET},
    data_structures::{
        actor::{Actor, PlacementPolicy, UniformValue, Uniforms, uniform_names},
        geometry::GeometryData,
        transform::translation,
    },
};

/// Shader program sources, one per stage.
#[derive(Clone, Debug, PartialEq)]
pub struct ShaderSource {
    pub label: Cow<'static, str>,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
}

/// Debug shader used for every actor: joints, normals or uv checkers.
pub fn default_shader() -> ShaderSource {
    ShaderSource {
        label: Cow::Borrowed("Model Viewer Shader"),
        vertex: Cow::Borrowed(include_str!("pipelines/viewer_vertex.wgsl")),
        fragment: Cow::Borrowed(include_str!("pipelines/viewer_fragment.wgsl")),
    }
}

/// A GPU backend the viewer renders through.
///
/// Handles must be cheap to clone; every draw command carries its own copy.
#[allow(async_fn_in_trait)]
pub trait RenderBackend {
    type Geometry: Clone;
    type Shader: Clone;

    async fn create_geometry(&mut self, geometry: &GeometryData) -> anyhow::Result<Self::Geometry>;

    async fn create_shader(&mut self, source: &ShaderSource) -> anyhow::Result<Self::Shader>;

    fn screen_rect(&self) -> Viewport;

    /// Executes one frame. May fail when the surface went away meanwhile.
    async fn submit(
        &mut self,
        commands: Vec<RenderCommand<Self::Geometry, Self::Shader>>,
    ) -> anyhow::Result<()>;

    /// `false` once the rendering context has been torn down.
    fn is_alive(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderCommand<G, S> {
    /// `None` targets the screen.
    SetRenderTarget {
        target: Option<String>,
        clear_colour: Color,
    },
    Draw {
        geometry: G,
        shader: S,
        uniforms: Uniforms,
    },
}

impl<G, S> RenderCommand<G, S> {
    pub fn is_draw(&self) -> bool {
        matches!(self, RenderCommand::Draw { .. })
    }
}

/// Per-frame inputs of [`build_commands`].
pub struct FrameInputs<'a, C: ViewCamera> {
    pub camera: &'a C,
    pub screen: Viewport,
    pub clear_colour: Color,
    /// Wall clock seconds since the viewer started.
    pub time: f64,
    pub placement: PlacementPolicy,
    pub max_joints: usize,
}

/// Uniforms computed for `actor` before its own overrides are applied.
fn base_uniforms<C: ViewCamera>(actor: &Actor, frame: &FrameInputs<'_, C>) -> Uniforms {
    let local_to_world = translation(actor.world_position(&frame.placement));
    let mut uniforms = Uniforms::new();
    uniforms.insert(uniform_names::LOCAL_TO_WORLD.into(), local_to_world.into());
    uniforms.insert(
        uniform_names::WORLD_TO_CAMERA.into(),
        frame.camera.world_to_camera_matrix().into(),
    );
    uniforms.insert(
        uniform_names::CAMERA_PROJECTION.into(),
        frame.camera.projection_matrix(frame.screen).into(),
    );
    uniforms.insert(uniform_names::TIME.into(), UniformValue::Float(frame.time as f32));
    uniforms
}

/**
 * Joint matrices of a skinned actor at `time`. Actors without a clip use the
 * bind pose. `None` means the clip can't be sampled, the actor then keeps
 * whatever joint uniforms it already has.
 */
fn joint_uniforms(actor: &Actor, time: f64, max_joints: usize) -> Option<[(&'static str, UniformValue); 2]> {
    let skeleton = actor.skeleton.as_ref()?;
    let pose = match &actor.animation {
        Some(clip) => match clip.get_frame(time) {
            Ok(pose) => Some(pose),
            Err(e) => {
                warn!("skipping animation of {}: {}", actor.geometry, e);
                return None;
            }
        },
        None => None,
    };
    Some(skeleton.joint_matrices(pose.as_ref()).to_uniforms(max_joints))
}

/// Builds the command list of one frame.
///
/// Actors whose geometry or the shared shader is missing from `assets` are
/// skipped silently for this frame. Draw order is actor order.
pub fn build_commands<G, S, C>(
    actors: &[Actor],
    assets: &AssetStore<G, S>,
    frame: &FrameInputs<'_, C>,
) -> Vec<RenderCommand<G, S>>
where
    G: Clone,
    S: Clone,
    C: ViewCamera,
{
    let mut commands = Vec::with_capacity(actors.len() + 1);
    commands.push(RenderCommand::SetRenderTarget {
        target: None,
        clear_colour: frame.clear_colour,
    });

    for actor in actors {
        let (Some(geometry), Some(shader)) = (assets.geometry(&actor.geometry), assets.shader(SHADER_ASSET))
        else {
            continue;
        };

        let mut uniforms = base_uniforms(actor, frame);
        uniforms.extend(actor.uniforms.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(joints) = joint_uniforms(actor, frame.time, frame.max_joints) {
            for (name, value) in joints {
                uniforms.insert(name.to_string(), value);
            }
        }

        commands.push(RenderCommand::Draw {
            geometry: geometry.clone(),
            shader: shader.clone(),
            uniforms,
        });
    }
    commands
}
