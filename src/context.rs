//! Viewer configuration and the asset/actor store.
//!
//! The store is written by the load pipeline of the render loop only and
//! read when building frames. Hosts may inspect it for diagnostics.

use std::{collections::HashMap, sync::Arc, time::Duration};

use wgpu::Color;

use crate::{
    data_structures::actor::{Actor, PlacementPolicy},
    resources::animation::AnimationClip,
};

/// Asset name of the shared default shader.
pub const SHADER_ASSET: &str = "Shader";
/// Asset name of the fallback cube geometry.
pub const CUBE_ASSET: &str = "Cube";

/// Whether a freshly loaded scene replaces the current actors or is added
/// next to them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    #[default]
    Replace,
    Append,
}

#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub load_mode: LoadMode,
    /// Pause after a failed frame before the loop resumes.
    pub error_backoff: Duration,
    /// Length of the joint matrix arrays handed to the shader.
    pub max_joints: usize,
    pub clear_colour: Color,
    pub placement: PlacementPolicy,
    pub camera_position: [f32; 3],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            load_mode: LoadMode::Replace,
            error_backoff: Duration::from_millis(1000),
            max_joints: 64,
            clear_colour: Color::BLACK,
            placement: PlacementPolicy::default(),
            camera_position: [0.0, 1.0, 5.0],
        }
    }
}

impl ViewerConfig {
    pub fn with_load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }

    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    pub fn with_max_joints(mut self, max_joints: usize) -> Self {
        self.max_joints = max_joints;
        self
    }

    pub fn with_clear_colour(mut self, clear_colour: Color) -> Self {
        self.clear_colour = clear_colour;
        self
    }

    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_camera_position(mut self, camera_position: [f32; 3]) -> Self {
        self.camera_position = camera_position;
        self
    }
}

/**
 * Parses a clear colour given as JSON array, e.g. `"[0.2, 0.3, 0.4]"`.
 *
 * Missing colour channels are filled with 0 and a missing alpha with 1.
 * Anything unparsable logs a warning and results in magenta so the error
 * is visible on screen.
 */
pub fn parse_clear_colour(rgba: &str) -> Color {
    match serde_json::from_str::<Vec<f64>>(rgba) {
        Ok(channels) => clear_colour_from_slice(&channels),
        Err(e) => {
            log::warn!("Invalid clear colour({}); {}", rgba, e);
            Color {
                r: 1.0,
                g: 0.0,
                b: 1.0,
                a: 1.0,
            }
        }
    }
}

pub fn clear_colour_from_slice(channels: &[f64]) -> Color {
    let channel = |idx: usize, default: f64| channels.get(idx).copied().unwrap_or(default);
    Color {
        r: channel(0, 0.0),
        g: channel(1, 0.0),
        b: channel(2, 0.0),
        a: channel(3, 1.0),
    }
}

/// Compiled backend resources by logical name.
#[derive(Debug)]
pub struct AssetStore<G, S> {
    geometries: HashMap<String, G>,
    shaders: HashMap<String, S>,
}

impl<G, S> Default for AssetStore<G, S> {
    fn default() -> Self {
        Self {
            geometries: HashMap::new(),
            shaders: HashMap::new(),
        }
    }
}

impl<G, S> AssetStore<G, S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn geometry(&self, name: &str) -> Option<&G> {
        self.geometries.get(name)
    }

    pub fn shader(&self, name: &str) -> Option<&S> {
        self.shaders.get(name)
    }

    pub fn has_geometry(&self, name: &str) -> bool {
        self.geometries.contains_key(name)
    }

    pub fn has_shader(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    pub fn insert_geometry(&mut self, name: impl Into<String>, geometry: G) {
        self.geometries.insert(name.into(), geometry);
    }

    pub fn insert_shader(&mut self, name: impl Into<String>, shader: S) {
        self.shaders.insert(name.into(), shader);
    }

    pub fn geometry_names(&self) -> impl Iterator<Item = &str> {
        self.geometries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.geometries.len() + self.shaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keeps only the geometries for which `keep` returns true.
    pub fn retain_geometries(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.geometries.retain(|name, _| keep(name));
    }

    /// Drops every handle, used on teardown.
    pub fn invalidate(&mut self) {
        self.geometries.clear();
        self.shaders.clear();
    }
}

/// Everything the render loop keeps between frames.
#[derive(Debug)]
pub struct Context<G, S> {
    pub assets: AssetStore<G, S>,
    pub actors: Vec<Actor>,
    /// Clips discovered by the last load(s).
    pub clips: Vec<Arc<AnimationClip>>,
    pub config: ViewerConfig,
}

impl<G, S> Context<G, S> {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            assets: AssetStore::new(),
            actors: Vec::new(),
            clips: Vec::new(),
            config,
        }
    }

    /// Ordinal to continue with when appending another scene.
    pub fn next_ordinal(&self) -> usize {
        self.actors
            .iter()
            .map(|actor| actor.ordinal + 1)
            .max()
            .unwrap_or(0)
    }
}
