//! flow-viewer
//!
//! A glTF model viewer core built on the flow-ngin rendering conventions.
//! Scene files are parsed into a scene graph, flattened into actors and
//! turned into one list of render commands per frame. GPU work is delegated
//! to a [`render::RenderBackend`]; a wgpu implementation ships behind the
//! `gpu` feature.
//!
//! High-level modules
//! - `camera`: orbit camera and pointer input mapping
//! - `context`: viewer configuration plus the asset/actor store
//! - `data_structures`: transforms, actors, geometry, skeletons and scene graphs
//! - `error`: failure taxonomy shared by all modules
//! - `flow`: the render loop driver and its host handle
//! - `pipelines`: wgpu backend and the default shader (feature `gpu`)
//! - `resources`: file access, glTF parsing and animation clips
//! - `render`: per-frame render command synthesis
//!

pub mod camera;
pub mod context;
pub mod data_structures;
pub mod error;
pub mod flow;
#[cfg(feature = "gpu")]
pub mod pipelines;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath;
pub use error::ViewerError;
pub use flow::{Viewer, ViewerHandle, init_logging};
pub use wgpu::Color;
