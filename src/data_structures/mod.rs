//! Viewer data structures: transforms, actors, geometry, skeletons and scene graphs.
//!
//! - `transform` holds TRS transforms and the matrix helpers built on cgmath
//! - `actor` is a renderable instance plus its uniform mapping
//! - `geometry` contains the CPU side vertex data handed to backends
//! - `skeleton` resolves glTF skins into joint hierarchies
//! - `scene_graph` enables hierarchical scene traversal

pub mod actor;
pub mod geometry;
pub mod scene_graph;
pub mod skeleton;
pub mod transform;
