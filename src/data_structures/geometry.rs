//! CPU side geometry handed to the backend for compilation.

/// Vertex layout shared by every geometry the viewer creates.
///
/// `joints` are stored as floats since the default shader only uses them
/// for indexing and debug colouring.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
    pub joints: [f32; 4],
    pub weights: [f32; 4],
}

/// Attributes and (optional) triangle indices of one primitive group.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryData {
    pub vertices: Vec<ModelVertex>,
    pub indices: Option<Vec<u32>>,
}

impl GeometryData {
    pub fn element_count(&self) -> u32 {
        match &self.indices {
            Some(indices) => indices.len() as u32,
            None => self.vertices.len() as u32,
        }
    }

    pub fn is_skinned(&self) -> bool {
        self.vertices.iter().any(|v| v.weights.iter().any(|w| *w != 0.0))
    }
}

/**
 * Axis aligned cube spanning `min..max` on every axis, four vertices per face
 * so normals and uvs stay flat.
 */
pub fn cube_geometry(min: f32, max: f32) -> GeometryData {
    // (normal, tangent u, tangent v) per face
    const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let centre = (min + max) / 2.0;
    let half = (max - min) / 2.0;

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in FACES {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = [0, 1, 2].map(|axis| {
                centre + half * (normal[axis] + su * u[axis] + sv * v[axis])
            });
            vertices.push(ModelVertex {
                position,
                normal,
                tex_coords: [(su + 1.0) / 2.0, (1.0 - sv) / 2.0],
                ..Default::default()
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    GeometryData {
        vertices,
        indices: Some(indices),
    }
}
