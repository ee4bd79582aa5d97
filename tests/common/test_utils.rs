#![allow(dead_code)]

use std::{cell::RefCell, collections::HashMap};

use anyhow::anyhow;
use base64::Engine;
use flow_viewer::{
    camera::Viewport,
    data_structures::geometry::GeometryData,
    render::{RenderBackend, RenderCommand, ShaderSource},
    resources::FileSource,
};
use serde_json::{Value, json};

/// Backend handing out sequential ids and recording every frame.
#[derive(Default)]
pub struct RecordingBackend {
    pub geometries: Vec<GeometryData>,
    pub shaders: Vec<String>,
    pub frames: Vec<Vec<RenderCommand<usize, usize>>>,
    pub fail_submit: bool,
    pub fail_shader: bool,
    /// Reports itself torn down once this many frames were submitted.
    pub max_frames: Option<usize>,
    pub submit_calls: usize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> &[RenderCommand<usize, usize>] {
        self.frames.last().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn draw_count(&self) -> usize {
        self.last_frame().iter().filter(|c| c.is_draw()).count()
    }
}

impl RenderBackend for RecordingBackend {
    type Geometry = usize;
    type Shader = usize;

    async fn create_geometry(&mut self, geometry: &GeometryData) -> anyhow::Result<usize> {
        self.geometries.push(geometry.clone());
        Ok(self.geometries.len() - 1)
    }

    async fn create_shader(&mut self, source: &ShaderSource) -> anyhow::Result<usize> {
        if self.fail_shader {
            return Err(anyhow!("shader compilation failed"));
        }
        self.shaders.push(source.label.to_string());
        Ok(self.shaders.len() - 1)
    }

    fn screen_rect(&self) -> Viewport {
        Viewport::new(800.0, 600.0)
    }

    async fn submit(&mut self, commands: Vec<RenderCommand<usize, usize>>) -> anyhow::Result<()> {
        self.submit_calls += 1;
        if self.fail_submit {
            return Err(anyhow!("surface is gone"));
        }
        self.frames.push(commands);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.max_frames.is_none_or(|max| self.submit_calls < max)
    }
}

/// In-memory files keyed by path. Records every request.
#[derive(Default)]
pub struct MemoryFiles {
    pub files: HashMap<String, Vec<u8>>,
    pub requests: RefCell<Vec<String>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.to_string(), contents.into());
        self
    }
}

impl FileSource for MemoryFiles {
    async fn load_bytes(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.requests.borrow_mut().push(path.to_string());
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("{} not found", path))
    }
}

const FLOAT: u32 = 5126;
const UNSIGNED_SHORT: u32 = 5123;
const UNSIGNED_INT: u32 = 5125;

/// Builds small glTF JSON documents with one binary buffer.
#[derive(Default)]
pub struct GltfBuilder {
    buffer: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    meshes: Vec<Value>,
    nodes: Vec<Value>,
    skins: Vec<Value>,
    animations: Vec<Value>,
    scenes: Vec<Value>,
    scene: Option<usize>,
}

impl GltfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_view(&mut self, bytes: &[u8]) -> usize {
        while self.buffer.len() % 4 != 0 {
            self.buffer.push(0);
        }
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(bytes);
        self.buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
        }));
        self.buffer_views.len() - 1
    }

    /// Float accessor with min/max bounds; `width` is the component count.
    pub fn floats(&mut self, data: &[f32], kind: &str, width: usize) -> usize {
        let bytes: Vec<u8> = data.iter().flat_map(|f| f.to_le_bytes()).collect();
        let view = self.push_view(&bytes);
        let mut min = vec![f32::MAX; width];
        let mut max = vec![f32::MIN; width];
        for element in data.chunks(width) {
            for (idx, v) in element.iter().enumerate() {
                min[idx] = min[idx].min(*v);
                max[idx] = max[idx].max(*v);
            }
        }
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": data.len() / width,
            "type": kind,
            "min": min,
            "max": max,
        }));
        self.accessors.len() - 1
    }

    fn indices(&mut self, data: &[u32]) -> usize {
        let bytes: Vec<u8> = data.iter().flat_map(|i| i.to_le_bytes()).collect();
        let view = self.push_view(&bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": UNSIGNED_INT,
            "count": data.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }

    fn joints(&mut self, data: &[[u16; 4]]) -> usize {
        let bytes: Vec<u8> = data.iter().flatten().flat_map(|j| j.to_le_bytes()).collect();
        let view = self.push_view(&bytes);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": UNSIGNED_SHORT,
            "count": data.len(),
            "type": "VEC4",
        }));
        self.accessors.len() - 1
    }

    /// A mesh with one indexed triangle per entry of `primitives`.
    pub fn triangle_mesh(&mut self, name: Option<&str>, primitives: usize) -> usize {
        let mut prims = Vec::new();
        for p in 0..primitives {
            let offset = p as f32;
            let position = self.floats(
                &[offset, 0.0, 0.0, offset + 1.0, 0.0, 0.0, offset, 1.0, 0.0],
                "VEC3",
                3,
            );
            let tex_coords = self.floats(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0], "VEC2", 2);
            let indices = self.indices(&[0, 1, 2]);
            prims.push(json!({
                "attributes": { "POSITION": position, "TEXCOORD_0": tex_coords },
                "indices": indices,
            }));
        }
        let mut mesh = json!({ "primitives": prims });
        if let Some(name) = name {
            mesh["name"] = json!(name);
        }
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    /// A single primitive mesh drawing one triangle at `positions`.
    pub fn triangle(&mut self, name: &str, positions: [f32; 9]) -> usize {
        let position = self.floats(&positions, "VEC3", 3);
        self.meshes.push(json!({
            "name": name,
            "primitives": [{ "attributes": { "POSITION": position } }],
        }));
        self.meshes.len() - 1
    }

    /// A triangle fully weighted to joint 0.
    pub fn skinned_mesh(&mut self) -> usize {
        let position = self.floats(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], "VEC3", 3);
        let joints = self.joints(&[[0, 0, 0, 0]; 3]);
        let weights = self.floats(&[1.0, 0.0, 0.0, 0.0].repeat(3), "VEC4", 4);
        self.meshes.push(json!({
            "primitives": [{
                "attributes": { "POSITION": position, "JOINTS_0": joints, "WEIGHTS_0": weights },
            }],
        }));
        self.meshes.len() - 1
    }

    pub fn node(&mut self, node: Value) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Adds `child` to the children of `parent`.
    pub fn adopt(&mut self, parent: usize, child: usize) {
        let children = self.nodes[parent]
            .as_object_mut()
            .map(|node| node.entry("children").or_insert_with(|| json!([])));
        if let Some(Value::Array(children)) = children {
            children.push(json!(child));
        }
    }

    pub fn skin(&mut self, joints: &[usize], inverse_bind: Option<&[f32]>) -> usize {
        let mut skin = json!({ "joints": joints });
        if let Some(matrices) = inverse_bind {
            skin["inverseBindMatrices"] = json!(self.floats(matrices, "MAT4", 16));
        }
        self.skins.push(skin);
        self.skins.len() - 1
    }

    /// One clip animating `path` of `node`.
    pub fn animation(
        &mut self,
        name: &str,
        node: usize,
        path: &str,
        times: &[f32],
        values: &[f32],
        interpolation: &str,
    ) -> usize {
        let width = match path {
            "rotation" => 4,
            _ => 3,
        };
        let input = self.floats(times, "SCALAR", 1);
        let output = self.floats(values, if width == 4 { "VEC4" } else { "VEC3" }, width);
        self.animations.push(json!({
            "name": name,
            "samplers": [{ "input": input, "output": output, "interpolation": interpolation }],
            "channels": [{ "sampler": 0, "target": { "node": node, "path": path } }],
        }));
        self.animations.len() - 1
    }

    pub fn scene(&mut self, nodes: &[usize]) -> usize {
        self.scenes.push(json!({ "nodes": nodes }));
        let idx = self.scenes.len() - 1;
        if self.scene.is_none() {
            self.scene = Some(idx);
        }
        idx
    }

    fn document(&self, buffer_uri: String) -> Value {
        let mut doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": self.buffer.len(), "uri": buffer_uri }],
            "bufferViews": self.buffer_views,
            "accessors": self.accessors,
            "meshes": self.meshes,
            "nodes": self.nodes,
            "scenes": self.scenes,
        });
        if let Some(scene) = self.scene {
            doc["scene"] = json!(scene);
        }
        if !self.skins.is_empty() {
            doc["skins"] = json!(self.skins);
        }
        if !self.animations.is_empty() {
            doc["animations"] = json!(self.animations);
        }
        doc
    }

    /// glTF JSON with the buffer embedded as base64 data uri.
    pub fn build(&self) -> Vec<u8> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.buffer);
        let doc = self.document(format!("data:application/octet-stream;base64,{}", encoded));
        serde_json::to_vec(&doc).unwrap()
    }

    /// glTF JSON referencing `bin_name` plus the buffer contents.
    pub fn build_external(&self, bin_name: &str) -> (Vec<u8>, Vec<u8>) {
        let doc = self.document(bin_name.to_string());
        (serde_json::to_vec(&doc).unwrap(), self.buffer.clone())
    }
}

/// Column major identity matrix as glTF stores it.
pub fn identity_matrix() -> [f32; 16] {
    [
        1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
    ]
}

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {} but got {}",
        expected,
        actual
    );
}
