use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use base64::Engine;
use gltf::{animation::util::ReadOutputs, buffer::Source};

use crate::{
    data_structures::{
        geometry::{GeometryData, ModelVertex},
        scene_graph::{MeshGroup, Scene, SceneDocument, SceneNode, SkinData},
        transform::{Mat4, Quat, Transform, Vec3},
    },
    resources::{
        FileSource,
        animation::{AnimationClip, Channel, Interpolation, Keyframes},
        sibling_path,
    },
};

/// Loads `filename` through `loader` and parses it into a [`SceneDocument`].
///
/// `on_loading_buffer` is called with the path of every external buffer
/// before it is fetched.
pub async fn load_scene<L: FileSource>(
    filename: &str,
    loader: &L,
    on_loading_buffer: impl FnMut(&str),
) -> anyhow::Result<SceneDocument> {
    let bytes = loader.load_bytes(filename).await?;
    parse_scene(filename, &bytes, loader, on_loading_buffer).await
}

/// Decodes `data:[<mime>][;base64],<payload>` URIs.
pub fn decode_data_uri(uri: &str) -> anyhow::Result<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data uri"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data uri without payload"))?;
    if !header.ends_with(";base64") {
        bail!("only base64 data uris are supported, got {}", header);
    }
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

async fn load_buffers<L: FileSource>(
    filename: &str,
    gltf: &gltf::Gltf,
    loader: &L,
    on_loading_buffer: &mut impl FnMut(&str),
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut buffer_data = Vec::new();
    for buffer in gltf.buffers() {
        let data = match buffer.source() {
            Source::Bin => gltf
                .blob
                .clone()
                .ok_or_else(|| anyhow!("buffer {} refers to a missing GLB chunk", buffer.index()))?,
            Source::Uri(uri) if uri.starts_with("data:") => decode_data_uri(uri)
                .with_context(|| format!("buffer {} of {}", buffer.index(), filename))?,
            Source::Uri(uri) => {
                let path = sibling_path(filename, uri);
                on_loading_buffer(&path);
                loader.load_bytes(&path).await?
            }
        };
        if data.len() < buffer.length() {
            bail!(
                "buffer {} of {} holds {} bytes, {} expected",
                buffer.index(),
                filename,
                data.len(),
                buffer.length()
            );
        }
        buffer_data.push(data);
    }
    Ok(buffer_data)
}

/**
 * Every primitive of every mesh becomes one geometry named
 * `<filename>#<mesh name or index>/<primitive index>`. Primitives without
 * positions are left out with a warning.
 */
fn read_meshes(
    filename: &str,
    gltf: &gltf::Gltf,
    buffer_data: &[Vec<u8>],
) -> (Vec<MeshGroup>, Vec<(String, GeometryData)>) {
    let mut meshes = Vec::new();
    let mut geometries = Vec::new();
    for mesh in gltf.meshes() {
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| mesh.index().to_string());
        let mut group = MeshGroup {
            name: mesh.name().map(str::to_string),
            geometry_names: Vec::new(),
        };
        for primitive in mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                log::warn!(
                    "Primitive {} of mesh {} uses {:?}, it will be drawn as triangle list",
                    primitive.index(),
                    mesh_name,
                    primitive.mode()
                );
            }
            let reader = primitive.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));

            let Some(positions) = reader.read_positions() else {
                log::warn!("Primitive {} of mesh {} has no positions", primitive.index(), mesh_name);
                continue;
            };
            let mut vertices: Vec<ModelVertex> = positions
                .map(|position| ModelVertex {
                    position,
                    ..Default::default()
                })
                .collect();
            if let Some(normals) = reader.read_normals() {
                vertices.iter_mut().zip(normals).for_each(|(v, n)| v.normal = n);
            }
            if let Some(tex_coords) = reader.read_tex_coords(0) {
                vertices
                    .iter_mut()
                    .zip(tex_coords.into_f32())
                    .for_each(|(v, uv)| v.tex_coords = uv);
            }
            if let Some(joints) = reader.read_joints(0) {
                vertices
                    .iter_mut()
                    .zip(joints.into_u16())
                    .for_each(|(v, j)| v.joints = j.map(f32::from));
            }
            if let Some(weights) = reader.read_weights(0) {
                vertices
                    .iter_mut()
                    .zip(weights.into_f32())
                    .for_each(|(v, w)| v.weights = w);
            }
            let indices = reader
                .read_indices()
                .map(|indices| indices.into_u32().collect());

            let name = format!("{}#{}/{}", filename, mesh_name, primitive.index());
            group.geometry_names.push(name.clone());
            geometries.push((name, GeometryData { vertices, indices }));
        }
        meshes.push(group);
    }
    (meshes, geometries)
}

fn read_animations(gltf: &gltf::Gltf, buffer_data: &[Vec<u8>]) -> Vec<Arc<AnimationClip>> {
    let mut clips = Vec::new();
    for animation in gltf.animations() {
        let mut channels = Vec::new();
        for channel in animation.channels() {
            let reader = channel.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));
            let Some(inputs) = reader.read_inputs() else {
                log::warn!("No timestamps found in channel {}", channel.index());
                continue;
            };
            let timestamps: Vec<f32> = inputs.collect();
            let keyframes = match reader.read_outputs() {
                Some(ReadOutputs::Translations(translations)) => {
                    Keyframes::Translation(translations.map(Vec3::from).collect())
                }
                Some(ReadOutputs::Rotations(rotations)) => Keyframes::Rotation(
                    rotations
                        .into_f32()
                        .map(|[x, y, z, w]| Quat::new(w, x, y, z))
                        .collect(),
                ),
                Some(ReadOutputs::Scales(scales)) => Keyframes::Scale(scales.map(Vec3::from).collect()),
                Some(ReadOutputs::MorphTargetWeights(_)) => Keyframes::Other,
                None => {
                    log::warn!("No keyframes found in channel {}", channel.index());
                    Keyframes::Other
                }
            };
            let interpolation = match channel.sampler().interpolation() {
                gltf::animation::Interpolation::Linear => Interpolation::Linear,
                gltf::animation::Interpolation::Step => Interpolation::Step,
                gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
            };
            channels.push(Channel {
                node: channel.target().node().index(),
                interpolation,
                timestamps,
                keyframes,
            });
        }
        let name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Animation{}", animation.index()));
        clips.push(Arc::new(AnimationClip::new(name, channels)));
    }
    clips
}

/// Parses glTF JSON or GLB `bytes` into a [`SceneDocument`]. External
/// buffers are resolved relative to `filename`.
pub async fn parse_scene<L: FileSource>(
    filename: &str,
    bytes: &[u8],
    loader: &L,
    mut on_loading_buffer: impl FnMut(&str),
) -> anyhow::Result<SceneDocument> {
    let gltf = gltf::Gltf::from_slice(bytes)?;
    let buffer_data = load_buffers(filename, &gltf, loader, &mut on_loading_buffer).await?;

    let (meshes, geometries) = read_meshes(filename, &gltf, &buffer_data);

    let nodes = gltf
        .nodes()
        .map(|node| SceneNode {
            index: node.index(),
            name: node.name().map(str::to_string),
            mesh: node.mesh().map(|mesh| mesh.index()),
            skin: node.skin().map(|skin| skin.index()),
            children: node.children().map(|child| child.index()).collect(),
            transform: Transform::from_decomposed(node.transform().decomposed()),
        })
        .collect();

    let skins = gltf
        .skins()
        .map(|skin| {
            let reader = skin.reader(|buffer| buffer_data.get(buffer.index()).map(Vec::as_slice));
            SkinData {
                name: skin.name().map(str::to_string),
                joints: skin.joints().map(|joint| joint.index()).collect(),
                inverse_bind_matrices: reader
                    .read_inverse_bind_matrices()
                    .map(|matrices| matrices.map(Mat4::from).collect()),
            }
        })
        .collect();

    let scenes = gltf
        .scenes()
        .map(|scene| Scene {
            name: scene.name().map(str::to_string),
            nodes: scene.nodes().map(|node| node.index()).collect(),
        })
        .collect();

    Ok(SceneDocument {
        nodes,
        meshes,
        geometries,
        skins,
        animations: read_animations(&gltf, &buffer_data),
        scenes,
        default_scene: gltf.default_scene().map(|scene| scene.index()),
    })
}
