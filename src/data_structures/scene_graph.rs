//! Parsed scene graphs and their flattening into actors.
//!
//! A [`SceneDocument`] is what the glTF parser hands over: nodes with
//! optional mesh/skin references, the primitive geometry of every mesh,
//! skins and clips. [`traverse`] walks the default scene depth first and
//! emits one [`Actor`] per (node, primitive group) pair.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use log::warn;

use crate::{
    data_structures::{
        actor::Actor,
        geometry::GeometryData,
        skeleton::SkeletonResolver,
        transform::{Mat4, Transform, identity},
    },
    resources::animation::AnimationClip,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneNode {
    pub index: usize,
    pub name: Option<String>,
    pub mesh: Option<usize>,
    pub skin: Option<usize>,
    pub children: Vec<usize>,
    pub transform: Transform,
}

/// A mesh: the asset names of its primitive groups.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshGroup {
    pub name: Option<String>,
    pub geometry_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    pub name: Option<String>,
    pub nodes: Vec<usize>,
}

/// Raw skin data as found in the file; resolved into a
/// [`Skeleton`](crate::data_structures::skeleton::Skeleton) during traversal.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SkinData {
    pub name: Option<String>,
    /// Node index of every joint.
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Option<Vec<Mat4>>,
}

#[derive(Clone, Debug, Default)]
pub struct SceneDocument {
    pub nodes: Vec<SceneNode>,
    pub meshes: Vec<MeshGroup>,
    /// Unique primitive geometries in mesh order.
    pub geometries: Vec<(String, GeometryData)>,
    pub skins: Vec<SkinData>,
    pub animations: Vec<Arc<AnimationClip>>,
    pub scenes: Vec<Scene>,
    pub default_scene: Option<usize>,
}

impl SceneDocument {
    pub fn geometry(&self, name: &str) -> Option<&GeometryData> {
        self.geometries
            .iter()
            .find(|(geometry_name, _)| geometry_name == name)
            .map(|(_, geometry)| geometry)
    }

    /// Maps every child node to its parent.
    pub fn parent_map(&self) -> HashMap<usize, usize> {
        self.nodes
            .iter()
            .flat_map(|node| node.children.iter().map(move |&child| (child, node.index)))
            .collect()
    }

    /// Combined transform of all ancestors of `node`, root first.
    pub fn ancestor_transform(&self, node: usize, parents: &HashMap<usize, usize>) -> Mat4 {
        let mut chain = Vec::new();
        let mut current = parents.get(&node).copied();
        while let Some(parent) = current {
            if chain.contains(&parent) || chain.len() > self.nodes.len() {
                warn!("node {} has a cyclic ancestry", node);
                break;
            }
            chain.push(parent);
            current = parents.get(&parent).copied();
        }
        chain
            .iter()
            .rev()
            .filter_map(|&idx| self.nodes.get(idx))
            .fold(identity(), |acc, parent| acc * parent.transform.to_matrix())
    }

    /// Index of the scene to display; 0 when the file names none.
    pub fn default_scene_index(&self) -> usize {
        self.default_scene.unwrap_or(0)
    }

    /**
     * Top level nodes of the default scene. Documents without (a matching)
     * scene fall back to every node that isn't a child of another node.
     */
    pub fn root_nodes(&self) -> Vec<usize> {
        if let Some(scene) = self.scenes.get(self.default_scene_index()) {
            return scene.nodes.clone();
        }
        if !self.scenes.is_empty() {
            warn!(
                "default scene {} doesn't exist, using parentless nodes instead",
                self.default_scene_index()
            );
        }
        let parents = self.parent_map();
        (0..self.nodes.len())
            .filter(|idx| !parents.contains_key(idx))
            .collect()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TraversalOptions {
    /// First ordinal handed out, non-zero when appending to loaded actors.
    pub first_ordinal: usize,
    pub max_joints: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            first_ordinal: 0,
            max_joints: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalSummary {
    /// Number of mesh-bearing nodes visited.
    pub ordinals: usize,
    pub actors: usize,
    /// Nodes without mesh plus broken references.
    pub skipped: usize,
}

struct Walker<'d, 'r, A> {
    doc: &'d SceneDocument,
    skeletons: SkeletonResolver<'d>,
    enum_actor: &'r mut A,
    next_ordinal: usize,
    summary: TraversalSummary,
    path: HashSet<usize>,
}

impl<'d, 'r, A> Walker<'d, 'r, A>
where
    A: FnMut(Actor, usize),
{
    fn visit(&mut self, idx: usize) {
        let doc = self.doc;
        let Some(node) = doc.nodes.get(idx) else {
            warn!("scene references missing node {}", idx);
            self.summary.skipped += 1;
            return;
        };
        if !self.path.insert(idx) {
            warn!("node {} is its own ancestor, skipping the cycle", idx);
            self.summary.skipped += 1;
            return;
        }

        match node.mesh {
            None => {
                // eg. cameras, lights or bone containers
                log::debug!("node {} ({:?}) has no mesh", idx, node.name);
                self.summary.skipped += 1;
            }
            Some(mesh_idx) => match doc.meshes.get(mesh_idx) {
                None => {
                    warn!("node {} references missing mesh {}", idx, mesh_idx);
                    self.summary.skipped += 1;
                }
                Some(mesh) => {
                    let ordinal = self.next_ordinal;
                    for geometry in &mesh.geometry_names {
                        let mut actor = Actor::new(geometry.clone(), ordinal);
                        if let Some(skin) = node.skin {
                            self.skeletons.bind(&mut actor, skin);
                        }
                        (self.enum_actor)(actor, ordinal);
                        self.summary.actors += 1;
                    }
                    self.next_ordinal += 1;
                    self.summary.ordinals += 1;
                }
            },
        }

        for &child in &node.children {
            self.visit(child);
        }
        self.path.remove(&idx);
    }
}

/// Flattens the default scene of `doc` into actors.
///
/// `enum_geometry` sees every primitive geometry once, before the first
/// actor is emitted, so compilation can start ahead of placement. Nodes are
/// then visited depth first in declaration order; every actor of a node
/// shares the node's ordinal.
pub fn traverse<G, A>(
    doc: &SceneDocument,
    options: TraversalOptions,
    mut enum_geometry: G,
    mut enum_actor: A,
) -> TraversalSummary
where
    G: FnMut(&str, &GeometryData),
    A: FnMut(Actor, usize),
{
    for (name, geometry) in &doc.geometries {
        enum_geometry(name, geometry);
    }

    let mut walker = Walker {
        doc,
        skeletons: SkeletonResolver::new(doc, options.max_joints),
        enum_actor: &mut enum_actor,
        next_ordinal: options.first_ordinal,
        summary: TraversalSummary::default(),
        path: HashSet::new(),
    };
    for root in doc.root_nodes() {
        walker.visit(root);
    }
    walker.summary
}
