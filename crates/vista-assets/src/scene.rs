use serde::Serialize;

use crate::texture::TextureAsset;

/// Vertex data of one mesh, extracted from the document's buffers.
#[derive(Debug, Clone)]
pub struct MeshAsset {
    pub name: String,
    pub primitives: Vec<MeshPrimitive>,
}

/// A single draw primitive within a mesh.
#[derive(Debug, Clone)]
pub struct MeshPrimitive {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tex_coords: Option<Vec<[f32; 2]>>,
    pub indices: Option<Vec<u32>>,
    pub material: Option<usize>,
}

impl MeshAsset {
    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.positions.len()).sum()
    }
}

/// What a node in the scene graph carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    Group,
    Mesh,
    Camera,
    Skin,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    /// Number of nodes in this subtree, including `self`.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SceneNode::count).sum::<usize>()
    }
}

/// A fully parsed scene, ready to hand to the renderer.
#[derive(Debug, Clone)]
pub struct SceneDocument {
    /// Reference the primary document was parsed from.
    pub source: String,
    pub name: Option<String>,
    pub roots: Vec<SceneNode>,
    pub meshes: Vec<MeshAsset>,
    pub textures: Vec<TextureAsset>,
    pub animations: Vec<String>,
    /// Whether the document defines its own punctual lights, in which case
    /// the viewer's default lights should be turned off.
    pub punctual_lights: bool,
}

/// Serializable overview of a scene for logs and `--json` output.
#[derive(Debug, Clone, Serialize)]
pub struct SceneSummary {
    pub source: String,
    pub name: Option<String>,
    pub nodes: usize,
    pub meshes: usize,
    pub vertices: usize,
    pub textures: usize,
    pub animations: Vec<String>,
    pub punctual_lights: bool,
    pub roots: Vec<SceneNode>,
}

impl SceneDocument {
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(SceneNode::count).sum()
    }

    pub fn summary(&self) -> SceneSummary {
        SceneSummary {
            source: self.source.clone(),
            name: self.name.clone(),
            nodes: self.node_count(),
            meshes: self.meshes.len(),
            vertices: self.meshes.iter().map(MeshAsset::vertex_count).sum(),
            textures: self.textures.len(),
            animations: self.animations.clone(),
            punctual_lights: self.punctual_lights,
            roots: self.roots.clone(),
        }
    }
}
