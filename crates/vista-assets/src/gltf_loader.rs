//! Two-stage glTF 2.0 loading (.gltf or .glb).
//!
//! [`GltfDocument::parse`] validates the primary document and decodes
//! everything it carries inline (GLB binary chunk, `data:` URIs). The caller
//! then supplies bytes for each [`SubresourceRef`] listed by
//! [`GltfDocument::pending`], and [`GltfDocument::finish`] assembles the
//! [`SceneDocument`]. Sub-resources that could not be supplied or decoded are
//! reported back instead of failing the load.

use base64::Engine as _;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::asset_map::mime_for;
use crate::error::AssetError;
use crate::scene::{MeshAsset, MeshPrimitive, NodeKind, SceneDocument, SceneNode};
use crate::texture::{self, TextureAsset};

/// Kind of external resource a document references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubresourceKind {
    Buffer,
    Image,
}

/// An external reference the document cannot satisfy on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubresourceRef {
    pub kind: SubresourceKind,
    pub index: usize,
    pub uri: String,
}

/// A sub-resource that was left out of the assembled scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSubresource {
    pub uri: String,
    pub reason: String,
}

/// The assembled scene plus whatever had to be skipped.
#[derive(Debug)]
pub struct SceneBuild {
    pub scene: SceneDocument,
    pub skipped: Vec<SkippedSubresource>,
}

#[derive(Debug)]
enum Slot {
    Pending(String),
    Ready(Vec<u8>),
    Missing,
    /// Image stored in a buffer view.
    Embedded,
}

/// A validated glTF document whose external resources are being gathered.
pub struct GltfDocument {
    source: String,
    document: gltf::Document,
    buffers: Vec<Slot>,
    images: Vec<Slot>,
    skipped: Vec<SkippedSubresource>,
}

impl GltfDocument {
    /// Parse and validate the primary document. `source` is only used for
    /// diagnostics.
    pub fn parse(bytes: &[u8], source: &str) -> Result<Self, AssetError> {
        let gltf::Gltf { document, mut blob } = gltf::Gltf::from_slice(bytes)
            .map_err(|e| AssetError::GltfParseFailed(source.to_string(), e.to_string()))?;

        let mut skipped = Vec::new();

        let buffers = document
            .buffers()
            .map(|buffer| match buffer.source() {
                gltf::buffer::Source::Bin => match blob.take() {
                    Some(data) => Slot::Ready(data),
                    None => {
                        skipped.push(SkippedSubresource {
                            uri: format!("buffer[{}]", buffer.index()),
                            reason: "binary chunk missing".into(),
                        });
                        Slot::Missing
                    }
                },
                gltf::buffer::Source::Uri(uri) => inline_or_pending(uri, &mut skipped),
            })
            .collect();

        let images = document
            .images()
            .map(|image| match image.source() {
                gltf::image::Source::View { .. } => Slot::Embedded,
                gltf::image::Source::Uri { uri, .. } => inline_or_pending(uri, &mut skipped),
            })
            .collect();

        debug!(
            "Parsed glTF '{}': {} buffers, {} images",
            source,
            document.buffers().len(),
            document.images().len()
        );

        Ok(Self {
            source: source.to_string(),
            document,
            buffers,
            images,
            skipped,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// External references still waiting for bytes.
    pub fn pending(&self) -> Vec<SubresourceRef> {
        let buffers = self.buffers.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Pending(uri) => Some(SubresourceRef {
                kind: SubresourceKind::Buffer,
                index,
                uri: uri.clone(),
            }),
            _ => None,
        });
        let images = self.images.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Pending(uri) => Some(SubresourceRef {
                kind: SubresourceKind::Image,
                index,
                uri: uri.clone(),
            }),
            _ => None,
        });
        buffers.chain(images).collect()
    }

    /// Supply the bytes for a pending reference, or the reason they could not
    /// be obtained.
    pub fn provide(&mut self, reference: &SubresourceRef, result: Result<Vec<u8>, String>) {
        let result = result.and_then(|data| match reference.kind {
            SubresourceKind::Buffer => {
                let declared = self
                    .document
                    .buffers()
                    .nth(reference.index)
                    .map(|b| b.length())
                    .unwrap_or(0);
                if data.len() < declared {
                    Err(format!(
                        "buffer holds {} bytes but {} were declared",
                        data.len(),
                        declared
                    ))
                } else {
                    Ok(data)
                }
            }
            SubresourceKind::Image => Ok(data),
        });

        let slots = match reference.kind {
            SubresourceKind::Buffer => &mut self.buffers,
            SubresourceKind::Image => &mut self.images,
        };
        let Some(slot) = slots.get_mut(reference.index) else {
            return;
        };

        *slot = match result {
            Ok(data) => Slot::Ready(data),
            Err(reason) => {
                warn!("Skipping '{}': {}", reference.uri, reason);
                self.skipped.push(SkippedSubresource {
                    uri: reference.uri.clone(),
                    reason,
                });
                Slot::Missing
            }
        };
    }

    /// Assemble the scene. Fails only if the document has no scene at all.
    pub fn finish(mut self) -> Result<SceneBuild, AssetError> {
        for slot in self.buffers.iter_mut().chain(self.images.iter_mut()) {
            if let Slot::Pending(uri) = slot {
                self.skipped.push(SkippedSubresource {
                    uri: uri.clone(),
                    reason: "never resolved".into(),
                });
                *slot = Slot::Missing;
            }
        }

        let scene = self
            .document
            .default_scene()
            .or_else(|| self.document.scenes().next())
            .ok_or_else(|| AssetError::NoScene(self.source.clone()))?;

        let scene_name = scene.name().map(str::to_string);
        let roots = scene.nodes().map(|node| build_node(&node)).collect();
        let meshes = self.extract_meshes();
        let (textures, failures) = self.extract_textures();
        self.skipped.extend(failures);

        let animations = self
            .document
            .animations()
            .map(|a| {
                a.name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("animation_{}", a.index()))
            })
            .collect();

        let punctual_lights = self
            .document
            .extensions_used()
            .any(|ext| ext == "KHR_lights_punctual");

        let scene = SceneDocument {
            source: self.source.clone(),
            name: scene_name,
            roots,
            meshes,
            textures,
            animations,
            punctual_lights,
        };

        debug!(
            "glTF '{}': {} meshes, {} textures, {} skipped",
            self.source,
            scene.meshes.len(),
            scene.textures.len(),
            self.skipped.len()
        );

        Ok(SceneBuild {
            scene,
            skipped: self.skipped,
        })
    }

    fn buffer_data(&self, index: usize) -> Option<&[u8]> {
        match self.buffers.get(index) {
            Some(Slot::Ready(data)) => Some(data.as_slice()),
            _ => None,
        }
    }

    fn extract_meshes(&self) -> Vec<MeshAsset> {
        let mut meshes = Vec::new();

        for mesh in self.document.meshes() {
            let name = mesh.name().unwrap_or("unnamed").to_string();

            let primitives = mesh
                .primitives()
                .map(|primitive| {
                    let reader = primitive.reader(|buffer| self.buffer_data(buffer.index()));

                    MeshPrimitive {
                        positions: reader
                            .read_positions()
                            .map(|iter| iter.collect())
                            .unwrap_or_default(),
                        normals: reader
                            .read_normals()
                            .map(|iter| iter.collect())
                            .unwrap_or_default(),
                        tex_coords: reader.read_tex_coords(0).map(|tc| tc.into_f32().collect()),
                        indices: reader.read_indices().map(|idx| idx.into_u32().collect()),
                        material: primitive.material().index(),
                    }
                })
                .collect::<Vec<_>>();

            debug!("Loaded mesh '{}' with {} primitives", name, primitives.len());
            meshes.push(MeshAsset { name, primitives });
        }

        meshes
    }

    fn extract_textures(&self) -> (Vec<TextureAsset>, Vec<SkippedSubresource>) {
        let mut textures = Vec::new();
        let mut failures = Vec::new();

        for image in self.document.images() {
            let (label, mime, bytes) = match image.source() {
                gltf::image::Source::View { view, mime_type } => {
                    let label = format!("bufferView[{}]", view.index());
                    let bytes = self.buffer_data(view.buffer().index()).and_then(|data| {
                        data.get(view.offset()..view.offset() + view.length())
                    });
                    (label, mime_type.to_string(), bytes)
                }
                gltf::image::Source::Uri { uri, mime_type } => {
                    let mime = mime_type
                        .map(str::to_string)
                        .or_else(|| data_uri_mime(uri))
                        .unwrap_or_else(|| mime_for(uri).to_string());
                    let bytes = match self.images.get(image.index()) {
                        Some(Slot::Ready(data)) => Some(data.as_slice()),
                        _ => None,
                    };
                    (display_uri(uri), mime, bytes)
                }
            };

            // Missing bytes were already reported when the slot was filled.
            let Some(bytes) = bytes else {
                continue;
            };

            match texture::decode_texture(&label, &mime, bytes) {
                Ok(tex) => textures.push(tex),
                Err(e) => failures.push(SkippedSubresource {
                    uri: label,
                    reason: e.to_string(),
                }),
            }
        }

        (textures, failures)
    }
}

fn build_node(node: &gltf::Node<'_>) -> SceneNode {
    let kind = if node.mesh().is_some() {
        NodeKind::Mesh
    } else if node.camera().is_some() {
        NodeKind::Camera
    } else if node.skin().is_some() {
        NodeKind::Skin
    } else {
        NodeKind::Group
    };

    SceneNode {
        name: node
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("node_{}", node.index())),
        kind,
        children: node.children().map(|child| build_node(&child)).collect(),
    }
}

fn inline_or_pending(uri: &str, skipped: &mut Vec<SkippedSubresource>) -> Slot {
    if !uri.starts_with("data:") {
        return Slot::Pending(uri.to_string());
    }
    match decode_data_uri(uri) {
        Ok(data) => Slot::Ready(data),
        Err(e) => {
            skipped.push(SkippedSubresource {
                uri: display_uri(uri),
                reason: e.to_string(),
            });
            Slot::Missing
        }
    }
}

/// Decode a `data:` URI body, either base64 or percent-encoded.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, AssetError> {
    let invalid = || AssetError::InvalidDataUri(display_uri(uri));
    let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
    let (header, body) = rest.split_once(',').ok_or_else(invalid)?;

    if header.ends_with(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .map_err(|_| invalid())
    } else {
        Ok(percent_decode_str(body).collect())
    }
}

fn data_uri_mime(uri: &str) -> Option<String> {
    let header = uri.strip_prefix("data:")?.split(',').next()?;
    let mime = header.split(';').next()?;
    (!mime.is_empty()).then(|| mime.to_string())
}

/// Keep diagnostics readable when a URI embeds a whole payload.
fn display_uri(uri: &str) -> String {
    const MAX: usize = 64;
    if uri.len() <= MAX {
        return uri.to_string();
    }
    let mut end = MAX;
    while !uri.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &uri[..end])
}
