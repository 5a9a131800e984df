//! Vista Assets - virtual asset maps and scene decoding
//!
//! Holds the in-memory side of a load: logical path -> payload maps, the
//! short-lived local handles that stand in for payloads while a document is
//! parsed, the reference resolver, ZIP bundle extraction, and glTF 2.0
//! decoding into a renderer-agnostic [`SceneDocument`].

mod archive;
mod asset_map;
mod error;
mod gltf_loader;
mod handle;
mod resolver;
mod scene;
mod texture;

pub use archive::{ArchiveEntry, ZipArchiveReader};
pub use asset_map::{mime_for, AssetMap, AssetReference, Payload};
pub use error::AssetError;
pub use gltf_loader::{
    decode_data_uri, GltfDocument, SceneBuild, SkippedSubresource, SubresourceKind, SubresourceRef,
};
pub use handle::{HandleRegistry, HandleScope, HandleStats, LocalHandle};
pub use resolver::{decode_uri, extract_url_base, is_relative, normalize_reference, Resolution, Resolver};
pub use scene::{MeshAsset, MeshPrimitive, NodeKind, SceneDocument, SceneNode, SceneSummary};
pub use texture::{decode_texture, TextureAsset, TextureFormat};

