//! Logical path to payload mapping used to satisfy sub-resource references
//! without going back to the network.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Raw bytes of one asset plus its declared or inferred MIME type.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Arc<[u8]>,
    mime: String,
}

impl Payload {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: mime.into(),
        }
    }

    /// Build a payload whose MIME type is inferred from `name`'s extension.
    pub fn infer(name: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(bytes, mime_for(name))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("len", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

/// A logical path plus the payload it names.
#[derive(Debug, Clone)]
pub struct AssetReference {
    pub path: String,
    pub payload: Payload,
}

impl AssetReference {
    pub fn new(path: impl Into<String>, payload: Payload) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }
}

/// MIME type for a file name, by extension. Unknown extensions are treated as
/// opaque binary.
pub fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "gltf" => "model/gltf+json",
        "glb" => "model/gltf-binary",
        "bin" => "application/octet-stream",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "ktx2" => "image/ktx2",
        "drc" | "draco" => "application/x-draco",
        _ => "application/octet-stream",
    }
}

/// Mapping from logical path to payload for one load operation.
///
/// Keys are stored already percent-decoded. Iteration is in key order so that
/// lookups that have to pick among several candidates are deterministic.
#[derive(Debug, Clone, Default)]
pub struct AssetMap {
    entries: BTreeMap<String, Payload>,
}

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert raw bytes under `path`, inferring the MIME type. A later insert
    /// for the same path replaces the earlier one.
    pub fn insert(&mut self, path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Option<Payload> {
        let path = path.into();
        let payload = Payload::infer(&path, bytes);
        self.entries.insert(path, payload)
    }

    pub fn insert_payload(&mut self, path: impl Into<String>, payload: Payload) -> Option<Payload> {
        self.entries.insert(path.into(), payload)
    }

    pub fn get(&self, path: &str) -> Option<&Payload> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Payload)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<AssetReference> for AssetMap {
    fn from_iter<I: IntoIterator<Item = AssetReference>>(iter: I) -> Self {
        let mut map = AssetMap::new();
        for reference in iter {
            map.insert_payload(reference.path, reference.payload);
        }
        map
    }
}
