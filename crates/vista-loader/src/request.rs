use std::sync::Arc;

use vista_assets::{AssetMap, SceneDocument};

use crate::classify::InputKind;
use crate::error::ClassifiedError;

/// The document a load starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primary {
    /// Key of the root document inside the request's asset map.
    File(String),
    Url(String),
}

/// One user-initiated load. Consumed by the load it starts.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub primary: Primary,
    /// Prefix applied to normalized references before looking them up.
    pub root_path: String,
    pub assets: AssetMap,
}

impl LoadRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            primary: Primary::Url(url.into()),
            root_path: String::new(),
            assets: AssetMap::new(),
        }
    }

    /// Load from a set of local files. The root document is the last `.gltf`
    /// or `.glb` entry; its directory becomes the root path.
    pub fn from_files(assets: AssetMap) -> Result<Self, ClassifiedError> {
        let root = assets
            .paths()
            .filter(|path| {
                let lower = path.to_ascii_lowercase();
                lower.ends_with(".gltf") || lower.ends_with(".glb")
            })
            .last()
            .map(str::to_string)
            .ok_or_else(|| ClassifiedError::Generic {
                url: String::new(),
                status: None,
                message: "No .gltf or .glb asset found.".into(),
            })?;

        let root_path = match root.rfind('/') {
            Some(index) => root[..=index].to_string(),
            None => String::new(),
        };

        Ok(Self {
            primary: Primary::File(root),
            root_path,
            assets,
        })
    }

    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    /// Files that sub-resource references may resolve to.
    pub fn with_assets(mut self, assets: AssetMap) -> Self {
        self.assets = assets;
        self
    }

    /// The primary reference as the user would recognize it.
    pub fn label(&self) -> &str {
        match &self.primary {
            Primary::File(path) | Primary::Url(path) => path,
        }
    }
}

/// A scene that was delivered, with the sub-resources it had to go without.
#[derive(Debug)]
pub struct LoadResult {
    pub document: Arc<SceneDocument>,
    pub kind: InputKind,
    /// Non-fatal failures, all [`ClassifiedError::MissingSubresource`].
    pub skipped: Vec<ClassifiedError>,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LoadResult),
    /// A newer load started before this one finished; nothing was delivered.
    Superseded { generation: u64 },
}

impl LoadOutcome {
    pub fn loaded(self) -> Option<LoadResult> {
        match self {
            LoadOutcome::Loaded(result) => Some(result),
            LoadOutcome::Superseded { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> AssetMap {
        let mut map = AssetMap::new();
        for path in paths {
            map.insert(*path, vec![0u8]);
        }
        map
    }

    #[test]
    fn picks_root_document_and_directory() {
        let request = LoadRequest::from_files(files(&[
            "models/scene.gltf",
            "models/scene.bin",
            "models/textures/a.png",
        ]))
        .unwrap();
        assert_eq!(request.primary, Primary::File("models/scene.gltf".into()));
        assert_eq!(request.root_path, "models/");
        assert_eq!(request.assets.len(), 3);
    }

    #[test]
    fn top_level_root_has_empty_root_path() {
        let request = LoadRequest::from_files(files(&["Duck.GLB"])).unwrap();
        assert_eq!(request.label(), "Duck.GLB");
        assert_eq!(request.root_path, "");
    }

    #[test]
    fn last_candidate_wins() {
        let request = LoadRequest::from_files(files(&["a/one.gltf", "b/two.glb"])).unwrap();
        assert_eq!(request.label(), "b/two.glb");
    }

    #[test]
    fn file_set_without_document_is_rejected() {
        let err = LoadRequest::from_files(files(&["textures/a.png"])).unwrap_err();
        assert_eq!(err.to_string(), "No .gltf or .glb asset found.");
    }
}
