use serde::{Deserialize, Serialize};

/// Loader behaviour that does not change between loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Extensions (without the dot) that identify the primary document
    /// inside an archive. The first matching entry wins.
    pub primary_extensions: Vec<String>,
    pub archive_extension: String,
    /// Decompress archive entries on blocking worker threads.
    pub parallel_extraction: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            primary_extensions: vec!["gltf".into(), "glb".into()],
            archive_extension: "zip".into(),
            parallel_extraction: true,
        }
    }
}
