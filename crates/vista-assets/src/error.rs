/// Errors that can occur while decoding or materializing assets.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to parse glTF document '{0}': {1}")]
    GltfParseFailed(String, String),

    #[error("'{0}' contains no scene and cannot be viewed here, though it may contain individual 3D resources")]
    NoScene(String),

    #[error("failed to decode image '{0}': {1}")]
    ImageDecodeFailed(String, String),

    #[error("invalid data URI in '{0}'")]
    InvalidDataUri(String),

    #[error("failed to read archive: {0}")]
    ArchiveUnreadable(String),

    #[error("failed to extract archive entry '{0}': {1}")]
    ArchiveEntryFailed(String, String),
}
