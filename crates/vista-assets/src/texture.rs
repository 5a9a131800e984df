use crate::error::AssetError;

/// Pixel layout of a texture's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// Decoded to 8-bit RGBA.
    Rgba8,
    /// Kept in its container encoding (e.g. KTX2) for the renderer to
    /// transcode.
    Encoded,
}

/// A texture referenced by the scene.
#[derive(Debug, Clone)]
pub struct TextureAsset {
    /// The URI or buffer-view label the image came from.
    pub source: String,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: TextureFormat,
}

/// Whether the `image` crate can decode this MIME type.
pub fn is_decodable(mime: &str) -> bool {
    matches!(mime, "image/png" | "image/jpeg" | "image/webp")
}

/// Decode image bytes into an RGBA8 texture, or keep them encoded when the
/// format is one the renderer transcodes itself.
pub fn decode_texture(source: &str, mime: &str, bytes: &[u8]) -> Result<TextureAsset, AssetError> {
    if !is_decodable(mime) {
        return Ok(TextureAsset {
            source: source.to_string(),
            mime: mime.to_string(),
            width: 0,
            height: 0,
            data: bytes.to_vec(),
            format: TextureFormat::Encoded,
        });
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| AssetError::ImageDecodeFailed(source.to_string(), e.to_string()))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    Ok(TextureAsset {
        source: source.to_string(),
        mime: mime.to_string(),
        width,
        height,
        data: rgba.into_raw(),
        format: TextureFormat::Rgba8,
    })
}
