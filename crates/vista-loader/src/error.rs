//! Failure taxonomy for scene loads.
//!
//! Every failure is classified once, where it happens, from a structured
//! [`RawFailure`]. Nothing here inspects message text.

use thiserror::Error;
use vista_assets::AssetError;
use vista_net::FetchError;

use crate::classify::is_archive;

/// A load failure, tagged by cause, with the underlying error attached.
#[derive(Debug, Error)]
pub enum ClassifiedError {
    #[error("no response for '{url}': {source}")]
    TransportDenied {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("access denied for '{url}': {status} {reason}")]
    AccessDenied {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("not found: '{url}': {status} {reason}")]
    NotFound {
        url: String,
        status: u16,
        reason: String,
    },

    #[error("'{url}' returned {content_type} instead of model data")]
    MarkupInsteadOfBinary { url: String, content_type: String },

    #[error("archive '{url}' has no primary document among {} entries", .entries.len())]
    ArchiveMissingPrimaryDocument { url: String, entries: Vec<String> },

    #[error("failed to load document '{url}': {source}")]
    DocumentParseFailure {
        url: String,
        #[source]
        source: AssetError,
    },

    #[error("missing sub-resource '{uri}': {reason}")]
    MissingSubresource { uri: String, reason: String },

    #[error("{message}")]
    Generic {
        url: String,
        status: Option<u16>,
        message: String,
    },
}

/// Discriminant of [`ClassifiedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransportDenied,
    AccessDenied,
    NotFound,
    MarkupInsteadOfBinary,
    ArchiveMissingPrimaryDocument,
    DocumentParseFailure,
    MissingSubresource,
    Generic,
}

/// A low-level failure signal, before classification.
#[derive(Debug)]
pub enum RawFailure {
    /// The request produced no response.
    Transport(FetchError),
    /// A response with a non-success status.
    Status { status: u16, reason: String },
    /// A success response whose body is a markup page.
    Markup { content_type: String },
    /// An archive without a primary document; carries the entry names.
    NoPrimaryDocument { entries: Vec<String> },
    Asset(AssetError),
    /// A sub-resource that was left out of the scene.
    Subresource { uri: String, reason: String },
    Other(String),
}

/// Map a raw failure to its user-facing cause. `context_url` is the input
/// reference the failing load was started for.
pub fn classify_failure(raw: RawFailure, context_url: &str) -> ClassifiedError {
    let url = context_url.to_string();
    match raw {
        RawFailure::Transport(FetchError::InvalidUrl(target)) => ClassifiedError::Generic {
            url,
            status: None,
            message: format!("Invalid URL: {}", target),
        },
        // The server answered; only the body was refused.
        RawFailure::Transport(source @ FetchError::TooLarge { .. }) => ClassifiedError::Generic {
            url,
            status: None,
            message: source.to_string(),
        },
        RawFailure::Transport(source) => ClassifiedError::TransportDenied { url, source },
        RawFailure::Status { status: 403, reason } => ClassifiedError::AccessDenied {
            url,
            status: 403,
            reason,
        },
        RawFailure::Status { status: 404, reason } => ClassifiedError::NotFound {
            url,
            status: 404,
            reason,
        },
        RawFailure::Status { status, reason } => ClassifiedError::Generic {
            url,
            status: Some(status),
            message: format!("HTTP {}: {}", status, reason),
        },
        RawFailure::Markup { content_type } => {
            ClassifiedError::MarkupInsteadOfBinary { url, content_type }
        }
        RawFailure::NoPrimaryDocument { entries } => {
            ClassifiedError::ArchiveMissingPrimaryDocument { url, entries }
        }
        RawFailure::Asset(
            source @ (AssetError::GltfParseFailed(..)
            | AssetError::NoScene(_)
            | AssetError::InvalidDataUri(_)
            | AssetError::ImageDecodeFailed(..)),
        ) => ClassifiedError::DocumentParseFailure { url, source },
        RawFailure::Asset(other) => ClassifiedError::Generic {
            url,
            status: None,
            message: other.to_string(),
        },
        RawFailure::Subresource { uri, reason } => {
            ClassifiedError::MissingSubresource { uri, reason }
        }
        RawFailure::Other(message) => ClassifiedError::Generic {
            url,
            status: None,
            message,
        },
    }
}

impl ClassifiedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifiedError::TransportDenied { .. } => ErrorKind::TransportDenied,
            ClassifiedError::AccessDenied { .. } => ErrorKind::AccessDenied,
            ClassifiedError::NotFound { .. } => ErrorKind::NotFound,
            ClassifiedError::MarkupInsteadOfBinary { .. } => ErrorKind::MarkupInsteadOfBinary,
            ClassifiedError::ArchiveMissingPrimaryDocument { .. } => {
                ErrorKind::ArchiveMissingPrimaryDocument
            }
            ClassifiedError::DocumentParseFailure { .. } => ErrorKind::DocumentParseFailure,
            ClassifiedError::MissingSubresource { .. } => ErrorKind::MissingSubresource,
            ClassifiedError::Generic { .. } => ErrorKind::Generic,
        }
    }

    /// HTTP status behind the failure, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClassifiedError::AccessDenied { status, .. }
            | ClassifiedError::NotFound { status, .. } => Some(*status),
            ClassifiedError::Generic { status, .. } => *status,
            _ => None,
        }
    }

    /// The reference the failure is about.
    pub fn url(&self) -> &str {
        match self {
            ClassifiedError::TransportDenied { url, .. }
            | ClassifiedError::AccessDenied { url, .. }
            | ClassifiedError::NotFound { url, .. }
            | ClassifiedError::MarkupInsteadOfBinary { url, .. }
            | ClassifiedError::ArchiveMissingPrimaryDocument { url, .. }
            | ClassifiedError::DocumentParseFailure { url, .. }
            | ClassifiedError::Generic { url, .. } => url,
            ClassifiedError::MissingSubresource { uri, .. } => uri,
        }
    }

    /// Whether the load still produced a scene.
    pub fn is_soft(&self) -> bool {
        self.kind() == ErrorKind::MissingSubresource
    }

    /// Message suitable for showing to the person who asked for the load.
    pub fn user_message(&self) -> String {
        let archive = is_archive(self.url());
        let file_type = if archive { "ZIP file" } else { "glTF file" };

        match self {
            ClassifiedError::TransportDenied { source, .. } => format!(
                "Unable to load the {} from the provided URL: {}.\n\n\
                 This could be due to:\n\
                 \u{2022} Network connectivity issues\n\
                 \u{2022} The storage bucket refusing requests from this client\n\
                 \u{2022} The file is not accessible\n\n\
                 Please check the URL and try again.",
                file_type, source
            ),
            ClassifiedError::AccessDenied { status, .. } => format!(
                "Access Denied ({}): the server refused to serve the {}.\n\n\
                 If this is a signed URL it may have expired. Otherwise the bucket \
                 owner needs to allow access for this client.",
                status, file_type
            ),
            ClassifiedError::NotFound { status, .. } => format!(
                "File Not Found ({}): the {} was not found at the provided URL.\n\n\
                 The file may have been moved or deleted, or the URL may be incorrect.",
                status, file_type
            ),
            ClassifiedError::MarkupInsteadOfBinary { .. } => {
                let expected = if archive { "ZIP file" } else { "GLB file" };
                format!(
                    "Invalid Response: the server returned an HTML page instead of the {}.\n\n\
                     This usually means:\n\
                     \u{2022} The signed URL has expired\n\
                     \u{2022} The signed URL is malformed\n\
                     \u{2022} The file was moved or deleted\n\n\
                     Please generate a new signed URL and try again.",
                    expected
                )
            }
            ClassifiedError::ArchiveMissingPrimaryDocument { .. } => {
                "ZIP Archive Error: no glTF file found in the ZIP archive.\n\n\
                 The ZIP file must contain at least one .gltf or .glb file to be viewable, \
                 along with any .bin buffers and textures (.jpg, .png, .webp) it references."
                    .to_string()
            }
            ClassifiedError::DocumentParseFailure { source, .. } => match source {
                AssetError::NoScene(_) => source.to_string(),
                _ => format!(
                    "The file at the provided URL is not a valid glTF file. Error: \"{}\"",
                    source
                ),
            },
            ClassifiedError::MissingSubresource { uri, .. } => {
                let name = uri.rsplit('/').next().unwrap_or(uri);
                format!("Missing texture or buffer: {}", name)
            }
            ClassifiedError::Generic { message, .. } => message.clone(),
        }
    }
}
