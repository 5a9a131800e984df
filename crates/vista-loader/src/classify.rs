//! Input reference classification.
//!
//! Classification is total: anything that does not parse as a URL is treated
//! as a plain reference and left for the retrieval step to reject.

use url::Url;

/// Query parameters that mark a pre-signed object storage URL.
const SIGNATURE_PARAMS: [&str; 4] = [
    "Signature",
    "X-Amz-Signature",
    "AWSAccessKeyId",
    "X-Amz-Credential",
];

const DEFAULT_ARCHIVE_EXTENSION: &str = "zip";

/// How an input reference will be retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    /// A local handle (`blob:`) or a `file:` URL.
    LocalFile,
    PlainUrl,
    /// A pre-signed object storage URL.
    SignedUrl,
    /// A ZIP bundle holding the document and its sub-resources.
    ArchiveUrl,
}

impl InputKind {
    pub fn label(&self) -> &'static str {
        match self {
            InputKind::LocalFile => "local file",
            InputKind::PlainUrl => "URL",
            InputKind::SignedUrl => "signed URL",
            InputKind::ArchiveUrl => "archive",
        }
    }
}

/// Classify with the default archive extension (`.zip`).
pub fn classify(reference: &str) -> InputKind {
    classify_with(reference, DEFAULT_ARCHIVE_EXTENSION)
}

/// Classify a reference. Archive detection wins over signed-URL detection,
/// which wins over the local/plain split.
pub fn classify_with(reference: &str, archive_extension: &str) -> InputKind {
    if has_extension(reference, archive_extension) {
        return InputKind::ArchiveUrl;
    }
    if is_signed_url(reference) {
        return InputKind::SignedUrl;
    }
    let lower = reference.trim_start().to_ascii_lowercase();
    if lower.starts_with("blob:") || lower.starts_with("file:") {
        InputKind::LocalFile
    } else {
        InputKind::PlainUrl
    }
}

/// Whether the path of `reference` ends in `.zip`, ignoring case and any
/// query string or fragment.
pub fn is_archive(reference: &str) -> bool {
    has_extension(reference, DEFAULT_ARCHIVE_EXTENSION)
}

/// Whether `reference` is an object storage URL carrying a signature. Both
/// the host and at least one signature parameter are required.
pub fn is_signed_url(reference: &str) -> bool {
    let Ok(url) = Url::parse(reference) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    is_storage_host(&host.to_ascii_lowercase())
        && url
            .query_pairs()
            .any(|(key, _)| SIGNATURE_PARAMS.contains(&key.as_ref()))
}

/// `s3.amazonaws.com`, `bucket.s3.amazonaws.com`, `s3.<region>.amazonaws.com`
/// and the legacy `s3-<region>.amazonaws.com` forms.
fn is_storage_host(host: &str) -> bool {
    let Some(prefix) = host.strip_suffix(".amazonaws.com") else {
        return false;
    };
    prefix
        .split('.')
        .any(|label| label == "s3" || label.starts_with("s3-"))
}

fn has_extension(reference: &str, extension: &str) -> bool {
    let path = match Url::parse(reference) {
        Ok(url) if !url.cannot_be_a_base() => url.path().to_string(),
        _ => reference
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let suffix = format!(".{}", extension.trim_start_matches('.'));
    path.to_ascii_lowercase()
        .ends_with(&suffix.to_ascii_lowercase())
}
