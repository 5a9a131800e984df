//! Sub-resource reference resolution against an in-memory asset map.
//!
//! A [`Resolver`] is consulted for every external URI the primary document
//! names. Mapped references become short-lived local handles; everything else
//! falls through so the caller can try the network.

use std::collections::HashMap;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::asset_map::AssetMap;
use crate::handle::{HandleScope, LocalHandle};

/// Outcome of resolving one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from the asset map through a local handle.
    Local(LocalHandle),
    /// Rewritten to an absolute URL that should be fetched instead.
    Rewritten(String),
    /// Not handled here; the original reference, unchanged.
    Fallthrough(String),
}

enum Strategy {
    Mapped {
        map: Arc<AssetMap>,
        root_path: String,
        /// Bare file name -> full key, present for archive-sourced maps.
        by_file_name: Option<HashMap<String, String>>,
    },
    SignedBase {
        base: Option<Url>,
    },
}

/// Maps references found in a document onto payloads or URLs.
pub struct Resolver {
    strategy: Strategy,
    scope: Arc<HandleScope>,
}

impl Resolver {
    /// Resolver over a user-supplied file set.
    pub fn mapped(map: AssetMap, root_path: impl Into<String>, scope: Arc<HandleScope>) -> Self {
        Self {
            strategy: Strategy::Mapped {
                map: Arc::new(map),
                root_path: root_path.into(),
                by_file_name: None,
            },
            scope,
        }
    }

    /// Resolver over entries extracted from an archive. Falls back to matching
    /// by bare file name when the full path does not match.
    pub fn archive(map: AssetMap, root_path: impl Into<String>, scope: Arc<HandleScope>) -> Self {
        let mut by_file_name = HashMap::new();
        for path in map.paths() {
            by_file_name
                .entry(file_name(path).to_string())
                .or_insert_with(|| path.to_string());
        }
        Self {
            strategy: Strategy::Mapped {
                map: Arc::new(map),
                root_path: root_path.into(),
                by_file_name: Some(by_file_name),
            },
            scope,
        }
    }

    /// Resolver that rewrites relative references against the base path of a
    /// signed URL. No payloads are served locally.
    pub fn signed(signed_url: &str, scope: Arc<HandleScope>) -> Self {
        Self {
            strategy: Strategy::SignedBase {
                base: Url::parse(signed_url).ok(),
            },
            scope,
        }
    }

    /// Resolve `requested` as referenced from a document located at `base`.
    pub fn resolve(&self, requested: &str, base: &str) -> Resolution {
        match &self.strategy {
            Strategy::Mapped {
                map,
                root_path,
                by_file_name,
            } => {
                let key = normalize_reference(requested, base, "");
                let rooted = format!("{}{}", root_path, key);

                let hit = [rooted.as_str(), key.as_str()]
                    .into_iter()
                    .find(|candidate| map.contains(candidate))
                    .map(str::to_string)
                    .or_else(|| {
                        let index = by_file_name.as_ref()?;
                        let decoded = decode_uri(requested);
                        let name = file_name(decoded.split('?').next().unwrap_or_default());
                        index.get(name).cloned()
                    });

                match hit.and_then(|path| map.get(&path).map(|p| (path, p.clone()))) {
                    Some((path, payload)) => {
                        let handle = self.scope.create(payload);
                        debug!("Resolved '{}' to mapped asset '{}'", requested, path);
                        Resolution::Local(handle)
                    }
                    None => Resolution::Fallthrough(requested.to_string()),
                }
            }
            Strategy::SignedBase { base: signed_base } => {
                let Some(signed_base) = signed_base else {
                    return Resolution::Fallthrough(requested.to_string());
                };
                if !is_relative(requested) {
                    return Resolution::Fallthrough(requested.to_string());
                }
                match signed_base.join(requested) {
                    Ok(url) => Resolution::Rewritten(url.to_string()),
                    Err(_) => Resolution::Fallthrough(requested.to_string()),
                }
            }
        }
    }
}

/// Percent-decode once. Invalid UTF-8 sequences are replaced rather than
/// rejected.
pub fn decode_uri(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

/// Everything up to and including the last `/`, or `./` if there is none.
pub fn extract_url_base(url: &str) -> &str {
    match url.rfind('/') {
        Some(index) => &url[..=index],
        None => "./",
    }
}

/// Turn a document reference into an asset-map key: decode, drop the
/// document's base URL, drop one leading `./` or `/`, then prefix `root_path`.
pub fn normalize_reference(requested: &str, base: &str, root_path: &str) -> String {
    let decoded = decode_uri(requested);
    let decoded_base = decode_uri(base);
    let mut key = decoded.as_str();
    if !decoded_base.is_empty() {
        key = key.strip_prefix(decoded_base.as_str()).unwrap_or(key);
    }
    let key = key
        .strip_prefix("./")
        .or_else(|| key.strip_prefix('/'))
        .unwrap_or(key);
    format!("{}{}", root_path, key)
}

/// Whether a reference is relative to its document: `./`, `../`, or no scheme.
pub fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../") || Url::parse(reference).is_err()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
