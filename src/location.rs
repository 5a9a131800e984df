//! Model URLs embedded in a viewer page location.
//!
//! Two forms are recognized: a path segment `/-<encoded>` holding a base64
//! or percent-encoded URL, and a `file=` query parameter.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use url::Url;

/// Extract the model URL from a page path and query string (without `?`).
/// The path form wins over the query parameter.
pub fn extract_model_url(path: &str, query: Option<&str>) -> Option<String> {
    if let Some(url) = from_path(path) {
        return Some(url);
    }
    query.and_then(from_query)
}

/// Same as [`extract_model_url`], for a full page URL.
pub fn from_page_url(page: &str) -> Option<String> {
    let page = Url::parse(page).ok()?;
    extract_model_url(page.path(), page.query())
}

fn from_path(path: &str) -> Option<String> {
    let encoded = path.strip_prefix("/-").filter(|rest| !rest.is_empty())?;

    if let Some(url) = decode_base64(encoded).filter(|u| is_valid_url(u)) {
        return Some(url);
    }

    let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
    if is_valid_url(&decoded) {
        return Some(decoded.into_owned());
    }

    let spaced = encoded.replace('+', "%20");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
        .filter(|u| is_valid_url(u))
}

fn from_query(query: &str) -> Option<String> {
    let (_, value) = url::form_urlencoded::parse(query.as_bytes()).find(|(key, _)| key == "file")?;
    if value.is_empty() {
        return None;
    }
    match decode_base64(&value).filter(|u| is_valid_url(u)) {
        Some(url) => Some(url),
        None => Some(value.into_owned()),
    }
}

fn decode_base64(input: &str) -> Option<String> {
    let bytes = STANDARD
        .decode(input)
        .or_else(|_| URL_SAFE.decode(input))
        .ok()?;
    String::from_utf8(bytes).ok()
}

fn is_valid_url(candidate: &str) -> bool {
    Url::parse(candidate).is_ok()
}
