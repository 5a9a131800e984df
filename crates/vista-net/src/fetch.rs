use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;

/// Whether a request may carry the configured credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    /// Never attach credentials. Required for pre-signed URLs, which already
    /// carry their authorization in the query string.
    Omit,
    /// Attach the configured bearer token, if any.
    Include,
}

/// A received HTTP response, whatever its status.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub body: Arc<[u8]>,
}

impl FetchResponse {
    /// A 200 response, mostly useful for scripted fetchers.
    pub fn ok(url: impl Into<String>, content_type: Option<&str>, body: impl Into<Arc<[u8]>>) -> Self {
        Self {
            url: url.into(),
            status: 200,
            reason: "OK".into(),
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// A bodiless response with the given status.
    pub fn with_status(url: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            reason: reason.into(),
            content_type: None,
            body: Arc::from(Vec::<u8>::new()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the server sent a markup page (typically a provider error
    /// page) rather than binary or model data.
    pub fn is_markup(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            })
            .unwrap_or(false)
    }
}

/// Network retrieval seam used by the loader.
pub trait NetworkFetch: Send + Sync + 'static {
    fn fetch(
        &self,
        url: &str,
        credentials: Credentials,
    ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Sent only with [`Credentials::Include`] requests.
    pub bearer_token: Option<String>,
    pub max_body_bytes: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("vista/", env!("CARGO_PKG_VERSION")).to_string(),
            bearer_token: None,
            max_body_bytes: 512 * 1024 * 1024,
        }
    }
}

/// [`NetworkFetch`] over a shared `reqwest` client. The client keeps no
/// cookie store, so [`Credentials::Omit`] requests carry nothing but the URL.
pub struct HttpFetcher {
    client: Client,
    bearer_token: Option<String>,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &NetConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            bearer_token: config.bearer_token.clone(),
            max_body_bytes: config.max_body_bytes,
        })
    }
}

impl NetworkFetch for HttpFetcher {
    async fn fetch(&self, url: &str, credentials: Credentials) -> Result<FetchResponse, FetchError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let mut request = self.client.get(url);
        if credentials == Credentials::Include {
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }
        }

        let mut response = request.send().await?;

        let status = response.status();
        let final_url = response.url().to_string();
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Error bodies are never parsed, so only the status is kept.
        if !status.is_success() {
            debug!("GET {} -> {}", final_url, status.as_u16());
            return Ok(FetchResponse {
                url: final_url,
                status: status.as_u16(),
                reason,
                content_type,
                body: Arc::from(Vec::<u8>::new()),
            });
        }

        check_declared_size(response.content_length(), self.max_body_bytes)?;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            append_limited(&mut body, &chunk, self.max_body_bytes)?;
        }

        debug!(
            "GET {} -> {} ({} bytes, {:?})",
            final_url,
            status.as_u16(),
            body.len(),
            content_type
        );

        Ok(FetchResponse {
            url: final_url,
            status: status.as_u16(),
            reason,
            content_type,
            body: Arc::from(body),
        })
    }
}

fn check_declared_size(declared: Option<u64>, max: u64) -> Result<(), FetchError> {
    match declared {
        Some(size) if size > max => Err(FetchError::TooLarge { size, max }),
        _ => Ok(()),
    }
}

/// Append one body chunk, failing as soon as the running total passes `max`.
/// Chunked responses carry no length, so this is the limit that always holds.
fn append_limited(body: &mut Vec<u8>, chunk: &[u8], max: u64) -> Result<(), FetchError> {
    let size = (body.len() + chunk.len()) as u64;
    if size > max {
        return Err(FetchError::TooLarge { size, max });
    }
    body.extend_from_slice(chunk);
    Ok(())
}
