use std::sync::mpsc;
use std::sync::Arc;

use vista_assets::HandleRegistry;
use vista_net::{FetchError, HttpFetcher, NetConfig, NetworkFetch};

use crate::config::LoaderConfig;
use crate::dispatcher::SceneLoader;
use crate::error::ClassifiedError;
use crate::request::{LoadOutcome, LoadRequest};
use crate::sink::SceneSink;

/// A non-blocking handle to an in-flight load.
/// Call `try_recv()` from a frame loop, or `wait()` when blocking is fine.
pub struct PendingLoad {
    receiver: mpsc::Receiver<Result<LoadOutcome, ClassifiedError>>,
}

impl PendingLoad {
    /// Non-blocking check for the result. Returns `None` if still pending.
    pub fn try_recv(&self) -> Option<Result<LoadOutcome, ClassifiedError>> {
        self.receiver.try_recv().ok()
    }

    /// Blocking wait for the result.
    pub fn wait(self) -> Result<LoadOutcome, ClassifiedError> {
        self.receiver.recv().map_err(|_| ClassifiedError::Generic {
            url: String::new(),
            status: None,
            message: "Load task ended without a result".into(),
        })?
    }
}

/// Owns a background tokio runtime and runs loads on it.
pub struct ViewerClient<F = HttpFetcher> {
    runtime: tokio::runtime::Runtime,
    loader: Arc<SceneLoader<F>>,
}

impl ViewerClient<HttpFetcher> {
    /// Create a client that retrieves over HTTP.
    pub fn new(
        net: &NetConfig,
        config: LoaderConfig,
        sink: Arc<dyn SceneSink>,
    ) -> Result<Self, FetchError> {
        Self::with_fetcher(HttpFetcher::new(net)?, config, sink)
    }
}

impl<F: NetworkFetch> ViewerClient<F> {
    pub fn with_fetcher(
        fetcher: F,
        config: LoaderConfig,
        sink: Arc<dyn SceneSink>,
    ) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            runtime,
            loader: Arc::new(SceneLoader::new(fetcher, sink, config)),
        })
    }

    /// Start a load. Supersedes any load still in flight on this client.
    pub fn load(&self, request: LoadRequest) -> PendingLoad {
        let (tx, rx) = mpsc::channel();
        let loader = Arc::clone(&self.loader);

        self.runtime.spawn(async move {
            let result = loader.load(request).await;
            let _ = tx.send(result);
        });

        PendingLoad { receiver: rx }
    }

    pub fn registry(&self) -> &HandleRegistry {
        self.loader.registry()
    }

    pub fn loader(&self) -> &SceneLoader<F> {
        &self.loader
    }
}
