//! Per-kind retrieval strategies.
//!
//! A load runs retrieve -> (extract) -> parse -> resolve sub-resources ->
//! deliver. The active-slot generation is checked after every suspension
//! point, and the load's handle scope is released when the load settles,
//! whichever way it settles.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use url::{Origin, Url};
use vista_assets::{
    extract_url_base, mime_for, GltfDocument, HandleRegistry, HandleScope, Payload, Resolution,
    Resolver, ZipArchiveReader,
};
use vista_net::{Credentials, FetchError, FetchResponse, NetworkFetch};

use crate::classify::{classify_with, InputKind};
use crate::config::LoaderConfig;
use crate::error::{classify_failure, ClassifiedError, RawFailure};
use crate::request::{LoadOutcome, LoadRequest, LoadResult, Primary};
use crate::sink::SceneSink;
use crate::slot::ActiveSlot;

type LoadResultOrError = Result<LoadOutcome, ClassifiedError>;

/// Releases a load's handles and its slot entry when the load settles, even
/// if the load future is dropped part-way.
struct Settle<'a> {
    slot: &'a ActiveSlot,
    generation: u64,
    scope: Arc<HandleScope>,
}

impl Drop for Settle<'_> {
    fn drop(&mut self) {
        self.scope.release_all();
        self.slot.clear(self.generation);
    }
}

/// A retrieved primary document, ready to parse.
struct Retrieved {
    bytes: Arc<[u8]>,
    /// URL the document's relative references are resolved against.
    document_url: String,
}

/// Loads scenes and hands them to a [`SceneSink`].
pub struct SceneLoader<F> {
    fetcher: F,
    registry: HandleRegistry,
    slot: ActiveSlot,
    sink: Arc<dyn SceneSink>,
    config: LoaderConfig,
}

impl<F: NetworkFetch> SceneLoader<F> {
    pub fn new(fetcher: F, sink: Arc<dyn SceneSink>, config: LoaderConfig) -> Self {
        Self {
            fetcher,
            registry: HandleRegistry::new(),
            slot: ActiveSlot::new(),
            sink,
            config,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn slot(&self) -> &ActiveSlot {
        &self.slot
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Run one load to completion. Starting a load supersedes any load
    /// still in flight on this loader.
    pub async fn load(&self, request: LoadRequest) -> LoadResultOrError {
        let generation = self.slot.begin();
        let settle = Settle {
            slot: &self.slot,
            generation,
            scope: Arc::new(HandleScope::new(self.registry.clone())),
        };
        let label = request.label().to_string();

        let result = match self.dispatch(generation, request, &settle.scope).await {
            Err(e) if !self.slot.is_current(generation) => {
                debug!("Dropping failure of superseded load '{}': {}", label, e);
                Ok(superseded(generation))
            }
            other => other,
        };
        match &result {
            Ok(LoadOutcome::Loaded(loaded)) => info!(
                "Loaded '{}' ({}, {} skipped sub-resources)",
                label,
                loaded.kind.label(),
                loaded.skipped.len()
            ),
            Ok(LoadOutcome::Superseded { .. }) => {
                debug!("Load of '{}' superseded by generation {}", label, self.slot.current())
            }
            Err(e) => error!("Load of '{}' failed: {}", label, e),
        }
        drop(settle);
        result
    }

    async fn dispatch(
        &self,
        generation: u64,
        request: LoadRequest,
        scope: &Arc<HandleScope>,
    ) -> LoadResultOrError {
        let LoadRequest {
            primary,
            root_path,
            assets,
        } = request;

        let (url, label) = match primary {
            Primary::Url(url) => (url.clone(), url),
            Primary::File(key) => {
                let payload = assets.get(&key).cloned().ok_or_else(|| {
                    classify_failure(
                        RawFailure::Other(format!("'{}' is not part of the file set", key)),
                        &key,
                    )
                })?;
                (scope.create(payload).url().to_string(), key)
            }
        };

        let kind = classify_with(&url, &self.config.archive_extension);
        info!("Loading '{}' as {}", label, kind.label());

        match kind {
            InputKind::LocalFile | InputKind::PlainUrl => {
                let retrieved = match self.retrieve_direct(generation, &url, &label).await? {
                    Some(retrieved) => retrieved,
                    None => return Ok(superseded(generation)),
                };
                let resolver = Arc::new(Resolver::mapped(assets, root_path, Arc::clone(scope)));
                self.parse_and_deliver(generation, retrieved, &label, resolver, kind, Credentials::Include)
                    .await
            }
            InputKind::SignedUrl => {
                let retrieved = match self.retrieve_signed(generation, &url, &label, scope).await? {
                    Some(retrieved) => retrieved,
                    None => return Ok(superseded(generation)),
                };
                let resolver = Arc::new(Resolver::signed(&url, Arc::clone(scope)));
                self.parse_and_deliver(generation, retrieved, &label, resolver, kind, Credentials::Omit)
                    .await
            }
            InputKind::ArchiveUrl => self.load_archive(generation, &url, &label, scope).await,
        }
    }

    async fn retrieve_direct(
        &self,
        generation: u64,
        url: &str,
        label: &str,
    ) -> Result<Option<Retrieved>, ClassifiedError> {
        let response = self
            .retrieve(url, Credentials::Include)
            .await
            .map_err(|e| classify_failure(RawFailure::Transport(e), label))?;
        if !self.slot.is_current(generation) {
            return Ok(None);
        }
        check_response(&response, label)?;
        Ok(Some(Retrieved {
            bytes: response.body,
            document_url: url.to_string(),
        }))
    }

    /// Signed URLs get one retry: if the direct retrieval yields nothing
    /// usable, an explicit fetch decides the outcome.
    async fn retrieve_signed(
        &self,
        generation: u64,
        url: &str,
        label: &str,
        scope: &Arc<HandleScope>,
    ) -> Result<Option<Retrieved>, ClassifiedError> {
        match self.retrieve(url, Credentials::Omit).await {
            Ok(response) if response.is_success() && !response.is_markup() => {
                if !self.slot.is_current(generation) {
                    return Ok(None);
                }
                return Ok(Some(Retrieved {
                    bytes: response.body,
                    document_url: url.to_string(),
                }));
            }
            Ok(response) => warn!(
                "Direct load of signed URL returned {} ({}), retrying with explicit fetch",
                response.status,
                response.content_type.as_deref().unwrap_or("no content type")
            ),
            Err(e) => warn!("Direct load of signed URL failed ({}), retrying with explicit fetch", e),
        }
        if !self.slot.is_current(generation) {
            return Ok(None);
        }

        let response = self
            .retrieve(url, Credentials::Omit)
            .await
            .map_err(|e| classify_failure(RawFailure::Transport(e), label))?;
        if !self.slot.is_current(generation) {
            return Ok(None);
        }
        check_response(&response, label)?;

        let mime = response
            .content_type
            .clone()
            .unwrap_or_else(|| mime_for(label.split('?').next().unwrap_or(label)).to_string());
        let handle = scope.create(Payload::new(response.body, mime));
        let payload = self.registry.get(handle.url()).ok_or_else(|| {
            classify_failure(
                RawFailure::Other(format!("local handle {} vanished", handle.url())),
                label,
            )
        })?;
        debug!("Signed document materialized as {}", handle.url());

        Ok(Some(Retrieved {
            bytes: payload.shared_bytes(),
            document_url: handle.url().to_string(),
        }))
    }

    async fn load_archive(
        &self,
        generation: u64,
        url: &str,
        label: &str,
        scope: &Arc<HandleScope>,
    ) -> LoadResultOrError {
        let response = self
            .retrieve(url, Credentials::Omit)
            .await
            .map_err(|e| classify_failure(RawFailure::Transport(e), label))?;
        if !self.slot.is_current(generation) {
            return Ok(superseded(generation));
        }
        check_response(&response, label)?;

        let reader = ZipArchiveReader::open(response.body)
            .map_err(|e| classify_failure(RawFailure::Asset(e), label))?;

        let primary = reader
            .find_primary(&self.config.primary_extensions)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| {
                let entries = reader.entries().iter().map(|e| e.name.clone()).collect();
                classify_failure(RawFailure::NoPrimaryDocument { entries }, label)
            })?;
        debug!("Archive primary document: {}", primary);

        let assets = reader
            .extract_all(self.config.parallel_extraction)
            .await
            .map_err(|e| classify_failure(RawFailure::Asset(e), label))?;
        if !self.slot.is_current(generation) {
            return Ok(superseded(generation));
        }

        let payload = assets.get(&primary).cloned().ok_or_else(|| {
            classify_failure(
                RawFailure::Other(format!("'{}' missing after extraction", primary)),
                label,
            )
        })?;
        let root_path = match primary.rfind('/') {
            Some(index) => primary[..=index].to_string(),
            None => String::new(),
        };

        let handle = scope.create(payload.clone());
        let resolver = Arc::new(Resolver::archive(assets, root_path, Arc::clone(scope)));
        let retrieved = Retrieved {
            bytes: payload.shared_bytes(),
            document_url: handle.url().to_string(),
        };
        self.parse_and_deliver(
            generation,
            retrieved,
            label,
            resolver,
            InputKind::ArchiveUrl,
            Credentials::Omit,
        )
        .await
    }

    async fn parse_and_deliver(
        &self,
        generation: u64,
        retrieved: Retrieved,
        label: &str,
        resolver: Arc<Resolver>,
        kind: InputKind,
        credentials: Credentials,
    ) -> LoadResultOrError {
        if !self.slot.install(generation, Arc::clone(&resolver)) {
            return Ok(superseded(generation));
        }

        let mut document = GltfDocument::parse(&retrieved.bytes, label)
            .map_err(|e| classify_failure(RawFailure::Asset(e), label))?;

        let base = extract_url_base(&retrieved.document_url);
        let origin = Url::parse(&retrieved.document_url).ok().map(|url| url.origin());
        for reference in document.pending() {
            let result = self
                .fetch_subresource(&resolver, &reference.uri, base, origin.as_ref(), credentials)
                .await;
            if !self.slot.is_current(generation) {
                return Ok(superseded(generation));
            }
            document.provide(&reference, result);
        }

        let build = document
            .finish()
            .map_err(|e| classify_failure(RawFailure::Asset(e), label))?;

        let skipped: Vec<ClassifiedError> = build
            .skipped
            .into_iter()
            .map(|s| {
                classify_failure(
                    RawFailure::Subresource {
                        uri: s.uri,
                        reason: s.reason,
                    },
                    label,
                )
            })
            .collect();
        for soft in &skipped {
            warn!("{}", soft);
        }

        let scene = Arc::new(build.scene);
        let delivered = self
            .slot
            .deliver_if_current(generation, || self.sink.set_content(Arc::clone(&scene)));
        if !delivered {
            return Ok(superseded(generation));
        }

        Ok(LoadOutcome::Loaded(LoadResult {
            document: scene,
            kind,
            skipped,
        }))
    }

    /// Bytes for one sub-resource reference, or why there are none.
    /// `credentials` is only honored for targets on the document's origin.
    async fn fetch_subresource(
        &self,
        resolver: &Resolver,
        uri: &str,
        base: &str,
        origin: Option<&Origin>,
        credentials: Credentials,
    ) -> Result<Vec<u8>, String> {
        let target = match resolver.resolve(uri, base) {
            Resolution::Local(handle) => {
                return self
                    .registry
                    .get(handle.url())
                    .map(|payload| payload.bytes().to_vec())
                    .ok_or_else(|| format!("local handle {} was released", handle.url()));
            }
            Resolution::Rewritten(url) => url,
            Resolution::Fallthrough(reference) => join_reference(base, &reference)
                .ok_or_else(|| format!("not found in the provided files and '{}' has no base URL", base))?,
        };

        let credentials = credentials_for(&target, origin, credentials);
        debug!("Fetching sub-resource {} ({:?})", target, credentials);
        let response = self
            .retrieve(&target, credentials)
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("HTTP {} {}", response.status, response.reason));
        }
        Ok(response.body.to_vec())
    }

    /// Retrieve a URL: local handles from the registry, `file:` URLs from
    /// disk, everything else through the fetcher.
    async fn retrieve(&self, url: &str, credentials: Credentials) -> Result<FetchResponse, FetchError> {
        if url.starts_with("blob:") {
            return Ok(match self.registry.get(url) {
                Some(payload) => FetchResponse::ok(url, Some(payload.mime()), payload.shared_bytes()),
                None => FetchResponse::with_status(url, 404, "Not Found"),
            });
        }

        if url.starts_with("file:") {
            let path = Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;
            return match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(FetchResponse::ok(
                    url,
                    Some(mime_for(&path.to_string_lossy())),
                    bytes,
                )),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(FetchResponse::with_status(url, 404, "Not Found"))
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    Ok(FetchResponse::with_status(url, 403, "Forbidden"))
                }
                Err(e) => Err(FetchError::Network(format!("{}: {}", path.display(), e))),
            };
        }

        self.fetcher.fetch(url, credentials).await
    }
}

fn superseded(generation: u64) -> LoadOutcome {
    LoadOutcome::Superseded { generation }
}

/// Reject non-success statuses and markup bodies.
fn check_response(response: &FetchResponse, label: &str) -> Result<(), ClassifiedError> {
    if !response.is_success() {
        return Err(classify_failure(
            RawFailure::Status {
                status: response.status,
                reason: response.reason.clone(),
            },
            label,
        ));
    }
    if response.is_markup() {
        return Err(classify_failure(
            RawFailure::Markup {
                content_type: response.content_type.clone().unwrap_or_default(),
            },
            label,
        ));
    }
    Ok(())
}

fn credentials_for(target: &str, origin: Option<&Origin>, allowed: Credentials) -> Credentials {
    let same_origin = match (Url::parse(target), origin) {
        (Ok(target), Some(origin)) => origin.is_tuple() && target.origin() == *origin,
        _ => false,
    };
    if allowed == Credentials::Include && same_origin {
        Credentials::Include
    } else {
        Credentials::Omit
    }
}

fn join_reference(base: &str, reference: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(reference) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(reference)
        .ok()
        .map(|url| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::io::{Cursor, Write};

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::Notify;
    use vista_assets::{AssetMap, SceneDocument};
    use zip::write::SimpleFileOptions;

    use crate::error::ErrorKind;

    #[derive(Clone)]
    enum Reply {
        Respond(FetchResponse),
        Offline,
        Gated(Arc<Notify>, FetchResponse),
        GatedOffline(Arc<Notify>),
    }

    /// In-memory fetcher answering from a script. Each URL holds a queue of
    /// replies; the last one repeats. Unscripted URLs answer 404.
    #[derive(Default)]
    struct ScriptedFetcher {
        replies: Mutex<HashMap<String, VecDeque<Reply>>>,
        calls: Mutex<Vec<(String, Credentials)>>,
    }

    impl ScriptedFetcher {
        fn script(&self, url: &str, reply: Reply) {
            self.replies
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(reply);
        }

        fn respond(&self, url: &str, content_type: &str, body: Vec<u8>) {
            self.script(url, Reply::Respond(FetchResponse::ok(url, Some(content_type), body)));
        }

        fn calls(&self) -> Vec<(String, Credentials)> {
            self.calls.lock().clone()
        }

        fn called(&self, url: &str) -> bool {
            self.calls.lock().iter().any(|(u, _)| u == url)
        }
    }

    impl NetworkFetch for ScriptedFetcher {
        async fn fetch(&self, url: &str, credentials: Credentials) -> Result<FetchResponse, FetchError> {
            self.calls.lock().push((url.to_string(), credentials));
            let reply = {
                let mut replies = self.replies.lock();
                match replies.get_mut(url) {
                    Some(queue) if queue.len() > 1 => queue.pop_front(),
                    Some(queue) => queue.front().cloned(),
                    None => None,
                }
            };
            match reply {
                Some(Reply::Respond(response)) => Ok(response),
                Some(Reply::Offline) => Err(FetchError::Offline("connection refused".into())),
                Some(Reply::Gated(gate, response)) => {
                    gate.notified().await;
                    Ok(response)
                }
                Some(Reply::GatedOffline(gate)) => {
                    gate.notified().await;
                    Err(FetchError::Offline("connection reset".into()))
                }
                None => Ok(FetchResponse::with_status(url, 404, "Not Found")),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        scenes: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn delivered(&self) -> Vec<String> {
            self.scenes.lock().clone()
        }
    }

    impl SceneSink for RecordingSink {
        fn set_content(&self, scene: Arc<SceneDocument>) {
            self.scenes.lock().push(scene.source.clone());
        }
    }

    fn loader() -> (SceneLoader<ScriptedFetcher>, Arc<RecordingSink>) {
        loader_with(LoaderConfig::default())
    }

    fn loader_with(config: LoaderConfig) -> (SceneLoader<ScriptedFetcher>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let loader = SceneLoader::new(
            ScriptedFetcher::default(),
            Arc::clone(&sink) as Arc<dyn SceneSink>,
            config,
        );
        (loader, sink)
    }

    fn triangle_bin() -> Vec<u8> {
        [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect()
    }

    fn triangle_gltf(buffer_uri: &str) -> Vec<u8> {
        json!({
            "asset": { "version": "2.0" },
            "scene": 0,
            "scenes": [{ "name": "Main", "nodes": [0] }],
            "nodes": [{ "name": "triangle", "mesh": 0 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }],
            "buffers": [{ "uri": buffer_uri, "byteLength": 36 }],
            "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
            "accessors": [{
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "min": [0.0, 0.0, 0.0],
                "max": [1.0, 1.0, 0.0]
            }]
        })
        .to_string()
        .into_bytes()
    }

    fn build_zip(files: &[(&str, Vec<u8>)]) -> Vec<u8> {
        build_zip_with(files, zip::CompressionMethod::Deflated)
    }

    fn build_zip_with(files: &[(&str, Vec<u8>)], method: zip::CompressionMethod) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, contents) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    const GLTF_JSON: &str = "model/gltf+json";
    const SIGNED: &str = "https://bucket.s3.amazonaws.com/models/scene.gltf?X-Amz-Signature=abc&X-Amz-Credential=def";

    fn assert_no_live_handles(loader: &SceneLoader<ScriptedFetcher>) {
        let stats = loader.registry().stats();
        assert_eq!(stats.live(), 0);
        assert_eq!(stats.stale_releases, 0);
        assert_eq!(loader.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn plain_url_fetches_subresources_next_to_document() {
        let (loader, sink) = loader();
        loader
            .fetcher()
            .respond("https://cdn.example.com/m/scene.gltf", GLTF_JSON, triangle_gltf("tri.bin"));
        loader
            .fetcher()
            .respond("https://cdn.example.com/m/tri.bin", "application/octet-stream", triangle_bin());

        let outcome = loader
            .load(LoadRequest::from_url("https://cdn.example.com/m/scene.gltf"))
            .await
            .unwrap();
        let result = outcome.loaded().unwrap();

        assert_eq!(result.kind, InputKind::PlainUrl);
        assert!(result.skipped.is_empty());
        assert_eq!(result.document.meshes[0].vertex_count(), 3);
        assert_eq!(sink.delivered(), vec!["https://cdn.example.com/m/scene.gltf"]);
        assert_eq!(
            loader.fetcher().calls(),
            vec![
                ("https://cdn.example.com/m/scene.gltf".to_string(), Credentials::Include),
                ("https://cdn.example.com/m/tri.bin".to_string(), Credentials::Include),
            ]
        );
        assert!(loader.slot().installed_generation().is_none());
    }

    #[tokio::test]
    async fn bearer_credentials_stay_on_document_origin() {
        let (loader, sink) = loader();
        loader.fetcher().respond(
            "https://cdn.example.com/m/scene.gltf",
            GLTF_JSON,
            triangle_gltf("https://evil.example.net/steal.bin"),
        );
        loader.fetcher().respond(
            "https://evil.example.net/steal.bin",
            "application/octet-stream",
            triangle_bin(),
        );

        let result = loader
            .load(LoadRequest::from_url("https://cdn.example.com/m/scene.gltf"))
            .await
            .unwrap()
            .loaded()
            .unwrap();

        assert!(result.skipped.is_empty());
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(
            loader.fetcher().calls(),
            vec![
                ("https://cdn.example.com/m/scene.gltf".to_string(), Credentials::Include),
                ("https://evil.example.net/steal.bin".to_string(), Credentials::Omit),
            ]
        );
    }

    #[test]
    fn credentials_follow_origin() {
        let origin = Url::parse("https://cdn.example.com/m/scene.gltf").unwrap().origin();
        let include = Credentials::Include;

        assert_eq!(
            credentials_for("https://cdn.example.com/other/a.bin", Some(&origin), include),
            Credentials::Include
        );
        assert_eq!(
            credentials_for("http://cdn.example.com/m/a.bin", Some(&origin), include),
            Credentials::Omit
        );
        assert_eq!(
            credentials_for("https://cdn.example.com:8443/m/a.bin", Some(&origin), include),
            Credentials::Omit
        );
        assert_eq!(
            credentials_for("https://cdn.example.com/m/a.bin", Some(&origin), Credentials::Omit),
            Credentials::Omit
        );
        assert_eq!(credentials_for("https://cdn.example.com/m/a.bin", None, include), Credentials::Omit);

        let blob = Url::parse("blob:vista/1234").unwrap().origin();
        assert_eq!(credentials_for("blob:vista/1234", Some(&blob), include), Credentials::Omit);
    }

    #[tokio::test]
    async fn file_set_resolves_through_root_path() {
        let (loader, sink) = loader();
        let mut files = AssetMap::new();
        files.insert("models/scene.gltf", triangle_gltf("./buffers/tri.bin"));
        files.insert("models/buffers/tri.bin", triangle_bin());

        let request = LoadRequest::from_files(files).unwrap();
        let result = loader.load(request).await.unwrap().loaded().unwrap();

        assert_eq!(result.kind, InputKind::LocalFile);
        assert!(result.skipped.is_empty());
        assert_eq!(sink.delivered(), vec!["models/scene.gltf"]);
        assert!(loader.fetcher().calls().is_empty());

        let stats = loader.registry().stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.released, 2);
        assert_no_live_handles(&loader);
    }

    #[tokio::test]
    async fn unresolved_subresource_is_a_soft_failure() {
        let (loader, sink) = loader();
        loader
            .fetcher()
            .respond("https://cdn.example.com/m/scene.gltf", GLTF_JSON, triangle_gltf("tri.bin"));

        let result = loader
            .load(LoadRequest::from_url("https://cdn.example.com/m/scene.gltf"))
            .await
            .unwrap()
            .loaded()
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].kind(), ErrorKind::MissingSubresource);
        assert_eq!(result.skipped[0].url(), "tri.bin");
        assert!(result.skipped[0].to_string().contains("404"));
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_denied() {
        let (loader, sink) = loader();
        loader
            .fetcher()
            .script("https://cdn.example.com/scene.glb", Reply::Offline);

        let err = loader
            .load(LoadRequest::from_url("https://cdn.example.com/scene.glb"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDenied);
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn document_without_scene_is_a_parse_failure() {
        let (loader, sink) = loader();
        let empty = json!({ "asset": { "version": "2.0" } }).to_string().into_bytes();
        loader
            .fetcher()
            .respond("https://cdn.example.com/empty.gltf", GLTF_JSON, empty);

        let err = loader
            .load(LoadRequest::from_url("https://cdn.example.com/empty.gltf"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentParseFailure);
        assert!(err.user_message().contains("contains no scene"));
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn signed_forbidden_keeps_status() {
        let (loader, sink) = loader();
        loader.fetcher().script(
            SIGNED,
            Reply::Respond(FetchResponse::with_status(SIGNED, 403, "Forbidden")),
        );

        let err = loader.load(LoadRequest::from_url(SIGNED)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        assert_eq!(err.status(), Some(403));
        assert!(sink.delivered().is_empty());

        let calls = loader.fetcher().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, c)| *c == Credentials::Omit));
    }

    #[tokio::test]
    async fn signed_markup_response_is_not_parsed() {
        let (loader, sink) = loader();
        loader.fetcher().respond(
            SIGNED,
            "text/html; charset=utf-8",
            b"<html><body>Request has expired</body></html>".to_vec(),
        );

        let err = loader.load(LoadRequest::from_url(SIGNED)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MarkupInsteadOfBinary);
        assert!(sink.delivered().is_empty());
        assert_eq!(loader.fetcher().calls().len(), 2);
    }

    #[tokio::test]
    async fn signed_explicit_fetch_recovers_and_rewrites_references() {
        let (loader, sink) = loader();
        loader.fetcher().script(SIGNED, Reply::Offline);
        loader.fetcher().respond(SIGNED, GLTF_JSON, triangle_gltf("tri.bin"));
        loader.fetcher().respond(
            "https://bucket.s3.amazonaws.com/models/tri.bin",
            "application/octet-stream",
            triangle_bin(),
        );

        let result = loader
            .load(LoadRequest::from_url(SIGNED))
            .await
            .unwrap()
            .loaded()
            .unwrap();

        assert_eq!(result.kind, InputKind::SignedUrl);
        assert!(result.skipped.is_empty());
        assert_eq!(sink.delivered().len(), 1);
        assert!(loader.fetcher().called("https://bucket.s3.amazonaws.com/models/tri.bin"));
        assert!(loader.fetcher().calls().iter().all(|(_, c)| *c == Credentials::Omit));
        assert_no_live_handles(&loader);
    }

    #[tokio::test]
    async fn signed_parse_failure_is_not_retried() {
        let (loader, _sink) = loader();
        loader
            .fetcher()
            .respond(SIGNED, GLTF_JSON, b"{ not json".to_vec());

        let err = loader.load(LoadRequest::from_url(SIGNED)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentParseFailure);
        assert_eq!(loader.fetcher().calls().len(), 1);
    }

    #[tokio::test]
    async fn archive_loads_from_extracted_entries() {
        let (loader, sink) = loader();
        let bundle = build_zip(&[
            ("model/", Vec::new()),
            ("model/scene.gltf", triangle_gltf("../shared/tri.bin")),
            ("shared/tri.bin", triangle_bin()),
            ("readme.txt", b"hello".to_vec()),
        ]);
        loader
            .fetcher()
            .respond("https://cdn.example.com/bundle.zip", "application/zip", bundle);

        let result = loader
            .load(LoadRequest::from_url("https://cdn.example.com/bundle.zip"))
            .await
            .unwrap()
            .loaded()
            .unwrap();

        assert_eq!(result.kind, InputKind::ArchiveUrl);
        assert!(result.skipped.is_empty());
        assert_eq!(result.document.meshes[0].vertex_count(), 3);
        assert_eq!(sink.delivered(), vec!["https://cdn.example.com/bundle.zip"]);
        assert_eq!(loader.fetcher().calls().len(), 1);

        let stats = loader.registry().stats();
        assert_eq!(stats.created, 2);
        assert_no_live_handles(&loader);
    }

    #[tokio::test]
    async fn archive_without_document_is_terminal() {
        let (loader, sink) = loader();
        let bundle = build_zip(&[("readme.txt", b"hi".to_vec()), ("a.bin", triangle_bin())]);
        loader
            .fetcher()
            .respond("https://cdn.example.com/bundle.zip", "application/zip", bundle);

        let err = loader
            .load(LoadRequest::from_url("https://cdn.example.com/bundle.zip"))
            .await
            .unwrap_err();
        match &err {
            ClassifiedError::ArchiveMissingPrimaryDocument { entries, .. } => {
                assert_eq!(entries, &vec!["readme.txt".to_string(), "a.bin".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(sink.delivered().is_empty());
        assert_eq!(loader.registry().stats().created, 0);
    }

    #[tokio::test]
    async fn archive_markup_and_status_failures() {
        let (loader, _sink) = loader();
        loader.fetcher().respond(
            "https://cdn.example.com/expired.zip",
            "text/html",
            b"<html>AccessDenied</html>".to_vec(),
        );

        let markup = loader
            .load(LoadRequest::from_url("https://cdn.example.com/expired.zip"))
            .await
            .unwrap_err();
        assert_eq!(markup.kind(), ErrorKind::MarkupInsteadOfBinary);
        assert!(markup.user_message().contains("ZIP file"));

        let missing = loader
            .load(LoadRequest::from_url("https://cdn.example.com/missing.zip"))
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(missing.status(), Some(404));
    }

    #[tokio::test]
    async fn handles_released_when_archive_document_is_invalid() {
        let (loader, sink) = loader();
        let bundle = build_zip(&[("scene.gltf", b"not a gltf".to_vec()), ("a.bin", triangle_bin())]);
        loader
            .fetcher()
            .respond("https://cdn.example.com/bad.zip", "application/zip", bundle);

        let err = loader
            .load(LoadRequest::from_url("https://cdn.example.com/bad.zip"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DocumentParseFailure);
        assert!(sink.delivered().is_empty());
        assert_eq!(loader.registry().stats().created, 1);
        assert_no_live_handles(&loader);
    }

    #[tokio::test]
    async fn newer_load_supersedes_pending_one() {
        let (loader, sink) = loader();
        let loader = Arc::new(loader);
        let gate = Arc::new(Notify::new());

        let slow = "https://cdn.example.com/slow/scene.gltf";
        let fast = "https://cdn.example.com/fast/scene.gltf";
        loader.fetcher().script(
            slow,
            Reply::Gated(
                Arc::clone(&gate),
                FetchResponse::ok(slow, Some(GLTF_JSON), triangle_gltf("tri.bin")),
            ),
        );
        loader
            .fetcher()
            .respond(fast, GLTF_JSON, triangle_gltf("tri.bin"));
        loader.fetcher().respond(
            "https://cdn.example.com/fast/tri.bin",
            "application/octet-stream",
            triangle_bin(),
        );

        let first = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load(LoadRequest::from_url(slow)).await }
        });
        while !loader.fetcher().called(slow) {
            tokio::task::yield_now().await;
        }

        let second = loader.load(LoadRequest::from_url(fast)).await.unwrap();
        assert!(matches!(second, LoadOutcome::Loaded(_)));

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, LoadOutcome::Superseded { generation: 1 }));

        assert_eq!(sink.delivered(), vec![fast]);
        assert!(loader.slot().installed_generation().is_none());
        assert_no_live_handles(&loader);
    }

    #[tokio::test]
    async fn superseded_load_swallows_its_late_failure() {
        let (loader, sink) = loader();
        let loader = Arc::new(loader);
        let gate = Arc::new(Notify::new());

        let slow = "https://cdn.example.com/slow/scene.gltf";
        let fast = "https://cdn.example.com/fast/scene.gltf";
        loader.fetcher().script(slow, Reply::GatedOffline(Arc::clone(&gate)));
        loader
            .fetcher()
            .respond(fast, GLTF_JSON, triangle_gltf("tri.bin"));
        loader.fetcher().respond(
            "https://cdn.example.com/fast/tri.bin",
            "application/octet-stream",
            triangle_bin(),
        );

        let first = tokio::spawn({
            let loader = Arc::clone(&loader);
            async move { loader.load(LoadRequest::from_url(slow)).await }
        });
        while !loader.fetcher().called(slow) {
            tokio::task::yield_now().await;
        }

        let second = loader.load(LoadRequest::from_url(fast)).await.unwrap();
        assert!(matches!(second, LoadOutcome::Loaded(_)));

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, LoadOutcome::Superseded { generation: 1 }));

        assert_eq!(sink.delivered(), vec![fast]);
        assert!(loader.slot().installed_generation().is_none());
        assert_no_live_handles(&loader);
    }

    /// A stored archive whose `payload.bin` entry fails its CRC check.
    fn archive_with_corrupt_entry() -> Vec<u8> {
        let marker = b"payload-bytes-that-get-flipped".to_vec();
        let mut bundle = build_zip_with(
            &[
                ("scene.gltf", triangle_gltf("tri.bin")),
                ("tri.bin", triangle_bin()),
                ("payload.bin", marker.clone()),
            ],
            zip::CompressionMethod::Stored,
        );
        let at = bundle
            .windows(marker.len())
            .position(|window| window == marker.as_slice())
            .unwrap();
        bundle[at] ^= 0xff;
        bundle
    }

    #[tokio::test]
    async fn corrupt_archive_entry_fails_whole_load() {
        for parallel in [true, false] {
            let (loader, sink) = loader_with(LoaderConfig {
                parallel_extraction: parallel,
                ..LoaderConfig::default()
            });
            loader.fetcher().respond(
                "https://cdn.example.com/corrupt.zip",
                "application/zip",
                archive_with_corrupt_entry(),
            );

            let err = loader
                .load(LoadRequest::from_url("https://cdn.example.com/corrupt.zip"))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Generic, "parallel: {}", parallel);
            assert!(err.to_string().contains("payload.bin"), "{}", err);
            assert!(sink.delivered().is_empty());
            assert!(loader.slot().installed_generation().is_none());
            assert_eq!(loader.registry().stats().created, 0);
            assert_no_live_handles(&loader);
        }
    }

    #[tokio::test]
    async fn local_file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scene.gltf"), triangle_gltf("tri.bin")).unwrap();
        std::fs::write(dir.path().join("tri.bin"), triangle_bin()).unwrap();

        let (loader, _sink) = loader();
        let url = Url::from_file_path(dir.path().join("scene.gltf")).unwrap().to_string();
        let result = loader
            .load(LoadRequest::from_url(url))
            .await
            .unwrap()
            .loaded()
            .unwrap();

        assert_eq!(result.kind, InputKind::LocalFile);
        assert!(result.skipped.is_empty());
        assert!(loader.fetcher().calls().is_empty());
    }
}
