//! Vista Loader - the scene loading pipeline
//!
//! Classifies an input reference, picks a retrieval strategy for it, resolves
//! the primary document's sub-resources through a per-load [`Resolver`], and
//! hands the assembled scene to a [`SceneSink`]. Failures are reported as
//! [`ClassifiedError`]s built at the point of failure.
//!
//! [`Resolver`]: vista_assets::Resolver

mod classify;
mod client;
mod config;
mod dispatcher;
mod error;
mod request;
mod sink;
mod slot;

pub use classify::{classify, classify_with, is_archive, is_signed_url, InputKind};
pub use client::{PendingLoad, ViewerClient};
pub use config::LoaderConfig;
pub use dispatcher::SceneLoader;
pub use error::{classify_failure, ClassifiedError, ErrorKind, RawFailure};
pub use request::{LoadOutcome, LoadRequest, LoadResult, Primary};
pub use sink::SceneSink;
pub use slot::ActiveSlot;
