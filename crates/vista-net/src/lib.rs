//! Vista Net - network retrieval for the loader
//!
//! Defines the [`NetworkFetch`] seam the loader retrieves documents and
//! archives through, and its `reqwest`-backed implementation.

pub mod error;
pub mod fetch;

pub use error::FetchError;
pub use fetch::{Credentials, FetchResponse, HttpFetcher, NetConfig, NetworkFetch};
