//! Search-engine backends.
//!
//! Every backend implements [`Downloader`]; [`EngineRegistry`] builds the
//! enabled ones from configuration.

pub mod fixture;
pub mod http;
pub mod registry;
pub mod search;
pub mod traits;

pub use fixture::FixtureDownloader;
pub use http::{HttpClient, HttpConfig};
pub use registry::{Engine, EngineRegistry, RegistryError};
pub use search::HttpSearchDownloader;
pub use traits::{DownloadError, Downloader, keyword_slug};
