//! HTTP implementations of the enrichment collaborators.
//!
//! - [`GeminiClient`] implements [`ContentGenerator`](thesiskit_shared::ContentGenerator)
//!   against the Generative Language `generateContent` endpoint.
//! - [`BingImageSearch`] implements [`ImageSearch`](thesiskit_shared::ImageSearch)
//!   by scraping an image results page and downloading the first hit.
//!
//! Neither retries: a failed request surfaces immediately and the build's
//! enrichment policy decides what happens next.

pub mod bing;
pub mod gemini;

pub use bing::BingImageSearch;
pub use gemini::GeminiClient;

/// User-Agent string for collaborator requests.
pub(crate) const USER_AGENT: &str = concat!("thesiskit/", env!("CARGO_PKG_VERSION"));
