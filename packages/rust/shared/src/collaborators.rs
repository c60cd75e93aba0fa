//! Contracts for the external collaborators that enrich a project.
//!
//! The build pipeline only depends on these traits. HTTP implementations live
//! in `thesiskit-services`; tests use the `mockall` mocks exported behind the
//! `mocks` feature.

use async_trait::async_trait;
#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

use crate::error::Result;

/// Context handed to the content generator alongside the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationContext {
    /// Title of the project being written.
    pub project_title: String,
    /// Titles from the top-level section down to the one holding the block.
    pub section_path: Vec<String>,
    /// Assignment statement, if the project has one.
    pub brief: Option<String>,
    /// Where the block sits, e.g. `section 1.2, block 3`.
    pub location: String,
}

/// Produces paragraph text for pending blocks.
///
/// Implementations report failures as `ThesisError::ContentService`.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, context: &GenerationContext) -> Result<String>;
}

/// Finds an image for a query and returns its encoded bytes.
///
/// Implementations report an empty result as `ThesisError::NotFound`.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<u8>>;
}
