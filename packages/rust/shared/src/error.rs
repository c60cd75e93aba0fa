//! Error types for thesiskit.
//!
//! Library crates use [`ThesisError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Kind of a reference found inside a section's content blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Citation,
    Image,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Citation => write!(f, "citation"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// A citation or image reference that does not resolve inside its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub kind: ReferenceKind,
    /// Citation key or attachment id that was not found.
    pub key: String,
    /// Human-readable location, e.g. `section 1.2, block 3`.
    pub location: String,
}

impl fmt::Display for UnresolvedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' at {}", self.kind, self.key, self.location)
    }
}

/// Top-level error type for all thesiskit operations.
#[derive(Debug, thiserror::Error)]
pub enum ThesisError {
    /// Invalid section nesting, bad identifiers, or unresolved pending content.
    #[error("structure error: {message}")]
    Structure { message: String },

    /// A source key or attachment id is already taken.
    #[error("duplicate {kind} '{key}'")]
    DuplicateKey { kind: &'static str, key: String },

    /// One or more citation/image references do not resolve.
    #[error("unresolved references in project '{project_id}': {}", join_refs(references))]
    UnresolvedReference {
        project_id: String,
        references: Vec<UnresolvedRef>,
    },

    /// The content-generation collaborator failed.
    #[error("content service error at {location}: {message}")]
    ContentService { location: String, message: String },

    /// Nothing matched: an image-search query or a missing project file.
    #[error("not found: {query}")]
    NotFound { query: String },

    /// A block cannot be placed on any page.
    #[error("layout error at block {block_index}: {message}")]
    Layout { block_index: usize, message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Network/HTTP error talking to a collaborator service.
    #[error("network error: {0}")]
    Network(String),

    /// JSON/TOML (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another build of the same project holds the build lock.
    #[error("a build of project '{project_id}' is already in progress")]
    BuildInProgress { project_id: String },

    /// The build was cancelled between pipeline steps.
    #[error("build of project '{project_id}' cancelled before {step}")]
    Cancelled { project_id: String, step: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ThesisError>;

fn join_refs(refs: &[UnresolvedRef]) -> String {
    refs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ThesisError {
    /// Create a structure error from any displayable message.
    pub fn structure(msg: impl Into<String>) -> Self {
        Self::Structure {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a layout error for the block at `block_index`.
    pub fn layout(block_index: usize, msg: impl Into<String>) -> Self {
        Self::Layout {
            block_index,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from an enrichment collaborator.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::ContentService { .. } | Self::NotFound { .. } | Self::Network(_)
        )
    }
}
