//! Shared types, error model, and configuration for thesiskit.
//!
//! This crate is the foundation depended on by all other thesiskit crates.
//! It provides:
//! - [`ThesisError`], the unified error type
//! - Project document types ([`ProjectDocument`], [`Section`], [`ContentBlock`], ...)
//! - The layout-ready block model ([`FormattedDocument`], [`FormattedBlock`])
//! - Collaborator contracts ([`ContentGenerator`], [`ImageSearch`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod blocks;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use blocks::{
    Alignment, AssetRef, AssetResolver, BlockKind, FontWeight, FormattedBlock, FormattedDocument,
    FrontMatter, SizeClass, StyleHints, TocEntry,
};
#[cfg(any(test, feature = "mocks"))]
pub use collaborators::{MockContentGenerator, MockImageSearch};
pub use collaborators::{ContentGenerator, GenerationContext, ImageSearch};
pub use config::{
    AppConfig, BuildConfig, DefaultsConfig, EnrichmentPolicy, GeminiConfig, ImagesConfig,
    LayoutConfig, LayoutSection, PageSize, StorageConfig, config_dir, config_file_path,
    expand_home, gemini_api_key, init_config, load_config, load_config_from,
};
pub use error::{ReferenceKind, Result, ThesisError, UnresolvedRef};
pub use types::{
    Attachment, AttachmentKind, CURRENT_SCHEMA_VERSION, ContentBlock, MAX_HEADING_DEPTH, Metadata,
    PendingRequest, Placement, PlacementMode, ProjectDocument, ProjectId, Section, Source,
};
