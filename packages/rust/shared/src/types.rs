//! Core domain types for thesiskit projects.
//!
//! These are the serialized shapes of a project (`project.json`). The
//! validated, mutation-checked model lives in `thesiskit-core`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ThesisError};

/// Current schema version for `project.json`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Deepest heading level a section may have.
pub const MAX_HEADING_DEPTH: u8 = 4;

static PROJECT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("project id pattern is valid")
});

// ---------------------------------------------------------------------------
// ProjectId
// ---------------------------------------------------------------------------

/// A filesystem-safe project identifier (lowercase slug).
///
/// The identifier doubles as the project's directory name and as the stem of
/// the rendered document's file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Validate and wrap a project identifier.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if PROJECT_ID_RE.is_match(&id) {
            Ok(Self(id))
        } else {
            Err(ThesisError::structure(format!(
                "invalid project id '{id}': use lowercase letters, digits, '-' or '_' (max 64)"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = ThesisError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = ThesisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Cover and title-page metadata of an academic project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discipline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Assignment statement handed to the content generator as context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
}

impl Metadata {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            institution: None,
            course: None,
            discipline: None,
            advisor: None,
            place: None,
            year: None,
            brief: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Content blocks
// ---------------------------------------------------------------------------

/// What a pending block asks the collaborators for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingRequest {
    /// Generate paragraph text from a prompt.
    Text { prompt: String },
    /// Search for an image matching `query`.
    Image {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

/// One unit of section content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Literal paragraph text.
    Literal { text: String },
    /// A bulleted list.
    List { items: Vec<String> },
    /// Reference to a [`Source`] by citation key.
    CitationRef { key: String },
    /// Reference to an image [`Attachment`] by id.
    ImageRef {
        attachment: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    /// Content still to be produced by an external collaborator.
    #[serde(rename = "pending")]
    PendingGeneration { request: PendingRequest },
}

impl ContentBlock {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal { text: text.into() }
    }

    pub fn citation(key: impl Into<String>) -> Self {
        Self::CitationRef { key: key.into() }
    }

    pub fn image(attachment: impl Into<String>, caption: Option<&str>) -> Self {
        Self::ImageRef {
            attachment: attachment.into(),
            caption: caption.map(String::from),
        }
    }

    pub fn pending_text(prompt: impl Into<String>) -> Self {
        Self::PendingGeneration {
            request: PendingRequest::Text {
                prompt: prompt.into(),
            },
        }
    }

    pub fn pending_image(query: impl Into<String>, caption: Option<&str>) -> Self {
        Self::PendingGeneration {
            request: PendingRequest::Image {
                query: query.into(),
                caption: caption.map(String::from),
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingGeneration { .. })
    }
}

// ---------------------------------------------------------------------------
// Section
// ---------------------------------------------------------------------------

/// A heading-bearing subdivision of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    /// Heading level, 1-based. A child is always its parent's level + 1.
    pub level: u8,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Section>,
}

impl Section {
    pub fn new(title: impl Into<String>, level: u8) -> Self {
        Self {
            title: title.into(),
            level,
            blocks: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style helper appending a content block.
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.blocks.push(block);
        self
    }

    /// Builder-style helper appending a child section.
    pub fn with_child(mut self, child: Section) -> Self {
        self.children.push(child);
        self
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// A bibliographic source, cited from sections by `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub key: String,
    pub author: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Whether an attachment is an image (placeable) or an opaque file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    #[default]
    Image,
    File,
}

/// Where an attachment is placed in the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    #[default]
    Inline,
    Appendix,
}

/// Placement hint: mode plus the bounding box (millimetres) an image is
/// scaled into, aspect ratio preserved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub mode: PlacementMode,
    #[serde(default = "default_box_width")]
    pub width_mm: f32,
    #[serde(default = "default_box_height")]
    pub height_mm: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            mode: PlacementMode::Inline,
            width_mm: default_box_width(),
            height_mm: default_box_height(),
        }
    }
}

fn default_box_width() -> f32 {
    150.0
}
fn default_box_height() -> f32 {
    100.0
}

/// A stored binary asset belonging to a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    /// File name of the payload inside the project's attachments directory.
    pub file_name: String,
    #[serde(default)]
    pub kind: AttachmentKind,
    #[serde(default)]
    pub placement: Placement,
}

// ---------------------------------------------------------------------------
// ProjectDocument
// ---------------------------------------------------------------------------

/// The `project.json` structure stored at the root of each project directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    /// Schema version for forward compatibility.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: ProjectId,
    pub metadata: Metadata,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_schema_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}
