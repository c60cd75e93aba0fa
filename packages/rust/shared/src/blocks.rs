//! Layout-ready intermediate representation.
//!
//! The template stage turns a validated project into a [`FormattedDocument`];
//! the renderer consumes it without ever looking at the project again.

use crate::error::Result;

/// A binary asset the renderer fetches lazily through an [`AssetResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetRef {
    /// Payload of a project attachment, by attachment id.
    Attachment(String),
    /// A file in the project's sources directory, by key (file name).
    Source(String),
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attachment(id) => write!(f, "attachment '{id}'"),
            Self::Source(key) => write!(f, "source '{key}'"),
        }
    }
}

/// Resolves asset payloads at placement/serialization time.
pub trait AssetResolver: Send + Sync {
    fn open(&self, asset: &AssetRef) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Regular,
    Bold,
    Italic,
}

/// Relative text size; the renderer maps classes to points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Title,
    Chapter,
    Section,
    Subsection,
    Body,
    Caption,
}

impl SizeClass {
    /// Size class used for a heading at `level`.
    pub fn for_heading(level: u8) -> Self {
        match level {
            0 | 1 => Self::Chapter,
            2 => Self::Section,
            _ => Self::Subsection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Justify,
}

/// Style hints attached to each formatted block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StyleHints {
    pub weight: FontWeight,
    pub size: SizeClass,
    /// Indentation steps from the left margin.
    pub indent: u8,
    pub align: Alignment,
    /// Start this block on a fresh page.
    pub page_break_before: bool,
}

impl StyleHints {
    pub fn body() -> Self {
        Self {
            weight: FontWeight::Regular,
            size: SizeClass::Body,
            indent: 0,
            align: Alignment::Justify,
            page_break_before: false,
        }
    }

    pub fn heading(level: u8, page_break_before: bool) -> Self {
        Self {
            weight: FontWeight::Bold,
            size: SizeClass::for_heading(level),
            indent: 0,
            align: Alignment::Left,
            page_break_before,
        }
    }
}

/// What a formatted block is.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockKind {
    /// Numbered section heading. Atomic.
    Heading { level: u8, number: String },
    /// Running text. May be split between lines across pages.
    Paragraph,
    /// Bibliographic entry derived from a source. Atomic.
    Citation { key: String },
    /// An image to be fetched and scaled into a `width_mm` x `height_mm` box.
    /// Atomic.
    ImagePlaceholder {
        asset: AssetRef,
        width_mm: f32,
        height_mm: f32,
        caption: Option<String>,
    },
}

/// A layout-ready unit of content.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedBlock {
    pub kind: BlockKind,
    pub text: String,
    pub style: StyleHints,
}

impl FormattedBlock {
    /// Whether the block must be placed whole on one page.
    pub fn is_atomic(&self) -> bool {
        !matches!(self.kind, BlockKind::Paragraph)
    }
}

/// A table-of-contents entry with a forward reference to its heading block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    pub number: String,
    pub level: u8,
    /// Index of the heading in [`FormattedDocument::blocks`].
    pub heading_block: usize,
}

/// Cover data for the front matter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrontMatter {
    pub title: String,
    pub author: String,
    /// Cover lines above the author (institution, course).
    pub affiliation: Vec<String>,
    /// Cover lines at the bottom (place, year).
    pub imprint: Vec<String>,
    pub logo: Option<AssetRef>,
    /// Presentation statement (course, discipline, advisor). When present a
    /// title page follows the cover.
    pub statement: Option<String>,
}

/// Output of the template stage.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedDocument {
    pub title: String,
    pub front: FrontMatter,
    pub blocks: Vec<FormattedBlock>,
    pub toc: Vec<TocEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_paragraphs_are_splittable() {
        let para = FormattedBlock {
            kind: BlockKind::Paragraph,
            text: "x".into(),
            style: StyleHints::body(),
        };
        let heading = FormattedBlock {
            kind: BlockKind::Heading {
                level: 1,
                number: "1".into(),
            },
            text: "1 Intro".into(),
            style: StyleHints::heading(1, true),
        };
        assert!(!para.is_atomic());
        assert!(heading.is_atomic());
    }

    #[test]
    fn heading_size_classes() {
        assert_eq!(SizeClass::for_heading(1), SizeClass::Chapter);
        assert_eq!(SizeClass::for_heading(2), SizeClass::Section);
        assert_eq!(SizeClass::for_heading(4), SizeClass::Subsection);
    }
}
