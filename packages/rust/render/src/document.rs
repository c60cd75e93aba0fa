//! The paginated, positioned result of layout.

use thesiskit_shared::AssetRef;

use crate::fonts::Face;

/// A run of text on a single line. `x`/`y` is the baseline origin in points
/// from the bottom-left corner of the page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub face: Face,
    pub size: f32,
    pub text: String,
    /// Extra space added to every space character (justification).
    pub word_spacing: f32,
}

/// A positioned draw operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text(TextRun),
    /// An image scaled into the `width` x `height` box with its lower-left
    /// corner at (`x`, `y`).
    Image {
        asset: AssetRef,
        /// Formatted block the image came from; `None` for the cover logo.
        block: Option<usize>,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    /// A straight stroked line.
    Rule {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        width: f32,
    },
    /// The footer page-number stamp.
    PageNumber {
        x: f32,
        y: f32,
        size: f32,
        number: usize,
    },
    /// A clickable area jumping to `top` on physical page `page` (1-based).
    /// Draws nothing.
    Link {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        page: usize,
        top: f32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based physical page number, as printed in the footer.
    pub number: usize,
    pub ops: Vec<DrawOp>,
}

impl Page {
    pub fn texts(&self) -> impl Iterator<Item = &TextRun> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text(run) => Some(run),
            _ => None,
        })
    }

    /// Whether any text run on the page equals `text`.
    pub fn has_text(&self, text: &str) -> bool {
        self.texts().any(|run| run.text == text)
    }
}

/// A table-of-contents entry with its page number resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTocEntry {
    pub title: String,
    pub number: String,
    pub level: u8,
    pub heading_block: usize,
    pub page: usize,
}

/// Immutable output of the finalize pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub title: String,
    pub page_width: f32,
    pub page_height: f32,
    pub pages: Vec<Page>,
    pub toc: Vec<ResolvedTocEntry>,
    /// Pages taken by cover, title page and contents before the first content
    /// page.
    pub front_pages: usize,
}

impl RenderedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of the first content page (after cover and contents) with a
    /// text run equal to `text`.
    pub fn content_page_of(&self, text: &str) -> Option<usize> {
        self.pages
            .iter()
            .skip(self.front_pages)
            .find(|page| page.has_text(text))
            .map(|page| page.number)
    }
}
