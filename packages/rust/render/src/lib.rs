//! Paginated PDF rendering of formatted documents.
//!
//! Rendering is a pure function of (document, layout config, asset bytes):
//!
//! 1. [`layout::layout_content`] places body blocks on content pages and
//!    records the page of every heading.
//! 2. [`finalize::finalize`] lays out cover and contents, resolves the
//!    contents page numbers and stamps headers and footers, producing an
//!    immutable [`RenderedDocument`].
//! 3. [`pdf::serialize`] writes the document with `pdf-writer`.
//!
//! No file I/O happens here; asset payloads come through an
//! [`AssetResolver`] and the bytes are handed back to the caller.

pub mod document;
pub mod finalize;
mod flow;
pub mod fonts;
pub mod images;
pub mod layout;
pub mod pdf;

use thesiskit_shared::{AssetResolver, FormattedDocument, LayoutConfig, Result};
use tracing::{info, instrument};

pub use document::{DrawOp, Page, RenderedDocument, ResolvedTocEntry, TextRun};
pub use fonts::Face;

/// A rendered document together with its serialized bytes.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub document: RenderedDocument,
    pub bytes: Vec<u8>,
}

impl RenderOutput {
    pub fn page_count(&self) -> usize {
        self.document.page_count()
    }
}

/// Lay out, finalize and serialize `doc`.
#[instrument(skip_all, fields(title = %doc.title, blocks = doc.blocks.len()))]
pub fn render(
    doc: &FormattedDocument,
    config: &LayoutConfig,
    assets: &dyn AssetResolver,
) -> Result<RenderOutput> {
    let content = layout::layout_content(doc, config, assets)?;
    let document = finalize::finalize(doc, content, config, assets)?;
    let bytes = pdf::serialize(&document, assets)?;

    info!(
        pages = document.page_count(),
        size = bytes.len(),
        "document rendered"
    );
    Ok(RenderOutput { document, bytes })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use thesiskit_shared::{
        AssetRef, BlockKind, FormattedBlock, FrontMatter, StyleHints, ThesisError, TocEntry,
    };

    use super::*;

    /// In-memory attachments keyed by id.
    #[derive(Default)]
    pub(crate) struct MemoryAssets(HashMap<String, Vec<u8>>);

    impl MemoryAssets {
        pub(crate) fn with(id: &str, bytes: Vec<u8>) -> Self {
            Self(HashMap::from([(id.to_string(), bytes)]))
        }
    }

    impl AssetResolver for MemoryAssets {
        fn open(&self, asset: &AssetRef) -> Result<Vec<u8>> {
            let key = match asset {
                AssetRef::Attachment(id) | AssetRef::Source(id) => id,
            };
            self.0.get(key).cloned().ok_or_else(|| ThesisError::NotFound {
                query: asset.to_string(),
            })
        }
    }

    pub(crate) fn heading(level: u8, text: &str, page_break: bool) -> FormattedBlock {
        let number = text.split(' ').next().unwrap_or_default().to_string();
        FormattedBlock {
            kind: BlockKind::Heading { level, number },
            text: text.into(),
            style: StyleHints::heading(level, page_break),
        }
    }

    pub(crate) fn body(text: &str) -> FormattedBlock {
        FormattedBlock {
            kind: BlockKind::Paragraph,
            text: text.into(),
            style: StyleHints::body(),
        }
    }

    pub(crate) fn image_block(id: &str, w: f32, h: f32, caption: Option<&str>) -> FormattedBlock {
        FormattedBlock {
            kind: BlockKind::ImagePlaceholder {
                asset: AssetRef::Attachment(id.into()),
                width_mm: w,
                height_mm: h,
                caption: caption.map(String::from),
            },
            text: String::new(),
            style: StyleHints::body(),
        }
    }

    pub(crate) fn sample_doc(blocks: Vec<FormattedBlock>) -> FormattedDocument {
        FormattedDocument {
            title: "Sample Title".into(),
            front: FrontMatter {
                title: "Sample Title".into(),
                author: "Ana Lima".into(),
                affiliation: vec!["UNIVERSIDADE FEDERAL".into()],
                imprint: vec!["Recife".into(), "2024".into()],
                logo: None,
                statement: None,
            },
            blocks,
            toc: vec![],
        }
    }

    /// Fill `toc` from the heading blocks.
    pub(crate) fn with_toc(mut doc: FormattedDocument) -> FormattedDocument {
        doc.toc = doc
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, block)| match &block.kind {
                BlockKind::Heading { level, number } => Some(TocEntry {
                    title: block.text[number.len()..].trim().to_string(),
                    number: number.clone(),
                    level: *level,
                    heading_block: i,
                }),
                _ => None,
            })
            .collect();
        doc
    }

    #[test]
    fn render_produces_pdf_and_pages() {
        let doc = with_toc(sample_doc(vec![
            heading(1, "1 Introduction", true),
            body("This work studies solar energy."),
        ]));
        let out = render(&doc, &LayoutConfig::default(), &MemoryAssets::default()).unwrap();
        assert!(out.bytes.starts_with(b"%PDF-"));
        assert_eq!(out.page_count(), 2);
        assert_eq!(out.document.content_page_of("1 Introduction"), Some(2));
        assert_eq!(out.document.toc[0].page, 2);
        assert!(String::from_utf8_lossy(&out.bytes).contains("/Subtype /Link"));
    }

    #[test]
    fn statement_adds_a_title_page() {
        let mut doc = with_toc(sample_doc(vec![
            heading(1, "1 Introduction", true),
            body("This work studies solar energy."),
        ]));
        doc.front.statement = Some("Academic work, under the supervision of Dr. Souza.".into());
        let out = render(&doc, &LayoutConfig::default(), &MemoryAssets::default()).unwrap();
        assert_eq!(out.page_count(), 4);
        assert_eq!(out.document.front_pages, 3);
        assert_eq!(out.document.toc[0].page, 4);
        assert_eq!(out.document.content_page_of("1 Introduction"), Some(4));
    }

    #[test]
    fn rendering_is_deterministic() {
        let assets = MemoryAssets::with("fig", images::tests::png(30, 20));
        let doc = with_toc(sample_doc(vec![
            heading(1, "1 Results", true),
            body(&"Measured output varies with irradiance. ".repeat(50)),
            image_block("fig", 120.0, 80.0, Some("Figure 1 - Panel")),
        ]));
        let config = LayoutConfig::default();
        let first = render(&doc, &config, &assets).unwrap();
        let second = render(&doc, &config, &assets).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.document, second.document);
    }
}
