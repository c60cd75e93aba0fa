//! Layout pass: formatted blocks onto content pages.
//!
//! Single forward pass, no backtracking. Paragraphs may split between lines;
//! headings, citations and images are placed whole. The pass records the
//! content page of every heading so the finalize pass can resolve the table
//! of contents.

use std::collections::BTreeMap;

use thesiskit_shared::{
    Alignment, AssetRef, AssetResolver, BlockKind, FormattedBlock, FormattedDocument,
    LayoutConfig, Result, SizeClass, ThesisError,
};
use tracing::{debug, instrument};

use crate::document::DrawOp;
use crate::flow::{self, Flow, INDENT_STEP};
use crate::fonts::Face;
use crate::images;

const MM_TO_PT: f32 = 72.0 / 25.4;

/// Content pages plus the heading → page map.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentLayout {
    pub pages: Vec<Vec<DrawOp>>,
    /// Heading block index → 0-based content page index.
    pub heading_pages: BTreeMap<usize, usize>,
    /// Heading block index → y of the heading's top edge on its page.
    pub heading_tops: BTreeMap<usize, f32>,
}

/// Lay out the body of `doc`. Always yields at least one page.
#[instrument(skip_all, fields(blocks = doc.blocks.len()))]
pub fn layout_content(
    doc: &FormattedDocument,
    config: &LayoutConfig,
    assets: &dyn AssetResolver,
) -> Result<ContentLayout> {
    let mut flow = Flow::new(config);
    let mut heading_pages = BTreeMap::new();
    let mut heading_tops = BTreeMap::new();
    let body_line = flow::line_height(config, flow::font_size(config, SizeClass::Body));

    for (index, block) in doc.blocks.iter().enumerate() {
        if block.style.page_break_before && !flow.is_fresh() {
            flow.break_page();
        }

        match &block.kind {
            BlockKind::Heading { .. } => {
                let (face, size) = face_and_size(config, block);
                let lines = flow::wrap(&block.text, face, size, avail_width(config, block));
                let height = lines.len() as f32 * flow::line_height(config, size);
                check_fits(config, index, height)?;

                flow.gap(body_line);
                // Keep the heading together with the first line that follows it.
                let keep = if index + 1 < doc.blocks.len() {
                    body_line
                } else {
                    0.0
                };
                flow.ensure(height + keep);

                heading_pages.insert(index, flow.page_index());
                heading_tops.insert(index, flow.cursor_y());
                for line in &lines {
                    flow.push_line(line, face, size, block.style.indent, block.style.align);
                }
                flow.gap(body_line * 0.5);
            }
            BlockKind::Paragraph => {
                let (face, size) = face_and_size(config, block);
                for line in flow::wrap(&block.text, face, size, avail_width(config, block)) {
                    flow.push_line(&line, face, size, block.style.indent, block.style.align);
                }
                flow.gap(body_line * 0.5);
            }
            BlockKind::Citation { .. } => {
                let (face, size) = face_and_size(config, block);
                let lines = flow::wrap(&block.text, face, size, avail_width(config, block));
                let height = lines.len() as f32 * flow::line_height(config, size);
                check_fits(config, index, height)?;

                flow.ensure(height);
                for line in &lines {
                    flow.push_line(line, face, size, block.style.indent, block.style.align);
                }
                flow.gap(body_line * 0.5);
            }
            BlockKind::ImagePlaceholder {
                asset,
                width_mm,
                height_mm,
                caption,
            } => {
                place_image(
                    &mut flow,
                    assets,
                    index,
                    asset,
                    (*width_mm, *height_mm),
                    caption.as_deref(),
                )?;
            }
        }
    }

    debug!(pages = flow.page_count(), headings = heading_pages.len(), "content laid out");
    Ok(ContentLayout {
        pages: flow.into_pages(),
        heading_pages,
        heading_tops,
    })
}

fn face_and_size(config: &LayoutConfig, block: &FormattedBlock) -> (Face, f32) {
    (
        Face::from_weight(block.style.weight),
        flow::font_size(config, block.style.size),
    )
}

fn avail_width(config: &LayoutConfig, block: &FormattedBlock) -> f32 {
    config.content_width() - f32::from(block.style.indent) * INDENT_STEP
}

fn check_fits(config: &LayoutConfig, index: usize, height: f32) -> Result<()> {
    if height > config.content_height() {
        return Err(ThesisError::layout(
            index,
            format!(
                "block is {height:.1}pt tall but a page holds {:.1}pt",
                config.content_height()
            ),
        ));
    }
    Ok(())
}

/// Scale `(px_w, px_h)` into a `box_w` x `box_h` box, keeping aspect ratio.
pub(crate) fn scale_into(px: (u32, u32), box_w: f32, box_h: f32) -> (f32, f32) {
    let (w, h) = (px.0 as f32, px.1 as f32);
    let scale = (box_w / w).min(box_h / h);
    (w * scale, h * scale)
}

fn place_image(
    flow: &mut Flow<'_>,
    assets: &dyn AssetResolver,
    index: usize,
    asset: &AssetRef,
    box_mm: (f32, f32),
    caption: Option<&str>,
) -> Result<()> {
    let config = flow.config().clone();
    let (box_w, box_h) = (box_mm.0 * MM_TO_PT, box_mm.1 * MM_TO_PT);
    if box_w <= 0.0 || box_h <= 0.0 {
        return Err(ThesisError::layout(
            index,
            format!("{asset} has an empty placement box"),
        ));
    }
    if box_w > config.content_width() + 0.01 || box_h > config.content_height() + 0.01 {
        return Err(ThesisError::layout(
            index,
            format!(
                "{asset} box {:.0}x{:.0}mm exceeds the printable area",
                box_mm.0, box_mm.1
            ),
        ));
    }

    let bytes = assets
        .open(asset)
        .map_err(|e| ThesisError::layout(index, format!("cannot load {asset}: {e}")))?;
    let pixels = images::pixel_size(&bytes)
        .map_err(|e| ThesisError::layout(index, format!("cannot decode {asset}: {e}")))?;
    let (width, height) = scale_into(pixels, box_w, box_h);

    let caption_size = flow::font_size(&config, SizeClass::Caption);
    let caption_lines = caption
        .map(|text| flow::wrap(text, Face::Italic, caption_size, config.content_width()))
        .unwrap_or_default();
    let total = height + caption_lines.len() as f32 * flow::line_height(&config, caption_size);
    check_fits(&config, index, total)?;

    let body_line = flow::line_height(&config, flow::font_size(&config, SizeClass::Body));
    flow.gap(body_line * 0.5);
    flow.ensure(total);
    flow.push_image(asset.clone(), Some(index), width, height);
    for line in &caption_lines {
        flow.push_line(line, Face::Italic, caption_size, 0, Alignment::Center);
    }
    flow.gap(body_line * 0.5);
    Ok(())
}
