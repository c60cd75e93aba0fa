//! Finalize pass: front matter, table of contents, headers and footers.
//!
//! Runs after [`layout_content`](crate::layout::layout_content) has fixed the
//! content pages. TOC lines reserve a fixed-width number column, so the
//! number of front pages depends only on the cover, the title page and the
//! entry count, never on the page numbers written into them. Every TOC line
//! links to its heading.

use thesiskit_shared::{
    Alignment, AssetRef, AssetResolver, FormattedDocument, FrontMatter, LayoutConfig, Result,
    SizeClass, ThesisError,
};
use tracing::{debug, instrument, warn};

use crate::document::{DrawOp, Page, RenderedDocument, ResolvedTocEntry, TextRun};
use crate::flow::{self, Flow, INDENT_STEP};
use crate::fonts::{self, Face};
use crate::images;
use crate::layout::{ContentLayout, scale_into};

const LOGO_BOX_MM: f32 = 30.0;
const CONTENTS_TITLE: &str = "Contents";
const LEADER_GAP: f32 = 4.0;

#[instrument(skip_all, fields(content_pages = content.pages.len(), toc = doc.toc.len()))]
pub fn finalize(
    doc: &FormattedDocument,
    content: ContentLayout,
    config: &LayoutConfig,
    assets: &dyn AssetResolver,
) -> Result<RenderedDocument> {
    let mut front = Flow::new(config);
    place_cover(&mut front, doc, assets);
    if let Some(statement) = &doc.front.statement {
        place_title_page(&mut front, &doc.front, statement);
        front.break_page();
    }

    let heading_size = flow::font_size(config, SizeClass::Chapter);
    front.gap(flow::line_height(config, config.base_font_size));
    front.push_text(CONTENTS_TITLE, Face::Bold, heading_size, 0, Alignment::Center);
    front.gap(flow::line_height(config, config.base_font_size) * 0.5);

    let body_size = flow::font_size(config, SizeClass::Body);
    let slots: Vec<(usize, f32)> = doc
        .toc
        .iter()
        .map(|_| front.reserve_line(body_size))
        .collect();
    let front_pages = front.page_count();

    let mut toc = Vec::with_capacity(doc.toc.len());
    for (entry, &(page_index, baseline)) in doc.toc.iter().zip(&slots) {
        let content_page = content
            .heading_pages
            .get(&entry.heading_block)
            .copied()
            .ok_or_else(|| {
                ThesisError::layout(
                    entry.heading_block,
                    format!("contents entry '{}' does not point at a placed heading", entry.title),
                )
            })?;
        let resolved = ResolvedTocEntry {
            title: entry.title.clone(),
            number: entry.number.clone(),
            level: entry.level,
            heading_block: entry.heading_block,
            page: front_pages + content_page + 1,
        };
        let top = content
            .heading_tops
            .get(&entry.heading_block)
            .copied()
            .unwrap_or(config.page_height - config.margin_top);
        for op in toc_line_ops(config, &resolved, baseline, top) {
            front.push_op_on(page_index, op);
        }
        toc.push(resolved);
    }

    let mut pages: Vec<Page> = front
        .into_pages()
        .into_iter()
        .chain(content.pages)
        .enumerate()
        .map(|(i, ops)| Page { number: i + 1, ops })
        .collect();
    let background = background_op(config, assets);
    for page in &mut pages {
        if let Some(op) = &background {
            page.ops.insert(0, op.clone());
        }
        stamp(config, &doc.title, page);
    }

    debug!(front_pages, total = pages.len(), "document finalized");
    Ok(RenderedDocument {
        title: doc.title.clone(),
        page_width: config.page_width,
        page_height: config.page_height,
        pages,
        toc,
        front_pages,
    })
}

fn place_cover(front: &mut Flow<'_>, doc: &FormattedDocument, assets: &dyn AssetResolver) {
    let config = front.config().clone();
    let body = flow::font_size(&config, SizeClass::Body);
    let line = flow::line_height(&config, body);
    let cover = &doc.front;

    if let Some(logo) = &cover.logo {
        match assets.open(logo).map(|bytes| images::pixel_size(&bytes)) {
            Ok(Ok(pixels)) => {
                let side = LOGO_BOX_MM * 72.0 / 25.4;
                let (w, h) = scale_into(pixels, side, side);
                front.push_image(logo.clone(), None, w, h);
                front.gap(line);
            }
            Ok(Err(e)) => warn!(%logo, error = %e, "cover logo cannot be decoded, skipping"),
            Err(ThesisError::NotFound { .. }) => debug!(%logo, "no cover logo"),
            Err(e) => warn!(%logo, error = %e, "cover logo unavailable, skipping"),
        }
    }

    for (i, text) in cover.affiliation.iter().enumerate() {
        let face = if i == 0 { Face::Bold } else { Face::Regular };
        front.push_text(text, face, body, 0, Alignment::Center);
    }
    front.gap(line * 2.0);
    front.push_text(&cover.author, Face::Regular, body, 0, Alignment::Center);
    front.gap(line * 2.0);
    front.push_text(
        &cover.title,
        Face::Bold,
        flow::font_size(&config, SizeClass::Title),
        0,
        Alignment::Center,
    );
    front.gap(line * 2.0);
    for text in &cover.imprint {
        front.push_text(text, Face::Regular, body, 0, Alignment::Center);
    }
}

/// Author, title, presentation statement and imprint on a page of their own.
fn place_title_page(front: &mut Flow<'_>, cover: &FrontMatter, statement: &str) {
    let config = front.config().clone();
    let body = flow::font_size(&config, SizeClass::Body);
    let line = flow::line_height(&config, body);

    front.break_page();
    front.skip(line * 4.0);
    front.push_text(&cover.author.to_uppercase(), Face::Bold, body, 0, Alignment::Center);
    front.skip(line * 4.0);
    front.push_text(
        &cover.title.to_uppercase(),
        Face::Bold,
        flow::font_size(&config, SizeClass::Section),
        0,
        Alignment::Center,
    );
    front.skip(line * 4.0);

    // Statement sits in the right half of the text block.
    let indent = (config.content_width() / 2.0 / INDENT_STEP) as u8;
    front.push_text(
        statement,
        Face::Regular,
        flow::font_size(&config, SizeClass::Caption),
        indent,
        Alignment::Justify,
    );
    front.skip(line * 4.0);
    for text in &cover.imprint {
        front.push_text(&text.to_uppercase(), Face::Bold, body, 0, Alignment::Center);
    }
}

/// Full-page background image, when configured and decodable.
fn background_op(config: &LayoutConfig, assets: &dyn AssetResolver) -> Option<DrawOp> {
    let asset = AssetRef::Source(config.background.clone()?);
    match assets.open(&asset).map(|bytes| images::pixel_size(&bytes)) {
        Ok(Ok(_)) => Some(DrawOp::Image {
            asset,
            block: None,
            x: 0.0,
            y: 0.0,
            width: config.page_width,
            height: config.page_height,
        }),
        Ok(Err(e)) => {
            warn!(%asset, error = %e, "page background cannot be decoded, skipping");
            None
        }
        Err(e) => {
            warn!(%asset, error = %e, "page background unavailable, skipping");
            None
        }
    }
}

/// Entry text, dot leaders, right-aligned page number and the link to the
/// heading at `top` for one TOC line.
fn toc_line_ops(
    config: &LayoutConfig,
    entry: &ResolvedTocEntry,
    baseline: f32,
    top: f32,
) -> Vec<DrawOp> {
    let size = flow::font_size(config, SizeClass::Body);
    let face = if entry.level <= 1 { Face::Bold } else { Face::Regular };
    let right = config.margin_left + config.content_width();
    let number_column = fonts::text_width(Face::Regular, "0000", size);
    let left = config.margin_left + f32::from(entry.level.saturating_sub(1)) * INDENT_STEP;

    let label_max = (right - number_column - LEADER_GAP * 2.0 - left).max(0.0);
    let text = if entry.number.is_empty() {
        entry.title.clone()
    } else {
        format!("{} {}", entry.number, entry.title)
    };
    let label = flow::fit(&text, face, size, label_max);
    let label_end = left + fonts::text_width(face, &label, size);

    let page = entry.page.to_string();
    let page_x = right - fonts::text_width(Face::Regular, &page, size);

    let dot = fonts::text_width(Face::Regular, ".", size);
    let leader_start = label_end + LEADER_GAP;
    let leader_end = right - number_column - LEADER_GAP;
    let dots = ((leader_end - leader_start) / dot).floor().max(0.0) as usize;

    let mut ops = vec![DrawOp::Text(TextRun {
        x: left,
        y: baseline,
        face,
        size,
        text: label,
        word_spacing: 0.0,
    })];
    if dots > 0 {
        ops.push(DrawOp::Text(TextRun {
            x: leader_end - dots as f32 * dot,
            y: baseline,
            face: Face::Regular,
            size,
            text: ".".repeat(dots),
            word_spacing: 0.0,
        }));
    }
    ops.push(DrawOp::Text(TextRun {
        x: page_x,
        y: baseline,
        face: Face::Regular,
        size,
        text: page,
        word_spacing: 0.0,
    }));
    ops.push(DrawOp::Link {
        x1: left,
        y1: baseline - size * 0.25,
        x2: right,
        y2: baseline + size * 0.9,
        page: entry.page,
        top,
    });
    ops
}

/// Header with the document title and footer with the page number.
fn stamp(config: &LayoutConfig, title: &str, page: &mut Page) {
    let size = flow::font_size(config, SizeClass::Caption);
    let left = config.margin_left;
    let right = left + config.content_width();

    let header_y = config.page_height - config.margin_top / 2.0;
    let header = flow::fit(title, Face::Italic, size, config.content_width());
    let header_x = right - fonts::text_width(Face::Italic, &header, size);
    page.ops.push(DrawOp::Text(TextRun {
        x: header_x,
        y: header_y,
        face: Face::Italic,
        size,
        text: header,
        word_spacing: 0.0,
    }));
    page.ops.push(DrawOp::Rule {
        x1: left,
        y1: header_y - size * 0.5,
        x2: right,
        y2: header_y - size * 0.5,
        width: 0.5,
    });

    let number = page.number.to_string();
    let number_width = fonts::text_width(Face::Regular, &number, size);
    let footer_x = left + (config.content_width() - number_width) / 2.0;
    page.ops.push(DrawOp::PageNumber {
        x: footer_x,
        y: config.margin_bottom / 2.0,
        size,
        number: page.number,
    });
}
