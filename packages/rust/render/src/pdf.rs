//! PDF serialization of a [`RenderedDocument`] with `pdf-writer`.
//!
//! No document info dictionary or timestamps are written, so the same
//! rendered document always serializes to the same bytes. Link ops become
//! borderless GoTo annotations.

use std::collections::HashMap;

use pdf_writer::types::{ActionType, AnnotationType};
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, Str};
use thesiskit_shared::{AssetRef, AssetResolver, Result, ThesisError};
use tracing::{debug, instrument, warn};

use crate::document::{DrawOp, RenderedDocument};
use crate::fonts::{self, Face};
use crate::images::{self, ColorSpace};

const DEFLATE_LEVEL: u8 = 6;

#[instrument(skip_all, fields(pages = doc.pages.len()))]
pub fn serialize(doc: &RenderedDocument, assets: &dyn AssetResolver) -> Result<Vec<u8>> {
    let mut pdf = Pdf::new();
    let mut next_id = 1i32;
    let mut alloc = || {
        let r = Ref::new(next_id);
        next_id += 1;
        r
    };

    let catalog_id = alloc();
    let pages_id = alloc();

    let font_refs: Vec<(Face, Ref)> = Face::ALL.iter().map(|&face| (face, alloc())).collect();
    for &(face, font_ref) in &font_refs {
        pdf.type1_font(font_ref)
            .base_font(Name(face.base_font()))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
    }

    // One XObject per distinct asset, in order of first use. Each payload is
    // read once here and dropped as soon as it has been written.
    let mut xobjects: HashMap<AssetRef, Option<(String, Ref)>> = HashMap::new();
    for op in doc.pages.iter().flat_map(|page| &page.ops) {
        let DrawOp::Image { asset, block, .. } = op else {
            continue;
        };
        if xobjects.contains_key(asset) {
            continue;
        }
        let encoded = assets
            .open(asset)
            .map_err(|e| e.to_string())
            .and_then(|bytes| images::encode(&bytes));
        let entry = match (encoded, block) {
            (Ok(image), _) => {
                let name = format!("Im{}", xobjects.len() + 1);
                let xobj_ref = alloc();
                let mask_ref = image.alpha.as_ref().map(|_| alloc());
                write_image(&mut pdf, xobj_ref, mask_ref, &image);
                Some((name, xobj_ref))
            }
            (Err(message), Some(index)) => {
                return Err(ThesisError::layout(
                    *index,
                    format!("cannot embed {asset}: {message}"),
                ));
            }
            (Err(message), None) => {
                warn!(%asset, error = %message, "cover logo cannot be embedded, skipping");
                None
            }
        };
        xobjects.insert(asset.clone(), entry);
    }

    // Page ids come first so links can point forward.
    let page_ids: Vec<Ref> = doc.pages.iter().map(|_| alloc()).collect();
    let mut links = 0usize;
    for (page, &page_id) in doc.pages.iter().zip(&page_ids) {
        let content_id = alloc();

        let mut content = Content::new();
        let mut used: Vec<&(String, Ref)> = Vec::new();
        for op in &page.ops {
            write_op(&mut content, op, &xobjects, &mut used);
        }
        let raw = content.finish();
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), DEFLATE_LEVEL);
        pdf.stream(content_id, &compressed).filter(Filter::FlateDecode);

        let mut annotation_ids = Vec::new();
        for op in &page.ops {
            let DrawOp::Link {
                x1,
                y1,
                x2,
                y2,
                page: target,
                top,
            } = op
            else {
                continue;
            };
            let Some(&target_id) = target.checked_sub(1).and_then(|i| page_ids.get(i)) else {
                warn!(
                    page = page.number,
                    target_page = *target,
                    "link points outside the document, skipping"
                );
                continue;
            };
            let annotation_id = alloc();
            write_link(&mut pdf, annotation_id, Rect::new(*x1, *y1, *x2, *y2), target_id, *top);
            annotation_ids.push(annotation_id);
        }
        links += annotation_ids.len();

        let mut pdf_page = pdf.page(page_id);
        pdf_page
            .media_box(Rect::new(0.0, 0.0, doc.page_width, doc.page_height))
            .parent(pages_id)
            .contents(content_id);
        if !annotation_ids.is_empty() {
            pdf_page.annotations(annotation_ids);
        }
        let mut resources = pdf_page.resources();
        {
            let mut fonts = resources.fonts();
            for (face, font_ref) in &font_refs {
                fonts.pair(Name(face.resource_name()), *font_ref);
            }
        }
        if !used.is_empty() {
            let mut objects = resources.x_objects();
            for (name, xobj_ref) in used {
                objects.pair(Name(name.as_bytes()), *xobj_ref);
            }
        }
    }

    pdf.catalog(catalog_id).pages(pages_id);
    pdf.pages(pages_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);

    let bytes = pdf.finish();
    debug!(size = bytes.len(), images = xobjects.len(), links, "serialized PDF");
    Ok(bytes)
}

fn write_image(pdf: &mut Pdf, xobj_ref: Ref, mask_ref: Option<Ref>, image: &images::EncodedImage) {
    if let (Some(mask_ref), Some(alpha)) = (mask_ref, &image.alpha) {
        let mut mask = pdf.image_xobject(mask_ref, alpha);
        mask.filter(Filter::FlateDecode);
        mask.width(image.width as i32);
        mask.height(image.height as i32);
        mask.color_space().device_gray();
        mask.bits_per_component(8);
    }

    let mut xobj = pdf.image_xobject(xobj_ref, &image.data);
    xobj.filter(if image.dct {
        Filter::DctDecode
    } else {
        Filter::FlateDecode
    });
    xobj.width(image.width as i32);
    xobj.height(image.height as i32);
    match image.color {
        ColorSpace::Rgb => xobj.color_space().device_rgb(),
        ColorSpace::Gray => xobj.color_space().device_gray(),
    };
    xobj.bits_per_component(8);
    if let Some(mask_ref) = mask_ref {
        xobj.s_mask(mask_ref);
    }
}

fn write_link(pdf: &mut Pdf, id: Ref, rect: Rect, target: Ref, top: f32) {
    let mut annotation = pdf.annotation(id);
    annotation
        .subtype(AnnotationType::Link)
        .rect(rect)
        .border(0.0, 0.0, 0.0, None);
    annotation
        .action()
        .action_type(ActionType::GoTo)
        .destination()
        .page(target)
        .xyz(0.0, top, None);
}

fn write_op<'a>(
    content: &mut Content,
    op: &DrawOp,
    xobjects: &'a HashMap<AssetRef, Option<(String, Ref)>>,
    used: &mut Vec<&'a (String, Ref)>,
) {
    match op {
        DrawOp::Text(run) => {
            show_text(content, run.face, run.size, run.x, run.y, run.word_spacing, &run.text);
        }
        DrawOp::PageNumber { x, y, size, number } => {
            show_text(content, Face::Regular, *size, *x, *y, 0.0, &number.to_string());
        }
        DrawOp::Image {
            asset,
            x,
            y,
            width,
            height,
            ..
        } => {
            let Some(Some(entry)) = xobjects.get(asset) else {
                return;
            };
            if !used.iter().any(|(name, _)| *name == entry.0) {
                used.push(entry);
            }
            content.save_state();
            content.transform([*width, 0.0, 0.0, *height, *x, *y]);
            content.x_object(Name(entry.0.as_bytes()));
            content.restore_state();
        }
        DrawOp::Rule {
            x1,
            y1,
            x2,
            y2,
            width,
        } => {
            content.set_line_width(*width);
            content.move_to(*x1, *y1);
            content.line_to(*x2, *y2);
            content.stroke();
        }
        DrawOp::Link { .. } => {}
    }
}

fn show_text(
    content: &mut Content,
    face: Face,
    size: f32,
    x: f32,
    y: f32,
    word_spacing: f32,
    text: &str,
) {
    let encoded = fonts::encode(text);
    content
        .begin_text()
        .set_font(Name(face.resource_name()), size)
        .set_word_spacing(word_spacing)
        .next_line(x, y)
        .show(Str(&encoded))
        .end_text();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Page, TextRun};
    use crate::images::tests::png;
    use crate::tests::MemoryAssets;

    fn doc_with(ops: Vec<DrawOp>) -> RenderedDocument {
        RenderedDocument {
            title: "T".into(),
            page_width: 595.28,
            page_height: 841.89,
            pages: vec![Page { number: 1, ops }],
            toc: vec![],
            front_pages: 1,
        }
    }

    fn image_op(id: &str, block: Option<usize>) -> DrawOp {
        DrawOp::Image {
            asset: AssetRef::Attachment(id.into()),
            block,
            x: 100.0,
            y: 100.0,
            width: 50.0,
            height: 50.0,
        }
    }

    #[test]
    fn writes_a_pdf_with_base_fonts() {
        let doc = doc_with(vec![DrawOp::Text(TextRun {
            x: 72.0,
            y: 700.0,
            face: Face::Bold,
            size: 12.0,
            text: "Introdução".into(),
            word_spacing: 0.0,
        })]);
        let bytes = serialize(&doc, &MemoryAssets::default()).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Times-Bold"));
        assert!(text.contains("/WinAnsiEncoding"));
        assert!(!text.contains("/CreationDate"));
    }

    #[test]
    fn same_document_serializes_identically() {
        let assets = MemoryAssets::with("fig", png(8, 8));
        let doc = doc_with(vec![image_op("fig", Some(0)), image_op("fig", Some(1))]);
        let first = serialize(&doc, &assets).unwrap();
        let second = serialize(&doc, &assets).unwrap();
        assert_eq!(first, second);
        // The repeated asset is embedded once.
        assert_eq!(String::from_utf8_lossy(&first).matches("/Subtype /Image").count(), 1);
    }

    #[test]
    fn undecodable_image_names_its_block() {
        let assets = MemoryAssets::with("fig", b"garbage".to_vec());
        let err = serialize(&doc_with(vec![image_op("fig", Some(7))]), &assets).unwrap_err();
        assert!(matches!(err, ThesisError::Layout { block_index: 7, .. }));
    }

    #[test]
    fn links_become_goto_annotations() {
        let link = |page| DrawOp::Link {
            x1: 72.0,
            y1: 690.0,
            x2: 500.0,
            y2: 705.0,
            page,
            top: 760.0,
        };
        let mut doc = doc_with(vec![link(2), link(9)]);
        doc.pages.push(Page {
            number: 2,
            ops: vec![],
        });
        let bytes = serialize(&doc, &MemoryAssets::default()).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        // The link past the last page is dropped.
        assert_eq!(text.matches("/Subtype /Link").count(), 1);
        assert!(text.contains("/S /GoTo"));
        assert!(text.contains("/XYZ"));
        assert!(text.contains("/Annots"));
    }

    #[test]
    fn broken_logo_is_dropped() {
        let assets = MemoryAssets::with("logo", b"garbage".to_vec());
        let bytes = serialize(&doc_with(vec![image_op("logo", None)]), &assets).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("/Subtype /Image"));
    }
}
