//! Template stage: validated project → layout-ready [`FormattedDocument`].
//!
//! Sections are walked depth-first in document order. Every section emits a
//! numbered heading followed by its blocks; citations are expanded from their
//! sources; images become placeholders whose bytes the renderer fetches
//! later. The contents list is a side output pointing at heading blocks.

use std::collections::HashMap;

use thesiskit_shared::{
    Alignment, AssetRef, Attachment, AttachmentKind, BlockKind, ContentBlock, FontWeight,
    FormattedBlock, FormattedDocument, FrontMatter, LayoutConfig, Metadata, PlacementMode, Result,
    Section, SizeClass, Source, StyleHints, ThesisError, TocEntry,
};
use tracing::{debug, instrument};

use crate::project::{BlockAddress, Project, ValidatedProject, display_path};

const REFERENCES_TITLE: &str = "References";
const APPENDICES_TITLE: &str = "Appendices";
const BULLET: &str = "\u{2022}";

/// Format the whole project.
#[instrument(skip_all, fields(project_id = %validated.project().id()))]
pub fn generate(
    validated: &ValidatedProject<'_>,
    config: &LayoutConfig,
) -> Result<FormattedDocument> {
    let project = validated.project();
    let mut formatter = Formatter::new(project, config);

    for (i, section) in project.sections().iter().enumerate() {
        formatter.section(&[i], section)?;
    }
    if config.bibliography {
        formatter.references();
    }
    formatter.appendices();

    debug!(
        blocks = formatter.blocks.len(),
        toc = formatter.toc.len(),
        "template generated"
    );
    Ok(FormattedDocument {
        title: project.metadata().title.clone(),
        front: front_matter(project, config),
        blocks: formatter.blocks,
        toc: formatter.toc,
    })
}

/// Format a single section (and its subsections) as it would appear in the
/// full document. Figure and appendix numbers count from 1 within the section.
pub fn generate_section(
    validated: &ValidatedProject<'_>,
    config: &LayoutConfig,
    path: &[usize],
) -> Result<Vec<FormattedBlock>> {
    let project = validated.project();
    let section = project.section(path).ok_or_else(|| {
        ThesisError::structure(format!("section {} does not exist", display_path(path)))
    })?;
    let mut formatter = Formatter::new(project, config);
    formatter.section(path, section)?;
    Ok(formatter.blocks)
}

/// Canonical bibliography text: `AUTHOR (YEAR). Title. Publisher. Available at: <url>.`
pub fn citation_text(source: &Source) -> String {
    let year = source
        .year
        .map_or_else(|| "n.d.".to_string(), |y| y.to_string());
    let mut text = format!(
        "{} ({year}). {}",
        source.author.trim().to_uppercase(),
        sentence(&source.title)
    );
    if let Some(publisher) = source.publisher.as_deref().filter(|p| !p.trim().is_empty()) {
        text.push(' ');
        text.push_str(&sentence(publisher));
    }
    if let Some(url) = source.url.as_deref().filter(|u| !u.trim().is_empty()) {
        text.push_str(&format!(" Available at: <{}>.", url.trim()));
    }
    text
}

fn sentence(s: &str) -> String {
    format!("{}.", s.trim().trim_end_matches('.'))
}

fn front_matter(project: &Project, config: &LayoutConfig) -> FrontMatter {
    let meta = project.metadata();
    let affiliation = [
        meta.institution.clone().map(|s| s.to_uppercase()),
        meta.course.clone(),
    ];
    let imprint = [meta.place.clone(), meta.year.map(|y| y.to_string())];
    FrontMatter {
        title: meta.title.clone(),
        author: meta.author.clone(),
        affiliation: affiliation.into_iter().flatten().collect(),
        imprint: imprint.into_iter().flatten().collect(),
        logo: config.cover_logo.clone().map(AssetRef::Source),
        statement: statement(meta),
    }
}

/// Presentation statement for the title page. `None` when the metadata names
/// no course, discipline or advisor.
fn statement(meta: &Metadata) -> Option<String> {
    let course = non_empty(&meta.course);
    let discipline = non_empty(&meta.discipline);
    let advisor = non_empty(&meta.advisor);
    if course.is_none() && discipline.is_none() && advisor.is_none() {
        return None;
    }

    let mut text = match course {
        Some(course) => format!("Academic work for the {course} program"),
        None => "Academic work".to_string(),
    };
    if let Some(institution) = non_empty(&meta.institution) {
        text.push_str(&format!(" presented to {institution}"));
    }
    if let Some(discipline) = discipline {
        text.push_str(&format!(" as part of the requirements of the {discipline} course"));
    }
    if let Some(advisor) = advisor {
        text.push_str(&format!(", under the supervision of {advisor}"));
    }
    text.push('.');
    Some(text)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Formatter
// ---------------------------------------------------------------------------

struct Formatter<'a> {
    project: &'a Project,
    config: &'a LayoutConfig,
    blocks: Vec<FormattedBlock>,
    toc: Vec<TocEntry>,
    figures: usize,
    /// Attachments moved to the appendix, in numbering order.
    appendix: Vec<AppendixItem<'a>>,
    appendix_index: HashMap<&'a str, usize>,
}

struct AppendixItem<'a> {
    attachment: &'a Attachment,
    caption: Option<String>,
}

impl<'a> Formatter<'a> {
    fn new(project: &'a Project, config: &'a LayoutConfig) -> Self {
        Self {
            project,
            config,
            blocks: Vec::new(),
            toc: Vec::new(),
            figures: 0,
            appendix: Vec::new(),
            appendix_index: HashMap::new(),
        }
    }

    fn section(&mut self, path: &[usize], section: &'a Section) -> Result<()> {
        let level = path.len() as u8;
        self.heading(level, display_path(path), &section.title);

        for (i, block) in section.blocks.iter().enumerate() {
            let address = BlockAddress::new(path.to_vec(), i);
            self.block(&address, block)?;
        }

        let mut child_path = path.to_vec();
        for (i, child) in section.children.iter().enumerate() {
            child_path.push(i);
            self.section(&child_path, child)?;
            child_path.pop();
        }
        Ok(())
    }

    fn heading(&mut self, level: u8, number: String, title: &str) {
        let text = if number.is_empty() {
            title.to_string()
        } else {
            format!("{number} {title}")
        };
        self.toc.push(TocEntry {
            title: title.to_string(),
            number: number.clone(),
            level,
            heading_block: self.blocks.len(),
        });
        self.blocks.push(FormattedBlock {
            kind: BlockKind::Heading { level, number },
            text,
            style: StyleHints::heading(level, level == 1 && self.config.chapter_page_break),
        });
    }

    fn paragraph(&mut self, text: String) {
        self.blocks.push(FormattedBlock {
            kind: BlockKind::Paragraph,
            text,
            style: StyleHints::body(),
        });
    }

    fn citation(&mut self, source: &Source) {
        self.blocks.push(FormattedBlock {
            kind: BlockKind::Citation {
                key: source.key.clone(),
            },
            text: citation_text(source),
            style: StyleHints {
                align: Alignment::Left,
                ..StyleHints::body()
            },
        });
    }

    fn image(&mut self, attachment: &Attachment, caption: Option<String>) {
        self.blocks.push(FormattedBlock {
            kind: BlockKind::ImagePlaceholder {
                asset: AssetRef::Attachment(attachment.id.clone()),
                width_mm: attachment.placement.width_mm,
                height_mm: attachment.placement.height_mm,
                caption,
            },
            text: String::new(),
            style: StyleHints {
                size: SizeClass::Caption,
                align: Alignment::Center,
                ..StyleHints::body()
            },
        });
    }

    fn block(&mut self, address: &BlockAddress, block: &'a ContentBlock) -> Result<()> {
        let project = self.project;
        match block {
            ContentBlock::Literal { text } => {
                if text.trim().is_empty() {
                    debug!(%address, "skipping blank paragraph");
                } else {
                    self.paragraph(text.clone());
                }
            }
            ContentBlock::List { items } => {
                for item in items {
                    self.blocks.push(FormattedBlock {
                        kind: BlockKind::Paragraph,
                        text: format!("{BULLET} {}", item.trim()),
                        style: StyleHints {
                            indent: 1,
                            align: Alignment::Left,
                            ..StyleHints::body()
                        },
                    });
                }
            }
            ContentBlock::CitationRef { key } => {
                let source = project.source(key).ok_or_else(|| {
                    ThesisError::structure(format!(
                        "citation '{key}' at {address} reached formatting unresolved"
                    ))
                })?;
                self.citation(source);
            }
            ContentBlock::ImageRef {
                attachment,
                caption,
            } => {
                let attachment = project
                    .attachment(attachment)
                    .filter(|a| a.kind == AttachmentKind::Image)
                    .ok_or_else(|| {
                        ThesisError::structure(format!(
                            "image '{attachment}' at {address} reached formatting unresolved"
                        ))
                    })?;
                match attachment.placement.mode {
                    PlacementMode::Inline => {
                        self.figures += 1;
                        let caption = match caption {
                            Some(c) => format!("Figure {} - {}", self.figures, c.trim()),
                            None => format!("Figure {}", self.figures),
                        };
                        self.image(attachment, Some(caption));
                    }
                    PlacementMode::Appendix => {
                        let n = self.appendix_number(attachment, caption.clone());
                        self.paragraph(format!("See Appendix {n}."));
                    }
                }
            }
            ContentBlock::PendingGeneration { .. } => {
                return Err(ThesisError::structure(format!(
                    "block at {address} is still pending generation"
                )));
            }
        }
        Ok(())
    }

    fn appendix_number(&mut self, attachment: &'a Attachment, caption: Option<String>) -> usize {
        if let Some(&n) = self.appendix_index.get(attachment.id.as_str()) {
            return n;
        }
        self.appendix.push(AppendixItem {
            attachment,
            caption,
        });
        let n = self.appendix.len();
        self.appendix_index.insert(attachment.id.as_str(), n);
        n
    }

    fn references(&mut self) {
        let project = self.project;
        let mut sources = project.sources().peekable();
        if sources.peek().is_none() {
            return;
        }
        self.heading(1, String::new(), REFERENCES_TITLE);
        for source in sources {
            self.citation(source);
        }
    }

    fn appendices(&mut self) {
        let project = self.project;
        for attachment in project.attachments() {
            if attachment.placement.mode == PlacementMode::Appendix {
                self.appendix_number(attachment, None);
            }
        }
        if self.appendix.is_empty() {
            return;
        }

        self.heading(1, String::new(), APPENDICES_TITLE);
        let items = std::mem::take(&mut self.appendix);
        for (i, item) in items.iter().enumerate() {
            let title = format!("Appendix {}", i + 1);
            self.heading(2, String::new(), &title);
            match item.attachment.kind {
                AttachmentKind::Image => self.image(item.attachment, item.caption.clone()),
                AttachmentKind::File => self.blocks.push(FormattedBlock {
                    kind: BlockKind::Paragraph,
                    text: format!("Attached file: {}", item.attachment.file_name),
                    style: StyleHints {
                        weight: FontWeight::Italic,
                        align: Alignment::Left,
                        ..StyleHints::body()
                    },
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thesiskit_shared::{Placement, ProjectId};

    fn project() -> Project {
        let mut metadata = Metadata::new("Solar Energy", "Ana Lima");
        metadata.institution = Some("Universidade Federal".into());
        metadata.place = Some("Recife".into());
        metadata.year = Some(2024);
        Project::new(ProjectId::new("tcc").unwrap(), metadata).unwrap()
    }

    fn knuth() -> Source {
        Source {
            key: "knuth84".into(),
            author: "Knuth, Donald".into(),
            title: "The TeXbook".into(),
            year: Some(1984),
            publisher: Some("Addison-Wesley".into()),
            url: None,
        }
    }

    fn attachment(id: &str, kind: AttachmentKind, mode: PlacementMode) -> Attachment {
        Attachment {
            id: id.into(),
            file_name: format!("{id}.bin"),
            kind,
            placement: Placement {
                mode,
                ..Placement::default()
            },
        }
    }

    fn no_bibliography() -> LayoutConfig {
        LayoutConfig {
            bibliography: false,
            ..LayoutConfig::default()
        }
    }

    #[test]
    fn citation_text_is_canonical() {
        assert_eq!(
            citation_text(&knuth()),
            "KNUTH, DONALD (1984). The TeXbook. Addison-Wesley."
        );

        let web = Source {
            key: "nrel".into(),
            author: "NREL".into(),
            title: "Solar Resource Data.".into(),
            year: None,
            publisher: None,
            url: Some("https://nrel.gov".into()),
        };
        assert_eq!(
            citation_text(&web),
            "NREL (n.d.). Solar Resource Data. Available at: <https://nrel.gov>."
        );
    }

    #[test]
    fn headings_are_numbered_depth_first() {
        let mut p = project();
        p.add_section(
            Section::new("Introduction", 1)
                .with_block(ContentBlock::literal("Intro text."))
                .with_child(Section::new("Background", 2))
                .with_child(
                    Section::new("Scope", 2).with_child(Section::new("Limits", 3)),
                ),
            &[],
        )
        .unwrap();
        p.add_section(Section::new("Conclusion", 1), &[]).unwrap();

        let doc = generate(&p.validate().unwrap(), &no_bibliography()).unwrap();
        let headings: Vec<&str> = doc
            .blocks
            .iter()
            .filter(|b| matches!(b.kind, BlockKind::Heading { .. }))
            .map(|b| b.text.as_str())
            .collect();
        assert_eq!(
            headings,
            vec![
                "1 Introduction",
                "1.1 Background",
                "1.2 Scope",
                "1.2.1 Limits",
                "2 Conclusion"
            ]
        );
        assert_eq!(doc.blocks[1].text, "Intro text.");

        assert_eq!(doc.toc.len(), 5);
        for entry in &doc.toc {
            let block = &doc.blocks[entry.heading_block];
            assert_eq!(block.text, format!("{} {}", entry.number, entry.title));
        }
        assert_eq!(doc.toc[3].level, 3);
        assert!(doc.blocks[0].style.page_break_before);
        assert!(!doc.blocks[2].style.page_break_before);
    }

    #[test]
    fn citations_expand_in_place_and_in_references() {
        let mut p = project();
        p.add_source(knuth()).unwrap();
        p.add_section(
            Section::new("Introduction", 1)
                .with_block(ContentBlock::literal("As shown in:"))
                .with_block(ContentBlock::citation("knuth84")),
            &[],
        )
        .unwrap();

        let validated = p.validate().unwrap();
        let doc = generate(&validated, &LayoutConfig::default()).unwrap();
        let expected = citation_text(&knuth());
        assert_eq!(doc.blocks[2].text, expected);
        assert!(matches!(&doc.blocks[2].kind, BlockKind::Citation { key } if key == "knuth84"));

        let references = doc.toc.last().unwrap();
        assert_eq!(references.title, REFERENCES_TITLE);
        assert_eq!(doc.blocks.last().unwrap().text, expected);

        // Same project, same blocks.
        assert_eq!(generate(&validated, &LayoutConfig::default()).unwrap(), doc);
    }

    #[test]
    fn lists_become_indented_bullets() {
        let mut p = project();
        p.add_section(
            Section::new("Goals", 1).with_block(ContentBlock::List {
                items: vec!["Measure".into(), "Compare".into()],
            }),
            &[],
        )
        .unwrap();
        let doc = generate(&p.validate().unwrap(), &no_bibliography()).unwrap();
        assert_eq!(doc.blocks[1].text, "\u{2022} Measure");
        assert_eq!(doc.blocks[2].style.indent, 1);
    }

    #[test]
    fn inline_and_appendix_images() {
        let mut p = project();
        p.add_attachment(attachment("fig", AttachmentKind::Image, PlacementMode::Inline))
            .unwrap();
        p.add_attachment(attachment("map", AttachmentKind::Image, PlacementMode::Appendix))
            .unwrap();
        p.add_attachment(attachment("data", AttachmentKind::File, PlacementMode::Appendix))
            .unwrap();
        p.add_section(
            Section::new("Results", 1)
                .with_block(ContentBlock::image("fig", Some("Panel")))
                .with_block(ContentBlock::image("map", Some("Site map"))),
            &[],
        )
        .unwrap();

        let doc = generate(&p.validate().unwrap(), &no_bibliography()).unwrap();
        match &doc.blocks[1].kind {
            BlockKind::ImagePlaceholder {
                asset,
                width_mm,
                caption,
                ..
            } => {
                assert_eq!(asset, &AssetRef::Attachment("fig".into()));
                assert_eq!(*width_mm, 150.0);
                assert_eq!(caption.as_deref(), Some("Figure 1 - Panel"));
            }
            other => panic!("expected image placeholder, got {other:?}"),
        }
        assert_eq!(doc.blocks[2].text, "See Appendix 1.");

        let titles: Vec<&str> = doc.toc.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Results", APPENDICES_TITLE, "Appendix 1", "Appendix 2"]
        );
        assert!(doc.blocks.last().unwrap().text.contains("data.bin"));
    }

    #[test]
    fn pending_blocks_fail_fast() {
        let mut p = project();
        p.add_section(
            Section::new("Intro", 1).with_block(ContentBlock::pending_text("write")),
            &[],
        )
        .unwrap();
        let err = generate(&p.validate().unwrap(), &no_bibliography()).unwrap_err();
        assert!(err.to_string().contains("section 1, block 1"));
    }

    #[test]
    fn front_matter_from_metadata() {
        let p = project();
        let doc = generate(&p.validate().unwrap(), &LayoutConfig::default()).unwrap();
        assert_eq!(doc.front.affiliation, vec!["UNIVERSIDADE FEDERAL"]);
        assert_eq!(doc.front.imprint, vec!["Recife", "2024"]);
        assert_eq!(doc.front.logo, Some(AssetRef::Source("logo.png".into())));
        assert_eq!(doc.front.statement, None);
        assert!(doc.blocks.is_empty());
    }

    #[test]
    fn statement_names_course_discipline_and_advisor() {
        let mut metadata = Metadata::new("Solar Energy", "Ana Lima");
        metadata.institution = Some("Universidade Federal".into());
        metadata.course = Some("Engineering".into());
        metadata.discipline = Some("Research Methods".into());
        metadata.advisor = Some("Dr. Souza".into());
        let p = Project::new(ProjectId::new("tcc").unwrap(), metadata).unwrap();
        let doc = generate(&p.validate().unwrap(), &LayoutConfig::default()).unwrap();

        assert_eq!(doc.front.affiliation, vec!["UNIVERSIDADE FEDERAL", "Engineering"]);
        assert_eq!(
            doc.front.statement.as_deref(),
            Some(
                "Academic work for the Engineering program presented to Universidade Federal \
                 as part of the requirements of the Research Methods course, \
                 under the supervision of Dr. Souza."
            )
        );
    }

    #[test]
    fn statement_omits_missing_parts() {
        let mut metadata = Metadata::new("Solar Energy", "Ana Lima");
        metadata.advisor = Some("Dr. Souza".into());
        let p = Project::new(ProjectId::new("tcc").unwrap(), metadata).unwrap();
        let doc = generate(&p.validate().unwrap(), &LayoutConfig::default()).unwrap();
        assert_eq!(
            doc.front.statement.as_deref(),
            Some("Academic work, under the supervision of Dr. Souza.")
        );
    }

    #[test]
    fn single_section_formatting() {
        let mut p = project();
        p.add_section(Section::new("A", 1), &[]).unwrap();
        p.add_section(
            Section::new("B", 1).with_child(Section::new("B1", 2)),
            &[],
        )
        .unwrap();
        let validated = p.validate().unwrap();
        let blocks = generate_section(&validated, &no_bibliography(), &[1]).unwrap();
        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["2 B", "2.1 B1"]);
        assert!(generate_section(&validated, &no_bibliography(), &[5]).is_err());
    }
}
