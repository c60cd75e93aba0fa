//! In-memory project model with checked mutations.
//!
//! Every structural mutation re-checks the invariants it could break, so a
//! [`Project`] is always well-nested with unique keys. Reference resolution is
//! checked by [`Project::validate`], whose [`ValidatedProject`] is the only
//! input the template stage accepts.

use std::collections::BTreeMap;
use std::fmt;

use thesiskit_shared::{
    Attachment, AttachmentKind, CURRENT_SCHEMA_VERSION, ContentBlock, MAX_HEADING_DEPTH, Metadata,
    PendingRequest, ProjectDocument, ProjectId, ReferenceKind, Result, Section, Source,
    ThesisError, UnresolvedRef,
};
use tracing::{debug, instrument};

/// Position of a content block: 0-based section path plus block index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress {
    pub section: Vec<usize>,
    pub block: usize,
}

impl BlockAddress {
    pub fn new(section: Vec<usize>, block: usize) -> Self {
        Self { section, block }
    }
}

impl fmt::Display for BlockAddress {
    /// 1-based, e.g. `section 1.2, block 3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "section {}, block {}",
            display_path(&self.section),
            self.block + 1
        )
    }
}

/// Render a 0-based section path 1-based and dotted (`[0, 1]` → `1.2`).
pub fn display_path(path: &[usize]) -> String {
    path.iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// One academic project: metadata, ordered sections, sources and attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    id: ProjectId,
    metadata: Metadata,
    sections: Vec<Section>,
    sources: BTreeMap<String, Source>,
    attachments: Vec<Attachment>,
}

impl Project {
    pub fn new(id: ProjectId, metadata: Metadata) -> Result<Self> {
        if metadata.title.trim().is_empty() {
            return Err(ThesisError::structure("project title must not be empty"));
        }
        Ok(Self {
            id,
            metadata,
            sections: Vec::new(),
            sources: BTreeMap::new(),
            attachments: Vec::new(),
        })
    }

    pub fn id(&self) -> &ProjectId {
        &self.id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Sources in key order.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn source(&self, key: &str) -> Option<&Source> {
        self.sources.get(key)
    }

    /// Attachments in insertion order.
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn attachment(&self, id: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == id)
    }

    /// Section at a 0-based path.
    pub fn section(&self, path: &[usize]) -> Option<&Section> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.sections.get(*first)?, |section, &i| {
                section.children.get(i)
            })
    }

    fn section_mut(&mut self, path: &[usize]) -> Option<&mut Section> {
        let (first, rest) = path.split_first()?;
        let mut section = self.sections.get_mut(*first)?;
        for &i in rest {
            section = section.children.get_mut(i)?;
        }
        Some(section)
    }

    /// Append `section` (with its subtree) under the section at `parent_path`,
    /// or at top level when `parent_path` is empty. Returns the new path.
    pub fn add_section(&mut self, section: Section, parent_path: &[usize]) -> Result<Vec<usize>> {
        let expected = if parent_path.is_empty() {
            1
        } else {
            let parent = self.section(parent_path).ok_or_else(|| {
                ThesisError::structure(format!(
                    "parent section {} does not exist",
                    display_path(parent_path)
                ))
            })?;
            parent.level + 1
        };
        check_subtree(&section, expected)?;

        let siblings = if parent_path.is_empty() {
            &mut self.sections
        } else {
            match self.section_mut(parent_path) {
                Some(parent) => &mut parent.children,
                None => {
                    return Err(ThesisError::structure(format!(
                        "parent section {} does not exist",
                        display_path(parent_path)
                    )));
                }
            }
        };
        siblings.push(section);

        let mut path = parent_path.to_vec();
        path.push(siblings.len() - 1);
        debug!(path = %display_path(&path), "section added");
        Ok(path)
    }

    pub fn add_source(&mut self, source: Source) -> Result<()> {
        if source.key.trim().is_empty() {
            return Err(ThesisError::structure("source key must not be empty"));
        }
        if self.sources.contains_key(&source.key) {
            return Err(ThesisError::DuplicateKey {
                kind: "source",
                key: source.key,
            });
        }
        self.sources.insert(source.key.clone(), source);
        Ok(())
    }

    /// Remove a source. References to it are reported by the next `validate`.
    pub fn remove_source(&mut self, key: &str) -> Option<Source> {
        self.sources.remove(key)
    }

    pub fn add_attachment(&mut self, attachment: Attachment) -> Result<()> {
        if attachment.id.trim().is_empty() {
            return Err(ThesisError::structure("attachment id must not be empty"));
        }
        if self.attachment(&attachment.id).is_some() {
            return Err(ThesisError::DuplicateKey {
                kind: "attachment",
                key: attachment.id,
            });
        }
        if self
            .attachments
            .iter()
            .any(|a| a.file_name == attachment.file_name)
        {
            return Err(ThesisError::DuplicateKey {
                kind: "attachment file",
                key: attachment.file_name,
            });
        }
        self.attachments.push(attachment);
        Ok(())
    }

    pub fn remove_attachment(&mut self, id: &str) -> Option<Attachment> {
        let index = self.attachments.iter().position(|a| a.id == id)?;
        Some(self.attachments.remove(index))
    }

    /// Swap the block at `address` for `block`, returning the old one.
    pub fn replace_block(
        &mut self,
        address: &BlockAddress,
        block: ContentBlock,
    ) -> Result<ContentBlock> {
        let slot = self
            .section_mut(&address.section)
            .and_then(|section| section.blocks.get_mut(address.block))
            .ok_or_else(|| ThesisError::structure(format!("no block at {address}")))?;
        Ok(std::mem::replace(slot, block))
    }

    /// Blocks still awaiting generation, in document order.
    pub fn pending_blocks(&self) -> Vec<(BlockAddress, &PendingRequest)> {
        let mut pending = Vec::new();
        self.walk(|path, section| {
            for (i, block) in section.blocks.iter().enumerate() {
                if let ContentBlock::PendingGeneration { request } = block {
                    pending.push((BlockAddress::new(path.to_vec(), i), request));
                }
            }
        });
        pending
    }

    /// Depth-first, document-order visit of every section with its path.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&[usize], &'a Section)) {
        fn go<'a>(
            sections: &'a [Section],
            path: &mut Vec<usize>,
            visit: &mut impl FnMut(&[usize], &'a Section),
        ) {
            for (i, section) in sections.iter().enumerate() {
                path.push(i);
                visit(path, section);
                go(&section.children, path, visit);
                path.pop();
            }
        }
        go(&self.sections, &mut Vec::new(), &mut visit);
    }

    /// Check that every citation and image reference resolves.
    #[instrument(skip_all, fields(project_id = %self.id))]
    pub fn validate(&self) -> Result<ValidatedProject<'_>> {
        let mut unresolved = Vec::new();
        self.walk(|path, section| {
            for (i, block) in section.blocks.iter().enumerate() {
                let location = || BlockAddress::new(path.to_vec(), i).to_string();
                match block {
                    ContentBlock::CitationRef { key } if !self.sources.contains_key(key) => {
                        unresolved.push(UnresolvedRef {
                            kind: ReferenceKind::Citation,
                            key: key.clone(),
                            location: location(),
                        });
                    }
                    ContentBlock::ImageRef { attachment, .. }
                        if !self
                            .attachment(attachment)
                            .is_some_and(|a| a.kind == AttachmentKind::Image) =>
                    {
                        unresolved.push(UnresolvedRef {
                            kind: ReferenceKind::Image,
                            key: attachment.clone(),
                            location: location(),
                        });
                    }
                    _ => {}
                }
            }
        });

        if unresolved.is_empty() {
            debug!("project validated");
            Ok(ValidatedProject { project: self })
        } else {
            Err(ThesisError::UnresolvedReference {
                project_id: self.id.to_string(),
                references: unresolved,
            })
        }
    }

    /// Rebuild a project from its stored document, replaying every mutation
    /// so the same invariants hold as for a hand-built project.
    pub fn from_document(doc: ProjectDocument) -> Result<Self> {
        if doc.schema_version != CURRENT_SCHEMA_VERSION {
            return Err(ThesisError::structure(format!(
                "unsupported schema_version {} (expected {CURRENT_SCHEMA_VERSION})",
                doc.schema_version
            )));
        }
        let mut project = Self::new(doc.id, doc.metadata)?;
        for section in doc.sections {
            project.add_section(section, &[])?;
        }
        for source in doc.sources {
            project.add_source(source)?;
        }
        for attachment in doc.attachments {
            project.add_attachment(attachment)?;
        }
        Ok(project)
    }

    pub fn to_document(&self) -> ProjectDocument {
        ProjectDocument {
            schema_version: CURRENT_SCHEMA_VERSION,
            id: self.id.clone(),
            metadata: self.metadata.clone(),
            sections: self.sections.clone(),
            sources: self.sources.values().cloned().collect(),
            attachments: self.attachments.clone(),
        }
    }
}

/// Check `section.level == expected` and the level rule for its subtree.
fn check_subtree(section: &Section, expected: u8) -> Result<()> {
    if section.title.trim().is_empty() {
        return Err(ThesisError::structure("section title must not be empty"));
    }
    if section.level != expected {
        return Err(ThesisError::structure(format!(
            "section '{}' has level {} but its position requires level {expected}",
            section.title, section.level
        )));
    }
    if section.level > MAX_HEADING_DEPTH {
        return Err(ThesisError::structure(format!(
            "section '{}' is nested deeper than {MAX_HEADING_DEPTH} levels",
            section.title
        )));
    }
    for child in &section.children {
        check_subtree(child, expected + 1)?;
    }
    Ok(())
}

/// Proof that a project's references resolve. Borrowing the project keeps it
/// from being mutated while the proof is alive.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedProject<'a> {
    project: &'a Project,
}

impl<'a> ValidatedProject<'a> {
    pub fn project(&self) -> &'a Project {
        self.project
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thesiskit_shared::Placement;

    fn project() -> Project {
        Project::new(
            ProjectId::new("tcc").unwrap(),
            Metadata::new("Solar Energy", "Ana Lima"),
        )
        .unwrap()
    }

    fn source(key: &str) -> Source {
        Source {
            key: key.into(),
            author: "Knuth, Donald".into(),
            title: "The TeXbook".into(),
            year: Some(1984),
            publisher: Some("Addison-Wesley".into()),
            url: None,
        }
    }

    fn image(id: &str) -> Attachment {
        Attachment {
            id: id.into(),
            file_name: format!("{id}.png"),
            kind: AttachmentKind::Image,
            placement: Placement::default(),
        }
    }

    #[test]
    fn child_level_must_be_parent_plus_one() {
        let mut p = project();
        let intro = p.add_section(Section::new("Introduction", 1), &[]).unwrap();
        assert_eq!(intro, vec![0]);

        let err = p
            .add_section(Section::new("Deep", 3), &intro)
            .unwrap_err();
        assert!(matches!(err, ThesisError::Structure { .. }));

        let child = p.add_section(Section::new("Background", 2), &intro).unwrap();
        assert_eq!(child, vec![0, 0]);
        assert_eq!(p.section(&child).unwrap().title, "Background");
    }

    #[test]
    fn top_level_sections_are_level_one() {
        let mut p = project();
        assert!(p.add_section(Section::new("Oops", 2), &[]).is_err());
    }

    #[test]
    fn missing_parent_is_rejected() {
        let mut p = project();
        let err = p.add_section(Section::new("Orphan", 2), &[3]).unwrap_err();
        assert!(err.to_string().contains("parent section 4 does not exist"));
    }

    #[test]
    fn subtree_levels_are_checked() {
        let mut p = project();
        let bad = Section::new("Chapter", 1).with_child(Section::new("Skip", 3));
        assert!(p.add_section(bad, &[]).is_err());
        assert!(p.sections().is_empty());
    }

    #[test]
    fn depth_is_bounded() {
        let mut p = project();
        let mut path = p.add_section(Section::new("L1", 1), &[]).unwrap();
        for level in 2..=MAX_HEADING_DEPTH {
            path = p
                .add_section(Section::new(format!("L{level}"), level), &path)
                .unwrap();
        }
        let too_deep = Section::new("Too deep", MAX_HEADING_DEPTH + 1);
        assert!(p.add_section(too_deep, &path).is_err());
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut p = project();
        p.add_source(source("knuth84")).unwrap();
        assert!(matches!(
            p.add_source(source("knuth84")),
            Err(ThesisError::DuplicateKey { kind: "source", .. })
        ));

        p.add_attachment(image("fig-1")).unwrap();
        assert!(matches!(
            p.add_attachment(image("fig-1")),
            Err(ThesisError::DuplicateKey { kind: "attachment", .. })
        ));
    }

    #[test]
    fn validate_lists_every_unresolved_reference() {
        let mut p = project();
        p.add_section(
            Section::new("Introduction", 1)
                .with_block(ContentBlock::literal("Text."))
                .with_block(ContentBlock::citation("missing"))
                .with_child(
                    Section::new("Figures", 2).with_block(ContentBlock::image("fig-9", None)),
                ),
            &[],
        )
        .unwrap();

        match p.validate().unwrap_err() {
            ThesisError::UnresolvedReference { references, .. } => {
                assert_eq!(references.len(), 2);
                assert_eq!(references[0].key, "missing");
                assert_eq!(references[0].location, "section 1, block 2");
                assert_eq!(references[1].kind, ReferenceKind::Image);
                assert_eq!(references[1].location, "section 1.1, block 1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn removing_a_cited_source_breaks_validation() {
        let mut p = project();
        p.add_source(source("knuth84")).unwrap();
        p.add_section(
            Section::new("Introduction", 1).with_block(ContentBlock::citation("knuth84")),
            &[],
        )
        .unwrap();
        assert!(p.validate().is_ok());

        p.remove_source("knuth84");
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("citation 'knuth84' at section 1, block 1"));
    }

    #[test]
    fn image_refs_must_point_at_image_attachments() {
        let mut p = project();
        let mut file = image("data");
        file.kind = AttachmentKind::File;
        p.add_attachment(file).unwrap();
        p.add_section(
            Section::new("Intro", 1).with_block(ContentBlock::image("data", None)),
            &[],
        )
        .unwrap();
        assert!(p.validate().is_err());
    }

    #[test]
    fn pending_blocks_in_document_order() {
        let mut p = project();
        p.add_section(
            Section::new("A", 1)
                .with_block(ContentBlock::pending_text("write A"))
                .with_child(
                    Section::new("A.1", 2).with_block(ContentBlock::pending_image("sun", None)),
                ),
            &[],
        )
        .unwrap();
        p.add_section(
            Section::new("B", 1)
                .with_block(ContentBlock::literal("done"))
                .with_block(ContentBlock::pending_text("write B")),
            &[],
        )
        .unwrap();

        let addresses: Vec<String> = p
            .pending_blocks()
            .into_iter()
            .map(|(address, _)| address.to_string())
            .collect();
        assert_eq!(
            addresses,
            vec!["section 1, block 1", "section 1.1, block 1", "section 2, block 2"]
        );
    }

    #[test]
    fn replace_block_swaps_content() {
        let mut p = project();
        p.add_section(
            Section::new("A", 1).with_block(ContentBlock::pending_text("write")),
            &[],
        )
        .unwrap();
        let address = BlockAddress::new(vec![0], 0);
        let old = p
            .replace_block(&address, ContentBlock::literal("written"))
            .unwrap();
        assert!(old.is_pending());
        assert!(p.pending_blocks().is_empty());
        assert!(p
            .replace_block(&BlockAddress::new(vec![0], 5), ContentBlock::literal("x"))
            .is_err());
    }

    #[test]
    fn document_round_trip_replays_invariants() {
        let mut p = project();
        p.add_source(source("b")).unwrap();
        p.add_source(source("a")).unwrap();
        p.add_attachment(image("fig")).unwrap();
        p.add_section(Section::new("Intro", 1), &[]).unwrap();

        let doc = p.to_document();
        assert_eq!(doc.sources[0].key, "a");
        assert_eq!(Project::from_document(doc.clone()).unwrap(), p);

        let mut broken = doc;
        broken.sections[0].level = 2;
        assert!(Project::from_document(broken).is_err());
    }
}
