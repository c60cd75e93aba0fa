//! Enrichment: fills pending blocks through the external collaborators.
//!
//! Requests are independent and run concurrently (bounded), but results are
//! merged strictly in document order by block address, so arrival order never
//! shows up in the project.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tracing::{debug, error, info, instrument, warn};

use thesiskit_shared::{
    Attachment, AttachmentKind, ContentBlock, ContentGenerator, EnrichmentPolicy,
    GenerationContext, ImageSearch, PendingRequest, Placement, Result, ThesisError,
};
use thesiskit_storage::FileManager;

use crate::project::{BlockAddress, Project};

/// Injected collaborators. A pending block whose collaborator is missing
/// fails like a collaborator error.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub content: Option<Arc<dyn ContentGenerator>>,
    pub images: Option<Arc<dyn ImageSearch>>,
}

impl Collaborators {
    /// No collaborators: every pending block fails (offline builds).
    pub fn none() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("content", &self.content.is_some())
            .field("images", &self.images.is_some())
            .finish()
    }
}

/// Options for one enrichment pass.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentConfig {
    pub policy: EnrichmentPolicy,
    pub max_concurrent: usize,
}

/// What an enrichment pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    /// Blocks replaced with generated content.
    pub enriched: usize,
    /// Blocks replaced with a placeholder after a collaborator failure.
    pub substituted: Vec<BlockAddress>,
    /// One line per substitution, `<location>: <error>`.
    pub warnings: Vec<String>,
}

enum Generated {
    Text(String),
    Image {
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

struct Job {
    address: BlockAddress,
    request: PendingRequest,
    context: GenerationContext,
}

/// Resolve every pending block of `project`. Generated images are stored as
/// attachments through `files` before they are referenced.
#[instrument(skip_all, fields(project_id = %project.id(), policy = %config.policy))]
pub async fn enrich(
    project: &mut Project,
    files: &FileManager,
    collaborators: &Collaborators,
    config: EnrichmentConfig,
) -> Result<EnrichmentOutcome> {
    let jobs = collect_jobs(project);
    let mut outcome = EnrichmentOutcome::default();
    if jobs.is_empty() {
        debug!("no pending blocks");
        return Ok(outcome);
    }
    info!(pending = jobs.len(), "requesting generated content");

    // `buffered` yields in input order, i.e. document order.
    let mut results = stream::iter(jobs)
        .map(|job| async move {
            let result = fulfil(collaborators, &job).await;
            (job, result)
        })
        .buffered(config.max_concurrent.max(1));

    while let Some((job, result)) = results.next().await {
        let block = match result {
            Ok(Generated::Text(text)) => ContentBlock::literal(text.trim()),
            Ok(Generated::Image { bytes, caption }) => {
                let attachment = store_generated_image(project, files, &job.address, &bytes)?;
                ContentBlock::ImageRef {
                    attachment,
                    caption,
                }
            }
            Err(e) => match config.policy {
                EnrichmentPolicy::AbortOnFirstFailure => {
                    error!(location = %job.address, error = %e, "collaborator failed, aborting");
                    return Err(e);
                }
                EnrichmentPolicy::SubstituteAndWarn => {
                    warn!(
                        location = %job.address,
                        error = %e,
                        "collaborator failed, substituting placeholder"
                    );
                    outcome.warnings.push(format!("{}: {e}", job.address));
                    project.replace_block(
                        &job.address,
                        ContentBlock::literal(format!("[content unavailable: {e}]")),
                    )?;
                    outcome.substituted.push(job.address);
                    continue;
                }
            },
        };
        project.replace_block(&job.address, block)?;
        outcome.enriched += 1;
    }

    info!(
        enriched = outcome.enriched,
        substituted = outcome.substituted.len(),
        "enrichment complete"
    );
    Ok(outcome)
}

fn collect_jobs(project: &Project) -> Vec<Job> {
    let meta = project.metadata();
    project
        .pending_blocks()
        .into_iter()
        .map(|(address, request)| {
            let section_path = (1..=address.section.len())
                .filter_map(|depth| project.section(&address.section[..depth]))
                .map(|section| section.title.clone())
                .collect();
            Job {
                context: GenerationContext {
                    project_title: meta.title.clone(),
                    section_path,
                    brief: meta.brief.clone(),
                    location: address.to_string(),
                },
                request: request.clone(),
                address,
            }
        })
        .collect()
}

async fn fulfil(collaborators: &Collaborators, job: &Job) -> Result<Generated> {
    match &job.request {
        PendingRequest::Text { prompt } => {
            let generator = collaborators.content.as_ref().ok_or_else(|| {
                ThesisError::ContentService {
                    location: job.address.to_string(),
                    message: "no content generator configured".into(),
                }
            })?;
            let text = generator.generate(prompt, &job.context).await?;
            if text.trim().is_empty() {
                return Err(ThesisError::ContentService {
                    location: job.address.to_string(),
                    message: "generator returned empty text".into(),
                });
            }
            Ok(Generated::Text(text))
        }
        PendingRequest::Image { query, caption } => {
            let search = collaborators.images.as_ref().ok_or_else(|| {
                ThesisError::ContentService {
                    location: job.address.to_string(),
                    message: "no image search configured".into(),
                }
            })?;
            let bytes = search.search(query).await?;
            if let Err(reason) = thesiskit_render::images::pixel_size(&bytes) {
                return Err(ThesisError::NotFound {
                    query: format!("usable image for '{query}' ({reason})"),
                });
            }
            Ok(Generated::Image {
                bytes,
                caption: caption.clone(),
            })
        }
    }
}

/// Store `bytes` as an inline image attachment named after the block address
/// (`gen-1-2-3`), returning the attachment id.
fn store_generated_image(
    project: &mut Project,
    files: &FileManager,
    address: &BlockAddress,
    bytes: &[u8],
) -> Result<String> {
    let stem = format!(
        "gen-{}-{}",
        address
            .section
            .iter()
            .map(|i| (i + 1).to_string())
            .collect::<Vec<_>>()
            .join("-"),
        address.block + 1
    );
    let extension = thesiskit_render::images::extension(bytes).unwrap_or("img");
    let taken = |id: &str| {
        let file_name = format!("{id}.{extension}");
        project.attachment(id).is_some()
            || project.attachments().iter().any(|a| a.file_name == file_name)
    };
    let mut id = stem.clone();
    let mut n = 1;
    while taken(&id) {
        n += 1;
        id = format!("{stem}-{n}");
    }

    let attachment = Attachment {
        id: id.clone(),
        file_name: format!("{id}.{extension}"),
        kind: AttachmentKind::Image,
        placement: Placement::default(),
    };
    // A rejected attachment never touches the disk.
    project.add_attachment(attachment.clone())?;
    if let Err(e) = files.store_attachment(project.id(), &attachment, bytes) {
        project.remove_attachment(&id);
        return Err(e);
    }
    debug!(%address, attachment = %id, "stored generated image");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use thesiskit_shared::{
        Metadata, MockContentGenerator, MockImageSearch, ProjectId, Section, StorageConfig,
    };

    use crate::tests::png;

    fn project() -> Project {
        let mut metadata = Metadata::new("Solar Energy", "Ana Lima");
        metadata.brief = Some("Write about photovoltaics".into());
        let mut p = Project::new(ProjectId::new("tcc").unwrap(), metadata).unwrap();
        p.add_section(
            Section::new("Introduction", 1)
                .with_block(ContentBlock::pending_text("intro"))
                .with_child(
                    Section::new("Context", 2)
                        .with_block(ContentBlock::literal("Kept."))
                        .with_block(ContentBlock::pending_image("solar panel", Some("Panel"))),
                ),
            &[],
        )
        .unwrap();
        p.add_section(
            Section::new("Conclusion", 1).with_block(ContentBlock::pending_text("conclusion")),
            &[],
        )
        .unwrap();
        p
    }

    fn files(dir: &tempfile::TempDir) -> FileManager {
        FileManager::new(&StorageConfig {
            projects_dir: dir.path().to_path_buf(),
        })
    }

    fn config(policy: EnrichmentPolicy) -> EnrichmentConfig {
        EnrichmentConfig {
            policy,
            max_concurrent: 4,
        }
    }

    fn working_images() -> Arc<dyn ImageSearch> {
        let mut images = MockImageSearch::new();
        images.expect_search().returning(|_| Ok(png(4, 3)));
        Arc::new(images)
    }

    #[tokio::test]
    async fn fills_every_pending_block() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(&dir);
        let mut content = MockContentGenerator::new();
        content
            .expect_generate()
            .times(2)
            .returning(|prompt, _| Ok(format!("Generated {prompt}.")));
        let collaborators = Collaborators {
            content: Some(Arc::new(content)),
            images: Some(working_images()),
        };

        let mut p = project();
        let outcome = enrich(
            &mut p,
            &files,
            &collaborators,
            config(EnrichmentPolicy::AbortOnFirstFailure),
        )
        .await
            .unwrap();

        assert_eq!(outcome.enriched, 3);
        assert!(outcome.warnings.is_empty());
        assert!(p.pending_blocks().is_empty());
        assert_eq!(p.sections()[0].blocks[0], ContentBlock::literal("Generated intro."));
        assert_eq!(
            p.sections()[0].children[0].blocks[1],
            ContentBlock::image("gen-1-1-2", Some("Panel"))
        );
        assert_eq!(p.attachment("gen-1-1-2").unwrap().file_name, "gen-1-1-2.png");
        assert!(files.attachments_dir(p.id()).join("gen-1-1-2.png").is_file());
        assert!(p.validate().is_ok());
    }

    #[tokio::test]
    async fn context_names_section_path_and_brief() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut content = MockContentGenerator::new();
        content.expect_generate().returning(move |_, context| {
            sink.lock().unwrap().push(context.clone());
            Ok("text".into())
        });
        let collaborators = Collaborators {
            content: Some(Arc::new(content)),
            images: Some(working_images()),
        };

        let mut p = project();
        enrich(&mut p, &files(&dir), &collaborators, config(EnrichmentPolicy::SubstituteAndWarn))
            .await
            .unwrap();

        let mut contexts = seen.lock().unwrap().clone();
        contexts.sort_by(|a, b| a.location.cmp(&b.location));
        assert_eq!(contexts[0].section_path, vec!["Introduction"]);
        assert_eq!(contexts[0].location, "section 1, block 1");
        assert_eq!(contexts[0].project_title, "Solar Energy");
        assert_eq!(contexts[0].brief.as_deref(), Some("Write about photovoltaics"));
        assert_eq!(contexts[1].section_path, vec!["Conclusion"]);
    }

    /// Answers the first prompt last.
    struct SlowFirst;

    #[async_trait::async_trait]
    impl ContentGenerator for SlowFirst {
        async fn generate(&self, prompt: &str, _context: &GenerationContext) -> Result<String> {
            if prompt == "intro" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Ok(format!("{prompt} text"))
        }
    }

    #[tokio::test]
    async fn merge_follows_document_order_not_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let collaborators = Collaborators {
            content: Some(Arc::new(SlowFirst)),
            images: Some(working_images()),
        };

        let mut p = project();
        enrich(&mut p, &files(&dir), &collaborators, config(EnrichmentPolicy::AbortOnFirstFailure))
            .await
            .unwrap();
        assert_eq!(p.sections()[0].blocks[0], ContentBlock::literal("intro text"));
        assert_eq!(p.sections()[1].blocks[0], ContentBlock::literal("conclusion text"));
    }

    #[tokio::test]
    async fn abort_policy_fails_on_first_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = MockContentGenerator::new();
        content.expect_generate().returning(|_, context| {
            Err(ThesisError::ContentService {
                location: context.location.clone(),
                message: "quota exceeded".into(),
            })
        });
        let collaborators = Collaborators {
            content: Some(Arc::new(content)),
            images: Some(working_images()),
        };

        let mut p = project();
        let err = enrich(
            &mut p,
            &files(&dir),
            &collaborators,
            config(EnrichmentPolicy::AbortOnFirstFailure),
        )
        .await
            .unwrap_err();
        assert!(matches!(err, ThesisError::ContentService { .. }));
        assert!(err.to_string().contains("section 1, block 1"));
    }

    #[tokio::test]
    async fn substitute_policy_records_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let mut images = MockImageSearch::new();
        images.expect_search().returning(|query| {
            Err(ThesisError::NotFound {
                query: query.to_string(),
            })
        });
        let mut content = MockContentGenerator::new();
        content.expect_generate().returning(|_, _| Ok("text".into()));
        let collaborators = Collaborators {
            content: Some(Arc::new(content)),
            images: Some(Arc::new(images)),
        };

        let mut p = project();
        let outcome = enrich(
            &mut p,
            &files(&dir),
            &collaborators,
            config(EnrichmentPolicy::SubstituteAndWarn),
        )
        .await
            .unwrap();

        assert_eq!(outcome.enriched, 2);
        assert_eq!(outcome.substituted, vec![BlockAddress::new(vec![0, 0], 1)]);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("section 1.1, block 2: not found: solar panel"));
        assert_eq!(
            p.sections()[0].children[0].blocks[1],
            ContentBlock::literal("[content unavailable: not found: solar panel]")
        );
        assert!(p.pending_blocks().is_empty());
    }

    #[tokio::test]
    async fn offline_build_substitutes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = project();
        let outcome = enrich(
            &mut p,
            &files(&dir),
            &Collaborators::none(),
            config(EnrichmentPolicy::SubstituteAndWarn),
        )
        .await
            .unwrap();
        assert_eq!(outcome.substituted.len(), 3);
        assert_eq!(outcome.enriched, 0);
    }

    #[tokio::test]
    async fn undecodable_image_is_a_collaborator_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut images = MockImageSearch::new();
        images
            .expect_search()
            .returning(|_| Ok(b"<html>not an image</html>".to_vec()));
        let collaborators = Collaborators {
            content: None,
            images: Some(Arc::new(images)),
        };
        let mut p = project();
        let outcome = enrich(
            &mut p,
            &files(&dir),
            &collaborators,
            config(EnrichmentPolicy::SubstituteAndWarn),
        )
        .await
            .unwrap();
        assert!(outcome.warnings.iter().any(|w| w.contains("usable image")));
        assert!(p.attachments().is_empty());
    }

    #[test]
    fn generated_image_skips_taken_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(&dir);
        let mut p = project();
        let existing = Attachment {
            id: "photo".into(),
            file_name: "gen-1-1.png".into(),
            kind: AttachmentKind::Image,
            placement: Placement::default(),
        };
        let path = files.store_attachment(p.id(), &existing, b"original").unwrap();
        p.add_attachment(existing).unwrap();

        let id = store_generated_image(&mut p, &files, &BlockAddress::new(vec![0], 0), &png(2, 2))
            .unwrap();

        assert_eq!(id, "gen-1-1-2");
        assert_eq!(std::fs::read(&path).unwrap(), b"original");
        assert!(files.attachments_dir(p.id()).join("gen-1-1-2.png").is_file());
    }

    #[test]
    fn failed_write_unregisters_generated_image() {
        let dir = tempfile::tempdir().unwrap();
        let files = files(&dir);
        let mut p = project();
        std::fs::create_dir_all(files.project_dir(p.id())).unwrap();
        // A plain file where the attachments directory should be.
        std::fs::write(files.attachments_dir(p.id()), b"").unwrap();

        let err = store_generated_image(&mut p, &files, &BlockAddress::new(vec![0], 0), &png(2, 2))
            .unwrap_err();

        assert!(matches!(err, ThesisError::Io { .. }));
        assert!(p.attachments().is_empty());
    }
}
