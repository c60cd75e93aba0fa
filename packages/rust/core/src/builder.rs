//! End-to-end build: load → validate → enrich → re-validate → template →
//! render → persist.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use thesiskit_render::RenderOutput;
use thesiskit_shared::{
    AssetResolver, BuildConfig, ContentBlock, LayoutConfig, ProjectId, Result, ThesisError,
};
use thesiskit_storage::{BuildManifest, FileManager};

use crate::enrichment::{self, Collaborators, EnrichmentConfig};
use crate::project::{BlockAddress, Project};
use crate::template;

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub project_id: ProjectId,
    pub output_path: PathBuf,
    pub pages: usize,
    pub bytes: usize,
    pub sha256: String,
    /// Substituted blocks, `<location>: <error>`.
    pub warnings: Vec<String>,
    /// Pending blocks filled by a collaborator.
    pub enriched_blocks: usize,
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting build status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for every enrichment substitution.
    fn warning(&self, message: &str);
    /// Called when the build completes.
    fn done(&self, report: &BuildReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn warning(&self, _message: &str) {}
    fn done(&self, _report: &BuildReport) {}
}

/// Cooperative cancellation, checked between build steps. Once rendering has
/// started the build runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, id: &ProjectId, step: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ThesisError::Cancelled {
                project_id: id.to_string(),
                step: step.to_string(),
            });
        }
        Ok(())
    }
}

/// Drives one project through the whole pipeline.
pub struct Builder {
    config: BuildConfig,
    files: FileManager,
    collaborators: Collaborators,
    cancel: CancelToken,
}

impl Builder {
    pub fn new(config: BuildConfig, files: FileManager, collaborators: Collaborators) -> Self {
        Self {
            config,
            files,
            collaborators,
            cancel: CancelToken::new(),
        }
    }

    /// Token that cancels builds started by this builder.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Build the stored project `id` and write `output/<id>.pdf`.
    #[instrument(skip_all, fields(project_id = %id, policy = %self.config.policy))]
    pub async fn build(
        &self,
        id: &ProjectId,
        progress: &dyn ProgressReporter,
    ) -> Result<BuildReport> {
        let start = Instant::now();
        let _lock = self.files.acquire_build_lock(id)?;

        // Step 1: load and validate
        progress.phase("Loading project");
        let mut project = Project::from_document(self.files.load_project_document(id)?)?;
        project.validate()?;
        self.cancel.check(id, "enrichment")?;

        // Step 2: enrich pending blocks
        progress.phase("Generating content");
        let pending: HashMap<BlockAddress, ContentBlock> = project
            .pending_blocks()
            .into_iter()
            .map(|(address, request)| {
                let block = ContentBlock::PendingGeneration {
                    request: request.clone(),
                };
                (address, block)
            })
            .collect();
        let outcome = enrichment::enrich(
            &mut project,
            &self.files,
            &self.collaborators,
            EnrichmentConfig {
                policy: self.config.policy,
                max_concurrent: self.config.max_concurrent_requests,
            },
        )
        .await?;
        for warning in &outcome.warnings {
            progress.warning(warning);
        }
        if outcome.enriched > 0 {
            // Persist what was generated; substituted blocks stay pending on
            // disk so the next build asks again.
            let mut persisted = project.clone();
            for address in &outcome.substituted {
                if let Some(block) = pending.get(address) {
                    persisted.replace_block(address, block.clone())?;
                }
            }
            self.files.save_project(&persisted.to_document())?;
        }
        self.cancel.check(id, "rendering")?;

        // Steps 3-4: re-validate, template, render
        progress.phase("Rendering document");
        let assets = self.files.assets(id, project.attachments());
        let output = render_project(&project, &self.config.layout, &assets)?;

        // Step 5: persist
        progress.phase("Writing output");
        let meta = self.files.write_output(id, &output.bytes)?;
        let file_name = meta
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.files.write_build_manifest(&BuildManifest {
            build_id: Uuid::now_v7(),
            project_id: id.clone(),
            file_name,
            sha256: meta.sha256.clone(),
            size_bytes: meta.size_bytes,
            pages: output.page_count(),
            warnings: outcome.warnings.clone(),
            built_at: Utc::now(),
        })?;

        let report = BuildReport {
            project_id: id.clone(),
            output_path: meta.path,
            pages: output.page_count(),
            bytes: meta.size_bytes,
            sha256: meta.sha256,
            warnings: outcome.warnings,
            enriched_blocks: outcome.enriched,
            elapsed: start.elapsed(),
        };
        progress.done(&report);

        info!(
            pages = report.pages,
            size = report.bytes,
            warnings = report.warnings.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "build complete"
        );
        Ok(report)
    }
}

/// The pure part of a build: validate, format and render a fully populated
/// project. Same project, config and assets ⇒ same bytes.
#[instrument(skip_all, fields(project_id = %project.id()))]
pub fn render_project(
    project: &Project,
    layout: &LayoutConfig,
    assets: &dyn AssetResolver,
) -> Result<RenderOutput> {
    let validated = project.validate()?;
    let formatted = template::generate(&validated, layout)?;
    thesiskit_render::render(&formatted, layout, assets)
}
