//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use thesiskit_core::{BuildReport, Builder, Collaborators, ProgressReporter, Project};
use thesiskit_services::{BingImageSearch, GeminiClient};
use thesiskit_shared::{
    AppConfig, Attachment, AttachmentKind, BuildConfig, ContentBlock, ContentGenerator,
    EnrichmentPolicy, ImageSearch, Metadata, Placement, PlacementMode, ProjectId, Section, Source,
    StorageConfig, init_config, load_config,
};
use thesiskit_storage::FileManager;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// thesiskit: assemble academic projects and render them to PDF.
#[derive(Parser)]
#[command(
    name = "thesiskit",
    version,
    about = "Assemble academic projects from sections, sources and attachments into PDF.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding the projects (overrides the config file).
    #[arg(long, global = true, env = "THESISKIT_PROJECTS_DIR")]
    pub projects_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create a project with the default Introduction / Development / Conclusion outline.
    New {
        /// Project id (lowercase letters, digits, '-' or '_').
        id: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        author: String,

        #[arg(long)]
        institution: Option<String>,

        #[arg(long)]
        course: Option<String>,

        #[arg(long)]
        discipline: Option<String>,

        #[arg(long)]
        advisor: Option<String>,

        #[arg(long)]
        place: Option<String>,

        #[arg(long)]
        year: Option<i32>,

        /// Assignment statement handed to the content generator.
        #[arg(long)]
        brief: Option<String>,

        /// Start without any sections.
        #[arg(long)]
        empty: bool,
    },

    /// Attach an image or file to a project.
    Attach {
        /// Project id.
        project: String,

        /// File to attach.
        file: PathBuf,

        /// Attachment id (defaults to a slug of the file name).
        #[arg(long)]
        id: Option<String>,

        /// Place the attachment in the appendix instead of inline.
        #[arg(long)]
        appendix: bool,

        /// Treat the payload as an opaque file rather than an image.
        #[arg(long)]
        opaque: bool,

        /// Bounding box width in millimetres.
        #[arg(long)]
        width_mm: Option<f32>,

        /// Bounding box height in millimetres.
        #[arg(long)]
        height_mm: Option<f32>,
    },

    /// Add a bibliographic source to a project.
    Source {
        /// Project id.
        project: String,

        /// Citation key.
        #[arg(long)]
        key: String,

        #[arg(long)]
        author: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        publisher: Option<String>,

        #[arg(long)]
        url: Option<String>,
    },

    /// Store the cover logo of a project.
    Logo {
        /// Project id.
        project: String,

        /// Image file.
        file: PathBuf,
    },

    /// Check a project's structure and references without building it.
    Validate {
        /// Project id.
        project: String,
    },

    /// Fill pending content and render the project to PDF.
    Build {
        /// Project id.
        project: String,

        /// Enrichment failure policy: substitute or abort.
        #[arg(long)]
        policy: Option<EnrichmentPolicy>,

        /// Do not contact any external service.
        #[arg(long)]
        offline: bool,
    },

    /// Remove a build lock left behind by an interrupted build.
    Unlock {
        /// Project id.
        project: String,
    },

    /// List all projects.
    List,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "thesiskit=info",
        1 => "thesiskit=debug",
        _ => "thesiskit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let files = file_manager(&config, cli.projects_dir.as_deref());

    match cli.command {
        Command::New {
            id,
            title,
            author,
            institution,
            course,
            discipline,
            advisor,
            place,
            year,
            brief,
            empty,
        } => {
            let metadata = Metadata {
                institution,
                course,
                discipline,
                advisor,
                place,
                year,
                brief,
                ..Metadata::new(title, author)
            };
            cmd_new(&files, &id, metadata, empty)
        }
        Command::Attach {
            project,
            file,
            id,
            appendix,
            opaque,
            width_mm,
            height_mm,
        } => {
            let mut placement = Placement::default();
            if appendix {
                placement.mode = PlacementMode::Appendix;
            }
            if let Some(w) = width_mm {
                placement.width_mm = w;
            }
            if let Some(h) = height_mm {
                placement.height_mm = h;
            }
            let kind = if opaque {
                AttachmentKind::File
            } else {
                AttachmentKind::Image
            };
            cmd_attach(&files, &project, &file, id.as_deref(), kind, placement)
        }
        Command::Source {
            project,
            key,
            author,
            title,
            year,
            publisher,
            url,
        } => cmd_source(
            &files,
            &project,
            Source {
                key,
                author,
                title,
                year,
                publisher,
                url,
            },
        ),
        Command::Logo { project, file } => cmd_logo(&files, &config, &project, &file),
        Command::Validate { project } => cmd_validate(&files, &project),
        Command::Build {
            project,
            policy,
            offline,
        } => cmd_build(files, &config, &project, policy, offline).await,
        Command::Unlock { project } => cmd_unlock(&files, &project),
        Command::List => cmd_list(&files),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

fn file_manager(config: &AppConfig, override_dir: Option<&Path>) -> FileManager {
    let mut storage = StorageConfig::from(config);
    if let Some(dir) = override_dir {
        storage.projects_dir = dir.to_path_buf();
    }
    FileManager::new(&storage)
}

fn load_project(files: &FileManager, id: &str) -> Result<Project> {
    let id = ProjectId::new(id)?;
    let doc = files
        .load_project_document(&id)
        .wrap_err_with(|| format!("cannot load project '{id}'"))?;
    Ok(Project::from_document(doc)?)
}

fn save_project(files: &FileManager, project: &Project) -> Result<()> {
    files.save_project(&project.to_document())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

/// Default outline: one pending text block per top-level section.
fn default_outline() -> Vec<Section> {
    [
        ("Introduction", "Write the introduction: context, objectives and structure of the work."),
        ("Development", "Develop the main topic with definitions, discussion and examples."),
        ("Conclusion", "Write the conclusion summarizing the findings of the work."),
    ]
    .into_iter()
    .map(|(title, prompt)| Section::new(title, 1).with_block(ContentBlock::pending_text(prompt)))
    .collect()
}

fn cmd_new(files: &FileManager, id: &str, metadata: Metadata, empty: bool) -> Result<()> {
    let id = ProjectId::new(id)?;
    if files.project_exists(&id) {
        return Err(eyre!("project '{id}' already exists"));
    }

    let mut project = Project::new(id.clone(), metadata)?;
    if !empty {
        for section in default_outline() {
            project.add_section(section, &[])?;
        }
    }
    files.ensure_layout(&id)?;
    save_project(files, &project)?;

    info!(project_id = %id, "project created");
    println!("Created project '{id}' at {}", files.project_dir(&id).display());
    Ok(())
}

/// Lowercase slug of a file stem, usable as an attachment id.
fn slug(stem: &str) -> String {
    let mut out = String::new();
    for ch in stem.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn cmd_attach(
    files: &FileManager,
    project_id: &str,
    file: &Path,
    id: Option<&str>,
    kind: AttachmentKind,
    placement: Placement,
) -> Result<()> {
    let mut project = load_project(files, project_id)?;
    let bytes = std::fs::read(file).wrap_err_with(|| format!("cannot read {}", file.display()))?;

    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = id.map(String::from).unwrap_or_else(|| slug(&stem));
    if id.is_empty() {
        return Err(eyre!("cannot derive an attachment id from {}, pass --id", file.display()));
    }
    let file_name = match file.extension() {
        Some(ext) => format!("{id}.{}", ext.to_string_lossy().to_lowercase()),
        None => id.clone(),
    };

    let attachment = Attachment {
        id: id.clone(),
        file_name,
        kind,
        placement,
    };
    project.add_attachment(attachment.clone())?;
    files.store_attachment(project.id(), &attachment, &bytes)?;
    save_project(files, &project)?;

    println!("Attached '{id}' to project '{}'", project.id());
    Ok(())
}

fn cmd_source(files: &FileManager, project_id: &str, source: Source) -> Result<()> {
    let mut project = load_project(files, project_id)?;
    let key = source.key.clone();
    project.add_source(source)?;
    save_project(files, &project)?;
    println!("Added source '{key}' to project '{}'", project.id());
    Ok(())
}

fn cmd_logo(files: &FileManager, config: &AppConfig, project_id: &str, file: &Path) -> Result<()> {
    let id = ProjectId::new(project_id)?;
    if !files.project_exists(&id) {
        return Err(eyre!("project '{id}' does not exist"));
    }
    let key = &config.layout.cover_logo;
    if key.is_empty() {
        return Err(eyre!("cover logos are disabled (layout.cover_logo is empty)"));
    }
    let bytes = std::fs::read(file).wrap_err_with(|| format!("cannot read {}", file.display()))?;
    let path = files.store_source(&id, key, &bytes)?;
    println!("Stored cover logo at {}", path.display());
    Ok(())
}

fn cmd_validate(files: &FileManager, project_id: &str) -> Result<()> {
    let project = load_project(files, project_id)?;
    project.validate()?;

    let mut sections = 0;
    project.walk(|_, _| sections += 1);
    println!("Project '{}' is valid.", project.id());
    println!("  Sections:    {sections}");
    println!("  Sources:     {}", project.sources().count());
    println!("  Attachments: {}", project.attachments().len());
    println!("  Pending:     {}", project.pending_blocks().len());
    Ok(())
}

async fn cmd_build(
    files: FileManager,
    config: &AppConfig,
    project_id: &str,
    policy: Option<EnrichmentPolicy>,
    offline: bool,
) -> Result<()> {
    let id = ProjectId::new(project_id)?;
    let mut build_config = BuildConfig::from(config);
    if let Some(policy) = policy {
        build_config.policy = policy;
    }

    let collaborators = if offline {
        Collaborators::none()
    } else {
        collaborators(config)?
    };

    let builder = Builder::new(build_config, files, collaborators);
    let reporter = CliProgress::new();
    // Dropping the build future on Ctrl-C releases the build lock.
    let report = tokio::select! {
        report = builder.build(&id, &reporter) => report?,
        _ = tokio::signal::ctrl_c() => return Err(eyre!("build of '{id}' interrupted")),
    };

    println!();
    println!("  Document built successfully!");
    println!("  Project:  {}", report.project_id);
    println!("  Pages:    {}", report.pages);
    println!("  Size:     {} bytes", report.bytes);
    println!("  SHA-256:  {}", report.sha256);
    println!("  Enriched: {} block(s)", report.enriched_blocks);
    println!("  Path:     {}", report.output_path.display());
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    if !report.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &report.warnings {
            println!("    - {warning}");
        }
    }
    println!();
    Ok(())
}

fn cmd_unlock(files: &FileManager, project_id: &str) -> Result<()> {
    let id = ProjectId::new(project_id)?;
    if files.break_build_lock(&id)? {
        println!("Build lock of '{id}' removed.");
    } else {
        println!("Project '{id}' is not locked.");
    }
    Ok(())
}

/// HTTP collaborators from the config. A missing API key disables content
/// generation instead of failing the build up front.
fn collaborators(config: &AppConfig) -> Result<Collaborators> {
    let content: Option<Arc<dyn ContentGenerator>> = match GeminiClient::from_app_config(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "content generation disabled");
            None
        }
    };
    let images: Option<Arc<dyn ImageSearch>> = if config.images.enabled {
        Some(Arc::new(BingImageSearch::new(&config.images)?))
    } else {
        None
    };
    Ok(Collaborators { content, images })
}

fn cmd_list(files: &FileManager) -> Result<()> {
    let ids = files.list_projects()?;
    if ids.is_empty() {
        println!("No projects in {}", files.root().display());
        return Ok(());
    }

    for id in ids {
        match files.load_project_document(&id) {
            Ok(doc) => {
                let built = files
                    .read_build_manifest(&id)
                    .map(|m| {
                        let built_at = m.built_at.format("%Y-%m-%d %H:%M");
                        format!("{} pages, built {built_at}", m.pages)
                    })
                    .unwrap_or_else(|_| "not built".into());
                println!("{id:<24} {:<40} {built}", doc.metadata.title);
            }
            Err(e) => println!("{id:<24} (unreadable: {e})"),
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn warning(&self, message: &str) {
        self.spinner.println(format!("  warning: {message}"));
    }

    fn done(&self, report: &BuildReport) {
        self.spinner
            .finish_with_message(format!("Done: {} pages", report.pages));
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}
