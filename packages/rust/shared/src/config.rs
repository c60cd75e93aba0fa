//! Application configuration for thesiskit.
//!
//! User config lives at `~/.thesiskit/thesiskit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThesisError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "thesiskit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".thesiskit";

const MM_TO_PT: f32 = 72.0 / 25.4;

// ---------------------------------------------------------------------------
// Config structs (matching thesiskit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Page geometry and document options.
    #[serde(default)]
    pub layout: LayoutSection,

    /// Gemini content-generation settings.
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Image-search settings.
    #[serde(default)]
    pub images: ImagesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding one subdirectory per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: String,

    /// What to do when a collaborator fails: `substitute` or `abort`.
    #[serde(default)]
    pub enrichment_policy: EnrichmentPolicy,

    /// Upper bound on in-flight collaborator requests per build.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            enrichment_policy: EnrichmentPolicy::default(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

fn default_projects_dir() -> String {
    "~/thesiskit-projects".into()
}
fn default_max_concurrent() -> usize {
    4
}

/// Uniform policy applied to every collaborator failure of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnrichmentPolicy {
    /// The first failing request fails the whole build.
    #[serde(rename = "abort")]
    AbortOnFirstFailure,
    /// Failing blocks get placeholder text and a recorded warning.
    #[default]
    #[serde(rename = "substitute")]
    SubstituteAndWarn,
}

impl std::str::FromStr for EnrichmentPolicy {
    type Err = ThesisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(Self::AbortOnFirstFailure),
            "substitute" => Ok(Self::SubstituteAndWarn),
            other => Err(ThesisError::config(format!(
                "unknown enrichment policy '{other}' (expected 'abort' or 'substitute')"
            ))),
        }
    }
}

impl std::fmt::Display for EnrichmentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AbortOnFirstFailure => f.write_str("abort"),
            Self::SubstituteAndWarn => f.write_str("substitute"),
        }
    }
}

/// Paper size of the rendered document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    #[default]
    A4,
    Letter,
}

impl PageSize {
    /// Width and height in PDF points.
    pub fn dimensions_pt(self) -> (f32, f32) {
        match self {
            Self::A4 => (595.28, 841.89),
            Self::Letter => (612.0, 792.0),
        }
    }
}

/// `[layout]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSection {
    #[serde(default)]
    pub page_size: PageSize,

    /// Margins in millimetres.
    #[serde(default = "default_margin_top")]
    pub margin_top_mm: f32,
    #[serde(default = "default_margin_bottom")]
    pub margin_bottom_mm: f32,
    #[serde(default = "default_margin_left")]
    pub margin_left_mm: f32,
    #[serde(default = "default_margin_right")]
    pub margin_right_mm: f32,

    /// Body text size in points.
    #[serde(default = "default_font_size")]
    pub base_font_size: f32,

    /// Line height as a multiple of the font size.
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,

    /// Start every top-level section on a new page.
    #[serde(default = "default_true")]
    pub chapter_page_break: bool,

    /// Append a References section listing every source.
    #[serde(default = "default_true")]
    pub bibliography: bool,

    /// Source key of the cover logo, used when the file exists.
    #[serde(default = "default_cover_logo")]
    pub cover_logo: String,

    /// Source key of a full-page background image. Empty disables it.
    #[serde(default)]
    pub background: String,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            margin_top_mm: default_margin_top(),
            margin_bottom_mm: default_margin_bottom(),
            margin_left_mm: default_margin_left(),
            margin_right_mm: default_margin_right(),
            base_font_size: default_font_size(),
            line_spacing: default_line_spacing(),
            chapter_page_break: true,
            bibliography: true,
            cover_logo: default_cover_logo(),
            background: String::new(),
        }
    }
}

fn default_margin_top() -> f32 {
    30.0
}
fn default_margin_bottom() -> f32 {
    20.0
}
fn default_margin_left() -> f32 {
    30.0
}
fn default_margin_right() -> f32 {
    20.0
}
fn default_font_size() -> f32 {
    12.0
}
fn default_line_spacing() -> f32 {
    1.5
}
fn default_true() -> bool {
    true
}
fn default_cover_logo() -> String {
    "logo.png".into()
}

/// `[gemini]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for text generation.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the Generative Language API.
    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint: default_gemini_endpoint(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Image results page queried with `?q=<query>`.
    #[serde(default = "default_images_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_images_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_images_endpoint() -> String {
    "https://www.bing.com/images/search".into()
}
fn default_timeout_secs() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Page geometry and document options in PDF points, ready for layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    pub page_width: f32,
    pub page_height: f32,
    pub margin_top: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub margin_right: f32,
    pub base_font_size: f32,
    pub line_spacing: f32,
    pub chapter_page_break: bool,
    pub bibliography: bool,
    pub cover_logo: Option<String>,
    pub background: Option<String>,
}

impl LayoutConfig {
    pub fn content_width(&self) -> f32 {
        self.page_width - self.margin_left - self.margin_right
    }

    pub fn content_height(&self) -> f32 {
        self.page_height - self.margin_top - self.margin_bottom
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for LayoutConfig {
    fn from(config: &AppConfig) -> Self {
        let layout = &config.layout;
        let (page_width, page_height) = layout.page_size.dimensions_pt();
        Self {
            page_width,
            page_height,
            margin_top: layout.margin_top_mm * MM_TO_PT,
            margin_bottom: layout.margin_bottom_mm * MM_TO_PT,
            margin_left: layout.margin_left_mm * MM_TO_PT,
            margin_right: layout.margin_right_mm * MM_TO_PT,
            base_font_size: layout.base_font_size,
            line_spacing: layout.line_spacing,
            chapter_page_break: layout.chapter_page_break,
            bibliography: layout.bibliography,
            cover_logo: Some(layout.cover_logo.clone()).filter(|s| !s.is_empty()),
            background: Some(layout.background.clone()).filter(|s| !s.is_empty()),
        }
    }
}

/// Where project directories live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub projects_dir: PathBuf,
}

impl From<&AppConfig> for StorageConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            projects_dir: expand_home(&config.defaults.projects_dir),
        }
    }
}

/// Runtime build configuration handed to the builder.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub policy: EnrichmentPolicy,
    pub max_concurrent_requests: usize,
    pub layout: LayoutConfig,
}

impl From<&AppConfig> for BuildConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            policy: config.defaults.enrichment_policy,
            max_concurrent_requests: config.defaults.max_concurrent_requests.max(1),
            layout: LayoutConfig::from(config),
        }
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.thesiskit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| ThesisError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.thesiskit/thesiskit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ThesisError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ThesisError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ThesisError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ThesisError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ThesisError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the Gemini API key from the env var named in the config.
pub fn gemini_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.gemini.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ThesisError::config(format!(
            "Gemini API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://aistudio.google.com/apikey"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("projects_dir"));
        assert!(toml_str.contains("GEMINI_API_KEY"));
        assert!(toml_str.contains("enrichment_policy = \"substitute\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.defaults.max_concurrent_requests, 4);
        assert_eq!(parsed.layout.page_size, PageSize::A4);
        assert_eq!(parsed.gemini.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[defaults]
projects_dir = "/tmp/projects"
enrichment_policy = "abort"

[layout]
page_size = "letter"
bibliography = false
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(
            config.defaults.enrichment_policy,
            EnrichmentPolicy::AbortOnFirstFailure
        );
        assert_eq!(config.layout.page_size, PageSize::Letter);
        assert!(!config.layout.bibliography);
        assert!(config.layout.chapter_page_break);
        assert_eq!(config.layout.margin_left_mm, 30.0);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("thesiskit.toml");
        std::fs::write(&path, "[gemini]\nmodel = \"gemini-pro\"\n").expect("write");
        let config = load_config_from(&path).expect("load");
        assert_eq!(config.gemini.model, "gemini-pro");

        std::fs::write(&path, "[gemini\n").expect("write");
        assert!(matches!(
            load_config_from(&path),
            Err(ThesisError::Config { .. })
        ));
    }

    #[test]
    fn layout_config_converts_millimetres() {
        let layout = LayoutConfig::from(&AppConfig::default());
        assert!((layout.margin_left - 85.04).abs() < 0.01);
        assert!((layout.page_width - 595.28).abs() < 0.01);
        assert!(layout.content_width() > 400.0);
        assert_eq!(layout.cover_logo.as_deref(), Some("logo.png"));
        assert_eq!(layout.background, None);
    }

    #[test]
    fn build_config_from_app_config() {
        let mut app = AppConfig::default();
        app.defaults.max_concurrent_requests = 0;
        let build = BuildConfig::from(&app);
        assert_eq!(build.policy, EnrichmentPolicy::SubstituteAndWarn);
        assert_eq!(build.max_concurrent_requests, 1);
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!(
            "abort".parse::<EnrichmentPolicy>().expect("parse"),
            EnrichmentPolicy::AbortOnFirstFailure
        );
        assert!("retry".parse::<EnrichmentPolicy>().is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/srv/projects"), PathBuf::from("/srv/projects"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.gemini.api_key_env = "TK_TEST_NONEXISTENT_KEY_12345".into();
        let result = gemini_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
