//! Run configuration.
//!
//! CLI flags are the primary source; an optional TOML file supplies
//! defaults for the settings that rarely change per run (model endpoint,
//! log level, mutation tool). CLI values win over file values.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML config file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub general: GeneralSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub mutation: MutationSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralSection {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_db_path")]
    pub log_db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// When true, every prompt is appended to `prompt.txt` under the
    /// project root.
    #[serde(default)]
    pub record_prompts: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MutationSection {
    /// Whether to run the mutation oracle after each passing candidate.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mutation_command")]
    pub command: String,
    #[serde(default = "default_mutation_src_dir")]
    pub src_dir: String,
    #[serde(default = "default_mutation_test_dir")]
    pub test_dir: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_db_path() -> PathBuf {
    PathBuf::from("covgen_attempts.db")
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-coder".to_string()
}

fn default_mutation_command() -> String {
    "mut.py".to_string()
}

fn default_mutation_src_dir() -> String {
    "src".to_string()
}

fn default_mutation_test_dir() -> String {
    "tests".to_string()
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_db_path: default_log_db_path(),
        }
    }
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            model: default_llm_model(),
            record_prompts: false,
        }
    }
}

impl Default for MutationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_mutation_command(),
            src_dir: default_mutation_src_dir(),
            test_dir: default_mutation_test_dir(),
        }
    }
}

impl ConfigFile {
    /// Load from `path`, or defaults when no file is given or present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config from {:?}", path))
    }
}

/// Fully resolved parameters for one agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub source_file_path: PathBuf,
    pub test_file_path: PathBuf,
    /// Where the grown test suite is written. When unset the original test
    /// file is modified in place.
    pub test_file_output_path: Option<PathBuf>,
    pub project_root: PathBuf,
    pub code_coverage_report_path: PathBuf,
    pub test_command: String,
    pub test_command_dir: PathBuf,
    pub included_files: Vec<PathBuf>,
    /// Consider coverage of every file in the report, not just the source
    /// file's aggregate numbers.
    pub use_report_coverage: bool,
    /// Measure coverage of changed lines only, against `comparison_branch`.
    pub diff_coverage: bool,
    pub comparison_branch: String,
    pub desired_coverage: u32,
    pub desired_mutation_score: f64,
    pub strict_coverage: bool,
    pub strict_mutation_score: bool,
    pub max_iterations: u32,
    /// Times to run the test command per candidate (flakiness guard).
    pub num_attempts: usize,
    pub additional_instructions: String,
    pub general: GeneralSection,
    pub llm: LlmSection,
    pub mutation: MutationSection,
}

/// Map a source file extension to its language name, for prompts.
pub fn language_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
    {
        "py" => "python",
        "rs" => "rust",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        _ => "unknown",
    }
}
