mod agent;
mod analysis;
mod config;
mod coverage;
mod db;
mod generator;
mod llm;
mod mutation;
mod prompt;
mod runner;
mod validator;

use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::agent::Agent;
use crate::config::{AgentConfig, ConfigFile};

#[derive(Parser)]
#[command(name = "covgen")]
#[command(version)]
#[command(about = "Grows an existing test suite with LLM-generated, validated unit tests")]
struct Cli {
    /// Path to the source file to cover
    #[arg(long)]
    source_file_path: PathBuf,

    /// Path to the existing test file to extend
    #[arg(long)]
    test_file_path: PathBuf,

    /// Where to write the grown test suite (defaults to modifying the test
    /// file in place)
    #[arg(long)]
    test_file_output_path: Option<PathBuf>,

    /// Project root, for reports and relative paths
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    /// Path the test command writes its coverage report to
    #[arg(long, default_value = "coverage.xml")]
    code_coverage_report_path: PathBuf,

    /// Command that runs the test suite and produces the coverage report
    #[arg(long)]
    test_command: String,

    /// Directory to run the test command in
    #[arg(long)]
    test_command_dir: Option<PathBuf>,

    /// Extra files to include as context in the generation prompt
    #[arg(long)]
    included_files: Vec<PathBuf>,

    /// Consider coverage of every file in the report, not just the target
    #[arg(long)]
    use_report_coverage_feature_flag: bool,

    /// Measure coverage of changed lines only (requires diff-cover)
    #[arg(long)]
    diff_coverage: bool,

    /// Branch to compare against in diff-coverage mode
    #[arg(long, default_value = "main")]
    branch: String,

    /// Target coverage percentage
    #[arg(long, default_value_t = 90)]
    desired_coverage: u32,

    /// Target mutation score percentage
    #[arg(long, default_value_t = 70.0)]
    desired_mutation_score: f64,

    /// Fail (exit 2) if the coverage target is not reached
    #[arg(long)]
    strict_coverage: bool,

    /// Fail (exit 3) if the mutation-score target is not reached
    #[arg(long)]
    strict_mutation_score: bool,

    /// Maximum generate/validate iterations
    #[arg(long, default_value_t = 10)]
    max_iterations: u32,

    /// Times to run the test command per candidate (flakiness guard)
    #[arg(long, default_value_t = 1)]
    run_tests_multiple_times: usize,

    /// Free-form instructions appended to the generation prompt
    #[arg(long, default_value = "")]
    additional_instructions: String,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = ConfigFile::load(cli.config.as_deref())?;

    // Initialize logging
    let level = Level::from_str(&file.general.log_level).unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    let config = AgentConfig {
        source_file_path: cli.source_file_path,
        test_file_path: cli.test_file_path,
        test_file_output_path: cli.test_file_output_path,
        project_root: cli.project_root.clone(),
        code_coverage_report_path: cli.code_coverage_report_path,
        test_command: cli.test_command,
        test_command_dir: cli.test_command_dir.unwrap_or(cli.project_root),
        included_files: cli.included_files,
        use_report_coverage: cli.use_report_coverage_feature_flag,
        diff_coverage: cli.diff_coverage,
        comparison_branch: cli.branch,
        desired_coverage: cli.desired_coverage,
        desired_mutation_score: cli.desired_mutation_score,
        strict_coverage: cli.strict_coverage,
        strict_mutation_score: cli.strict_mutation_score,
        max_iterations: cli.max_iterations,
        num_attempts: cli.run_tests_multiple_times,
        additional_instructions: cli.additional_instructions,
        general: file.general,
        llm: file.llm,
        mutation: file.mutation,
    };

    tracing::info!("Using model {} at {}", config.llm.model, config.llm.url);

    let mut agent = Agent::new(config).await?;
    let outcome = agent.run().await?;
    std::process::exit(outcome.exit_code());
}
