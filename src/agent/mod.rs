//! The agent loop.
//!
//! Drives generation and validation until the coverage goal (and, in
//! strict-mutation mode, the mutation-score goal) is met or the iteration
//! budget runs out, then maps the result onto the process exit code.

use crate::analysis::FailedTestAnalyzer;
use crate::config::{language_for, AgentConfig};
use crate::coverage::CoverageMode;
use crate::db::AttemptLog;
use crate::generator::{FailureDiagnoser, TestGenerator};
use crate::llm::LlmClient;
use crate::prompt::PromptBuilder;
use crate::validator::{RunState, Validator, ValidatorOptions};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Terminal result of one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// All goals met before the budget ran out.
    Success,
    /// Budget exhausted, but no strict goal was requested.
    ExhaustedNonStrict,
    /// Budget exhausted with `strict_coverage` set and coverage unmet.
    StrictCoverageFailed,
    /// Budget exhausted with `strict_mutation_score` set and the mutation
    /// goal unmet (only when coverage did not already fail strictly).
    StrictMutationFailed,
}

impl AgentOutcome {
    /// Process exit codes are part of the tool's contract: callers script
    /// against them.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success | Self::ExhaustedNonStrict => 0,
            Self::StrictCoverageFailed => 2,
            Self::StrictMutationFailed => 3,
        }
    }
}

/// Check whether the run's goals are met.
fn goals_met(config: &AgentConfig, state: &RunState) -> bool {
    let coverage_met = state.coverage.overall >= f64::from(config.desired_coverage) / 100.0;
    if config.strict_mutation_score {
        coverage_met && state.mutation.current_score >= config.desired_mutation_score
    } else {
        coverage_met
    }
}

/// Map an exhausted budget onto the final outcome.
fn exhausted_outcome(config: &AgentConfig, state: &RunState) -> AgentOutcome {
    let coverage_met = state.coverage.overall >= f64::from(config.desired_coverage) / 100.0;
    let mutation_met = state.mutation.current_score >= config.desired_mutation_score;
    if config.strict_coverage && !coverage_met {
        AgentOutcome::StrictCoverageFailed
    } else if config.strict_mutation_score && !mutation_met {
        AgentOutcome::StrictMutationFailed
    } else {
        AgentOutcome::ExhaustedNonStrict
    }
}

/// Ensure the configured paths exist before anything runs.
fn validate_paths(config: &AgentConfig) -> Result<()> {
    if !config.source_file_path.is_file() {
        anyhow::bail!(
            "Source file not found at {}",
            config.source_file_path.display()
        );
    }
    if !config.test_file_path.is_file() {
        anyhow::bail!(
            "Test file not found at {}",
            config.test_file_path.display()
        );
    }
    if !config.project_root.as_os_str().is_empty() && !config.project_root.is_dir() {
        anyhow::bail!(
            "Project root not found at {}",
            config.project_root.display()
        );
    }
    Ok(())
}

/// Copy the test file to the output path (the copy is what gets modified),
/// or fall back to in-place modification. Returns the file the run works on.
fn duplicate_test_file(config: &AgentConfig) -> Result<PathBuf> {
    match &config.test_file_output_path {
        Some(output) => {
            std::fs::copy(&config.test_file_path, output).with_context(|| {
                format!(
                    "Failed to copy test file to output path {}",
                    output.display()
                )
            })?;
            Ok(output.clone())
        }
        None => Ok(config.test_file_path.clone()),
    }
}

/// Concatenate extra context files for the generation prompt. Unreadable
/// files are logged and skipped.
fn read_included_files(paths: &[PathBuf]) -> String {
    let mut sections = Vec::new();
    for path in paths {
        match std::fs::read_to_string(path) {
            Ok(content) => sections.push(format!(
                "file_path: `{}`\ncontent:\n```\n{}\n```",
                path.display(),
                content
            )),
            Err(e) => tracing::warn!("Error reading included file {}: {}", path.display(), e),
        }
    }
    sections.join("\n")
}

pub struct Agent {
    config: AgentConfig,
    test_file_path: PathBuf,
    generator: TestGenerator,
    validator: Validator,
    analyzer: FailedTestAnalyzer,
    log: Option<AttemptLog>,
    state: RunState,
}

impl Agent {
    pub async fn new(config: AgentConfig) -> Result<Self> {
        validate_paths(&config)?;
        let test_file_path = duplicate_test_file(&config)?;

        let source_code = std::fs::read_to_string(&config.source_file_path)
            .context("Failed to read source file")?;
        let language = language_for(&config.source_file_path).to_string();

        let prompt = PromptBuilder {
            source_file_path: config.source_file_path.display().to_string(),
            test_file_path: test_file_path.display().to_string(),
            source_code,
            included_files: read_included_files(&config.included_files),
            additional_instructions: config.additional_instructions.clone(),
            language,
            ..Default::default()
        };

        let transcript = config
            .llm
            .record_prompts
            .then(|| config.project_root.join("prompt.txt"));
        let make_client = || LlmClient::new(&config.llm.url, &config.llm.model, transcript.clone());

        let coverage_mode = if config.diff_coverage {
            CoverageMode::Diff
        } else if config.use_report_coverage {
            CoverageMode::PerFile
        } else {
            CoverageMode::Aggregate
        };
        if config.diff_coverage {
            tracing::info!(
                "Diff coverage enabled, comparing against branch {}",
                config.comparison_branch
            );
        }

        let mutation = config.mutation.enabled.then(|| {
            crate::mutation::MutationOracle::new(
                &config.mutation.command,
                &config.mutation.src_dir,
                &config.mutation.test_dir,
                &config.project_root,
            )
        });

        let validator = Validator::new(
            ValidatorOptions {
                source_file_path: config.source_file_path.clone(),
                test_file_path: test_file_path.clone(),
                test_command: config.test_command.clone(),
                test_command_dir: config.test_command_dir.clone(),
                coverage_report_path: config.code_coverage_report_path.clone(),
                coverage_mode,
                comparison_branch: config.comparison_branch.clone(),
                num_attempts: config.num_attempts,
                strict_mutation_score: config.strict_mutation_score,
            },
            mutation,
            Some(FailureDiagnoser::new(make_client(), prompt.clone())),
        );

        let generator = TestGenerator::new(make_client(), prompt.clone());
        let analyzer = FailedTestAnalyzer::new(make_client(), prompt, &config.project_root);

        if !make_client().is_available().await {
            tracing::warn!(
                "Model endpoint {} is not responding; generation requests will fail",
                config.llm.url
            );
        }

        let log = match AttemptLog::new(&config.general.log_db_path).await {
            Ok(log) => {
                log.run_migrations().await?;
                Some(log)
            }
            Err(e) => {
                tracing::warn!("Attempt log unavailable, continuing without it: {}", e);
                None
            }
        };

        Ok(Self {
            config,
            test_file_path,
            generator,
            validator,
            analyzer,
            log,
            state: RunState::default(),
        })
    }

    /// Run the whole loop and return the terminal outcome.
    pub async fn run(&mut self) -> Result<AgentOutcome> {
        // Initial suite analysis: where tests and imports go
        let analysis = self
            .generator
            .analyze_suite()
            .await
            .context("Error during initial test suite analysis")?;
        tracing::info!(
            "Suite analysis: insert tests after line {}, imports after line {:?}, framework {}",
            analysis.insertion_point.test_insert_line,
            analysis.insertion_point.import_insert_line,
            analysis.testing_framework
        );
        self.state.insertion_point = analysis.insertion_point;
        self.generator.prompt.testing_framework = analysis.testing_framework;

        self.validator.baseline(&mut self.state).await?;

        let mut iteration_count = 0;
        while !goals_met(&self.config, &self.state) && iteration_count < self.config.max_iterations
        {
            self.log_coverage();

            let candidates = self.generate_batch().await?;
            tracing::info!("Generated {} candidate tests", candidates.len());

            // Validate every candidate of the batch before re-measuring
            for candidate in candidates {
                let outcome = self.validator.validate(&mut self.state, candidate).await;
                if let Some(log) = &self.log {
                    if let Err(e) = log.record_attempt(&outcome).await {
                        tracing::warn!("Failed to record attempt: {}", e);
                    }
                }
            }

            iteration_count += 1;

            self.validator.refresh(&mut self.state).await?;

            if !self.state.failed_attempts.is_empty() {
                self.analyze_failures().await;
            }
        }

        let outcome = self.finish(iteration_count).await;
        Ok(outcome)
    }

    /// Refresh the generation context and request one candidate batch.
    async fn generate_batch(&mut self) -> Result<Vec<crate::generator::CandidateTest>> {
        self.generator.prompt.test_file_content =
            std::fs::read_to_string(&self.test_file_path)
                .context("Failed to read test file for generation context")?;
        self.generator.prompt.coverage_report = self.state.coverage_report_text.clone();
        let failed_context = self.state.failed_attempts_context();
        self.generator
            .generate_tests(&failed_context, &self.state.mutation_summary)
            .await
    }

    /// Best-effort classification of this run's failed tests. Never affects
    /// accept/reject decisions.
    async fn analyze_failures(&mut self) {
        tracing::info!(
            "Analyzing {} failed tests for potential source code issues",
            self.state.failed_attempts.len()
        );
        match self.analyzer.analyze(&self.state.failed_attempts).await {
            Ok(Some(path)) => tracing::info!("Analysis results saved to {}", path.display()),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed-test analysis unavailable: {}", e),
        }
    }

    fn log_coverage(&self) {
        let label = if self.config.diff_coverage {
            "Current Diff Coverage"
        } else {
            "Current Coverage"
        };
        tracing::info!("{}: {:.2}%", label, self.state.coverage.overall * 100.0);
        tracing::info!("Desired Coverage: {}%", self.config.desired_coverage);
        if self.config.mutation.enabled {
            tracing::info!(
                "Current Mutation Score: {:.2}% (desired {:.2}%)",
                self.state.mutation.current_score,
                self.config.desired_mutation_score
            );
        }
    }

    /// Final logging and outcome mapping.
    async fn finish(&self, iteration_count: u32) -> AgentOutcome {
        let coverage_pct = self.state.coverage.overall * 100.0;
        let outcome = if goals_met(&self.config, &self.state) {
            tracing::info!(
                "Reached above target coverage of {}% (Current Coverage: {:.2}%) in {} iterations. Current mutation score: {:.2}%",
                self.config.desired_coverage,
                coverage_pct,
                iteration_count,
                self.state.mutation.current_score
            );
            AgentOutcome::Success
        } else {
            let outcome = exhausted_outcome(&self.config, &self.state);
            match outcome {
                AgentOutcome::StrictCoverageFailed => tracing::error!(
                    "Reached maximum iteration limit without achieving desired coverage. Current Coverage: {:.2}%",
                    coverage_pct
                ),
                AgentOutcome::StrictMutationFailed => tracing::error!(
                    "Failed to achieve desired mutation score of {:.2}%. Current mutation score: {:.2}%",
                    self.config.desired_mutation_score,
                    self.state.mutation.current_score
                ),
                _ => tracing::info!(
                    "Reached maximum iteration limit without achieving desired coverage. Current Coverage: {:.2}%",
                    coverage_pct
                ),
            }
            outcome
        };

        tracing::info!(
            "Total token usage for model {}: {} prompt, {} completion",
            self.config.llm.model,
            self.generator.total_prompt_tokens,
            self.generator.total_completion_tokens
        );
        if let Some(log) = &self.log {
            match log.summary().await {
                Ok(summary) => tracing::info!(
                    "Attempts recorded: {} passed, {} failed",
                    summary.passed,
                    summary.failed
                ),
                Err(e) => tracing::warn!("Could not summarize attempt log: {}", e),
            }
        }
        outcome
    }
}
