//! The validation loop.
//!
//! Accepts or rejects one candidate test at a time against the on-disk
//! test file. Every call to [`Validator::validate`] fully resolves before
//! returning: the file ends up either at the pre-candidate baseline or at
//! baseline plus exactly one accepted candidate, never in between. That
//! invariant is what lets the agent loop run the test command again on the
//! next iteration without re-verifying state.

pub mod splice;

pub use splice::{splice, InsertionPoint, Spliced};

use crate::coverage::{CoverageError, CoverageMeasurement, CoverageMode, CoverageProcessor};
use crate::generator::{CandidateTest, FailureDiagnoser};
use crate::mutation::{MutationOracle, MutationState};
use crate::runner::{run_command, CommandOutput};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Name of the JSON report produced by diff-cover in diff mode.
const DIFF_COVER_REPORT_NAME: &str = "diff-cover-report.json";

/// Mutable state of one agent run, threaded explicitly through the
/// validation and agent loops. The validator owns the test-file content and
/// coverage snapshot transitions; the agent owns iteration count and
/// termination.
#[derive(Debug, Default)]
pub struct RunState {
    pub insertion_point: InsertionPoint,
    /// Replaced wholesale after every accepted candidate; read-only otherwise.
    pub coverage: CoverageMeasurement,
    /// Rendered coverage text used as generation context (may be a raw
    /// report blob when the report could not be parsed).
    pub coverage_report_text: String,
    pub mutation: MutationState,
    /// Summary of the latest kept mutation run, fed back into prompts.
    pub mutation_summary: String,
    pub failed_attempts: Vec<FailedAttempt>,
}

impl Default for InsertionPoint {
    fn default() -> Self {
        Self {
            test_insert_line: 0,
            import_insert_line: None,
            header_indentation: 0,
        }
    }
}

impl RunState {
    /// Format the failed attempts as negative-example context for the
    /// next generation request.
    pub fn failed_attempts_context(&self) -> String {
        self.failed_attempts
            .iter()
            .map(|f| {
                format!(
                    "Failed test:\n```\n{}\n```\nError: {}\n",
                    f.candidate.test_code.trim_end(),
                    f.error_message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One rejected candidate plus the reason, kept for prompt context and the
/// per-iteration failure analysis.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub candidate: CandidateTest,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Empty candidate or unusable insertion point; no file write occurred.
    NoOpInsertion,
    /// The test command exited non-zero with the candidate in place.
    TestFailed,
    CoverageNotIncreased,
    MutationScoreNotImproved,
    /// Unexpected error during validation; the file was restored.
    RuntimeError,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoOpInsertion => write!(f, "no-op insertion"),
            Self::TestFailed => write!(f, "Test failed"),
            Self::CoverageNotIncreased => write!(f, "Coverage did not increase"),
            Self::MutationScoreNotImproved => write!(f, "Mutation score did not improve"),
            Self::RuntimeError => write!(f, "Runtime error"),
        }
    }
}

/// Structured result of one validation attempt. The agent loop always
/// receives one of these, never an error.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub reason: Option<FailureReason>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub candidate: CandidateTest,
    /// The test file content as executed (empty when no write occurred).
    pub processed_content: String,
    /// Best-effort model diagnosis of a failing run.
    pub diagnostic: Option<String>,
}

impl ValidationOutcome {
    fn fail(reason: FailureReason, candidate: CandidateTest) -> Self {
        Self {
            status: ValidationStatus::Fail,
            reason: Some(reason),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            candidate,
            processed_content: String::new(),
            diagnostic: None,
        }
    }
}

/// What to do with a candidate once its run passed and both signals are in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Accept,
    RejectCoverage,
    RejectMutation,
}

/// Reconcile the coverage delta and the mutation-score delta into a single
/// accept/reject decision.
///
/// When mutation testing runs in strict mode, a non-improving score rejects
/// the candidate even if coverage rose. Otherwise either signal improving
/// is enough.
fn decide(
    coverage_increased: bool,
    mutation_ran: bool,
    strict_mutation_score: bool,
    mutation_improved: bool,
) -> Decision {
    if mutation_ran && strict_mutation_score && !mutation_improved {
        return Decision::RejectMutation;
    }
    if coverage_increased || (mutation_ran && mutation_improved) {
        Decision::Accept
    } else {
        Decision::RejectCoverage
    }
}

/// Options for constructing a [`Validator`].
pub struct ValidatorOptions {
    pub source_file_path: PathBuf,
    pub test_file_path: PathBuf,
    pub test_command: String,
    pub test_command_dir: PathBuf,
    pub coverage_report_path: PathBuf,
    pub coverage_mode: CoverageMode,
    /// Comparison branch for diff mode.
    pub comparison_branch: String,
    /// How many times to run the test command per candidate (fail-fast).
    pub num_attempts: usize,
    pub strict_mutation_score: bool,
}

/// The core state machine: splice, run, measure, commit or roll back.
pub struct Validator {
    source_file_name: String,
    test_file_path: PathBuf,
    test_command: String,
    test_command_dir: PathBuf,
    coverage: CoverageProcessor,
    coverage_report_path: PathBuf,
    comparison_branch: String,
    num_attempts: usize,
    strict_mutation_score: bool,
    mutation: Option<MutationOracle>,
    diagnoser: Option<FailureDiagnoser>,
}

impl Validator {
    pub fn new(
        options: ValidatorOptions,
        mutation: Option<MutationOracle>,
        diagnoser: Option<FailureDiagnoser>,
    ) -> Self {
        let processor_path = match options.coverage_mode {
            CoverageMode::Diff => options.test_command_dir.join(DIFF_COVER_REPORT_NAME),
            _ => options.coverage_report_path.clone(),
        };
        let source_file_name = options
            .source_file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source_file_name,
            test_file_path: options.test_file_path,
            test_command: options.test_command,
            test_command_dir: options.test_command_dir,
            coverage: CoverageProcessor::new(processor_path, options.coverage_mode),
            coverage_report_path: options.coverage_report_path,
            comparison_branch: options.comparison_branch,
            num_attempts: options.num_attempts.max(1),
            strict_mutation_score: options.strict_mutation_score,
            mutation,
            diagnoser,
        }
    }

    /// Run the test command once on the untouched suite and take the
    /// baseline coverage snapshot. A failing baseline run is fatal: there
    /// is nothing to roll back and no point continuing.
    pub async fn baseline(&mut self, state: &mut RunState) -> Result<()> {
        tracing::info!(
            "Running build/test command to establish a coverage baseline: \"{}\"",
            self.test_command
        );
        let output = run_command(&self.test_command, &self.test_command_dir).await?;
        if !output.success() {
            anyhow::bail!(
                "Baseline test command failed with exit code {}. Is the command correct? \"{}\"\nStdout:\n{}\nStderr:\n{}",
                output.exit_code,
                self.test_command,
                output.stdout,
                output.stderr
            );
        }

        match self.measure(&output).await {
            Ok(measurement) => {
                tracing::info!("Initial coverage: {:.2}%", measurement.overall * 100.0);
                state.coverage_report_text = measurement.render();
                state.coverage = measurement;
                Ok(())
            }
            Err(e) => {
                // Degrade gracefully: keep the raw report as opaque context
                if let Some(CoverageError::Unparseable { raw, reason }) =
                    e.downcast_ref::<CoverageError>()
                {
                    tracing::warn!(
                        "Could not parse coverage report ({}); using it as an opaque blob",
                        reason
                    );
                    state.coverage_report_text = raw.clone();
                    state.coverage = CoverageMeasurement::default();
                    return Ok(());
                }
                Err(e)
            }
        }
    }

    /// Re-run the test command on the committed suite and refresh the
    /// coverage context between iterations. The suite was green when
    /// committed, so a failure here means the environment broke.
    pub async fn refresh(&mut self, state: &mut RunState) -> Result<()> {
        self.baseline(state).await
    }

    /// Validate one candidate. Never returns an error: every failure path
    /// is absorbed into a FAIL outcome with the test file restored.
    pub async fn validate(
        &mut self,
        state: &mut RunState,
        candidate: CandidateTest,
    ) -> ValidationOutcome {
        let baseline_content = match tokio::fs::read_to_string(&self.test_file_path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!("Error reading test file before validation: {}", e);
                // No write has happened; nothing to restore
                return ValidationOutcome::fail(FailureReason::RuntimeError, candidate);
            }
        };

        let Some(spliced) = splice(&baseline_content, &candidate, &state.insertion_point) else {
            tracing::info!("Skipping candidate with empty code or no insertion anchor");
            return ValidationOutcome::fail(FailureReason::NoOpInsertion, candidate);
        };

        match self
            .try_candidate(state, &candidate, &baseline_content, &spliced)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Error validating test: {:#}", e);
                // A write may have occurred; restore the baseline verbatim
                if let Err(restore_err) =
                    tokio::fs::write(&self.test_file_path, &baseline_content).await
                {
                    tracing::error!("Failed to restore test file: {}", restore_err);
                }
                state.failed_attempts.push(FailedAttempt {
                    candidate: candidate.clone(),
                    error_message: format!("Runtime error: {}", e),
                });
                let mut outcome = ValidationOutcome::fail(FailureReason::RuntimeError, candidate);
                outcome.stderr = e.to_string();
                outcome.processed_content = spliced.content;
                outcome
            }
        }
    }

    /// The fallible middle of `validate`: splice is done, decide commit or
    /// rollback. Any `Err` from here is converted to a rolled-back FAIL by
    /// the caller.
    async fn try_candidate(
        &mut self,
        state: &mut RunState,
        candidate: &CandidateTest,
        baseline_content: &str,
        spliced: &Spliced,
    ) -> Result<ValidationOutcome> {
        tokio::fs::write(&self.test_file_path, &spliced.content)
            .await
            .context("Failed to write spliced test file")?;

        // Run up to num_attempts times, stopping at the first failure
        let mut last_output: Option<CommandOutput> = None;
        for _ in 0..self.num_attempts {
            tracing::info!("Running test command: \"{}\"", self.test_command);
            let output = run_command(&self.test_command, &self.test_command_dir).await?;
            let failed = !output.success();
            last_output = Some(output);
            if failed {
                break;
            }
        }
        let output = last_output.expect("num_attempts is at least 1");

        if !output.success() {
            tokio::fs::write(&self.test_file_path, baseline_content)
                .await
                .context("Failed to roll back test file after failing run")?;
            tracing::info!("Skipping a generated test that failed");

            let diagnostic = match &mut self.diagnoser {
                Some(diagnoser) => {
                    diagnoser
                        .summarize_failure(&output.stderr, &output.stdout, &spliced.content)
                        .await
                }
                None => None,
            };
            if let Some(summary) = &diagnostic {
                tracing::error!("Failure summary:\n{}", summary);
            }

            state.failed_attempts.push(FailedAttempt {
                candidate: candidate.clone(),
                error_message: diagnostic.clone().unwrap_or_default(),
            });
            return Ok(ValidationOutcome {
                status: ValidationStatus::Fail,
                reason: Some(FailureReason::TestFailed),
                exit_code: Some(output.exit_code),
                stdout: output.stdout,
                stderr: output.stderr,
                candidate: candidate.clone(),
                processed_content: spliced.content.clone(),
                diagnostic,
            });
        }

        // Coverage is measured strictly after the run the splice was tested
        // against; a stale report is an error, not a silent reuse.
        let new_coverage = self.measure(&output).await?;

        let mut mutation_ran = false;
        let mut mutation_improved = false;
        let mut mutation_outcome = None;
        if let Some(oracle) = &mut self.mutation {
            state.mutation.attempted += 1;
            match oracle.run().await {
                Ok(outcome) => {
                    mutation_ran = true;
                    mutation_improved = outcome.score > state.mutation.last_score;
                    if mutation_improved {
                        tracing::info!(
                            "Mutation score improved from {:.2}% to {:.2}%",
                            state.mutation.last_score,
                            outcome.score
                        );
                    }
                    mutation_outcome = Some(outcome);
                }
                Err(e) => {
                    // Oracle failure degrades to "no mutation signal"
                    tracing::warn!("Mutation testing unavailable for this candidate: {}", e);
                }
            }
        }

        let coverage_increased = new_coverage.overall > state.coverage.overall;
        match decide(
            coverage_increased,
            mutation_ran,
            self.strict_mutation_score,
            mutation_improved,
        ) {
            Decision::Accept => {}
            rejection => {
                tokio::fs::write(&self.test_file_path, baseline_content)
                    .await
                    .context("Failed to roll back test file after rejection")?;
                let reason = match rejection {
                    Decision::RejectMutation => FailureReason::MutationScoreNotImproved,
                    _ => FailureReason::CoverageNotIncreased,
                };
                tracing::info!("Test did not improve {}. Rolling back.", match reason {
                    FailureReason::MutationScoreNotImproved => "mutation score",
                    _ => "coverage",
                });
                state.failed_attempts.push(FailedAttempt {
                    candidate: candidate.clone(),
                    error_message: reason.to_string(),
                });
                return Ok(ValidationOutcome {
                    status: ValidationStatus::Fail,
                    reason: Some(reason),
                    exit_code: Some(output.exit_code),
                    stdout: output.stdout,
                    stderr: output.stderr,
                    candidate: candidate.clone(),
                    processed_content: spliced.content.clone(),
                    diagnostic: None,
                });
            }
        }

        // Commit: the spliced content is already on disk. Advance the test
        // insertion line by the injected import lines so the next candidate
        // lands after them.
        state.insertion_point.test_insert_line += spliced.import_lines_added;

        self.log_per_file_deltas(&state.coverage, &new_coverage);
        state.coverage_report_text = new_coverage.render();
        state.coverage = new_coverage;

        if let Some(outcome) = mutation_outcome {
            if mutation_improved {
                state.mutation.succeeded += 1;
            }
            state.mutation.last_score = outcome.score;
            state.mutation.current_score = outcome.score;
            state.mutation_summary = outcome.summary;
        }

        tracing::info!(
            "Test passed and coverage increased. Current coverage: {:.2}%",
            state.coverage.overall * 100.0
        );
        Ok(ValidationOutcome {
            status: ValidationStatus::Pass,
            reason: None,
            exit_code: Some(output.exit_code),
            stdout: output.stdout,
            stderr: output.stderr,
            candidate: candidate.clone(),
            processed_content: spliced.content.clone(),
            diagnostic: None,
        })
    }

    /// Take a coverage measurement for the run that just finished. In diff
    /// mode this first regenerates the diff-cover JSON report.
    async fn measure(&self, run: &CommandOutput) -> Result<CoverageMeasurement> {
        if self.coverage.mode() == CoverageMode::Diff {
            let report_file = self
                .coverage_report_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let command = format!(
                "diff-cover --json-report {} --compare-branch={} {}",
                DIFF_COVER_REPORT_NAME, self.comparison_branch, report_file
            );
            tracing::info!("Running diff coverage command: \"{}\"", command);
            let output = run_command(&command, &self.test_command_dir).await?;
            if !output.success() {
                anyhow::bail!(
                    "diff-cover failed with exit code {}:\n{}",
                    output.exit_code,
                    output.stderr
                );
            }
        }
        self.coverage
            .process(run.started_at)
            .context("coverage verification failed")
    }

    fn log_per_file_deltas(&self, old: &CoverageMeasurement, new: &CoverageMeasurement) {
        for (file, new_fraction) in &new.per_file {
            let old_fraction = old.per_file.get(file).copied().unwrap_or(0.0);
            if *new_fraction > old_fraction {
                let kind = if *file == self.source_file_name {
                    "provided source file"
                } else {
                    "non-source file"
                };
                tracing::info!(
                    "Coverage for {} {} increased from {:.2}% to {:.2}%",
                    kind,
                    file,
                    old_fraction * 100.0,
                    new_fraction * 100.0
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    // =========================================================================
    // decide tests
    // =========================================================================

    #[test]
    fn test_decide_coverage_increase_accepts() {
        assert_eq!(decide(true, false, false, false), Decision::Accept);
    }

    #[test]
    fn test_decide_no_signal_rejects_on_coverage() {
        assert_eq!(decide(false, false, false, false), Decision::RejectCoverage);
    }

    #[test]
    fn test_decide_mutation_improvement_alone_accepts() {
        assert_eq!(decide(false, true, false, true), Decision::Accept);
    }

    #[test]
    fn test_decide_strict_mutation_overrides_coverage() {
        // Coverage rose but the mutation score stalled under strict mode
        assert_eq!(decide(true, true, true, false), Decision::RejectMutation);
    }

    #[test]
    fn test_decide_strict_mutation_both_improved() {
        assert_eq!(decide(true, true, true, true), Decision::Accept);
    }

    #[test]
    fn test_decide_non_strict_mutation_stall_still_accepts_on_coverage() {
        assert_eq!(decide(true, true, false, false), Decision::Accept);
    }

    // =========================================================================
    // run-state helpers
    // =========================================================================

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::TestFailed.to_string(), "Test failed");
        assert_eq!(
            FailureReason::CoverageNotIncreased.to_string(),
            "Coverage did not increase"
        );
        assert_eq!(FailureReason::NoOpInsertion.to_string(), "no-op insertion");
        assert_eq!(FailureReason::RuntimeError.to_string(), "Runtime error");
    }

    #[test]
    fn test_failed_attempts_context_formats_each_failure() {
        let mut state = RunState::default();
        state.failed_attempts.push(FailedAttempt {
            candidate: CandidateTest {
                test_code: "def test_a():\n    assert False".to_string(),
                ..Default::default()
            },
            error_message: "assertion failed".to_string(),
        });
        let context = state.failed_attempts_context();
        assert!(context.contains("def test_a():"));
        assert!(context.contains("Error: assertion failed"));
    }

    #[test]
    fn test_default_insertion_point_is_noop_anchor() {
        let point = InsertionPoint::default();
        assert_eq!(point.test_insert_line, 0);
        assert!(point.import_insert_line.is_none());
    }

    // =========================================================================
    // end-to-end validation loop (real files, real shell commands)
    // =========================================================================

    const BASELINE_SUITE: &str = "import pytest\n\ndef test_existing():\n    assert 1 == 1\n";

    fn cobertura(rate: &str) -> String {
        format!(
            "<?xml version=\"1.0\" ?>\n<coverage line-rate=\"{rate}\" lines-covered=\"8\" lines-valid=\"10\" version=\"7.4\">\n<packages><package><classes>\n<class filename=\"app.py\" line-rate=\"{rate}\"/>\n</classes></package></packages>\n</coverage>\n"
        )
    }

    fn validator_in(dir: &Path, test_command: &str) -> Validator {
        Validator::new(
            ValidatorOptions {
                source_file_path: PathBuf::from("app.py"),
                test_file_path: dir.join("test_app.py"),
                test_command: test_command.to_string(),
                test_command_dir: dir.to_path_buf(),
                coverage_report_path: dir.join("coverage.xml"),
                coverage_mode: CoverageMode::Aggregate,
                comparison_branch: "main".to_string(),
                num_attempts: 1,
                strict_mutation_score: false,
            },
            None,
            None,
        )
    }

    fn candidate(code: &str) -> CandidateTest {
        CandidateTest {
            test_name: "test_generated".to_string(),
            test_code: code.to_string(),
            ..Default::default()
        }
    }

    fn state_at(coverage: f64) -> RunState {
        let mut state = RunState::default();
        state.coverage.overall = coverage;
        state.insertion_point = InsertionPoint {
            test_insert_line: 4,
            import_insert_line: Some(1),
            header_indentation: 0,
        };
        state
    }

    #[tokio::test]
    async fn test_failing_run_rolls_back_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();

        let mut validator = validator_in(dir.path(), "exit 1");
        let mut state = state_at(0.5);
        let outcome = validator
            .validate(&mut state, candidate("def test_generated():\n    assert False"))
            .await;

        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.reason, Some(FailureReason::TestFailed));
        assert_eq!(outcome.exit_code, Some(1));
        // Byte-for-byte restoration
        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), BASELINE_SUITE);
        assert_eq!(state.failed_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_coverage_increase_commits_the_splice() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();
        std::fs::write(dir.path().join("fresh.xml"), cobertura("0.8")).unwrap();

        let mut validator = validator_in(dir.path(), "cp fresh.xml coverage.xml");
        let mut state = state_at(0.5);
        let outcome = validator
            .validate(&mut state, candidate("def test_generated():\n    assert True"))
            .await;

        assert_eq!(outcome.status, ValidationStatus::Pass);
        assert!(outcome.reason.is_none());
        let grown = std::fs::read_to_string(&test_file).unwrap();
        assert!(grown.contains("def test_generated():"));
        assert!(grown.contains("def test_existing():"));
        assert!((state.coverage.overall - 0.8).abs() < 1e-9);
        assert!(state.coverage_report_text.contains("Percentage covered"));
        assert!(state.failed_attempts.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_coverage_rejects_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();
        std::fs::write(dir.path().join("fresh.xml"), cobertura("0.5")).unwrap();

        let mut validator = validator_in(dir.path(), "cp fresh.xml coverage.xml");
        let mut state = state_at(0.5);
        let outcome = validator
            .validate(&mut state, candidate("def test_generated():\n    assert True"))
            .await;

        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.reason, Some(FailureReason::CoverageNotIncreased));
        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), BASELINE_SUITE);
        // The snapshot did not move
        assert!((state.coverage.overall - 0.5).abs() < 1e-9);
        assert_eq!(state.failed_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_candidate_is_rejected_without_any_write() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();
        let before = std::fs::metadata(&test_file).unwrap().modified().unwrap();

        // A failing command proves the command never ran
        let mut validator = validator_in(dir.path(), "exit 1");
        let mut state = state_at(0.5);
        let outcome = validator.validate(&mut state, candidate("   ")).await;

        assert_eq!(outcome.reason, Some(FailureReason::NoOpInsertion));
        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), BASELINE_SUITE);
        let after = std::fs::metadata(&test_file).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_accept_advances_insertion_past_added_imports() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();
        std::fs::write(dir.path().join("fresh.xml"), cobertura("0.9")).unwrap();

        let mut validator = validator_in(dir.path(), "cp fresh.xml coverage.xml");
        let mut state = state_at(0.5);
        let mut test = candidate("def test_generated():\n    assert True");
        test.new_imports = "import os\nimport sys".to_string();
        let outcome = validator.validate(&mut state, test).await;

        assert_eq!(outcome.status, ValidationStatus::Pass);
        let grown = std::fs::read_to_string(&test_file).unwrap();
        assert!(grown.contains("import os"));
        assert!(grown.contains("import sys"));
        // Both imports landed above the test block, so the next candidate
        // must be spliced two lines lower
        assert_eq!(state.insertion_point.test_insert_line, 6);
    }

    #[tokio::test]
    async fn test_missing_report_degrades_to_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();

        // Run passes but never produces coverage.xml
        let mut validator = validator_in(dir.path(), "true");
        let mut state = state_at(0.5);
        let outcome = validator
            .validate(&mut state, candidate("def test_generated():\n    assert True"))
            .await;

        assert_eq!(outcome.status, ValidationStatus::Fail);
        assert_eq!(outcome.reason, Some(FailureReason::RuntimeError));
        assert_eq!(std::fs::read_to_string(&test_file).unwrap(), BASELINE_SUITE);
        assert_eq!(state.failed_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_rejections_never_drift_the_suite() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("test_app.py");
        std::fs::write(&test_file, BASELINE_SUITE).unwrap();
        std::fs::write(dir.path().join("fresh.xml"), cobertura("0.5")).unwrap();

        let mut validator = validator_in(dir.path(), "cp fresh.xml coverage.xml");
        let mut state = state_at(0.5);
        for i in 0..3 {
            let code = format!("def test_generated_{i}():\n    assert True");
            let outcome = validator.validate(&mut state, candidate(&code)).await;
            assert_eq!(outcome.status, ValidationStatus::Fail);
            assert_eq!(std::fs::read_to_string(&test_file).unwrap(), BASELINE_SUITE);
        }
        assert_eq!(state.failed_attempts.len(), 3);
        assert_eq!(state.insertion_point.test_insert_line, 4);
    }
}
