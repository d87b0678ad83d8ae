//! Mutation testing oracle.
//!
//! Runs an external mutation-testing command, reads its YAML report, and
//! turns it into a mutation score (0-100) plus a summary of surviving
//! mutants with remediation hints per operator category. Each oracle
//! instance carries its own run counter used to namespace report file
//! names, so multiple agent instances never collide on report artifacts.

use crate::runner::{run_command, CommandOutput};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// How many extra times to re-read a report that is missing or corrupt.
/// The mutation tool occasionally finishes before the report hits disk.
const REPORT_READ_RETRIES: usize = 2;
const REPORT_RETRY_DELAY_MS: u64 = 500;

/// A mutation no test detected.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivingMutant {
    pub line: u64,
    pub operator: String,
}

/// Result of one mutation-testing run.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Percentage of mutants killed, 0-100.
    pub score: f64,
    pub surviving: Vec<SurvivingMutant>,
    /// Human-readable summary fed back into generation prompts.
    pub summary: String,
}

/// Monotonic per-run mutation bookkeeping, owned by the agent's run state.
#[derive(Debug, Clone, Default)]
pub struct MutationState {
    pub attempted: u64,
    pub succeeded: u64,
    pub last_score: f64,
    pub current_score: f64,
}

/// Full names for mut.py operator abbreviations.
fn operator_full_name(abbreviation: &str) -> &'static str {
    match abbreviation.to_ascii_uppercase().as_str() {
        "AOD" => "Arithmetic Operator Deletion",
        "AOR" => "Arithmetic Operator Replacement",
        "ASR" => "Assignment Operator Replacement",
        "BCR" => "Break Continue Replacement",
        "COD" => "Conditional Operator Deletion",
        "CRP" => "Comparison Replacement",
        "DDL" => "Decorator Deletion",
        "EHD" => "Exception Handler Deletion",
        "EXS" => "Exception Swallowing",
        "IHD" => "Hiding Variable Deletion",
        "IOD" => "Overriding Method Deletion",
        "IOP" => "Overridden Method Calling Position Change",
        "LCR" => "Logical Connector Replacement",
        "LOD" => "Logical Operator Deletion",
        "ROR" => "Relational Operator Replacement",
        "RSI" => "Raise Statement Insertion",
        "SCR" => "Slice Range Creation",
        "SIR" => "Slice Index Remove",
        "SVD" => "Self Variable Deletion",
        "ZIL" => "Zero Iteration Loop",
        _ => "Unknown operator",
    }
}

/// A remediation hint for the operator's category.
fn remediation_hint(abbreviation: &str) -> &'static str {
    match abbreviation.to_ascii_uppercase().as_str() {
        "AOD" | "AOR" | "ASR" => "assert exact numeric results rather than ranges or truthiness",
        "COD" | "CRP" | "ROR" | "LCR" | "LOD" => {
            "add boundary-value cases that distinguish adjacent comparison operators"
        }
        "EHD" | "EXS" | "RSI" => {
            "add a test that exercises the error path and asserts the raised error"
        }
        "BCR" | "ZIL" => "add a test over a multi-element input that checks every iteration",
        "SCR" | "SIR" => "assert the exact slice contents, including both endpoints",
        _ => "add an assertion sensitive to this line's behavior",
    }
}

/// Parsed subset of the mutation tool's YAML report.
#[derive(Debug)]
struct ParsedReport {
    score: f64,
    covered_nodes: u64,
    all_nodes: u64,
    surviving: Vec<SurvivingMutant>,
}

fn parse_report(raw: &str) -> Result<ParsedReport> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(raw).context("mutation report is not valid YAML")?;
    let mapping = doc
        .as_mapping()
        .context("mutation report is not a YAML mapping")?;

    let score = mapping
        .get("mutation_score")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let (covered_nodes, all_nodes) = mapping
        .get("coverage")
        .and_then(|c| c.as_mapping())
        .map(|c| {
            (
                c.get("covered_nodes").and_then(|v| v.as_u64()).unwrap_or(0),
                c.get("all_nodes").and_then(|v| v.as_u64()).unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));

    let mut surviving = Vec::new();
    if let Some(mutations) = mapping.get("mutations").and_then(|v| v.as_sequence()) {
        for item in mutations {
            let status = item.get("status").and_then(|v| v.as_str()).unwrap_or("");
            if status != "survived" {
                continue;
            }
            // Each report entry may carry several sub-mutations
            let Some(subs) = item.get("mutations").and_then(|v| v.as_sequence()) else {
                continue;
            };
            for sub in subs {
                surviving.push(SurvivingMutant {
                    line: sub.get("lineno").and_then(|v| v.as_u64()).unwrap_or(0),
                    operator: sub
                        .get("operator")
                        .and_then(|v| v.as_str())
                        .unwrap_or("?")
                        .to_string(),
                });
            }
        }
    }

    Ok(ParsedReport {
        score,
        covered_nodes,
        all_nodes,
        surviving,
    })
}

/// Build the textual summary handed back to the generator.
fn render_summary(report: &ParsedReport) -> String {
    let mut lines = Vec::new();
    lines.push("## Results of Mutation Testing".to_string());
    lines.push(format!("**Mutation Score**: {:.2}%", report.score));
    lines.push(format!(
        "**Nodes Covered**: {}/{}",
        report.covered_nodes, report.all_nodes
    ));

    if report.surviving.is_empty() {
        lines.push("No surviving mutants.".to_string());
    } else {
        lines.push("The following mutants **survived**:".to_string());
        for (i, mutant) in report.surviving.iter().enumerate() {
            lines.push(format!(
                "{}) line {}, operator: {} - {}",
                i + 1,
                mutant.line,
                operator_full_name(&mutant.operator),
                remediation_hint(&mutant.operator)
            ));
        }
        lines.push(String::new());
        lines.push(
            "Generate tests that kill these mutants: each needs a scenario that fails if the mutation occurs."
                .to_string(),
        );
    }

    lines.join("\n")
}

/// Drives the external mutation tool and interprets its report.
pub struct MutationOracle {
    mutation_command: String,
    src_dir: String,
    test_dir: String,
    project_root: PathBuf,
    /// Incremented per run; namespaces report file names within this instance.
    run_counter: u32,
}

impl MutationOracle {
    pub fn new(mutation_command: &str, src_dir: &str, test_dir: &str, project_root: &Path) -> Self {
        Self {
            mutation_command: mutation_command.to_string(),
            src_dir: src_dir.to_string(),
            test_dir: test_dir.to_string(),
            project_root: project_root.to_path_buf(),
            run_counter: 0,
        }
    }

    fn report_file_name(&self) -> String {
        format!("{}_mut_report.yaml", self.run_counter)
    }

    /// The full shell command for the current run.
    pub fn run_command_line(&self) -> String {
        format!(
            "{} --target {} --unit-test {} -m --runner pytest --report {} --report-html {}_mut --percentage 10",
            self.mutation_command,
            self.src_dir,
            self.test_dir,
            self.report_file_name(),
            self.run_counter
        )
    }

    /// Run mutation tests once and interpret the report.
    ///
    /// A non-zero exit from the mutation tool is logged but not fatal; the
    /// report is still read, since the tool exits non-zero when mutants
    /// survive. A report that stays missing or corrupt after the bounded
    /// retries is a hard error, distinct from a valid report with no
    /// mutants.
    pub async fn run(&mut self) -> Result<MutationOutcome> {
        self.run_counter += 1;
        let command = self.run_command_line();
        tracing::info!("Running mutation tests: \"{}\"", command);

        let output: CommandOutput = run_command(&command, &self.project_root).await?;
        if !output.success() {
            tracing::warn!(
                "Mutation command exited with code {}: {}",
                output.exit_code,
                output.stderr.lines().next().unwrap_or("")
            );
        }

        let raw = self.load_report().await?;
        let report = parse_report(&raw)?;
        let summary = render_summary(&report);

        tracing::info!(
            "Mutation score: {:.2}%, surviving mutants: {}",
            report.score,
            report.surviving.len()
        );

        Ok(MutationOutcome {
            score: report.score,
            surviving: report.surviving,
            summary,
        })
    }

    /// Read the report file, retrying a couple of times in case the tool
    /// has not flushed it yet.
    async fn load_report(&self) -> Result<String> {
        let path = self.project_root.join(self.report_file_name());
        let mut last_err = None;
        for attempt in 0..=REPORT_READ_RETRIES {
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) if !raw.trim().is_empty() => return Ok(raw),
                Ok(_) => last_err = Some(anyhow::anyhow!("report file is empty")),
                Err(e) => last_err = Some(e.into()),
            }
            if attempt < REPORT_READ_RETRIES {
                tracing::debug!(
                    "Mutation report not ready at {} (attempt {}), retrying",
                    path.display(),
                    attempt + 1
                );
                tokio::time::sleep(std::time::Duration::from_millis(REPORT_RETRY_DELAY_MS)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("unreachable")))
            .with_context(|| format!("failed to read mutation report {}", path.display()))
    }
}
