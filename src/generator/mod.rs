//! Test generation collaborator.
//!
//! Wraps the model client: initial test-suite analysis (where to insert
//! tests and imports, how headers are indented), candidate-test batch
//! generation, and best-effort failure diagnostics. Model responses are
//! fenced YAML blocks; anything unparseable degrades to an empty result
//! rather than an error wherever the contract allows it.

use crate::llm::LlmClient;
use crate::prompt::PromptBuilder;
use crate::validator::InsertionPoint;
use anyhow::{Context, Result};
use serde::Deserialize;

/// How many times to re-ask the model during suite analysis before giving up.
const ANALYSIS_ATTEMPTS: usize = 3;

/// One proposed test, not yet validated. Consumed exactly once.
#[derive(Debug, Clone, Default)]
pub struct CandidateTest {
    pub test_name: String,
    pub test_code: String,
    pub new_imports: String,
    pub lines_to_cover: String,
}

#[derive(Debug, Deserialize)]
struct NewTestsResponse {
    #[serde(default)]
    new_tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
struct RawTest {
    #[serde(default)]
    test_name: String,
    #[serde(default)]
    test_code: String,
    #[serde(default)]
    new_imports_code: String,
    #[serde(default)]
    lines_to_cover: String,
}

#[derive(Debug, Deserialize)]
struct IndentationResponse {
    test_headers_indentation: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct InsertLineResponse {
    relevant_line_number_to_insert_tests_after: Option<usize>,
    relevant_line_number_to_insert_imports_after: Option<usize>,
    #[serde(default)]
    testing_framework: String,
}

/// Strip a markdown code fence (```yaml ... ``` or ``` ... ```) if present.
fn extract_yaml_block(text: &str) -> &str {
    let text = text.trim();
    for fence in ["```yaml", "```"] {
        if let Some(start) = text.find(fence) {
            let body = &text[start + fence.len()..];
            let end = body.find("```").unwrap_or(body.len());
            return body[..end].trim();
        }
    }
    text
}

/// Parse a batch of candidate tests out of a model response.
/// Unparseable responses yield an empty batch.
pub fn parse_candidates(response: &str) -> Vec<CandidateTest> {
    let yaml = extract_yaml_block(response);
    match serde_yaml::from_str::<NewTestsResponse>(yaml) {
        Ok(parsed) => parsed
            .new_tests
            .into_iter()
            .map(|raw| CandidateTest {
                test_name: raw.test_name,
                test_code: raw.test_code,
                new_imports: raw.new_imports_code,
                lines_to_cover: raw.lines_to_cover,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Could not parse generated tests as YAML: {}", e);
            Vec::new()
        }
    }
}

/// Result of the initial test-suite analysis.
#[derive(Debug)]
pub struct SuiteAnalysis {
    pub insertion_point: InsertionPoint,
    pub testing_framework: String,
}

/// LLM-backed test generator. Owns its own model client and the shared
/// prompt context; tracks token usage across the run.
pub struct TestGenerator {
    llm: LlmClient,
    pub prompt: PromptBuilder,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

impl TestGenerator {
    pub fn new(llm: LlmClient, prompt: PromptBuilder) -> Self {
        Self {
            llm,
            prompt,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
        }
    }

    async fn call(&mut self, prompt: &crate::prompt::Prompt) -> Result<String> {
        let response = self.llm.call_model(prompt).await?;
        self.total_prompt_tokens += response.prompt_tokens;
        self.total_completion_tokens += response.completion_tokens;
        Ok(response.text)
    }

    /// Discover the insertion points and indentation convention of the
    /// suite. Bounded retries per question; failure past the bound is fatal
    /// at startup.
    pub async fn analyze_suite(&mut self) -> Result<SuiteAnalysis> {
        let mut indentation = None;
        for _ in 0..ANALYSIS_ATTEMPTS {
            let prompt = self.prompt.suite_headers_indentation();
            let response = self.call(&prompt).await?;
            let yaml = extract_yaml_block(&response);
            if let Ok(parsed) = serde_yaml::from_str::<IndentationResponse>(yaml) {
                if parsed.test_headers_indentation.is_some() {
                    indentation = parsed.test_headers_indentation;
                    break;
                }
            }
        }
        let header_indentation =
            indentation.context("Failed to analyze the test headers indentation")?;

        let mut insert_lines = None;
        let mut testing_framework = "Unknown".to_string();
        for _ in 0..ANALYSIS_ATTEMPTS {
            let prompt = self.prompt.suite_insert_line();
            let response = self.call(&prompt).await?;
            let yaml = extract_yaml_block(&response);
            if let Ok(parsed) = serde_yaml::from_str::<InsertLineResponse>(yaml) {
                // Zero means the model failed to find an anchor; keep asking
                match parsed.relevant_line_number_to_insert_tests_after {
                    Some(line) if line > 0 => {
                        if !parsed.testing_framework.is_empty() {
                            testing_framework = parsed.testing_framework;
                        }
                        insert_lines =
                            Some((line, parsed.relevant_line_number_to_insert_imports_after));
                        break;
                    }
                    _ => {}
                }
            }
        }
        let (test_insert_line, import_insert_line) =
            insert_lines.context("Failed to analyze the relevant line number to insert new tests")?;

        Ok(SuiteAnalysis {
            insertion_point: InsertionPoint {
                test_insert_line,
                import_insert_line,
                header_indentation,
            },
            testing_framework,
        })
    }

    /// Request one batch of candidate tests.
    pub async fn generate_tests(
        &mut self,
        failed_attempts: &str,
        mutation_summary: &str,
    ) -> Result<Vec<CandidateTest>> {
        let prompt = self.prompt.generate_tests(failed_attempts, mutation_summary);
        let response = self.call(&prompt).await?;
        Ok(parse_candidates(&response))
    }
}

/// Best-effort diagnosis of failed test runs. Separate from the generator
/// so the validator can own one without sharing mutable generator state.
pub struct FailureDiagnoser {
    llm: LlmClient,
    prompt: PromptBuilder,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

impl FailureDiagnoser {
    pub fn new(llm: LlmClient, prompt: PromptBuilder) -> Self {
        Self {
            llm,
            prompt,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
        }
    }

    /// Summarize why a run failed. Any error yields `None`; the diagnosis
    /// must never block the accept/reject decision.
    pub async fn summarize_failure(
        &mut self,
        stderr: &str,
        stdout: &str,
        processed_file: &str,
    ) -> Option<String> {
        let prompt = self.prompt.failure_analysis(stderr, stdout, processed_file);
        match self.llm.call_model(&prompt).await {
            Ok(response) => {
                self.total_prompt_tokens += response.prompt_tokens;
                self.total_completion_tokens += response.completion_tokens;
                let text = response.text.trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            Err(e) => {
                tracing::warn!("Failure diagnosis unavailable: {}", e);
                None
            }
        }
    }
}
