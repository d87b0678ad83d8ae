//! Post-iteration analysis of failed candidates.
//!
//! Asks the model which of the iteration's failed tests reveal a genuine
//! defect in the source code (as opposed to a flaky or incorrect test) and
//! writes the findings to a markdown report. Strictly auxiliary: it runs
//! after accept/reject decisions are final and every failure in here is
//! logged and swallowed.

use crate::llm::LlmClient;
use crate::prompt::PromptBuilder;
use crate::validator::FailedAttempt;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A failed test the model flagged as pointing at a source-code defect.
#[derive(Debug, Clone)]
pub struct FlaggedTest {
    pub attempt: FailedAttempt,
    pub issue_type: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    #[serde(default)]
    potential_issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    test_index: usize,
    #[serde(default)]
    issue_type: String,
    #[serde(default)]
    brief_description: String,
}

fn strip_yaml_fence(text: &str) -> &str {
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

/// Format the failed attempts the way the classification prompt expects.
fn format_failures(failures: &[FailedAttempt]) -> String {
    failures
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                "### Test {}\nName: {}\n```\n{}\n```\nError: {}\n",
                i + 1,
                f.candidate.test_name,
                f.candidate.test_code.trim_end(),
                f.error_message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn match_issues(
    failures: &[FailedAttempt],
    issues: Vec<RawIssue>,
) -> Vec<FlaggedTest> {
    issues
        .into_iter()
        .filter_map(|issue| {
            // Model indexes are 1-based
            let index = issue.test_index.checked_sub(1)?;
            let attempt = failures.get(index)?;
            Some(FlaggedTest {
                attempt: attempt.clone(),
                issue_type: issue.issue_type,
                description: issue.brief_description,
            })
        })
        .collect()
}

pub struct FailedTestAnalyzer {
    llm: LlmClient,
    prompt: PromptBuilder,
    output_dir: PathBuf,
}

impl FailedTestAnalyzer {
    pub fn new(llm: LlmClient, prompt: PromptBuilder, project_root: &Path) -> Self {
        Self {
            llm,
            prompt,
            output_dir: project_root.join("potential_source_issues"),
        }
    }

    /// Classify the failures and, when anything was flagged, write the
    /// markdown report. Returns the report path when one was written.
    /// Best-effort: callers should log the error and move on.
    pub async fn analyze(&self, failures: &[FailedAttempt]) -> Result<Option<PathBuf>> {
        if failures.is_empty() {
            return Ok(None);
        }

        let prompt = self.prompt.classify_failed_tests(&format_failures(failures));
        let response = self.llm.call_model(&prompt).await?;
        let parsed: ClassificationResponse =
            serde_yaml::from_str(strip_yaml_fence(&response.text))
                .context("failed-test classification was not valid YAML")?;

        let flagged = match_issues(failures, parsed.potential_issues);
        if flagged.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            "Found {} failed tests that may reveal source-code defects",
            flagged.len()
        );
        let path = self.report_path();
        self.write_report(&flagged, &path).await?;
        Ok(Some(path))
    }

    fn report_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.output_dir
            .join(format!("failed_test_analysis_{}.md", stamp))
    }

    async fn write_report(&self, flagged: &[FlaggedTest], path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .context("failed to create analysis output directory")?;

        let mut report = String::from("# Tests Revealing Potential Source Code Issues\n\n");
        for test in flagged {
            report.push_str(&format!("## Issue Type: {}\n", test.issue_type));
            report.push_str(&format!("### Description: {}\n\n", test.description));
            report.push_str(&format!(
                "**Test Name:** {}\n\n",
                test.attempt.candidate.test_name
            ));
            if !test.attempt.candidate.lines_to_cover.is_empty() {
                report.push_str(&format!(
                    "**Lines to Cover:** {}\n\n",
                    test.attempt.candidate.lines_to_cover
                ));
            }
            report.push_str(&format!(
                "**Test Code:**\n```\n{}\n```\n\n",
                test.attempt.candidate.test_code.trim_end()
            ));
        }

        tokio::fs::write(path, report)
            .await
            .with_context(|| format!("failed to write analysis report {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::CandidateTest;

    fn failure(name: &str) -> FailedAttempt {
        FailedAttempt {
            candidate: CandidateTest {
                test_name: name.to_string(),
                test_code: format!("def {}():\n    assert False", name),
                ..Default::default()
            },
            error_message: "boom".to_string(),
        }
    }

    #[test]
    fn test_format_failures_is_one_based() {
        let text = format_failures(&[failure("test_a"), failure("test_b")]);
        assert!(text.contains("### Test 1"));
        assert!(text.contains("### Test 2"));
        assert!(text.contains("Name: test_b"));
    }

    #[test]
    fn test_match_issues_maps_indices() {
        let failures = vec![failure("test_a"), failure("test_b")];
        let issues = vec![RawIssue {
            test_index: 2,
            issue_type: "off-by-one".to_string(),
            brief_description: "loop bound".to_string(),
        }];
        let flagged = match_issues(&failures, issues);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].attempt.candidate.test_name, "test_b");
        assert_eq!(flagged[0].issue_type, "off-by-one");
    }

    #[test]
    fn test_match_issues_ignores_out_of_range() {
        let failures = vec![failure("test_a")];
        let issues = vec![
            RawIssue {
                test_index: 0,
                issue_type: String::new(),
                brief_description: String::new(),
            },
            RawIssue {
                test_index: 9,
                issue_type: String::new(),
                brief_description: String::new(),
            },
        ];
        assert!(match_issues(&failures, issues).is_empty());
    }

    #[test]
    fn test_classification_response_parses() {
        let yaml = "potential_issues:\n  - test_index: 1\n    issue_type: logic\n    brief_description: wrong operator\n";
        let parsed: ClassificationResponse = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.potential_issues.len(), 1);
        assert_eq!(parsed.potential_issues[0].test_index, 1);
    }

    #[tokio::test]
    async fn test_write_report_contents() {
        let dir = tempfile::tempdir().unwrap();
        let analyzer = FailedTestAnalyzer::new(
            LlmClient::new("http://localhost:11434", "m", None),
            PromptBuilder::default(),
            dir.path(),
        );
        let flagged = vec![FlaggedTest {
            attempt: failure("test_a"),
            issue_type: "logic".to_string(),
            description: "wrong operator".to_string(),
        }];
        let path = analyzer.report_path();
        analyzer.write_report(&flagged, &path).await.unwrap();
        let report = std::fs::read_to_string(&path).unwrap();
        assert!(report.contains("## Issue Type: logic"));
        assert!(report.contains("def test_a():"));
    }
}
