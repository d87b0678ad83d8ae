//! Prompt construction.
//!
//! Turns run context into system/user prompt pairs. The wording here is
//! plumbing; the agent only depends on the shape of the answers (YAML
//! blocks with known keys).

/// A system/user prompt pair.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Context fields shared by every prompt in one run.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    pub source_file_path: String,
    pub test_file_path: String,
    pub source_code: String,
    pub test_file_content: String,
    pub coverage_report: String,
    pub included_files: String,
    pub additional_instructions: String,
    pub language: String,
    pub testing_framework: String,
}

const GENERATE_SYSTEM: &str = "You are an expert software engineer writing additional unit tests \
for an existing test suite. Each generated test must be self-contained and independent. Respond \
only with a YAML block.";

impl PromptBuilder {
    /// Prompt for one batch of candidate tests.
    pub fn generate_tests(&self, failed_attempts: &str, mutation_summary: &str) -> Prompt {
        let mut user = format!(
            "## Source file: `{}`\n```{}\n{}\n```\n\n## Existing test file: `{}`\n```{}\n{}\n```\n\n## Coverage report\n{}\n",
            self.source_file_path,
            self.language,
            self.source_code,
            self.test_file_path,
            self.language,
            self.test_file_content,
            self.coverage_report,
        );
        if !self.included_files.is_empty() {
            user.push_str(&format!("\n## Additional context files\n{}\n", self.included_files));
        }
        if !mutation_summary.is_empty() {
            user.push_str(&format!("\n{}\n", mutation_summary));
        }
        if !failed_attempts.is_empty() {
            user.push_str(&format!(
                "\n## Previously failed tests (do not repeat these mistakes)\n{}\n",
                failed_attempts
            ));
        }
        if !self.additional_instructions.is_empty() {
            user.push_str(&format!(
                "\n## Additional instructions\n{}\n",
                self.additional_instructions
            ));
        }
        user.push_str(&format!(
            "\nWrite new {} tests ({} framework) that cover currently missed lines. Respond with \
a YAML block of the form:\n```yaml\nnew_tests:\n  - test_name: ...\n    test_code: |\n      ...\n    new_imports_code: \"\"\n    lines_to_cover: \"\"\n```\n",
            self.language, self.testing_framework
        ));
        Prompt {
            system: GENERATE_SYSTEM.to_string(),
            user,
        }
    }

    /// Ask for the indentation of test headers in the suite.
    pub fn suite_headers_indentation(&self) -> Prompt {
        Prompt {
            system: GENERATE_SYSTEM.to_string(),
            user: format!(
                "Here is a {} test file:\n```\n{}\n```\nAnswer with a YAML block containing a \
single key `test_headers_indentation`: the number of leading spaces on the test function \
headers.\n",
                self.language, self.test_file_content
            ),
        }
    }

    /// Ask where new tests and new imports should be inserted.
    pub fn suite_insert_line(&self) -> Prompt {
        Prompt {
            system: GENERATE_SYSTEM.to_string(),
            user: format!(
                "Here is a {} test file with 1-based line numbers:\n```\n{}\n```\nAnswer with a \
YAML block containing `relevant_line_number_to_insert_tests_after`, \
`relevant_line_number_to_insert_imports_after`, and `testing_framework`.\n",
                self.language,
                number_lines(&self.test_file_content)
            ),
        }
    }

    /// Ask for a short diagnosis of a failed test run.
    pub fn failure_analysis(&self, stderr: &str, stdout: &str, processed_file: &str) -> Prompt {
        Prompt {
            system: "You are analyzing a failed test run. Summarize the root cause in a few \
sentences of plain text."
                .to_string(),
            user: format!(
                "## Test file as executed\n```\n{}\n```\n\n## stdout\n```\n{}\n```\n\n## stderr\n```\n{}\n```\n\nWhat went wrong?",
                processed_file, stdout, stderr
            ),
        }
    }

    /// Ask which failed tests reveal genuine defects in the source file.
    pub fn classify_failed_tests(&self, formatted_failures: &str) -> Prompt {
        Prompt {
            system: "You are reviewing failed generated tests to decide which ones reveal a \
genuine defect in the source code rather than a flaky or incorrect test. Respond only with a \
YAML block."
                .to_string(),
            user: format!(
                "## Source file: `{}`\n```{}\n{}\n```\n\n## Failed tests\n{}\n\nRespond with a \
YAML block:\n```yaml\npotential_issues:\n  - test_index: 1\n    issue_type: ...\n    \
brief_description: ...\n```\n",
                self.source_file_path, self.language, self.source_code, formatted_failures
            ),
        }
    }
}

/// Prefix each line with its 1-based number.
fn number_lines(content: &str) -> String {
    content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{} {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder {
            source_file_path: "src/app.py".to_string(),
            test_file_path: "tests/test_app.py".to_string(),
            source_code: "def add(a, b):\n    return a + b".to_string(),
            test_file_content: "def test_add():\n    assert add(1, 2) == 3".to_string(),
            coverage_report: "Lines covered: 5".to_string(),
            language: "python".to_string(),
            testing_framework: "pytest".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_prompt_includes_context() {
        let p = builder().generate_tests("", "");
        assert!(p.user.contains("src/app.py"));
        assert!(p.user.contains("def add(a, b):"));
        assert!(p.user.contains("Lines covered: 5"));
        assert!(p.user.contains("new_tests:"));
        assert!(!p.user.contains("Previously failed tests"));
    }

    #[test]
    fn test_generate_prompt_includes_failures_and_mutation() {
        let p = builder().generate_tests("- bad test", "## Results of Mutation Testing");
        assert!(p.user.contains("Previously failed tests"));
        assert!(p.user.contains("Results of Mutation Testing"));
    }

    #[test]
    fn test_insert_line_prompt_numbers_lines() {
        let p = builder().suite_insert_line();
        assert!(p.user.contains("1 def test_add():"));
        assert!(p.user.contains("2     assert add(1, 2) == 3"));
    }

    #[test]
    fn test_number_lines() {
        assert_eq!(number_lines("a\nb"), "1 a\n2 b");
    }
}
