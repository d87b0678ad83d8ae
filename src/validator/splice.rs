//! Test insertion engine.
//!
//! Splices a candidate test (and any new imports) into existing test-file
//! content at previously discovered line offsets, honoring the suite's
//! indentation convention.

use crate::generator::CandidateTest;

/// Line offsets discovered during the initial suite analysis.
///
/// `test_insert_line` is 0-based: the candidate is inserted immediately
/// after that many lines of the current file content. A value of zero means
/// the analysis failed to find a usable anchor and every splice is a no-op.
#[derive(Debug, Clone)]
pub struct InsertionPoint {
    pub test_insert_line: usize,
    pub import_insert_line: Option<usize>,
    /// Leading whitespace (in spaces) expected on test headers.
    pub header_indentation: usize,
}

/// A successful splice: the new file content plus how many import lines
/// were injected above the test insertion point.
#[derive(Debug)]
pub struct Spliced {
    pub content: String,
    pub import_lines_added: usize,
}

/// Normalize the candidate's additional-imports text.
///
/// The model sometimes wraps the imports in literal quotes, or answers with
/// a quoted empty string to mean "no imports".
fn normalize_imports(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "\"\"" {
        return String::new();
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed.trim_matches('"').to_string();
    }
    trimmed.to_string()
}

/// Re-indent the test code so its first line starts at `needed_indent`
/// spaces. Only indents further; never de-indents below what the candidate
/// already carries.
fn reindent(test_code: &str, needed_indent: usize) -> String {
    if needed_indent == 0 {
        return test_code.to_string();
    }
    let initial_indent = test_code.len() - test_code.trim_start().len();
    if needed_indent <= initial_indent {
        return test_code.to_string();
    }
    let pad = " ".repeat(needed_indent - initial_indent);
    test_code
        .split('\n')
        .map(|line| format!("{}{}", pad, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Insert `candidate` into `original` at `point`.
///
/// Returns `None` when the splice is a no-op (empty test code or a zero
/// insertion line); the caller must treat that as a rejection and must not
/// write anything to disk.
pub fn splice(original: &str, candidate: &CandidateTest, point: &InsertionPoint) -> Option<Spliced> {
    let test_code = candidate.test_code.trim_end();
    if test_code.trim().is_empty() || point.test_insert_line == 0 {
        return None;
    }

    let indented = reindent(test_code, point.header_indentation);
    // Surround with single blank lines so the new test is visually separated
    let block = format!("\n{}\n", indented.trim_matches('\n'));

    let original_lines: Vec<&str> = original.split('\n').collect();
    let insert_at = point.test_insert_line.min(original_lines.len());

    let mut lines: Vec<String> = Vec::with_capacity(original_lines.len() + 8);
    lines.extend(original_lines[..insert_at].iter().map(|s| s.to_string()));
    lines.extend(block.split('\n').map(|s| s.to_string()));
    lines.extend(original_lines[insert_at..].iter().map(|s| s.to_string()));

    let mut import_lines_added = 0;
    let imports = normalize_imports(&candidate.new_imports);
    if let Some(import_line) = point.import_insert_line {
        let spliced_so_far = lines.join("\n");
        if !imports.is_empty() && !spliced_so_far.contains(&imports) {
            let import_lines: Vec<String> =
                imports.split('\n').map(|s| s.to_string()).collect();
            import_lines_added = import_lines.len();
            // Computed against the already-test-spliced line list
            let at = import_line.min(lines.len());
            let tail = lines.split_off(at);
            lines.extend(import_lines);
            lines.extend(tail);
        }
    }

    Some(Spliced {
        content: lines.join("\n"),
        import_lines_added,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(code: &str, imports: &str) -> CandidateTest {
        CandidateTest {
            test_name: "test_example".to_string(),
            test_code: code.to_string(),
            new_imports: imports.to_string(),
            lines_to_cover: String::new(),
        }
    }

    fn point(test_line: usize, import_line: Option<usize>, indent: usize) -> InsertionPoint {
        InsertionPoint {
            test_insert_line: test_line,
            import_insert_line: import_line,
            header_indentation: indent,
        }
    }

    // =========================================================================
    // no-op cases
    // =========================================================================

    #[test]
    fn test_splice_empty_code_is_noop() {
        let original = "line 1\nline 2";
        assert!(splice(original, &candidate("", ""), &point(1, None, 0)).is_none());
        assert!(splice(original, &candidate("  \n\n", ""), &point(1, None, 0)).is_none());
    }

    #[test]
    fn test_splice_zero_insert_line_is_noop() {
        let original = "line 1\nline 2";
        let c = candidate("def test_x():\n    pass", "");
        assert!(splice(original, &c, &point(0, None, 0)).is_none());
    }

    // =========================================================================
    // test-code insertion
    // =========================================================================

    #[test]
    fn test_splice_inserts_after_line() {
        let original = "header\nbody\nfooter";
        let c = candidate("def test_x():\n    pass", "");
        let out = splice(original, &c, &point(2, None, 0)).unwrap();
        let lines: Vec<&str> = out.content.split('\n').collect();
        assert_eq!(lines[0], "header");
        assert_eq!(lines[1], "body");
        assert_eq!(lines[2], ""); // separating blank line
        assert_eq!(lines[3], "def test_x():");
        assert_eq!(lines[4], "    pass");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "footer");
        assert_eq!(out.import_lines_added, 0);
    }

    #[test]
    fn test_splice_strips_surrounding_blank_lines() {
        let original = "a\nb";
        let c = candidate("\n\ndef test_x():\n    pass\n\n", "");
        let out = splice(original, &c, &point(1, None, 0)).unwrap();
        assert!(!out.content.contains("\n\n\n"));
        assert!(out.content.contains("def test_x():"));
    }

    #[test]
    fn test_splice_insert_line_past_end_appends() {
        let original = "only line";
        let c = candidate("def test_x():\n    pass", "");
        let out = splice(original, &c, &point(99, None, 0)).unwrap();
        assert!(out.content.starts_with("only line\n"));
        assert!(out.content.contains("def test_x():"));
    }

    // =========================================================================
    // indentation
    // =========================================================================

    #[test]
    fn test_splice_indents_to_header_indentation() {
        let original = "class TestSuite:\n    def test_old(self):\n        pass";
        let c = candidate("def test_new(self):\n    assert True", "");
        let out = splice(original, &c, &point(3, None, 4)).unwrap();
        assert!(out.content.contains("    def test_new(self):"));
        assert!(out.content.contains("        assert True"));
    }

    #[test]
    fn test_splice_never_deindents() {
        // Candidate already carries more indentation than required
        let original = "a\nb";
        let c = candidate("        def test_x():\n            pass", "");
        let out = splice(original, &c, &point(1, None, 4)).unwrap();
        assert!(out.content.contains("        def test_x():"));
    }

    // =========================================================================
    // imports
    // =========================================================================

    #[test]
    fn test_splice_inserts_imports() {
        let original = "import os\n\ndef test_old():\n    pass";
        let c = candidate("def test_new():\n    pass", "import json\nimport re");
        let out = splice(original, &c, &point(4, Some(1), 0)).unwrap();
        assert_eq!(out.import_lines_added, 2);
        let lines: Vec<&str> = out.content.split('\n').collect();
        assert_eq!(lines[0], "import os");
        assert_eq!(lines[1], "import json");
        assert_eq!(lines[2], "import re");
    }

    #[test]
    fn test_splice_skips_imports_already_present() {
        let original = "import json\n\ndef test_old():\n    pass";
        let c = candidate("def test_new():\n    pass", "import json");
        let out = splice(original, &c, &point(4, Some(1), 0)).unwrap();
        assert_eq!(out.import_lines_added, 0);
        assert_eq!(out.content.matches("import json").count(), 1);
    }

    #[test]
    fn test_splice_quoted_empty_imports_treated_as_none() {
        let original = "a\nb";
        let c = candidate("def test_x():\n    pass", "\"\"");
        let out = splice(original, &c, &point(1, Some(1), 0)).unwrap();
        assert_eq!(out.import_lines_added, 0);
        assert!(!out.content.contains('"'));
    }

    #[test]
    fn test_splice_strips_quotes_from_imports() {
        let original = "a\nb";
        let c = candidate("def test_x():\n    pass", "\"import json\"");
        let out = splice(original, &c, &point(1, Some(1), 0)).unwrap();
        assert_eq!(out.import_lines_added, 1);
        assert!(out.content.contains("import json"));
        assert!(!out.content.contains("\"import json\""));
    }

    #[test]
    fn test_splice_no_import_line_means_no_import_insert() {
        let original = "a\nb";
        let c = candidate("def test_x():\n    pass", "import json");
        let out = splice(original, &c, &point(1, None, 0)).unwrap();
        assert_eq!(out.import_lines_added, 0);
        assert!(!out.content.contains("import json"));
    }
}
