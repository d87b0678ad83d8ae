//! Coverage measurement.
//!
//! Wraps the report artifact produced by the test command into a single
//! measurement: overall covered fraction plus a per-file breakdown. Three
//! modes are supported: the whole report (aggregate), the whole report with
//! per-file accounting, and diff coverage restricted to changed lines
//! versus a comparison branch (report produced by `diff-cover`).
//!
//! Report parsing is deliberately shallow: we scan cobertura attributes
//! rather than pulling in a full XML stack. A report we cannot parse is
//! surfaced as [`CoverageError::Unparseable`] carrying the raw text, so the
//! caller can still hand the report to the model as an opaque blob.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which slice of the report the measurement covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageMode {
    /// Overall numbers from the report root.
    Aggregate,
    /// Overall numbers plus per-file fractions for every file in the report.
    PerFile,
    /// Coverage of changed lines only, from a diff-cover JSON report.
    Diff,
}

/// One coverage measurement, taken strictly after a test-command run.
#[derive(Debug, Clone, Default)]
pub struct CoverageMeasurement {
    pub lines_covered: u64,
    pub lines_missed: u64,
    /// Covered fraction in [0, 1].
    pub overall: f64,
    /// File name (basename) to covered fraction.
    pub per_file: HashMap<String, f64>,
}

impl CoverageMeasurement {
    /// Human-readable rendering used as generation context.
    pub fn render(&self) -> String {
        format!(
            "Lines covered: {}\nLines missed: {}\nPercentage covered: {:.2}%",
            self.lines_covered,
            self.lines_missed,
            self.overall * 100.0
        )
    }
}

#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("coverage report not found at {0}")]
    Missing(PathBuf),
    #[error("coverage report at {0} was not refreshed by the test run")]
    Stale(PathBuf),
    #[error("could not parse coverage report: {reason}")]
    Unparseable {
        reason: String,
        /// Raw report text, kept so callers can fall back to an opaque blob.
        raw: String,
    },
    #[error("failed to read coverage report: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads and interprets the coverage report artifact.
pub struct CoverageProcessor {
    report_path: PathBuf,
    mode: CoverageMode,
}

impl CoverageProcessor {
    pub fn new(report_path: impl Into<PathBuf>, mode: CoverageMode) -> Self {
        Self {
            report_path: report_path.into(),
            mode,
        }
    }

    pub fn mode(&self) -> CoverageMode {
        self.mode
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Process the report on disk.
    ///
    /// `run_started_at` is the launch time of the test command the report is
    /// expected to belong to; an older report means the command did not
    /// refresh it and the measurement would be stale.
    pub fn process(
        &self,
        run_started_at: DateTime<Utc>,
    ) -> Result<CoverageMeasurement, CoverageError> {
        if !self.report_path.exists() {
            return Err(CoverageError::Missing(self.report_path.clone()));
        }

        let modified: DateTime<Utc> = std::fs::metadata(&self.report_path)?
            .modified()
            .map(DateTime::from)
            .map_err(CoverageError::Io)?;
        if modified < run_started_at {
            return Err(CoverageError::Stale(self.report_path.clone()));
        }

        let raw = std::fs::read_to_string(&self.report_path)?;
        match self.mode {
            CoverageMode::Aggregate | CoverageMode::PerFile => parse_cobertura(&raw),
            CoverageMode::Diff => parse_diff_cover_json(&raw),
        }
    }
}

/// Pull a quoted attribute value out of an XML tag body.
fn xml_attr(tag: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')? + start;
    Some(tag[start..end].to_string())
}

/// Shallow cobertura scan: root `line-rate`/`lines-covered`/`lines-valid`
/// attributes for the totals, `<class>` tags for the per-file map.
fn parse_cobertura(raw: &str) -> Result<CoverageMeasurement, CoverageError> {
    let mut measurement = CoverageMeasurement::default();
    let mut found_root = false;

    for tag in raw.split('<').skip(1) {
        if tag.starts_with("coverage") && !found_root {
            let rate = xml_attr(tag, "line-rate")
                .and_then(|v| v.parse::<f64>().ok())
                .ok_or_else(|| CoverageError::Unparseable {
                    reason: "missing line-rate on <coverage> root".to_string(),
                    raw: raw.to_string(),
                })?;
            measurement.overall = rate;
            measurement.lines_covered = xml_attr(tag, "lines-covered")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let lines_valid: u64 = xml_attr(tag, "lines-valid")
                .and_then(|v| v.parse().ok())
                .unwrap_or(measurement.lines_covered);
            measurement.lines_missed = lines_valid.saturating_sub(measurement.lines_covered);
            found_root = true;
        } else if tag.starts_with("class ") || tag.starts_with("class\t") {
            let (Some(filename), Some(rate)) = (
                xml_attr(tag, "filename"),
                xml_attr(tag, "line-rate").and_then(|v| v.parse::<f64>().ok()),
            ) else {
                continue;
            };
            let key = filename
                .rsplit('/')
                .next()
                .unwrap_or(filename.as_str())
                .to_string();
            measurement.per_file.insert(key, rate);
        }
    }

    if !found_root {
        return Err(CoverageError::Unparseable {
            reason: "no <coverage> root element found".to_string(),
            raw: raw.to_string(),
        });
    }
    Ok(measurement)
}

/// diff-cover JSON report shape (the subset we use).
#[derive(serde::Deserialize)]
struct DiffCoverReport {
    total_num_lines: u64,
    total_num_violations: u64,
    total_percent_covered: f64,
    #[serde(default)]
    src_stats: HashMap<String, DiffCoverFile>,
}

#[derive(serde::Deserialize)]
struct DiffCoverFile {
    percent_covered: f64,
}

fn parse_diff_cover_json(raw: &str) -> Result<CoverageMeasurement, CoverageError> {
    let report: DiffCoverReport =
        serde_json::from_str(raw).map_err(|e| CoverageError::Unparseable {
            reason: format!("invalid diff-cover JSON: {}", e),
            raw: raw.to_string(),
        })?;

    let per_file = report
        .src_stats
        .into_iter()
        .map(|(path, stats)| {
            let key = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
            (key, stats.percent_covered / 100.0)
        })
        .collect();

    Ok(CoverageMeasurement {
        lines_covered: report.total_num_lines.saturating_sub(report.total_num_violations),
        lines_missed: report.total_num_violations,
        overall: report.total_percent_covered / 100.0,
        per_file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COBERTURA: &str = r#"<?xml version="1.0" ?>
<coverage version="7.2" timestamp="1700000000" lines-valid="100" lines-covered="60" line-rate="0.6">
  <packages>
    <package name="app">
      <classes>
        <class name="app" filename="src/app.py" line-rate="0.55"/>
        <class name="util" filename="src/util.py" line-rate="0.8"/>
      </classes>
    </package>
  </packages>
</coverage>
"#;

    fn past() -> DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(1)
    }

    #[test]
    fn test_parse_cobertura_totals() {
        let m = parse_cobertura(COBERTURA).unwrap();
        assert_eq!(m.lines_covered, 60);
        assert_eq!(m.lines_missed, 40);
        assert!((m.overall - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_parse_cobertura_per_file_keys_are_basenames() {
        let m = parse_cobertura(COBERTURA).unwrap();
        assert_eq!(m.per_file.len(), 2);
        assert!((m.per_file["app.py"] - 0.55).abs() < 1e-9);
        assert!((m.per_file["util.py"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_cobertura_garbage_carries_raw_blob() {
        let err = parse_cobertura("not xml at all").unwrap_err();
        match err {
            CoverageError::Unparseable { raw, .. } => assert_eq!(raw, "not xml at all"),
            other => panic!("expected Unparseable, got {:?}", other),
        }
    }

    #[test]
    fn test_process_missing_report() {
        let dir = tempfile::tempdir().unwrap();
        let proc = CoverageProcessor::new(dir.path().join("nope.xml"), CoverageMode::Aggregate);
        assert!(matches!(
            proc.process(past()),
            Err(CoverageError::Missing(_))
        ));
    }

    #[test]
    fn test_process_stale_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.xml");
        std::fs::write(&path, COBERTURA).unwrap();
        // Pretend the test run started an hour from now
        let future = Utc::now() + chrono::Duration::hours(1);
        let proc = CoverageProcessor::new(&path, CoverageMode::Aggregate);
        assert!(matches!(proc.process(future), Err(CoverageError::Stale(_))));
    }

    #[test]
    fn test_process_fresh_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.xml");
        std::fs::write(&path, COBERTURA).unwrap();
        let proc = CoverageProcessor::new(&path, CoverageMode::Aggregate);
        let m = proc.process(past()).unwrap();
        assert_eq!(m.lines_covered, 60);
    }

    #[test]
    fn test_parse_diff_cover_json() {
        let raw = r#"{
            "total_num_lines": 50,
            "total_num_violations": 10,
            "total_percent_covered": 80.0,
            "src_stats": {
                "src/app.py": {"percent_covered": 75.0}
            }
        }"#;
        let m = parse_diff_cover_json(raw).unwrap();
        assert_eq!(m.lines_covered, 40);
        assert_eq!(m.lines_missed, 10);
        assert!((m.overall - 0.8).abs() < 1e-9);
        assert!((m.per_file["app.py"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_render_measurement() {
        let m = CoverageMeasurement {
            lines_covered: 6,
            lines_missed: 4,
            overall: 0.6,
            per_file: HashMap::new(),
        };
        let text = m.render();
        assert!(text.contains("Lines covered: 6"));
        assert!(text.contains("60.00%"));
    }
}
