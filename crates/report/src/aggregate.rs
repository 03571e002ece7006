//! Result aggregation
//!
//! The aggregate report is a pure function of the per-environment results.
//! It is rebuilt from scratch every time and has no state of its own.

use crate::tap::{self, TestCase, TestStatus};
use crate::trailer::exit_status;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use testbench_core::{Error, Result};
use testbench_utils::atomic_file::write_if_changed;

/// The extracted outcome of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub environment: String,
    /// Where the result stream was stored
    pub result_path: PathBuf,
    pub stream: String,
    pub exit_status: i32,
}

impl ExecutionResult {
    /// Build a result from a stream, which must end in an exit trailer
    pub fn from_stream(
        environment: impl Into<String>,
        result_path: impl Into<PathBuf>,
        stream: String,
    ) -> Result<Self> {
        let result_path = result_path.into();
        let exit_status = exit_status(&stream)
            .ok_or_else(|| Error::tap(&result_path, "result stream has no exit trailer"))?;
        Ok(Self {
            environment: environment.into(),
            result_path,
            stream,
            exit_status,
        })
    }

    /// Read a previously extracted result stream
    pub fn load(environment: impl Into<String>, result_path: &Path) -> Result<Self> {
        let stream = std::fs::read_to_string(result_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::tap(result_path, "no result stream; the environment has not completed")
            } else {
                Error::file_system(result_path, "read result stream", e)
            }
        })?;
        Self::from_stream(environment, result_path, stream)
    }
}

/// Counts per status for one stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapSummary {
    pub total: usize,
    pub ok: usize,
    pub not_ok: usize,
    pub todo_ok: usize,
    pub todo_not_ok: usize,
    pub skip: usize,
    pub missing: usize,
    /// The suite ran to completion: no protocol errors and nothing missing
    pub ran_ok: bool,
    /// Ran to completion and no test failed
    pub passed: bool,
}

impl TapSummary {
    fn of(cases: &[TestCase], errors: &[String]) -> Self {
        let count = |status| cases.iter().filter(|c| c.status == status).count();
        let mut summary = Self {
            total: cases.len(),
            ok: count(TestStatus::Ok),
            not_ok: count(TestStatus::NotOk),
            todo_ok: count(TestStatus::TodoOk),
            todo_not_ok: count(TestStatus::TodoNotOk),
            skip: count(TestStatus::Skip),
            missing: count(TestStatus::Missing),
            ran_ok: false,
            passed: false,
        };
        summary.ran_ok = errors.is_empty() && summary.missing == 0;
        summary.passed = summary.ran_ok && summary.not_ok == 0;
        summary
    }
}

/// One environment in the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub environment: String,
    pub exit_status: i32,
    pub result_file: PathBuf,
    pub summary: TapSummary,
    pub cases: Vec<TestCase>,
    pub errors: Vec<String>,
}

/// One test case across all environments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub number: u32,
    pub description: Option<String>,
    /// One status per environment, in report order
    pub statuses: Vec<TestStatus>,
}

/// Per-environment results in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub entries: Vec<ReportEntry>,
}

impl AggregateReport {
    /// Fold complete results, already in discovery order, into a report
    pub fn aggregate(results: &[ExecutionResult]) -> Self {
        let entries = results
            .iter()
            .map(|result| {
                let source = result.result_path.display().to_string();
                let stream = tap::parse(&source, &result.stream);
                for error in &stream.errors {
                    tracing::warn!(environment = %result.environment, "{error}");
                }
                let cases: Vec<TestCase> = stream.cases.into_values().collect();
                let summary = TapSummary::of(&cases, &stream.errors);
                ReportEntry {
                    environment: result.environment.clone(),
                    exit_status: result.exit_status,
                    result_file: result.result_path.clone(),
                    summary,
                    cases,
                    errors: stream.errors,
                }
            })
            .collect();
        Self { entries }
    }

    /// Load the stored result of every environment, in the given order.
    ///
    /// Fails when any environment has no usable result stream.
    pub fn collect<'a>(
        environments: impl IntoIterator<Item = (&'a str, PathBuf)>,
    ) -> Result<Self> {
        let mut results = Vec::new();
        let mut unresolved = Vec::new();
        for (environment, path) in environments {
            match ExecutionResult::load(environment, &path) {
                Ok(result) => results.push(result),
                Err(e) => unresolved.push(e),
            }
        }
        match Error::from_failures(unresolved) {
            Some(err) => Err(err),
            None => Ok(Self::aggregate(&results)),
        }
    }

    /// Worst extracted exit status; zero only if every environment exited zero
    pub fn exit_code(&self) -> i32 {
        self.entries
            .iter()
            .map(|e| e.exit_status)
            .max_by_key(|status| (*status != 0, status.unsigned_abs()))
            .unwrap_or(0)
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.environment.as_str())
    }

    /// Align test cases by number across environments.
    ///
    /// The longest stream provides the canonical descriptions. Shorter
    /// streams are padded with `Missing`, and a description that disagrees
    /// with the canonical one is reported as a note.
    pub fn matrix(&self) -> (Vec<MatrixRow>, Vec<String>) {
        // First of the longest streams, so ties go to discovery order
        let Some(canonical) = self
            .entries
            .iter()
            .reduce(|best, e| if e.cases.len() > best.cases.len() { e } else { best })
        else {
            return (Vec::new(), Vec::new());
        };
        let mut notes = Vec::new();
        let rows = canonical
            .cases
            .iter()
            .map(|reference| {
                let statuses = self
                    .entries
                    .iter()
                    .map(|entry| {
                        match entry.cases.iter().find(|c| c.number == reference.number) {
                            Some(case) => {
                                if case.description != reference.description
                                    && case.status != TestStatus::Missing
                                {
                                    notes.push(format!(
                                        "{}: test {}: mismatched description: expected={:?} actual={:?}",
                                        entry.environment,
                                        reference.number,
                                        reference.description.as_deref().unwrap_or_default(),
                                        case.description.as_deref().unwrap_or_default(),
                                    ));
                                }
                                case.status
                            }
                            None => {
                                notes.push(format!(
                                    "{}: test {}: missing",
                                    entry.environment, reference.number
                                ));
                                TestStatus::Missing
                            }
                        }
                    })
                    .collect();
                MatrixRow {
                    number: reference.number,
                    description: reference.description.clone(),
                    statuses,
                }
            })
            .collect();
        for note in &notes {
            tracing::debug!("{note}");
        }
        (rows, notes)
    }

    /// Persist as JSON, leaving the file untouched when nothing changed
    pub fn write(&self, path: &Path) -> Result<bool> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        write_if_changed(path, &json)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|e| Error::file_system(path, "read report", e))?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Plain-text rendering: one summary line per environment, then the matrix
    pub fn render_text(&self) -> String {
        let width = self
            .entries
            .iter()
            .map(|e| e.environment.len())
            .chain(std::iter::once("ENVIRONMENT".len()))
            .max()
            .unwrap_or_default();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<width$}  {:>4}  {:>4}  {:>6}  {:>4}  {:>4}  {:>7}  RAN OK",
            "ENVIRONMENT", "EXIT", "OK", "NOT OK", "TODO", "SKIP", "MISSING"
        );
        for entry in &self.entries {
            let s = &entry.summary;
            let _ = writeln!(
                out,
                "{:<width$}  {:>4}  {:>4}  {:>6}  {:>4}  {:>4}  {:>7}  {}",
                entry.environment,
                entry.exit_status,
                s.ok,
                s.not_ok,
                s.todo_ok + s.todo_not_ok,
                s.skip,
                s.missing,
                if s.ran_ok { "yes" } else { "no" }
            );
        }

        let (rows, notes) = self.matrix();
        if !rows.is_empty() {
            out.push('\n');
            for row in rows {
                let cells: Vec<&str> = row.statuses.iter().map(TestStatus::as_str).collect();
                let _ = writeln!(
                    out,
                    "{:>4} {:<40} {}",
                    row.number,
                    row.description.as_deref().unwrap_or_default(),
                    cells.join(" ")
                );
            }
        }

        let errors = self.entries.iter().flat_map(|e| e.errors.iter());
        let mut problems = errors.chain(notes.iter()).peekable();
        if problems.peek().is_some() {
            out.push('\n');
            for problem in problems {
                let _ = writeln!(out, "{problem}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result(environment: &str, stream: &str) -> ExecutionResult {
        ExecutionResult::from_stream(
            environment,
            format!("out/{environment}.tap"),
            stream.to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_stream_requires_trailer() {
        let err = ExecutionResult::from_stream("alpha", "out/alpha.tap", "ok 1\n".into()).unwrap_err();
        assert!(err.to_string().contains("exit trailer"));
    }

    #[test]
    fn test_aggregate_keeps_input_order() {
        let report = AggregateReport::aggregate(&[
            result("alpha", "1..2\nok 1 - a\nok 2 - b\n# exit: 0\n"),
            result("beta", "1..2\nok 1 - a\nnot ok 2 - b\n# exit: 1\n"),
        ]);
        assert_eq!(report.environments().collect::<Vec<_>>(), ["alpha", "beta"]);
        assert_eq!(report.entries[0].exit_status, 0);
        assert_eq!(report.entries[1].exit_status, 1);
        assert!(report.entries[0].summary.passed);
        assert!(report.entries[1].summary.ran_ok);
        assert!(!report.entries[1].summary.passed);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_trailer_status_becomes_exit_code() {
        let report = AggregateReport::aggregate(&[
            result("alpha", "1..1\nok 1\n# exit: 0\n"),
            result("beta", "1..1\nnot ok 1\n# exit: 2\n"),
        ]);
        assert_eq!(report.exit_code(), 2);

        let clean = AggregateReport::aggregate(&[result("alpha", "ok 1\n# exit: 0\n")]);
        assert_eq!(clean.exit_code(), 0);
        assert_eq!(AggregateReport::default().exit_code(), 0);
    }

    #[test]
    fn test_matrix_alignment() {
        let report = AggregateReport::aggregate(&[
            result("alpha", "1..2\nok 1 - boots\nok 2 - pods\n# exit: 0\n"),
            result("beta", "ok 1 - starts\n# exit: 0\n"),
        ]);
        let (rows, notes) = report.matrix();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].statuses, [TestStatus::Ok, TestStatus::Missing]);
        assert!(notes.iter().any(|n| n.contains("beta: test 1: mismatched description")));
        assert!(notes.iter().any(|n| n == "beta: test 2: missing"));
    }

    #[test]
    fn test_protocol_errors_are_kept() {
        let report = AggregateReport::aggregate(&[result(
            "alpha",
            "1..2\nok 1\nBail out! no cluster\n# exit: 1\n",
        )]);
        let entry = &report.entries[0];
        assert_eq!(entry.errors.len(), 1);
        assert!(entry.errors[0].ends_with("Bail out! no cluster"));
        assert!(!entry.summary.ran_ok);
    }

    #[test]
    fn test_matrix_descriptions_come_from_first_longest_stream() {
        let report = AggregateReport::aggregate(&[
            result("alpha", "ok 1 - boots\n# exit: 0\n"),
            result("beta", "ok 1 - starts\n# exit: 0\n"),
        ]);
        let (rows, notes) = report.matrix();
        assert_eq!(rows[0].description.as_deref(), Some("boots"));
        assert_eq!(notes.len(), 1);
        assert!(notes[0].starts_with("beta: test 1: mismatched description"));
    }

    #[test]
    fn test_collect_reports_unresolved_environments() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("alpha.tap"), "ok 1\n# exit: 0\n").unwrap();

        let err = AggregateReport::collect([
            ("alpha", temp.path().join("alpha.tap")),
            ("beta", temp.path().join("beta.tap")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("beta.tap"));
    }

    #[test]
    fn test_write_is_stable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("report.json");
        let report = AggregateReport::aggregate(&[result("alpha", "ok 1\n# exit: 3\n")]);

        assert!(report.write(&path).unwrap());
        assert!(!report.write(&path).unwrap());
        assert_eq!(AggregateReport::read(&path).unwrap(), report);
    }

    #[test]
    fn test_render_text() {
        let report = AggregateReport::aggregate(&[
            result("alpha", "1..1\nok 1 - boots\n# exit: 0\n"),
            result("beta", "1..1\nnot ok 1 - boots\n# exit: 1\n"),
        ]);
        let text = report.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("ENVIRONMENT"));
        assert!(lines[1].starts_with("alpha"));
        assert!(lines[2].starts_with("beta"));
        assert!(text.contains("OK NOT_OK"));
    }
}
