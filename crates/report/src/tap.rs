//! TAP 12 and TAP 13 parsing
//!
//! Parsing never fails outright. Problems are collected as messages next to
//! whatever test cases could be recovered, so a broken stream still shows up
//! in the report.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

static TEST_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ok|not ok)\b\s*([0-9]+\b)?([^#]*)(#.*)?").expect("valid test line pattern")
});
static TODO_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^# TODO( .*)?$").expect("valid TODO pattern"));
static SKIP_DIRECTIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^# SKIP").expect("valid SKIP pattern"));
static YAML_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+---$").expect("valid YAML start pattern"));
static YAML_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+\.\.\.$").expect("valid YAML end pattern"));

/// Planned cases beyond the highest reported number that are filled in as
/// `Missing`. A larger gap means the plan line is garbage.
const MAX_UNREPORTED_CASES: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Ok,
    NotOk,
    TodoOk,
    TodoNotOk,
    Skip,
    Missing,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Ok => "OK",
            TestStatus::NotOk => "NOT_OK",
            TestStatus::TodoOk => "TODO_OK",
            TestStatus::TodoNotOk => "TODO_NOT_OK",
            TestStatus::Skip => "SKIP",
            TestStatus::Missing => "MISSING",
        }
    }

    /// Whether this status makes the suite fail
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::NotOk | TestStatus::Missing)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub number: u32,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Raw YAML diagnostics block (TAP 13 only), not interpreted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaml: Option<String>,
}

impl TestCase {
    fn missing(number: u32) -> Self {
        Self {
            number,
            status: TestStatus::Missing,
            description: None,
            comment: None,
            yaml: None,
        }
    }
}

/// Everything recovered from one stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TapStream {
    pub version: u32,
    pub plan: Option<u32>,
    pub cases: BTreeMap<u32, TestCase>,
    pub errors: Vec<String>,
}

/// Parse a stream. `source` names it in error messages.
pub fn parse(source: &str, text: &str) -> TapStream {
    let first = text.lines().next().unwrap_or_default();
    let Some(declared) = first.strip_prefix("TAP version ") else {
        return Parser::new(source, 12).run(text.lines(), 0);
    };

    let mut stream = TapStream {
        version: 12,
        ..Default::default()
    };
    let version = match declared.trim().parse::<u32>() {
        Ok(version) => version,
        Err(_) => {
            stream
                .errors
                .push(format!("{source}:1: Invalid TAP: not an integer version: {declared:?}"));
            return stream;
        }
    };
    match version {
        13 => Parser::new(source, 13).run(text.lines().skip(1), 1),
        v if v < 13 => {
            stream.errors.push(format!(
                "{source}:1: Invalid TAP: it is illegal to specify a TAP version < 13, got: {v}"
            ));
            stream
        }
        v => {
            stream
                .errors
                .push(format!("{source}:1: Invalid TAP: unsupported TAP version {v}"));
            stream
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    version: u32,
    lineno: usize,
    stream: TapStream,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, version: u32) -> Self {
        Self {
            source,
            version,
            lineno: 0,
            stream: TapStream {
                version,
                ..Default::default()
            },
        }
    }

    fn error(&mut self, message: impl fmt::Display) {
        self.stream.errors.push(format!(
            "{}:{}: Invalid TAP{}: {message}",
            self.source, self.lineno, self.version
        ));
    }

    fn run<'l>(mut self, lines: impl Iterator<Item = &'l str>, offset: usize) -> TapStream {
        let strict = self.version >= 13;
        let mut lines = lines.peekable();
        let mut at_end = false;
        let mut previous = 0u32;
        self.lineno = offset;

        while let Some(line) = lines.next() {
            self.lineno += 1;

            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            if at_end {
                self.error("cannot have more output after trailing test plan");
                break;
            }

            if line.starts_with("TAP version ") && !strict {
                self.error(format!("cannot specify a version: {line:?}"));
                break;
            } else if let Some(count) = line.strip_prefix("1..") {
                if self.stream.plan.is_some() {
                    self.error("test plan can only be given once");
                    break;
                }
                let Ok(count) = count.trim().parse::<u32>() else {
                    self.error(format!("not an integer number of tests: {count:?}"));
                    break;
                };
                if !self.stream.cases.is_empty() {
                    at_end = true;
                }
                self.stream.plan = Some(count);
            } else if let Some(caps) = TEST_LINE.captures(line) {
                let mut status = if &caps[1] == "ok" {
                    TestStatus::Ok
                } else {
                    TestStatus::NotOk
                };
                let explicit = caps.get(2).and_then(|m| m.as_str().parse().ok());
                let Some(number) = explicit.or_else(|| previous.checked_add(1)) else {
                    self.error(format!("test number out of range after {previous}"));
                    break;
                };
                let description = caps
                    .get(3)
                    .map(|m| m.as_str().trim().trim_start_matches("- ").trim().to_string())
                    .filter(|d| !d.is_empty());
                let comment = caps.get(4).map(|m| m.as_str().trim_end().to_string());

                if let Some(comment) = comment.as_deref() {
                    if TODO_DIRECTIVE.is_match(comment) {
                        status = match status {
                            TestStatus::Ok => TestStatus::TodoOk,
                            _ => TestStatus::TodoNotOk,
                        };
                    }
                    if SKIP_DIRECTIVE.is_match(comment) {
                        status = TestStatus::Skip;
                    }
                }

                let mut yaml = None;
                if strict && lines.peek().is_some_and(|next| YAML_START.is_match(next)) {
                    let mut block = String::new();
                    for raw in lines.by_ref() {
                        self.lineno += 1;
                        block.push_str(raw);
                        block.push('\n');
                        if YAML_END.is_match(raw) {
                            break;
                        }
                    }
                    yaml = Some(block);
                }

                self.stream.cases.insert(
                    number,
                    TestCase {
                        number,
                        status,
                        description,
                        comment,
                        yaml,
                    },
                );
                previous = number;
            } else if line.starts_with("Bail out!") {
                self.error(line);
                break;
            } else if strict {
                self.error(format!("invalid line: {line:?}"));
                break;
            }
            // TAP 12 ignores unknown lines
        }

        self.finish()
    }

    fn finish(mut self) -> TapStream {
        if let Some(plan) = self.stream.plan {
            let highest = self.stream.cases.keys().next_back().copied().unwrap_or(0);
            let padded = plan.min(highest.saturating_add(MAX_UNREPORTED_CASES));
            if padded < plan {
                self.error(format!(
                    "implausible test plan 1..{plan}, only {highest} reported; missing cases listed up to {padded}"
                ));
            }
            for number in 1..=padded {
                self.stream
                    .cases
                    .entry(number)
                    .or_insert_with(|| TestCase::missing(number));
            }
            let total = self.stream.cases.len();
            if total > plan as usize {
                self.error(format!(
                    "more test results than test plan indicated, truncating: {total} > {plan}"
                ));
                self.stream.cases.retain(|number, _| (1..=plan).contains(number));
            }
        }
        self.stream
    }
}

impl TapStream {
    pub fn count(&self, status: TestStatus) -> usize {
        self.cases.values().filter(|c| c.status == status).count()
    }
}
