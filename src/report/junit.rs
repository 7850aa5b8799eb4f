//! JUnit XML report generation.
//!
//! Generates JUnit XML format test reports, which are the de facto standard
//! for CI/CD systems. The output is compatible with Jenkins, GitLab CI,
//! GitHub Actions, CircleCI, and other CI platforms.
//!
//! # Format
//!
//! One `<testsuite>` is written per test class, in the order classes were
//! first seen:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites name="exam" tests="3" failures="1" errors="0" skipped="1" time="1.234">
//!   <testsuite name="Calc" tests="3" failures="1" errors="0" skipped="1" time="1.234" timestamp="2026-01-01T12:00:00Z">
//!     <testcase classname="Calc" name="adds" time="0.100"/>
//!     <testcase classname="Calc" name="subtracts" time="0.150">
//!       <failure message="expected 1" type="AssertionError">trace</failure>
//!     </testcase>
//!     <testcase classname="Calc" name="divides" time="0.000">
//!       <skipped/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! # Example
//!
//! ```
//! use exam::report::JUnitListener;
//!
//! let listener = JUnitListener::new("test-results/junit.xml".into())
//!     .with_testsuite_name("my-project-tests");
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::listener::{Description, Failure, RunSummary, TestListener, TestOutcome};

#[derive(Debug, Clone)]
struct CaseRecord {
    description: Description,
    outcome: TestOutcome,
    failure: Option<Failure>,
    duration: Duration,
}

#[derive(Debug)]
struct InFlight {
    started: Instant,
    outcome: TestOutcome,
    failure: Option<Failure>,
}

#[derive(Debug)]
struct JUnitState {
    started_at: DateTime<Utc>,
    in_flight: HashMap<Description, InFlight>,
    cases: Vec<CaseRecord>,
}

/// Listener that writes a JUnit XML report when the run finishes.
///
/// Parent directories of the output file are created automatically.
pub struct JUnitListener {
    output_path: PathBuf,
    testsuite_name: String,
    state: Mutex<JUnitState>,
}

impl JUnitListener {
    /// Creates a listener that writes to `output_path`.
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            testsuite_name: "exam".to_string(),
            state: Mutex::new(JUnitState {
                started_at: Utc::now(),
                in_flight: HashMap::new(),
                cases: Vec::new(),
            }),
        }
    }

    /// Sets the name of the `<testsuites>` element. Defaults to `"exam"`.
    pub fn with_testsuite_name(mut self, name: impl Into<String>) -> Self {
        self.testsuite_name = name.into();
        self
    }

    /// Output file.
    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut JUnitState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut state| f(&mut state))
    }

    fn record_failure(&self, failure: &Failure, outcome: TestOutcome) {
        self.with_state(|state| {
            if let Some(test) = state.in_flight.get_mut(&failure.description) {
                test.outcome = outcome;
                test.failure = Some(failure.clone());
            }
        });
    }

    /// Renders the recorded test cases.
    pub fn to_xml(&self) -> anyhow::Result<String> {
        let (cases, started_at) = self
            .with_state(|state| (state.cases.clone(), state.started_at))
            .ok_or_else(|| anyhow::anyhow!("JUnit state lock poisoned"))?;

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let totals = Totals::of(cases.iter());
        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("name", self.testsuite_name.as_str()));
        totals.push_attributes(&mut testsuites);
        writer.write_event(Event::Start(testsuites))?;

        let timestamp = started_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let mut classes: Vec<&str> = Vec::new();
        for case in &cases {
            if !classes.contains(&case.description.class_name.as_str()) {
                classes.push(&case.description.class_name);
            }
        }

        for class in classes {
            let class_cases: Vec<&CaseRecord> = cases
                .iter()
                .filter(|c| c.description.class_name == class)
                .collect();

            let mut testsuite = BytesStart::new("testsuite");
            testsuite.push_attribute(("name", class));
            Totals::of(class_cases.iter().copied()).push_attributes(&mut testsuite);
            testsuite.push_attribute(("timestamp", timestamp.as_str()));
            writer.write_event(Event::Start(testsuite))?;

            for case in class_cases {
                write_testcase(&mut writer, case)?;
            }

            writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

        let xml = String::from_utf8(writer.into_inner())?;
        Ok(xml)
    }

    /// Writes the report to the output path.
    pub fn write(&self) -> anyhow::Result<()> {
        let xml = self.to_xml()?;
        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.output_path, xml)?;
        Ok(())
    }
}

struct Totals {
    tests: usize,
    failures: usize,
    errors: usize,
    skipped: usize,
    time: Duration,
}

impl Totals {
    fn of<'a>(cases: impl Iterator<Item = &'a CaseRecord>) -> Self {
        let mut totals = Totals {
            tests: 0,
            failures: 0,
            errors: 0,
            skipped: 0,
            time: Duration::ZERO,
        };
        for case in cases {
            totals.tests += 1;
            totals.time += case.duration;
            match case.outcome {
                TestOutcome::Passed => {}
                TestOutcome::Failed => totals.failures += 1,
                TestOutcome::Error => totals.errors += 1,
                TestOutcome::Skipped => totals.skipped += 1,
            }
        }
        totals
    }

    fn push_attributes(&self, element: &mut BytesStart<'_>) {
        element.push_attribute(("tests", self.tests.to_string().as_str()));
        element.push_attribute(("failures", self.failures.to_string().as_str()));
        element.push_attribute(("errors", self.errors.to_string().as_str()));
        element.push_attribute(("skipped", self.skipped.to_string().as_str()));
        element.push_attribute(("time", format!("{:.3}", self.time.as_secs_f64()).as_str()));
    }
}

/// Write a single test case element.
fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    case: &CaseRecord,
) -> anyhow::Result<()> {
    let name = case
        .description
        .method_name
        .clone()
        .unwrap_or_else(|| case.description.class_name.clone());

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", case.description.class_name.as_str()));
    testcase.push_attribute(("name", sanitize_xml(&name).as_str()));
    testcase.push_attribute((
        "time",
        format!("{:.3}", case.duration.as_secs_f64()).as_str(),
    ));

    let element = match case.outcome {
        TestOutcome::Passed => {
            writer.write_event(Event::Empty(testcase))?;
            return Ok(());
        }
        TestOutcome::Failed => "failure",
        TestOutcome::Error => "error",
        TestOutcome::Skipped => "skipped",
    };

    writer.write_event(Event::Start(testcase))?;

    match &case.failure {
        Some(failure) => {
            let mut child = BytesStart::new(element);
            child.push_attribute(("message", sanitize_xml(&failure.message).as_str()));
            if element != "skipped" {
                child.push_attribute(("type", failure.class_name.as_str()));
            }
            match &failure.trace {
                Some(trace) => {
                    writer.write_event(Event::Start(child))?;
                    writer.write_event(Event::Text(BytesText::new(&sanitize_xml(trace))))?;
                    writer.write_event(Event::End(BytesEnd::new(element)))?;
                }
                None => writer.write_event(Event::Empty(child))?,
            }
        }
        None => writer.write_event(Event::Empty(BytesStart::new(element)))?,
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

/// Removes characters XML 1.0 cannot represent. Escaping is left to the
/// writer.
fn sanitize_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

#[async_trait]
impl TestListener for JUnitListener {
    async fn test_started(&self, description: &Description) {
        self.with_state(|state| {
            state.in_flight.insert(
                description.clone(),
                InFlight {
                    started: Instant::now(),
                    outcome: TestOutcome::Passed,
                    failure: None,
                },
            );
        });
    }

    async fn test_finished(&self, description: &Description) {
        self.with_state(|state| {
            if let Some(test) = state.in_flight.remove(description) {
                state.cases.push(CaseRecord {
                    description: description.clone(),
                    outcome: test.outcome,
                    failure: test.failure,
                    duration: test.started.elapsed(),
                });
            }
        });
    }

    async fn test_failure(&self, failure: &Failure) {
        self.record_failure(failure, TestOutcome::from_failure_kind(failure.kind));
    }

    async fn test_ignored(&self, description: &Description) {
        self.with_state(|state| {
            state.cases.push(CaseRecord {
                description: description.clone(),
                outcome: TestOutcome::Skipped,
                failure: None,
                duration: Duration::ZERO,
            });
        });
    }

    async fn test_assumption_failure(&self, failure: &Failure) {
        self.record_failure(failure, TestOutcome::Skipped);
    }

    async fn run_started(&self, _total: usize) {
        self.with_state(|state| state.started_at = Utc::now());
    }

    async fn run_finished(&self, _summary: &RunSummary) {
        match self.write() {
            Ok(()) => tracing::info!("JUnit XML written to: {}", self.output_path.display()),
            Err(e) => tracing::error!("Failed to write JUnit XML: {}", e),
        }
    }
}
