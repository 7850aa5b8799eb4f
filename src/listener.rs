//! Test listeners: the sink staged reactors report into.
//!
//! Every invocation produces `test_started`, then at most one of
//! `test_failure` / `test_assumption_failure`, then `test_finished`.
//! Listeners also receive run-level `run_started` / `run_finished` events
//! from drivers that know the size of the run.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::TestAddress;
use crate::container::RemoteFailure;

/// Identifies a reported test: class name plus optional method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Description {
    pub class_name: String,
    pub method_name: Option<String>,
}

impl Description {
    /// Describes a whole class.
    pub fn class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: None,
        }
    }

    /// Describes one method of a class.
    pub fn method(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: Some(method_name.into()),
        }
    }

    /// Describes the test behind an address.
    ///
    /// The caption is split at its first `.`: `Sample.m1:felix` becomes
    /// class `Sample`, method `m1:felix`. Parameterized addresses get their
    /// arguments appended to the method name.
    pub fn for_address(address: &TestAddress) -> Self {
        let caption = address.caption();
        let mut description = match caption.split_once('.') {
            Some((class, method)) => Self::method(class, method),
            None => Self::class(caption),
        };

        if address.is_parameterized()
            && let Some(method) = description.method_name.as_mut()
        {
            let args: Vec<String> = address.arguments().iter().map(|v| v.to_string()).collect();
            method.push_str(&format!("[{}]", args.join(", ")));
        }
        description
    }

    /// `Class.method`, or just the class name.
    pub fn display_name(&self) -> String {
        match &self.method_name {
            Some(method) => format!("{}.{}", self.class_name, method),
            None => self.class_name.clone(),
        }
    }
}

/// Kind of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// An assertion did not hold.
    Assertion,
    /// A precondition did not hold; the test does not apply.
    Assumption,
    /// The test or its container raised an unexpected error.
    Error,
}

/// A failure reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub description: Description,
    pub kind: FailureKind,
    /// Type name of the original failure. Failures that could not cross the
    /// container boundary only keep this name and their message.
    pub class_name: String,
    pub message: String,
    pub trace: Option<String>,
}

impl Failure {
    /// Attaches a description to a failure returned by a container.
    pub fn from_remote(description: Description, failure: RemoteFailure) -> Self {
        Self {
            description,
            kind: failure.kind,
            class_name: failure.class_name,
            message: failure.message,
            trace: failure.trace,
        }
    }
}

/// The outcome status of a test invocation.
///
/// | Outcome | Description | Fails the run? |
/// |---------|-------------|----------------|
/// | Passed | Test completed normally | No |
/// | Failed | An assertion failed | Yes |
/// | Skipped | Ignored or assumption violated | No |
/// | Error | Test or container raised an error | Yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl TestOutcome {
    /// Returns `true` if this outcome does not fail the run.
    ///
    /// ```
    /// use exam::listener::TestOutcome;
    ///
    /// assert!(TestOutcome::Passed.is_success());
    /// assert!(TestOutcome::Skipped.is_success());
    /// assert!(!TestOutcome::Failed.is_success());
    /// assert!(!TestOutcome::Error.is_success());
    /// ```
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed | TestOutcome::Skipped)
    }

    /// Outcome implied by a failure of the given kind.
    pub fn from_failure_kind(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Assertion => TestOutcome::Failed,
            FailureKind::Assumption => TestOutcome::Skipped,
            FailureKind::Error => TestOutcome::Error,
        }
    }
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl RunSummary {
    /// Returns `true` if nothing failed.
    pub fn success(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }

    /// Process exit code for this summary.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }

    /// Counts one outcome.
    pub fn record(&mut self, outcome: TestOutcome) {
        self.total += 1;
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::Error => self.errors += 1,
        }
    }
}

/// Receives test events from staged reactors.
#[async_trait]
pub trait TestListener: Send + Sync {
    /// Called before a test is invoked.
    async fn test_started(&self, description: &Description);

    /// Called after a test finished, whatever its outcome.
    async fn test_finished(&self, description: &Description);

    /// Called when a test failed or raised an error.
    async fn test_failure(&self, failure: &Failure);

    /// Called for tests that are not run.
    async fn test_ignored(&self, description: &Description);

    /// Called when a test's assumption did not hold.
    async fn test_assumption_failure(&self, failure: &Failure);

    /// Called once before the first test of a run.
    async fn run_started(&self, _total: usize) {}

    /// Called once after the last test of a run.
    async fn run_finished(&self, _summary: &RunSummary) {}
}

/// A listener that does nothing.
pub struct NullListener;

#[async_trait]
impl TestListener for NullListener {
    async fn test_started(&self, _description: &Description) {}
    async fn test_finished(&self, _description: &Description) {}
    async fn test_failure(&self, _failure: &Failure) {}
    async fn test_ignored(&self, _description: &Description) {}
    async fn test_assumption_failure(&self, _failure: &Failure) {}
}

/// A listener that forwards to several listeners, in order.
#[derive(Default)]
pub struct MultiListener {
    listeners: Vec<Box<dyn TestListener>>,
}

impl MultiListener {
    /// Creates an empty multi-listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn with_listener<L: TestListener + 'static>(mut self, listener: L) -> Self {
        self.listeners.push(Box::new(listener));
        self
    }
}

#[async_trait]
impl TestListener for MultiListener {
    async fn test_started(&self, description: &Description) {
        for listener in &self.listeners {
            listener.test_started(description).await;
        }
    }

    async fn test_finished(&self, description: &Description) {
        for listener in &self.listeners {
            listener.test_finished(description).await;
        }
    }

    async fn test_failure(&self, failure: &Failure) {
        for listener in &self.listeners {
            listener.test_failure(failure).await;
        }
    }

    async fn test_ignored(&self, description: &Description) {
        for listener in &self.listeners {
            listener.test_ignored(description).await;
        }
    }

    async fn test_assumption_failure(&self, failure: &Failure) {
        for listener in &self.listeners {
            listener.test_assumption_failure(failure).await;
        }
    }

    async fn run_started(&self, total: usize) {
        for listener in &self.listeners {
            listener.run_started(total).await;
        }
    }

    async fn run_finished(&self, summary: &RunSummary) {
        for listener in &self.listeners {
            listener.run_finished(summary).await;
        }
    }
}

/// One event seen by a [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    Started(Description),
    Finished(Description),
    Failure(Failure),
    Ignored(Description),
    AssumptionFailure(Failure),
}

/// A listener that records every event in order.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ListenerEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// All events so far.
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Descriptions of started tests.
    pub fn started(&self) -> Vec<Description> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Started(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Descriptions of finished tests.
    pub fn finished(&self) -> Vec<Description> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Finished(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Reported failures (assertions and errors).
    pub fn failures(&self) -> Vec<Failure> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::Failure(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Reported assumption failures.
    pub fn assumption_failures(&self) -> Vec<Failure> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ListenerEvent::AssumptionFailure(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Summary derived from the recorded events.
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut current: Option<TestOutcome> = None;

        for event in self.events() {
            match event {
                ListenerEvent::Started(_) => current = Some(TestOutcome::Passed),
                ListenerEvent::Failure(f) => current = Some(TestOutcome::from_failure_kind(f.kind)),
                ListenerEvent::AssumptionFailure(_) => current = Some(TestOutcome::Skipped),
                ListenerEvent::Finished(_) => {
                    summary.record(current.take().unwrap_or(TestOutcome::Passed));
                }
                ListenerEvent::Ignored(_) => summary.record(TestOutcome::Skipped),
            }
        }
        summary
    }
}

#[async_trait]
impl TestListener for RecordingListener {
    async fn test_started(&self, description: &Description) {
        self.push(ListenerEvent::Started(description.clone()));
    }

    async fn test_finished(&self, description: &Description) {
        self.push(ListenerEvent::Finished(description.clone()));
    }

    async fn test_failure(&self, failure: &Failure) {
        self.push(ListenerEvent::Failure(failure.clone()));
    }

    async fn test_ignored(&self, description: &Description) {
        self.push(ListenerEvent::Ignored(description.clone()));
    }

    async fn test_assumption_failure(&self, failure: &Failure) {
        self.push(ListenerEvent::AssumptionFailure(failure.clone()));
    }
}

/// Console listener that shows progress in the terminal.
pub struct ConsoleListener {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    verbose: bool,
}

impl ConsoleListener {
    /// Creates a console listener.
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            verbose,
        }
    }

    fn println(&self, line: String) {
        if let Ok(guard) = self.progress.lock()
            && let Some(pb) = guard.as_ref()
            && !pb.is_hidden()
        {
            pb.println(line);
            return;
        }
        println!("{}", line);
    }
}

#[async_trait]
impl TestListener for ConsoleListener {
    async fn test_started(&self, description: &Description) {
        if self.verbose {
            self.println(format!("Running: {}", description.display_name()));
        }
    }

    async fn test_finished(&self, description: &Description) {
        if let Ok(guard) = self.progress.lock()
            && let Some(pb) = guard.as_ref()
        {
            pb.inc(1);
            pb.set_message(description.display_name());
        }
    }

    async fn test_failure(&self, failure: &Failure) {
        let status = match failure.kind {
            FailureKind::Error => console::style("ERR ").red().bold(),
            _ => console::style("FAIL").red(),
        };
        self.println(format!(
            "{} {}\n    {}",
            status,
            failure.description.display_name(),
            console::style(format!("{}: {}", failure.class_name, failure.message)).dim()
        ));
    }

    async fn test_ignored(&self, description: &Description) {
        if self.verbose {
            self.println(format!(
                "{} {}",
                console::style("SKIP").yellow(),
                description.display_name()
            ));
        }
    }

    async fn test_assumption_failure(&self, failure: &Failure) {
        if self.verbose {
            self.println(format!(
                "{} {} ({})",
                console::style("SKIP").yellow(),
                failure.description.display_name(),
                failure.message
            ));
        }
    }

    async fn run_started(&self, total: usize) {
        println!("Running {} tests", total);

        let pb = indicatif::ProgressBar::new(total as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }

        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    async fn run_finished(&self, summary: &RunSummary) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }
        crate::report::print_summary(summary);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_description_for_address() {
        let address = TestAddress::new("Sample.m1");
        let description = Description::for_address(&address);
        assert_eq!(description, Description::method("Sample", "m1"));

        let variant = TestAddress::derive(&address, "felix");
        assert_eq!(
            Description::for_address(&variant).method_name.as_deref(),
            Some("m1:felix")
        );
    }

    #[test]
    fn test_description_for_parameterized_address() {
        let address = TestAddress::new("Sample.add").parameterized(vec![json!(1), json!("x")]);
        assert_eq!(
            Description::for_address(&address).display_name(),
            "Sample.add[1, \"x\"]"
        );
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = RunSummary::default();
        summary.record(TestOutcome::Passed);
        summary.record(TestOutcome::Skipped);
        assert!(summary.success());

        summary.record(TestOutcome::Error);
        assert!(!summary.success());
        assert_eq!(summary.exit_code(), 1);
        assert_eq!(summary.total, 3);
    }

    #[tokio::test]
    async fn test_recording_listener_summary() {
        let listener = RecordingListener::new();
        let a = Description::method("Sample", "a");
        let b = Description::method("Sample", "b");

        listener.test_started(&a).await;
        listener.test_finished(&a).await;
        listener.test_started(&b).await;
        listener
            .test_failure(&Failure::from_remote(
                b.clone(),
                RemoteFailure::assertion("boom"),
            ))
            .await;
        listener.test_finished(&b).await;
        listener.test_ignored(&Description::method("Sample", "c")).await;

        let summary = listener.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(listener.failures()[0].message, "boom");
    }

    #[tokio::test]
    async fn test_multi_listener_forwards() {
        let multi = MultiListener::new()
            .with_listener(NullListener)
            .with_listener(NullListener);
        multi.test_started(&Description::class("Sample")).await;
        multi.run_finished(&RunSummary::default()).await;
    }
}
