//! Test container traits and implementations.
//!
//! A test container is one isolated runtime (a process, a framework
//! instance, an embedded server) into which probes are installed and in
//! which tests are invoked. Containers are pluggable: the reactor only ever
//! talks to the two traits defined here.
//!
//! # Architecture
//!
//! - [`TestContainerFactory`] - creates container handles from options
//! - [`TestContainer`] - lifecycle of one runtime
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TestContainerFactory                       │
//! │                                                              │
//! │  create(&ExamOptions) ─────────► Vec<TestContainer>         │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TestContainer                           │
//! │                                                              │
//! │  start()                                                     │
//! │  install(location, artifact) ──► ProbeHandle                │
//! │  set_start_level(handle, level)                             │
//! │  wait_for_state(handle, state, timeout)                     │
//! │  call(&TestAddress)                                          │
//! │  stop() / cleanup()                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Containers
//!
//! | Container | Module | Description |
//! |-----------|--------|-------------|
//! | Native | [`native`] | In-process runtime running registered async tests |
//! | Process | [`process`] | Runs each test as a shell command |
//!
//! # Error Handling
//!
//! All container operations return [`ContainerResult<T>`]. Failures raised
//! by test bodies travel as [`ContainerError::TestFailed`]; failures that
//! could not cross the runtime boundary arrive as
//! [`ContainerError::Unserializable`] with only their class name and
//! message.

pub mod native;
pub mod process;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::TestAddress;
use crate::listener::FailureKind;
use crate::options::ExamOptions;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Class name reported for failures raised by the container machinery
/// rather than by a test body.
pub const CONTAINER_FAILURE_CLASS: &str = "exam::ContainerError";

/// A failure raised by a test body, in a form that crosses the container
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{class_name}: {message}")]
pub struct RemoteFailure {
    /// Whether this is an assertion, assumption or unexpected error.
    pub kind: FailureKind,
    /// Type name of the original failure.
    pub class_name: String,
    /// Failure message.
    pub message: String,
    /// Captured trace or extra context, if any.
    #[serde(default)]
    pub trace: Option<String>,
}

impl RemoteFailure {
    /// An assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            class_name: "AssertionError".to_string(),
            message: message.into(),
            trace: None,
        }
    }

    /// A failed assumption; the test is reported as not applicable.
    pub fn assumption(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assumption,
            class_name: "AssumptionViolated".to_string(),
            message: message.into(),
            trace: None,
        }
    }

    /// An unexpected error of the given type.
    pub fn error(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            class_name: class_name.into(),
            message: message.into(),
            trace: None,
        }
    }

    /// Attaches a trace.
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

/// Errors that can occur during container operations.
///
/// Errors are categorized by origin:
/// - **Lifecycle**: `StartFailed`, `InstallFailed`, `NotStarted`, `Timeout`
/// - **Configuration**: `Configuration`, `UnknownTest`, `Injection`
/// - **Test execution**: `TestFailed`, `Unserializable`, possibly inside
///   `Wrapped`
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The runtime could not be started.
    #[error("Failed to start container {container}: {message}")]
    StartFailed { container: String, message: String },

    /// A probe could not be installed.
    #[error("Failed to install probe into {container}: {message}")]
    InstallFailed { container: String, message: String },

    /// The operation needs a started container.
    #[error("Container {0} is not started")]
    NotStarted(String),

    /// A blocking operation exceeded its timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Required options are missing or contradictory.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No installed probe implements the address.
    #[error("No installed probe implements {0}")]
    UnknownTest(String),

    /// The test body failed.
    #[error(transparent)]
    TestFailed(#[from] RemoteFailure),

    /// A failure wrapped by an intermediate layer.
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<ContainerError>,
    },

    /// A failure that could not be transmitted across the container
    /// boundary. Only its type name and message survive.
    #[error("{class_name}: {message}")]
    Unserializable { class_name: String, message: String },

    /// A value could not be injected into a test instance.
    #[error("Injection failed: {0}")]
    Injection(String),

    /// I/O error inside the container backend.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Container-specific error not covered by other variants.
    #[error("Container-specific error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ContainerError {
    /// Wraps `self` with context.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        ContainerError::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strips every [`Wrapped`](Self::Wrapped) layer.
    pub fn root_cause(&self) -> &ContainerError {
        match self {
            ContainerError::Wrapped { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns `true` if the root cause is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), ContainerError::Timeout(_))
    }

    /// Normalizes the error into a reportable failure.
    ///
    /// Test failures keep their kind and type; everything else is reported
    /// as an error. Wrapping context is kept as the trace.
    pub fn to_failure(&self) -> RemoteFailure {
        let failure = match self.root_cause() {
            ContainerError::TestFailed(failure) => failure.clone(),
            ContainerError::Unserializable {
                class_name,
                message,
            } => RemoteFailure::error(class_name.clone(), message.clone()),
            other => RemoteFailure::error(CONTAINER_FAILURE_CLASS, other.to_string()),
        };

        if matches!(self, ContainerError::Wrapped { .. }) && failure.trace.is_none() {
            failure.with_trace(self.to_string())
        } else {
            failure
        }
    }
}

/// Handle of a probe installed into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeHandle(pub u64);

/// Lifecycle state of an installed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Installed,
    Resolved,
    Active,
    Stopped,
}

/// One isolated runtime in which probes run.
///
/// Contract:
/// - `install` before `start` fails with [`ContainerError::NotStarted`]
/// - `call` on a stopped container fails with [`ContainerError::NotStarted`]
/// - `stop` and `cleanup` are idempotent and release resources even after a
///   partial start
/// - a stopped container may be started again; the restarted runtime keeps
///   no state from the previous run
#[async_trait]
pub trait TestContainer: Send + Sync {
    /// Display name, unique among the containers of one staging.
    fn name(&self) -> &str;

    /// Boots the runtime. Blocks until it is ready.
    async fn start(&mut self) -> ContainerResult<()>;

    /// Installs a probe artifact and returns its handle.
    async fn install(&mut self, location: &str, artifact: &[u8]) -> ContainerResult<ProbeHandle>;

    /// Invokes the test named by `address`, passing its arguments.
    async fn call(&self, address: &TestAddress) -> ContainerResult<()>;

    /// Applies a start level to an installed probe.
    ///
    /// Backends without start levels ignore the call.
    async fn set_start_level(&mut self, _handle: ProbeHandle, _level: u32) -> ContainerResult<()> {
        Ok(())
    }

    /// Waits until an installed probe reaches `state`.
    async fn wait_for_state(
        &self,
        handle: ProbeHandle,
        state: ProbeState,
        timeout: Duration,
    ) -> ContainerResult<()>;

    /// Stops the runtime.
    async fn stop(&mut self) -> ContainerResult<()>;

    /// Removes anything the container left behind after stopping.
    async fn cleanup(&mut self) -> ContainerResult<()> {
        Ok(())
    }
}

/// Creates container handles from a configuration.
///
/// A factory may create several containers from one option set, e.g. one
/// per configured framework; every probe address is then run once in each.
pub trait TestContainerFactory: Send + Sync {
    /// The concrete container type created by this factory.
    type Container: TestContainer;

    /// Creates ready-to-start containers for `options`.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Configuration` - options missing or contradictory
    fn create(&self, options: &ExamOptions) -> ContainerResult<Vec<Self::Container>>;
}

/// Per-container results of an operation fanned out over several containers.
#[derive(Debug)]
pub struct CompositeResult<T = ()> {
    /// Container name and outcome, in container order.
    pub per_container: Vec<(String, ContainerResult<T>)>,
}

impl<T> CompositeResult<T> {
    /// Creates an empty result.
    pub fn new() -> Self {
        Self {
            per_container: Vec::new(),
        }
    }

    /// Records the outcome for one container.
    pub fn push(&mut self, container: impl Into<String>, result: ContainerResult<T>) {
        self.per_container.push((container.into(), result));
    }

    /// Returns `true` if every container succeeded.
    pub fn is_success(&self) -> bool {
        self.per_container.iter().all(|(_, r)| r.is_ok())
    }

    /// Failed containers and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ContainerError)> {
        self.per_container
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    /// Number of containers involved.
    pub fn len(&self) -> usize {
        self.per_container.len()
    }

    /// Returns `true` if no container was involved.
    pub fn is_empty(&self) -> bool {
        self.per_container.is_empty()
    }
}

impl<T> Default for CompositeResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a container operation under a timeout.
///
/// Exceeding `timeout` yields [`ContainerError::Timeout`] naming the
/// operation and container.
pub async fn with_timeout<T, F>(
    operation: &str,
    container: &str,
    timeout: Duration,
    future: F,
) -> ContainerResult<T>
where
    F: Future<Output = ContainerResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ContainerError::Timeout(format!(
            "{} of container {} did not finish within {:?}",
            operation, container, timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested() {
        let error = ContainerError::from(RemoteFailure::assertion("boom"))
            .wrap("invocation failed")
            .wrap("probe call");

        match error.root_cause() {
            ContainerError::TestFailed(f) => assert_eq!(f.message, "boom"),
            other => panic!("unexpected root cause: {other:?}"),
        }
    }

    #[test]
    fn test_to_failure_keeps_assertion_kind() {
        let error = ContainerError::from(RemoteFailure::assertion("boom")).wrap("call");
        let failure = error.to_failure();

        assert_eq!(failure.kind, FailureKind::Assertion);
        assert_eq!(failure.message, "boom");
        assert_eq!(failure.trace.as_deref(), Some("call: AssertionError: boom"));
    }

    #[test]
    fn test_to_failure_for_unserializable() {
        let error = ContainerError::Unserializable {
            class_name: "std::io::Error".into(),
            message: "disk gone".into(),
        };
        let failure = error.to_failure();

        assert_eq!(failure.kind, FailureKind::Error);
        assert_eq!(failure.class_name, "std::io::Error");
        assert_eq!(failure.message, "disk gone");
    }

    #[test]
    fn test_to_failure_for_lifecycle_error() {
        let failure = ContainerError::NotStarted("felix".into()).to_failure();
        assert_eq!(failure.class_name, CONTAINER_FAILURE_CLASS);
        assert_eq!(failure.message, "Container felix is not started");
    }

    #[test]
    fn test_composite_result() {
        let mut result = CompositeResult::new();
        result.push("a", Ok(()));
        result.push("b", Err(ContainerError::Timeout("stop".into())));

        assert!(!result.is_success());
        assert_eq!(result.len(), 2);
        let failures: Vec<_> = result.failures().map(|(n, _)| n).collect();
        assert_eq!(failures, vec!["b"]);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let result: ContainerResult<()> =
            with_timeout("start", "slow", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
    }
}
