//! Configuration schema definitions for exam.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. The schema uses serde for serialization and
//! tagged enums for container and option type selection.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ExamConfig             - Strategy, system type, timeout, system options
//! ├── ContainerConfig        - Tagged enum selecting the container backend
//! │   └── Process            - Each test runs as a shell command
//! ├── ClassConfig[]          - Declarative test classes
//! └── ReportConfig           - Output and reporting settings
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::manager::{ConfigSource, MethodDescriptor, SystemType, TestClass};
use crate::options::{ExamOption, ExamOptions};
use crate::reactor::ReactorStrategy;

/// Root configuration structure for exam.
///
/// # TOML Structure
///
/// ```toml
/// [exam]
/// strategy = "per-class"
/// timeout_secs = 60
///
/// [container]
/// type = "process"
/// command = "./run-test.sh {class} {method}"
///
/// [[classes]]
/// name = "Smoke"
/// methods = ["boots", "serves"]
///
/// [report]
/// output_dir = "test-results"
/// ```
///
/// # Example
///
/// ```
/// use exam::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [container]
///     type = "process"
///     command = "true"
///
///     [[classes]]
///     name = "Smoke"
///     methods = ["boots"]
/// "#).unwrap();
/// assert_eq!(config.classes.len(), 1);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Core settings (optional, has defaults).
    #[serde(default)]
    pub exam: ExamConfig,

    /// Container backend running the tests.
    pub container: ContainerConfig,

    /// Test classes to run, in declaration order.
    #[serde(default)]
    pub classes: Vec<ClassConfig>,

    /// Report configuration for output generation (optional, has defaults).
    #[serde(default)]
    pub report: ReportConfig,
}

/// Core exam settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `strategy` | `per-class` |
/// | `system_type` | `plain` |
/// | `timeout_secs` | 180 |
/// | `options` | none |
///
/// # Example
///
/// ```toml
/// [exam]
/// strategy = "all-confined"
/// timeout_secs = 60
/// options = [
///     { type = "system-property", key = "app.mode", value = "test" },
/// ]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExamConfig {
    /// Strategy for classes that do not declare one.
    #[serde(default)]
    pub strategy: ReactorStrategy,

    #[serde(default)]
    pub system_type: SystemType,

    /// Timeout for container start, stop and probe activation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Options merged into every class configuration.
    #[serde(default)]
    pub options: ExamOptions,
}

impl Default for ExamConfig {
    fn default() -> Self {
        Self {
            strategy: ReactorStrategy::default(),
            system_type: SystemType::default(),
            timeout_secs: default_timeout_secs(),
            options: ExamOptions::new(),
        }
    }
}

impl ExamConfig {
    /// System options, led by the configured timeout so that explicit
    /// timeout options still win.
    pub fn system_options(&self) -> ExamOptions {
        ExamOptions::new()
            .with(ExamOption::Timeout {
                millis: self.timeout_secs.saturating_mul(1000),
            })
            .combine(&self.options)
    }
}

fn default_timeout_secs() -> u64 {
    180
}

/// Container backend configuration.
///
/// The `type` field selects the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContainerConfig {
    /// Run each test as a local shell command.
    Process(ProcessContainerConfig),
}

/// Configuration for the process container.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `shell` | `/bin/sh` |
/// | `working_dir` | fresh temporary directory per start |
/// | `call_timeout_secs` | 300 |
///
/// The `command` template may use `{class}`, `{method}` and `{container}`;
/// each is replaced with its shell-quoted value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessContainerConfig {
    /// Shell used as `{shell} -c "{command}"`.
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Working directory for all commands. `~` and `$VARS` are expanded
    /// when the configuration is loaded.
    pub working_dir: Option<PathBuf>,

    /// Environment variables for every command.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Command template run once per test.
    #[serde(default)]
    pub command: String,

    /// Run after the container starts; failure fails the start.
    pub setup_command: Option<String>,

    /// Run before the container stops.
    pub teardown_command: Option<String>,

    /// Timeout for every command.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ProcessContainerConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            working_dir: None,
            env: HashMap::new(),
            command: String::new(),
            setup_command: None,
            teardown_command: None,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_call_timeout_secs() -> u64 {
    300
}

/// A declarative test class.
///
/// # Example
///
/// ```toml
/// [[classes]]
/// name = "Calculator"
/// methods = ["adds", "divides"]
/// ignored = ["divides"]
/// strategy = "per-method"
/// configurations = [
///     [{ type = "framework", name = "felix" }],
///     [{ type = "framework", name = "equinox" }],
/// ]
///
/// [classes.parameters]
/// adds = [[1, 2], [3, 4]]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClassConfig {
    pub name: String,

    /// Test methods, in run order.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Methods reported as ignored instead of being run.
    #[serde(default)]
    pub ignored: Vec<String>,

    /// Strategy overriding `[exam] strategy`.
    pub strategy: Option<ReactorStrategy>,

    /// Option sets; each one yields its own container set.
    #[serde(default)]
    pub configurations: Vec<ExamOptions>,

    /// Argument sets per method.
    #[serde(default)]
    pub parameters: HashMap<String, Vec<Vec<Value>>>,
}

impl ClassConfig {
    /// Declarative metadata for the manager.
    pub fn to_test_class(&self) -> TestClass {
        let mut class = TestClass::new(&self.name);
        class.strategy = self.strategy;

        for (index, options) in self.configurations.iter().enumerate() {
            class = class.with_configuration(ConfigSource::new(
                format!("{}#{}", self.name, index),
                options.clone(),
            ));
        }

        for method in &self.methods {
            let mut descriptor = MethodDescriptor::new(method);
            if let Some(sets) = self.parameters.get(method) {
                descriptor.parameters = sets.clone();
            }
            if self.ignored.contains(method) {
                descriptor = descriptor.ignored();
            }
            class = class.with_method(descriptor);
        }
        class
    }
}

/// Configuration for test result reporting.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `output_dir` | `"test-results"` |
/// | `junit` | `true` |
/// | `junit_file` | `"junit.xml"` |
///
/// # Example
///
/// ```toml
/// [report]
/// output_dir = "build/test-results"
/// junit = true
/// junit_file = "results.xml"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Directory where report files are written.
    ///
    /// Created automatically if it doesn't exist.
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,

    /// Whether to generate a JUnit XML report.
    #[serde(default = "default_true")]
    pub junit: bool,

    /// Filename for the JUnit XML report, inside `output_dir`.
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
            junit: true,
            junit_file: default_junit_file(),
        }
    }
}

impl ReportConfig {
    /// Full path of the JUnit report.
    pub fn junit_path(&self) -> PathBuf {
        self.output_dir.join(&self.junit_file)
    }
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("test-results")
}

fn default_true() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}
