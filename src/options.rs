//! Configuration options handed to container factories.
//!
//! A test class declares one or more option sets; each set becomes one
//! container configuration when the reactor is staged. Options are plain
//! data so they can be read from TOML as well as built in code.
//!
//! ```
//! use exam::options::{ExamOption, ExamOptions};
//! use std::time::Duration;
//!
//! let system = ExamOptions::new().with(ExamOption::Timeout { millis: 5_000 });
//! let class = ExamOptions::new()
//!     .with(ExamOption::Framework { name: "felix".into() })
//!     .with(ExamOption::VmArg { value: "-Xmx256m".into() });
//!
//! let merged = system.combine(&class);
//! assert_eq!(merged.timeout(), Duration::from_secs(5));
//! assert_eq!(merged.frameworks(), vec!["felix"]);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout applied to container start, stop and state waits unless an
/// [`ExamOption::Timeout`] says otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

/// A single configuration option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExamOption {
    /// A bundle (module) to provision into the container.
    Bundle {
        url: String,
        #[serde(default)]
        start_level: Option<u32>,
        #[serde(default = "default_true")]
        start: bool,
    },

    /// An argument for the container's runtime process.
    VmArg { value: String },

    /// A system property visible inside the container.
    SystemProperty { key: String, value: String },

    /// An environment variable for the container's runtime.
    Env { key: String, value: String },

    /// Selects a runtime variant. One container is created per framework.
    Framework { name: String },

    /// Timeout for blocking container operations, in milliseconds.
    Timeout { millis: u64 },

    /// Working directory of the container runtime.
    WorkingDirectory { path: PathBuf },

    /// Start level applied to installed probes.
    ProbeStartLevel { level: u32 },
}

fn default_true() -> bool {
    true
}

/// An ordered collection of [`ExamOption`]s.
///
/// Later options win where an option is single-valued (timeout, working
/// directory, probe start level); multi-valued options accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExamOptions {
    options: Vec<ExamOption>,
}

impl ExamOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an option, builder style.
    pub fn with(mut self, option: ExamOption) -> Self {
        self.options.push(option);
        self
    }

    /// Appends an option.
    pub fn push(&mut self, option: ExamOption) {
        self.options.push(option);
    }

    /// Returns a new set holding `self` followed by `other`.
    pub fn combine(&self, other: &ExamOptions) -> ExamOptions {
        let mut options = self.options.clone();
        options.extend(other.options.iter().cloned());
        ExamOptions { options }
    }

    /// All options in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExamOption> {
        self.options.iter()
    }

    /// Returns the number of options.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Returns true if no options are set.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Effective timeout for blocking container operations.
    pub fn timeout(&self) -> Duration {
        self.options
            .iter()
            .rev()
            .find_map(|o| match o {
                ExamOption::Timeout { millis } => Some(Duration::from_millis(*millis)),
                _ => None,
            })
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Names of the selected frameworks, without duplicates, in order.
    pub fn frameworks(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for option in &self.options {
            if let ExamOption::Framework { name } = option
                && !names.contains(&name.as_str())
            {
                names.push(name.as_str());
            }
        }
        names
    }

    /// Configured working directory, if any.
    pub fn working_directory(&self) -> Option<&Path> {
        self.options.iter().rev().find_map(|o| match o {
            ExamOption::WorkingDirectory { path } => Some(path.as_path()),
            _ => None,
        })
    }

    /// Start level for installed probes, if any.
    pub fn probe_start_level(&self) -> Option<u32> {
        self.options.iter().rev().find_map(|o| match o {
            ExamOption::ProbeStartLevel { level } => Some(*level),
            _ => None,
        })
    }

    /// Runtime arguments in declaration order.
    pub fn vm_args(&self) -> Vec<&str> {
        self.options
            .iter()
            .filter_map(|o| match o {
                ExamOption::VmArg { value } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Bundle URLs in declaration order.
    pub fn bundles(&self) -> Vec<&str> {
        self.options
            .iter()
            .filter_map(|o| match o {
                ExamOption::Bundle { url, .. } => Some(url.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Environment for the container runtime.
    ///
    /// System properties are exposed as `EXAM_PROP_<KEY>` variables with
    /// dots replaced by underscores and the key upper-cased.
    pub fn environment(&self) -> Vec<(String, String)> {
        self.options
            .iter()
            .filter_map(|o| match o {
                ExamOption::Env { key, value } => Some((key.clone(), value.clone())),
                ExamOption::SystemProperty { key, value } => Some((
                    format!("EXAM_PROP_{}", key.replace('.', "_").to_uppercase()),
                    value.clone(),
                )),
                _ => None,
            })
            .collect()
    }
}

impl FromIterator<ExamOption> for ExamOptions {
    fn from_iter<I: IntoIterator<Item = ExamOption>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<ExamOption>> for ExamOptions {
    fn from(options: Vec<ExamOption>) -> Self {
        Self { options }
    }
}
