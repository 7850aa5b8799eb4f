//! Configuration loading and schema definitions for exam.
//!
//! This module provides types and functions for loading exam configuration
//! from TOML files or strings. The configuration schema defines the
//! container backend, the declarative test classes, and reporting.
//!
//! # The Configuration File Format is described in the README.

pub mod schema;

pub use schema::*;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Configuration written by `exam init`.
pub const EXAMPLE_CONFIG: &str = r#"# exam configuration

[exam]
strategy = "per-class"
timeout_secs = 180

[container]
type = "process"
command = "./run-test.sh {class} {method}"

[[classes]]
name = "Smoke"
methods = ["boots", "responds"]

[report]
output_dir = "test-results"
junit = true
junit_file = "junit.xml"
"#;

/// Loads exam configuration from a TOML file.
///
/// Paths in the container section are shell-expanded.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
/// - A path refers to an undefined environment variable
///
/// # Example
///
/// ```no_run
/// use exam::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("exam.toml"))?;
/// println!("Strategy: {}", config.exam.strategy);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = load_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads exam configuration from a TOML string.
///
/// # Example
///
/// ```
/// use exam::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [exam]
///     strategy = "all-confined"
///
///     [container]
///     type = "process"
///     command = "true"
/// "#)?;
///
/// assert_eq!(config.exam.strategy.to_string(), "per-suite");
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

    match &mut config.container {
        ContainerConfig::Process(process) => {
            if let Some(dir) = &process.working_dir {
                process.working_dir = Some(expand_path(dir)?);
            }
        }
    }

    Ok(config)
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw)
        .with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Checks a loaded configuration for mistakes the schema cannot express.
///
/// # Errors
///
/// Returns an error if:
/// - The container command template is empty
/// - No test class is declared, or a class has no methods
/// - Class names or method names within a class repeat
/// - Parameters or ignores name an undeclared method
pub fn validate(config: &Config) -> Result<()> {
    match &config.container {
        ContainerConfig::Process(process) => {
            if process.command.trim().is_empty() {
                bail!("[container] command must not be empty");
            }
            if process.call_timeout_secs == 0 {
                bail!("[container] call_timeout_secs must be positive");
            }
        }
    }

    if config.classes.is_empty() {
        bail!("No [[classes]] declared");
    }

    let mut class_names = HashSet::new();
    for class in &config.classes {
        if !class_names.insert(class.name.as_str()) {
            bail!("Class {} is declared twice", class.name);
        }
        if class.methods.is_empty() {
            bail!("Class {} declares no methods", class.name);
        }

        let mut methods = HashSet::new();
        for method in &class.methods {
            if !methods.insert(method.as_str()) {
                bail!("Method {}.{} is declared twice", class.name, method);
            }
        }
        for method in class.parameters.keys().chain(&class.ignored) {
            if !methods.contains(method.as_str()) {
                bail!(
                    "Class {} refers to undeclared method {}",
                    class.name,
                    method
                );
            }
        }
    }

    Ok(())
}
