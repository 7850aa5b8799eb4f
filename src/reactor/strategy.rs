//! Staging strategies.
//!
//! A strategy decides how long a container set lives. It is resolved once
//! before staging and never changes for the lifetime of a staged reactor.
//!
//! | Strategy | Started | Stopped | Scope |
//! |----------|---------|---------|-------|
//! | `per-method` | before each invocation | after each invocation | Method |
//! | `per-class` | `before_class` or first use | `after_class` | Class |
//! | `per-suite` / `all-confined` | `before_suite` or first use | `after_suite` | Suite |
//! | `eager-single` | during staging | `after_class` | Class |

use std::fmt;

use serde::{Deserialize, Serialize};

/// Boundary at which a staged reactor's containers are torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleScope {
    Method,
    Class,
    Suite,
}

/// Container allocation policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ReactorStrategy {
    /// Fresh runtime for every invocation.
    PerMethod,
    /// One container set per test class.
    #[default]
    PerClass,
    /// One container set for the whole suite.
    #[serde(alias = "all-confined")]
    #[value(alias = "all-confined")]
    PerSuite,
    /// Like `PerClass`, but containers start while staging.
    EagerSingle,
}

impl ReactorStrategy {
    /// The boundary that tears containers down.
    pub fn scope(&self) -> LifecycleScope {
        match self {
            ReactorStrategy::PerMethod => LifecycleScope::Method,
            ReactorStrategy::PerClass | ReactorStrategy::EagerSingle => LifecycleScope::Class,
            ReactorStrategy::PerSuite => LifecycleScope::Suite,
        }
    }

    /// Returns `true` if containers are started and stopped around every
    /// invocation.
    pub fn restarts_per_invocation(&self) -> bool {
        self.scope() == LifecycleScope::Method
    }

    /// Returns `true` if containers start while the reactor is staged.
    pub fn starts_eagerly(&self) -> bool {
        matches!(self, ReactorStrategy::EagerSingle)
    }

    /// Configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactorStrategy::PerMethod => "per-method",
            ReactorStrategy::PerClass => "per-class",
            ReactorStrategy::PerSuite => "per-suite",
            ReactorStrategy::EagerSingle => "eager-single",
        }
    }
}

impl fmt::Display for ReactorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Holder {
        strategy: ReactorStrategy,
    }

    #[test]
    fn test_properties() {
        assert!(ReactorStrategy::PerMethod.restarts_per_invocation());
        assert!(!ReactorStrategy::PerClass.restarts_per_invocation());
        assert!(ReactorStrategy::EagerSingle.starts_eagerly());
        assert_eq!(ReactorStrategy::EagerSingle.scope(), LifecycleScope::Class);
        assert_eq!(ReactorStrategy::default(), ReactorStrategy::PerClass);
    }

    #[test]
    fn test_all_confined_alias() {
        let holder: Holder = toml::from_str(r#"strategy = "all-confined""#).unwrap();
        assert_eq!(holder.strategy, ReactorStrategy::PerSuite);

        let holder: Holder = toml::from_str(r#"strategy = "per-method""#).unwrap();
        assert_eq!(holder.strategy, ReactorStrategy::PerMethod);
        assert_eq!(holder.strategy.to_string(), "per-method");
    }
}
