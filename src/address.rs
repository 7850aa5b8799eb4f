//! Addresses identifying single test invocations.
//!
//! A [`TestAddress`] is the handle a driver uses to name one test across the
//! runtime boundary: the driver hands it to a staged reactor, the reactor
//! routes it to the owning container, and the container resolves it against
//! the probe it installed.
//!
//! ```text
//!   probe address  ──derive("felix")──►  container variant
//!   Exam-1a2b...        root = Exam-1a2b...    caption = "Sample.m1:felix"
//!        │
//!        └─parameterized([1, 2])──►  same identifier, own arguments
//! ```
//!
//! # Example
//!
//! ```
//! use exam::address::TestAddress;
//!
//! let base = TestAddress::new("Sample.m1");
//! let variant = TestAddress::derive(&base, "felix");
//!
//! assert_eq!(variant.caption(), "Sample.m1:felix");
//! assert_eq!(variant.root(), base.identifier());
//! assert_ne!(variant.identifier(), base.identifier());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every generated address identifier.
const IDENTIFIER_PREFIX: &str = "Exam-";

/// Immutable, globally unique identifier of one test invocation.
///
/// Two addresses with the same identifier denote the same logical test.
/// Parameterized variants (see [`parameterized`](Self::parameterized)) keep
/// the identifier of their base and own an argument list; equality takes
/// the arguments into account so variants with different arguments are
/// distinct from each other and from the base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestAddress {
    identifier: String,
    caption: String,
    root: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
}

impl TestAddress {
    /// Creates a new root address with a freshly generated identifier.
    pub fn new(caption: impl Into<String>) -> Self {
        Self {
            identifier: format!("{}{}", IDENTIFIER_PREFIX, uuid::Uuid::new_v4()),
            caption: caption.into(),
            root: None,
            arguments: Vec::new(),
        }
    }

    /// Creates a new address derived from `parent`.
    ///
    /// The derived address has its own identifier, shares the parent's root
    /// and carries the parent's caption with `:{suffix}` appended. The
    /// parent's arguments are inherited.
    pub fn derive(parent: &TestAddress, suffix: &str) -> Self {
        Self {
            identifier: format!("{}{}", IDENTIFIER_PREFIX, uuid::Uuid::new_v4()),
            caption: format!("{}:{}", parent.caption, suffix),
            root: Some(parent.root().to_string()),
            arguments: parent.arguments.clone(),
        }
    }

    /// Returns a parameterized variant of this address.
    ///
    /// Identifier, caption and root are delegated to `self`; the returned
    /// address owns `arguments`.
    pub fn parameterized(&self, arguments: Vec<Value>) -> Self {
        Self {
            identifier: self.identifier.clone(),
            caption: self.caption.clone(),
            root: self.root.clone(),
            arguments,
        }
    }

    /// Returns the address stripped of its arguments.
    pub fn base(&self) -> Self {
        self.parameterized(Vec::new())
    }

    /// Stable identifier, unique per logical test.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human-readable caption, typically `Class.method`.
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Identifier of the address this one was derived from.
    ///
    /// Root addresses return their own identifier.
    pub fn root(&self) -> &str {
        self.root.as_deref().unwrap_or(&self.identifier)
    }

    /// Returns `true` if this address is its own root.
    pub fn is_root(&self) -> bool {
        self.root.is_none()
    }

    /// Invocation arguments, in order.
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Returns `true` if this address carries invocation arguments.
    pub fn is_parameterized(&self) -> bool {
        !self.arguments.is_empty()
    }
}

impl PartialEq for TestAddress {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.arguments == other.arguments
    }
}

impl Eq for TestAddress {}

impl Hash for TestAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for TestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.arguments.is_empty() {
            write!(f, "[TestAddress:{} root:{}]", self.caption, self.root())
        } else {
            write!(
                f,
                "[TestAddress:{} root:{} args:{}]",
                self.caption,
                self.root(),
                Value::Array(self.arguments.clone())
            )
        }
    }
}
