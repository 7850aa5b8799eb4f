//! Test probes: the artifact installed into every container.
//!
//! A probe bundles the addressable tests of one test class (or suite) into
//! a single artifact. Packaging of real archives is a backend concern; the
//! artifact produced here is a JSON [`ProbeManifest`] that maps every
//! address identifier to the `(class, method)` pair the container must run.
//!
//! ```text
//! TestProbeBuilder ──add_test()──► TestAddress
//!        │
//!        └─build()──► TestProbeProvider ──stream()──► manifest bytes (built once)
//!                            │
//!                            └─tests()──► targets (same set as the manifest)
//! ```
//!
//! # Example
//!
//! ```
//! use exam::probe::{ProbeManifest, TestProbeBuilder};
//!
//! let mut builder = TestProbeBuilder::new("sample-probe");
//! builder.add_tests("Sample", ["m1", "m2"]);
//! let provider = builder.build();
//!
//! assert_eq!(provider.tests().len(), 2);
//! let manifest = ProbeManifest::from_bytes(provider.stream()?)?;
//! assert_eq!(manifest.instructions.len(), 2);
//! # Ok::<(), exam::probe::ProbeError>(())
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::address::TestAddress;

/// Header naming the probe inside its manifest.
pub const PROBE_NAME_HEADER: &str = "Exam-Probe-Name";

/// Result type for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while building or reading probe artifacts.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The manifest could not be serialized or parsed.
    #[error("Invalid probe manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest names a target twice.
    #[error("Duplicate probe target: {0}")]
    DuplicateTarget(String),
}

/// One executable test inside a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeInstruction {
    /// Identifier of the probe-level [`TestAddress`].
    pub identifier: String,
    /// Test class name.
    pub class: String,
    /// Test method name.
    pub method: String,
}

/// The artifact format shared between probe builders and containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeManifest {
    /// Probe headers, including [`PROBE_NAME_HEADER`].
    pub headers: BTreeMap<String, String>,
    /// Executable tests, in registration order.
    pub instructions: Vec<ProbeInstruction>,
}

impl ProbeManifest {
    /// Parses a manifest from artifact bytes.
    ///
    /// Fails if the bytes are not a manifest or name a target twice.
    pub fn from_bytes(bytes: &[u8]) -> ProbeResult<Self> {
        let manifest: ProbeManifest = serde_json::from_slice(bytes)?;
        let mut seen = std::collections::HashSet::new();
        for instruction in &manifest.instructions {
            if !seen.insert(instruction.identifier.as_str()) {
                return Err(ProbeError::DuplicateTarget(instruction.identifier.clone()));
            }
        }
        Ok(manifest)
    }

    /// Returns the probe name header, if present.
    pub fn name(&self) -> Option<&str> {
        self.headers.get(PROBE_NAME_HEADER).map(String::as_str)
    }

    /// Finds the instruction for an address identifier.
    pub fn instruction(&self, identifier: &str) -> Option<&ProbeInstruction> {
        self.instructions.iter().find(|i| i.identifier == identifier)
    }
}

/// Collects the tests of a probe before it is built.
///
/// Builders are cheap: nothing is serialized until the provider's
/// artifact is first requested.
#[derive(Debug, Clone)]
pub struct TestProbeBuilder {
    name: String,
    headers: BTreeMap<String, String>,
    tests: Vec<(TestAddress, String, String)>,
}

impl TestProbeBuilder {
    /// Creates an empty builder for a probe called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: BTreeMap::new(),
            tests: Vec::new(),
        }
    }

    /// Probe name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers one test method and returns its address.
    ///
    /// Registering the same `(class, method)` pair twice returns the address
    /// created by the first call.
    pub fn add_test(&mut self, class: &str, method: &str) -> TestAddress {
        if let Some((address, _, _)) = self
            .tests
            .iter()
            .find(|(_, c, m)| c == class && m == method)
        {
            return address.clone();
        }

        let address = TestAddress::new(format!("{}.{}", class, method));
        self.tests
            .push((address.clone(), class.to_string(), method.to_string()));
        address
    }

    /// Registers several methods of one class.
    pub fn add_tests<I, S>(&mut self, class: &str, methods: I) -> Vec<TestAddress>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        methods
            .into_iter()
            .map(|m| self.add_test(class, m.as_ref()))
            .collect()
    }

    /// Sets a manifest header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Addresses registered so far, in registration order.
    pub fn tests(&self) -> Vec<TestAddress> {
        self.tests.iter().map(|(a, _, _)| a.clone()).collect()
    }

    /// Finishes the builder.
    pub fn build(self) -> TestProbeProvider {
        let mut headers = self.headers;
        headers.insert(PROBE_NAME_HEADER.to_string(), self.name.clone());

        let instructions = self
            .tests
            .iter()
            .map(|(address, class, method)| ProbeInstruction {
                identifier: address.identifier().to_string(),
                class: class.clone(),
                method: method.clone(),
            })
            .collect();

        TestProbeProvider {
            name: self.name,
            tests: self.tests.into_iter().map(|(a, _, _)| a).collect(),
            manifest: ProbeManifest {
                headers,
                instructions,
            },
            artifact: OnceLock::new(),
        }
    }
}

/// A built probe: its targets plus a lazily serialized artifact.
#[derive(Debug)]
pub struct TestProbeProvider {
    name: String,
    tests: Vec<TestAddress>,
    manifest: ProbeManifest,
    artifact: OnceLock<Vec<u8>>,
}

impl TestProbeProvider {
    /// Probe name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Addresses this probe exposes, in registration order.
    pub fn tests(&self) -> &[TestAddress] {
        &self.tests
    }

    /// The parsed manifest.
    pub fn manifest(&self) -> &ProbeManifest {
        &self.manifest
    }

    /// Artifact bytes, serialized on first access and memoized.
    pub fn stream(&self) -> ProbeResult<&[u8]> {
        if let Some(bytes) = self.artifact.get() {
            return Ok(bytes);
        }
        let bytes = serde_json::to_vec(&self.manifest)?;
        Ok(self.artifact.get_or_init(|| bytes))
    }

    /// Returns `true` once the artifact has been serialized.
    pub fn is_built(&self) -> bool {
        self.artifact.get().is_some()
    }
}
