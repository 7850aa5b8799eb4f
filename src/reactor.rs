//! The reactor: accumulates probes and configurations, then stages them.
//!
//! ```text
//! ExamReactor                          StagedExamReactor
//! ┌──────────────────────────┐         ┌──────────────────────────────────┐
//! │ add_configuration(opts)  │         │ containers (one slot each)       │
//! │ add_probe(builder)       │ stage() │ routing table: target ─► slot    │
//! │                          │ ──────► │ before_* / invoke / after_*      │
//! └──────────────────────────┘         │ tear_down                        │
//!                                      └──────────────────────────────────┘
//! ```
//!
//! Staging builds every probe, asks the factory for one container set per
//! configuration and binds every probe address to its container. When more
//! than one container exists in total, every address is duplicated once per
//! container with the container name appended to its caption.

pub mod staged;
pub mod strategy;

use std::sync::Arc;

use tracing::{debug, info};

pub use staged::{InvocationOutcome, ReactorState, StagedExamReactor};
pub use strategy::{LifecycleScope, ReactorStrategy};

use crate::container::{ContainerError, TestContainerFactory};
use crate::options::ExamOptions;
use crate::probe::{ProbeError, TestProbeBuilder};

/// Result type for reactor operations.
pub type ReactorResult<T> = Result<T, ReactorError>;

/// Errors raised by reactors.
#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    /// The reactor was already staged; it cannot be changed or staged again.
    #[error("Reactor already staged")]
    AlreadyStaged,

    /// The address was not produced by this reactor, or the reactor was
    /// torn down.
    #[error("Address not from this reactor: {0}")]
    UnknownAddress(String),

    /// Options or factory setup are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A container failed in a way that aborts the staged reactor.
    #[error("Container {container} failed: {source}")]
    Container {
        container: String,
        #[source]
        source: ContainerError,
    },

    /// The operation needs a staged reactor.
    #[error("No staged reactor")]
    NotStaged,

    /// A probe could not be built.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Accumulates configurations and probes for one staging.
pub struct ExamReactor<F: TestContainerFactory> {
    factory: Arc<F>,
    configurations: Vec<ExamOptions>,
    probes: Vec<TestProbeBuilder>,
    staged: bool,
}

impl<F: TestContainerFactory> ExamReactor<F> {
    /// Creates an empty reactor creating containers through `factory`.
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            factory,
            configurations: Vec::new(),
            probes: Vec::new(),
            staged: false,
        }
    }

    /// Adds one configuration; each configuration yields one container set.
    pub fn add_configuration(&mut self, options: ExamOptions) -> ReactorResult<()> {
        if self.staged {
            return Err(ReactorError::AlreadyStaged);
        }
        self.configurations.push(options);
        Ok(())
    }

    /// Registers a probe. It is built when the reactor is staged.
    pub fn add_probe(&mut self, probe: TestProbeBuilder) -> ReactorResult<()> {
        if self.staged {
            return Err(ReactorError::AlreadyStaged);
        }
        self.probes.push(probe);
        Ok(())
    }

    /// Configurations added so far.
    pub fn configurations(&self) -> &[ExamOptions] {
        &self.configurations
    }

    /// Names of the probes added so far.
    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(TestProbeBuilder::name).collect()
    }

    /// Returns `true` once [`stage`](Self::stage) has been called.
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Materializes containers and the routing table.
    ///
    /// The reactor is spent afterwards, even if staging fails. Eager
    /// strategies start containers before returning.
    ///
    /// # Errors
    ///
    /// - `ReactorError::AlreadyStaged` - called twice
    /// - `ReactorError::Probe` - a probe artifact could not be built
    /// - `ReactorError::Configuration` - the factory rejected a configuration
    /// - `ReactorError::Container` - an eager single-container start failed
    pub async fn stage(
        &mut self,
        strategy: ReactorStrategy,
    ) -> ReactorResult<StagedExamReactor<F::Container>> {
        if self.staged {
            return Err(ReactorError::AlreadyStaged);
        }
        self.staged = true;

        let mut providers = Vec::with_capacity(self.probes.len());
        for builder in self.probes.drain(..) {
            let provider = builder.build();
            provider.stream()?;
            providers.push(provider);
        }

        let mut configurations = std::mem::take(&mut self.configurations);
        if configurations.is_empty() {
            configurations.push(ExamOptions::new());
        }

        let mut containers = Vec::new();
        for options in configurations {
            let created = self
                .factory
                .create(&options)
                .map_err(|e| ReactorError::Configuration(format!("container factory: {}", e)))?;
            debug!("Factory created {} container(s)", created.len());
            containers.extend(created.into_iter().map(|c| (c, options.clone())));
        }

        if containers.is_empty() {
            return Err(ReactorError::Configuration(
                "container factory created no containers".to_string(),
            ));
        }

        info!(
            "Staging {} probe(s) on {} container(s) with strategy {}",
            providers.len(),
            containers.len(),
            strategy
        );

        let mut staged = StagedExamReactor::new(strategy, containers, providers);
        if strategy.starts_eagerly() {
            staged.start_containers().await?;
        }
        Ok(staged)
    }
}
