//! exam: staged-reactor orchestration for integration tests.
//!
//! This crate runs tests inside isolated test containers and decides, per
//! reactor strategy, when those containers start and stop.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Probes**: Bundles of test addresses installed into containers
//! - **Containers**: Start, install, call and stop a runtime (native, process)
//! - **Reactor**: Collects configurations and probes, stages them into a
//!   routing table, and drives container lifecycle per strategy
//! - **Manager**: Maps driver callbacks (suite, class, method) onto reactors
//! - **Report**: Listeners for console output and JUnit XML
//!
//! ```text
//!   TestClass ──► ReactorManager ──► ExamReactor ──stage──► StagedExamReactor
//!                                                              │
//!                                     address ─► route ─► TestContainer::call
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use exam::container::native::{NativeContainerFactory, ProbeContext, ProbeRegistry};
//! use exam::listener::RecordingListener;
//! use exam::manager::{MethodDescriptor, ReactorManager, TestClass};
//!
//! async fn boots(_ctx: ProbeContext) -> anyhow::Result<()> {
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut registry = ProbeRegistry::new();
//!     registry.register("Smoke", "boots", boots);
//!
//!     let mut manager = ReactorManager::new(NativeContainerFactory::new(Arc::new(registry)));
//!     let class = TestClass::new("Smoke").with_method(MethodDescriptor::new("boots"));
//!
//!     let listener = RecordingListener::new();
//!     manager.run_suite(&[class], &listener).await?;
//!     assert!(listener.summary().success());
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod config;
pub mod container;
pub mod inject;
pub mod listener;
pub mod manager;
pub mod options;
pub mod probe;
pub mod reactor;
pub mod report;

// Re-export commonly used types
pub use address::TestAddress;
pub use config::{Config, load_config};
pub use container::{ContainerError, TestContainer, TestContainerFactory};
pub use listener::{Description, Failure, RunSummary, TestListener, TestOutcome};
pub use manager::{ReactorManager, TestClass};
pub use options::{ExamOption, ExamOptions};
pub use probe::{TestProbeBuilder, TestProbeProvider};
pub use reactor::{ExamReactor, ReactorError, ReactorStrategy, StagedExamReactor};
