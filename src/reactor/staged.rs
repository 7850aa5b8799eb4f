//! The staged reactor: containers, routing table and lifecycle.
//!
//! # State machine
//!
//! ```text
//!   Staged ──start (before_*, first invoke, eager stage)──► Running
//!     │                                                       │
//!     └──────────── after_class / after_suite / tear_down ────┴──► TornDown
//! ```
//!
//! `TornDown` is terminal: the routing table is cleared and every later
//! `invoke` fails with [`ReactorError::UnknownAddress`].
//!
//! # Failure handling
//!
//! | Situation | One container | Several containers |
//! |-----------|---------------|--------------------|
//! | Start/install fails | `Err(ReactorError::Container)` after partial teardown | Container marked failed, its tests report errors |
//! | Test fails | Reported to the listener | Reported to the listener |
//! | Stop fails | Logged and collected | Logged and collected |

use std::collections::HashMap;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::{LifecycleScope, ReactorError, ReactorResult, ReactorStrategy};
use crate::address::TestAddress;
use crate::container::{
    CONTAINER_FAILURE_CLASS, CompositeResult, ContainerError, ContainerResult, ProbeState,
    RemoteFailure, TestContainer, with_timeout,
};
use crate::listener::{Description, Failure, FailureKind, TestListener, TestOutcome};
use crate::options::ExamOptions;
use crate::probe::TestProbeProvider;

/// Lifecycle state of a staged reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// Containers exist; none is running.
    Staged,
    /// At least one container was started.
    Running,
    /// Terminal: containers stopped, routing table cleared.
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SlotStatus {
    Idle,
    Running,
    Failed(String),
    Stopped,
}

struct ContainerSlot<C> {
    container: C,
    /// Container name, suffixed with `#n` when several slots share it.
    label: String,
    timeout: Duration,
    start_level: Option<u32>,
    status: SlotStatus,
}

#[derive(Debug, Clone)]
struct Route {
    target: TestAddress,
    probe_address: TestAddress,
    slot: usize,
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// The invoked target, with its arguments.
    pub target: TestAddress,
    /// Name of the container that ran the test, with a `#n` suffix when
    /// several containers of the staging share that name.
    pub container: String,
    pub outcome: TestOutcome,
    /// The reported failure, if any.
    pub failure: Option<Failure>,
}

impl InvocationOutcome {
    /// Returns `true` if the invocation does not fail the run.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Materialized containers plus the routing table of one staging.
pub struct StagedExamReactor<C: TestContainer> {
    strategy: ReactorStrategy,
    slots: Vec<ContainerSlot<C>>,
    probes: Vec<TestProbeProvider>,
    routes: IndexMap<String, Route>,
    state: ReactorState,
}

impl<C: TestContainer> StagedExamReactor<C> {
    pub(crate) fn new(
        strategy: ReactorStrategy,
        containers: Vec<(C, ExamOptions)>,
        probes: Vec<TestProbeProvider>,
    ) -> Self {
        let derive = containers.len() > 1;
        let labels = slot_labels(containers.iter().map(|(c, _)| c.name()));
        let mut routes = IndexMap::new();

        for (index, label) in labels.iter().enumerate() {
            for probe in &probes {
                for address in probe.tests() {
                    let target = if derive {
                        TestAddress::derive(address, label)
                    } else {
                        address.clone()
                    };
                    routes.insert(
                        target.identifier().to_string(),
                        Route {
                            target,
                            probe_address: address.clone(),
                            slot: index,
                        },
                    );
                }
            }
        }

        let slots = containers
            .into_iter()
            .zip(labels)
            .map(|((container, options), label)| ContainerSlot {
                container,
                label,
                timeout: options.timeout(),
                start_level: options.probe_start_level(),
                status: SlotStatus::Idle,
            })
            .collect();

        Self {
            strategy,
            slots,
            probes,
            routes,
            state: ReactorState::Staged,
        }
    }

    /// The strategy this reactor was staged with.
    pub fn strategy(&self) -> ReactorStrategy {
        self.strategy
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReactorState {
        self.state
    }

    /// Container names, in slot order.
    pub fn container_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.container.name()).collect()
    }

    /// Invocable targets in registration order, containers outermost.
    pub fn targets(&self) -> Vec<TestAddress> {
        self.routes.values().map(|r| r.target.clone()).collect()
    }

    /// Per-container targets of one probe address, in container order.
    pub fn targets_for(&self, probe_identifier: &str) -> Vec<TestAddress> {
        self.routes
            .values()
            .filter(|r| r.probe_address.identifier() == probe_identifier)
            .map(|r| r.target.clone())
            .collect()
    }

    /// Returns `true` if `address` belongs to this reactor.
    pub fn contains(&self, address: &TestAddress) -> bool {
        self.routes.contains_key(address.identifier())
    }

    /// Names of the probes staged here.
    pub fn probe_names(&self) -> Vec<&str> {
        self.probes.iter().map(TestProbeProvider::name).collect()
    }

    /// Starts containers of class-scoped strategies.
    pub async fn before_class(&mut self) -> ReactorResult<()> {
        if self.state == ReactorState::TornDown {
            return Err(ReactorError::NotStaged);
        }
        if self.strategy.scope() == LifecycleScope::Class {
            self.start_containers().await?;
        }
        Ok(())
    }

    /// Starts containers of suite-scoped strategies.
    pub async fn before_suite(&mut self) -> ReactorResult<()> {
        if self.state == ReactorState::TornDown {
            return Err(ReactorError::NotStaged);
        }
        if self.strategy.scope() == LifecycleScope::Suite {
            self.start_containers().await?;
        }
        Ok(())
    }

    /// Tears down class- and method-scoped reactors.
    ///
    /// Suite-scoped reactors keep running until [`after_suite`](Self::after_suite).
    pub async fn after_class(&mut self) -> CompositeResult {
        if self.strategy.scope() == LifecycleScope::Suite {
            return CompositeResult::new();
        }
        self.tear_down().await
    }

    /// Tears the reactor down at the end of the suite.
    pub async fn after_suite(&mut self) -> CompositeResult {
        self.tear_down().await
    }

    /// Starts every idle container.
    ///
    /// With a single container a failure is returned after the partially
    /// started container is stopped. With several, failed containers are
    /// marked and their tests report errors.
    pub async fn start_containers(&mut self) -> ReactorResult<()> {
        for index in 0..self.slots.len() {
            self.start_slot(index).await?;
        }
        Ok(())
    }

    async fn start_slot(&mut self, index: usize) -> ReactorResult<()> {
        let single = self.slots.len() == 1;
        let slot = &mut self.slots[index];
        if slot.status != SlotStatus::Idle {
            return Ok(());
        }

        match boot(slot, &self.probes).await {
            Ok(()) => {
                slot.status = SlotStatus::Running;
                self.state = ReactorState::Running;
                Ok(())
            }
            Err(source) => {
                let container = slot.container.name().to_string();
                if single {
                    slot.status = SlotStatus::Idle;
                    return Err(ReactorError::Container { container, source });
                }
                warn!(
                    "Container {} failed to start, its tests will report errors: {}",
                    container, source
                );
                slot.status = SlotStatus::Failed(source.to_string());
                Ok(())
            }
        }
    }

    async fn stop_slot(&mut self, index: usize) -> ContainerResult<()> {
        let slot = &mut self.slots[index];
        let name = slot.container.name().to_string();
        let result = with_timeout("stop", &name, slot.timeout, slot.container.stop()).await;
        let cleanup = slot.container.cleanup().await;
        result.and(cleanup)
    }

    /// Runs one target and reports it to `listener`.
    ///
    /// Test failures are reported and returned as an outcome, never as an
    /// error.
    ///
    /// # Errors
    ///
    /// - `ReactorError::UnknownAddress` - the address is not a target of
    ///   this reactor, or the reactor was torn down
    /// - `ReactorError::Container` - the only container failed to start
    pub async fn invoke(
        &mut self,
        address: &TestAddress,
        listener: &dyn TestListener,
    ) -> ReactorResult<InvocationOutcome> {
        let route = self
            .routes
            .get(address.identifier())
            .cloned()
            .ok_or_else(|| ReactorError::UnknownAddress(address.caption().to_string()))?;

        let (target, call_address) = if address.is_parameterized() {
            let args = address.arguments().to_vec();
            (
                route.target.parameterized(args.clone()),
                route.probe_address.parameterized(args),
            )
        } else {
            (route.target.clone(), route.probe_address.clone())
        };

        self.start_slot(route.slot).await?;

        let slot = &self.slots[route.slot];
        let container = slot.label.clone();
        let description = Description::for_address(&target);
        listener.test_started(&description).await;

        let result = match &slot.status {
            SlotStatus::Failed(message) => Err(ContainerError::StartFailed {
                container: container.clone(),
                message: message.clone(),
            }),
            _ => {
                debug!("Invoking {} in {}", target.caption(), container);
                slot.container.call(&call_address).await
            }
        };

        if self.strategy.restarts_per_invocation()
            && self.slots[route.slot].status == SlotStatus::Running
        {
            if let Err(e) = self.stop_slot(route.slot).await {
                warn!(
                    "Failed to stop container {} after {}: {}",
                    container,
                    target.caption(),
                    e
                );
            }
            self.slots[route.slot].status = SlotStatus::Idle;
        }

        let (outcome, failure) = match result {
            Ok(()) => (TestOutcome::Passed, None),
            Err(error) => {
                let remote = match error.root_cause() {
                    ContainerError::StartFailed { .. } => {
                        RemoteFailure::error(CONTAINER_FAILURE_CLASS, error.to_string())
                    }
                    _ => error.to_failure(),
                };
                let failure = Failure::from_remote(description.clone(), remote);
                if failure.kind == FailureKind::Assumption {
                    listener.test_assumption_failure(&failure).await;
                } else {
                    listener.test_failure(&failure).await;
                }
                (TestOutcome::from_failure_kind(failure.kind), Some(failure))
            }
        };

        listener.test_finished(&description).await;

        Ok(InvocationOutcome {
            target,
            container,
            outcome,
            failure,
        })
    }

    /// Stops every running container exactly once and clears the routing
    /// table. Repeated calls do nothing.
    pub async fn tear_down(&mut self) -> CompositeResult {
        let mut result = CompositeResult::new();
        if self.state == ReactorState::TornDown {
            return result;
        }

        for index in 0..self.slots.len() {
            let name = self.slots[index].container.name().to_string();
            let outcome = match self.slots[index].status {
                SlotStatus::Running => self.stop_slot(index).await,
                SlotStatus::Stopped => continue,
                _ => self.slots[index].container.cleanup().await,
            };
            if let Err(e) = &outcome {
                warn!("Failed to tear down container {}: {}", name, e);
            }
            self.slots[index].status = SlotStatus::Stopped;
            result.push(name, outcome);
        }

        self.routes.clear();
        self.state = ReactorState::TornDown;
        info!("Reactor torn down ({} container(s))", result.len());
        result
    }
}

/// Starts one container and installs every probe into it.
///
/// A container that fails to boot is stopped again before the error is
/// returned.
async fn boot<C: TestContainer>(
    slot: &mut ContainerSlot<C>,
    probes: &[TestProbeProvider],
) -> ContainerResult<()> {
    let name = slot.container.name().to_string();
    let timeout = slot.timeout;

    let booted = match with_timeout("start", &name, timeout, slot.container.start()).await {
        Ok(()) => install_probes(slot, probes).await,
        Err(e) => Err(e),
    };
    if let Err(e) = booted {
        if let Err(stop) = slot.container.stop().await {
            warn!("Failed to stop partially started container {}: {}", name, stop);
        }
        if let Err(cleanup) = slot.container.cleanup().await {
            warn!("Failed to clean up container {}: {}", name, cleanup);
        }
        return Err(e);
    }

    debug!("Container {} ready with {} probe(s)", name, probes.len());
    Ok(())
}

async fn install_probes<C: TestContainer>(
    slot: &mut ContainerSlot<C>,
    probes: &[TestProbeProvider],
) -> ContainerResult<()> {
    let name = slot.container.name().to_string();
    for probe in probes {
        let artifact = probe.stream().map_err(|e| ContainerError::InstallFailed {
            container: name.clone(),
            message: e.to_string(),
        })?;
        let handle = slot.container.install(probe.name(), artifact).await?;

        if let Some(level) = slot.start_level {
            slot.container.set_start_level(handle, level).await?;
        }

        with_timeout(
            "probe activation",
            &name,
            slot.timeout,
            slot.container
                .wait_for_state(handle, ProbeState::Active, slot.timeout),
        )
        .await?;
    }
    Ok(())
}

/// Per-slot labels: the container name, or `name#n` (1-based) for every
/// slot whose name is shared with another slot.
fn slot_labels<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let names: Vec<&str> = names.collect();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    names
        .iter()
        .map(|name| {
            if names.iter().filter(|n| *n == name).count() < 2 {
                return name.to_string();
            }
            let occurrence = seen.entry(name).or_insert(0);
            *occurrence += 1;
            format!("{}#{}", name, occurrence)
        })
        .collect()
}

impl<C: TestContainer> Drop for StagedExamReactor<C> {
    fn drop(&mut self) {
        let running = self
            .slots
            .iter()
            .filter(|s| s.status == SlotStatus::Running)
            .count();
        if self.state != ReactorState::TornDown && running > 0 {
            warn!(
                "Staged reactor dropped without teardown, {} container(s) still running",
                running
            );
        }
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;

    use super::testing::{CountingFactory, Counters};
    use super::*;
    use crate::listener::RecordingListener;
    use crate::options::ExamOption;
    use crate::probe::TestProbeBuilder;
    use crate::reactor::ExamReactor;

    fn probe() -> TestProbeBuilder {
        let mut builder = TestProbeBuilder::new("sample");
        builder.add_tests("Sample", ["m1", "m2"]);
        builder
    }

    fn frameworks(names: &[&str]) -> ExamOptions {
        names
            .iter()
            .map(|n| ExamOption::Framework {
                name: n.to_string(),
            })
            .collect()
    }

    async fn stage(
        factory: CountingFactory,
        options: ExamOptions,
        strategy: ReactorStrategy,
    ) -> StagedExamReactor<testing::CountingContainer> {
        let mut reactor = ExamReactor::new(Arc::new(factory));
        reactor.add_probe(probe()).unwrap();
        reactor.add_configuration(options).unwrap();
        reactor.stage(strategy).await.unwrap()
    }

    async fn run_all(
        staged: &mut StagedExamReactor<testing::CountingContainer>,
        listener: &RecordingListener,
    ) -> Vec<InvocationOutcome> {
        let mut outcomes = Vec::new();
        for target in staged.targets() {
            outcomes.push(staged.invoke(&target, listener).await.unwrap());
        }
        outcomes
    }

    #[tokio::test]
    async fn test_two_methods_all_confined() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            ExamOptions::new(),
            ReactorStrategy::PerSuite,
        )
        .await;
        let listener = RecordingListener::new();

        assert_eq!(staged.targets().len(), 2);
        staged.before_suite().await.unwrap();
        run_all(&mut staged, &listener).await;

        assert_eq!(listener.started().len(), 2);
        assert_eq!(listener.finished().len(), 2);
        assert!(listener.failures().is_empty());
        assert_eq!(counters.starts(), 1);

        // Suite scope survives the class boundary.
        assert!(staged.after_class().await.is_empty());
        assert_eq!(counters.stops(), 0);
        assert!(staged.after_suite().await.is_success());
        assert_eq!(counters.stops(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_class() {
        let counters = Counters::default();
        let factory = CountingFactory::new(&counters)
            .failing_test("Sample.m1", RemoteFailure::error("RuntimeException", "boom"));
        let mut staged = stage(factory, ExamOptions::new(), ReactorStrategy::PerClass).await;
        let listener = RecordingListener::new();

        staged.before_class().await.unwrap();
        let outcomes = run_all(&mut staged, &listener).await;
        let teardown = staged.after_class().await;

        let failures = listener.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "boom");
        assert_eq!(failures[0].class_name, "RuntimeException");
        assert_eq!(listener.finished().len(), 2);
        assert_eq!(outcomes[0].outcome, TestOutcome::Error);
        assert_eq!(outcomes[1].outcome, TestOutcome::Passed);
        assert!(teardown.is_success());
        assert_eq!(counters.stops(), 1);
        assert_eq!(staged.state(), ReactorState::TornDown);
    }

    #[tokio::test]
    async fn test_per_method_restarts_around_each_invocation() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            ExamOptions::new(),
            ReactorStrategy::PerMethod,
        )
        .await;
        let listener = RecordingListener::new();

        staged.before_class().await.unwrap();
        run_all(&mut staged, &listener).await;
        staged.after_class().await;

        assert_eq!(counters.starts(), 2);
        assert_eq!(counters.stops(), 2);
        assert_eq!(
            counters.events(),
            vec![
                "start:stub",
                "call:stub:Sample.m1",
                "stop:stub",
                "start:stub",
                "call:stub:Sample.m2",
                "stop:stub",
            ]
        );
    }

    #[tokio::test]
    async fn test_double_teardown_stops_each_container_once() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            frameworks(&["felix", "equinox"]),
            ReactorStrategy::PerClass,
        )
        .await;

        staged.before_class().await.unwrap();
        let first = staged.tear_down().await;
        let second = staged.tear_down().await;

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert_eq!(counters.stops_of("felix"), 1);
        assert_eq!(counters.stops_of("equinox"), 1);
    }

    #[tokio::test]
    async fn test_two_frameworks_route_to_their_container() {
        let counters = Counters::default();
        let mut builder = TestProbeBuilder::new("sample");
        let address = builder.add_test("Sample", "only");
        let mut reactor = ExamReactor::new(Arc::new(CountingFactory::new(&counters)));
        reactor.add_probe(builder).unwrap();
        reactor
            .add_configuration(frameworks(&["felix", "equinox"]))
            .unwrap();
        let mut staged = reactor.stage(ReactorStrategy::PerSuite).await.unwrap();
        let listener = RecordingListener::new();

        let targets = staged.targets();
        let captions: Vec<_> = targets.iter().map(|t| t.caption().to_string()).collect();
        assert_eq!(captions, vec!["Sample.only:felix", "Sample.only:equinox"]);
        assert_eq!(staged.targets_for(address.identifier()).len(), 2);

        let outcomes = run_all(&mut staged, &listener).await;
        assert_eq!(outcomes[0].container, "felix");
        assert_eq!(outcomes[1].container, "equinox");
        assert_eq!(
            counters.calls(),
            vec!["felix:Sample.only", "equinox:Sample.only"]
        );
        staged.after_suite().await;
    }

    #[tokio::test]
    async fn test_repeated_container_names_get_distinct_captions() {
        let counters = Counters::default();
        let mut builder = TestProbeBuilder::new("sample");
        builder.add_test("Sample", "only");
        let mut reactor = ExamReactor::new(Arc::new(CountingFactory::new(&counters)));
        reactor.add_probe(builder).unwrap();
        for mode in ["fast", "slow"] {
            reactor
                .add_configuration(ExamOptions::new().with(ExamOption::SystemProperty {
                    key: "mode".into(),
                    value: mode.into(),
                }))
                .unwrap();
        }
        let mut staged = reactor.stage(ReactorStrategy::PerSuite).await.unwrap();
        let listener = RecordingListener::new();

        let captions: Vec<_> = staged
            .targets()
            .iter()
            .map(|t| t.caption().to_string())
            .collect();
        assert_eq!(captions, vec!["Sample.only:stub#1", "Sample.only:stub#2"]);

        let outcomes = run_all(&mut staged, &listener).await;
        assert_eq!(outcomes[0].container, "stub#1");
        assert_eq!(outcomes[1].container, "stub#2");

        let started: HashSet<_> = listener.started().into_iter().collect();
        assert_eq!(started.len(), 2);
        staged.after_suite().await;
        assert_eq!(counters.stops_of("stub"), 2);
    }

    #[test]
    fn test_slot_labels_only_suffix_repeated_names() {
        let labels = slot_labels(["felix", "felix", "equinox"].into_iter());
        assert_eq!(labels, vec!["felix#1", "felix#2", "equinox"]);
        assert_eq!(slot_labels(["a", "b"].into_iter()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unknown_and_torn_down_addresses() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            ExamOptions::new(),
            ReactorStrategy::PerClass,
        )
        .await;
        let listener = RecordingListener::new();

        let stranger = TestAddress::new("Other.m1");
        assert!(matches!(
            staged.invoke(&stranger, &listener).await,
            Err(ReactorError::UnknownAddress(_))
        ));

        let target = staged.targets()[0].clone();
        staged.invoke(&target, &listener).await.unwrap();
        staged.tear_down().await;

        assert!(staged.targets().is_empty());
        assert!(matches!(
            staged.invoke(&target, &listener).await,
            Err(ReactorError::UnknownAddress(_))
        ));
        assert!(matches!(
            staged.before_class().await,
            Err(ReactorError::NotStaged)
        ));
    }

    #[tokio::test]
    async fn test_targets_are_unique_and_complete() {
        let counters = Counters::default();
        let staged = stage(
            CountingFactory::new(&counters),
            frameworks(&["a", "b", "c"]),
            ReactorStrategy::PerClass,
        )
        .await;

        let targets = staged.targets();
        let ids: HashSet<_> = targets.iter().map(|t| t.identifier().to_string()).collect();
        assert_eq!(targets.len(), 6);
        assert_eq!(ids.len(), 6);
        assert!(targets.iter().all(|t| staged.contains(t)));
    }

    #[tokio::test]
    async fn test_lazy_start_on_first_invoke() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            ExamOptions::new(),
            ReactorStrategy::PerSuite,
        )
        .await;
        let listener = RecordingListener::new();

        assert_eq!(staged.state(), ReactorState::Staged);
        run_all(&mut staged, &listener).await;
        assert_eq!(counters.starts(), 1);
        assert_eq!(staged.state(), ReactorState::Running);
        staged.tear_down().await;
    }

    #[tokio::test]
    async fn test_single_container_start_failure_is_fatal() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters).failing_start("stub"),
            ExamOptions::new(),
            ReactorStrategy::PerClass,
        )
        .await;

        match staged.before_class().await {
            Err(ReactorError::Container { container, .. }) => assert_eq!(container, "stub"),
            other => panic!("unexpected result: {:?}", other.err()),
        }
        staged.tear_down().await;
        assert_eq!(counters.stops(), 0);
    }

    #[tokio::test]
    async fn test_failed_container_does_not_block_others() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters).failing_start("felix"),
            frameworks(&["felix", "equinox"]),
            ReactorStrategy::PerClass,
        )
        .await;
        let listener = RecordingListener::new();

        staged.before_class().await.unwrap();
        let outcomes = run_all(&mut staged, &listener).await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[..2].iter().all(|o| o.outcome == TestOutcome::Error));
        assert!(outcomes[2..].iter().all(|o| o.outcome == TestOutcome::Passed));
        assert_eq!(listener.failures()[0].class_name, CONTAINER_FAILURE_CLASS);
        assert_eq!(listener.finished().len(), 4);

        staged.after_class().await;
        assert_eq!(counters.stops_of("equinox"), 1);
        assert_eq!(counters.stops_of("felix"), 0);
    }

    #[tokio::test]
    async fn test_stop_failure_is_collected_not_raised() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters).failing_stop("felix"),
            frameworks(&["felix", "equinox"]),
            ReactorStrategy::PerClass,
        )
        .await;
        let listener = RecordingListener::new();

        staged.before_class().await.unwrap();
        let outcomes = run_all(&mut staged, &listener).await;
        let teardown = staged.after_class().await;

        assert!(outcomes.iter().all(InvocationOutcome::is_success));
        assert!(!teardown.is_success());
        let failed: Vec<_> = teardown.failures().map(|(name, _)| name).collect();
        assert_eq!(failed, vec!["felix"]);
        assert_eq!(counters.stops_of("equinox"), 1);
    }

    #[tokio::test]
    async fn test_assumption_failure_is_reported_separately() {
        let counters = Counters::default();
        let factory = CountingFactory::new(&counters)
            .failing_test("Sample.m2", RemoteFailure::assumption("not here"));
        let mut staged = stage(factory, ExamOptions::new(), ReactorStrategy::PerClass).await;
        let listener = RecordingListener::new();

        let outcomes = run_all(&mut staged, &listener).await;
        assert_eq!(outcomes[1].outcome, TestOutcome::Skipped);
        assert!(listener.failures().is_empty());
        assert_eq!(listener.assumption_failures()[0].message, "not here");
        staged.tear_down().await;
    }

    #[tokio::test]
    async fn test_parameterized_invocation_keeps_route() {
        let counters = Counters::default();
        let mut staged = stage(
            CountingFactory::new(&counters),
            ExamOptions::new(),
            ReactorStrategy::PerClass,
        )
        .await;
        let listener = RecordingListener::new();

        let target = staged.targets()[0].parameterized(vec![json!(1), json!(2)]);
        let outcome = staged.invoke(&target, &listener).await.unwrap();

        assert_eq!(outcome.target.arguments(), &[json!(1), json!(2)]);
        assert_eq!(listener.started()[0].display_name(), "Sample.m1[1, 2]");
        staged.tear_down().await;
    }
}
