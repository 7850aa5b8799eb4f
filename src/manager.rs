//! Reactor manager: maps test-framework callbacks onto reactor lifecycle.
//!
//! Test frameworks fire suite, class and method hooks at their own
//! granularity, sometimes more than once per boundary. The manager turns
//! them into exactly one `before_*` / `after_*` call per boundary on the
//! current [`StagedExamReactor`], stages reactors from declarative
//! [`TestClass`] metadata and injects driver-side values into test
//! instances.
//!
//! ```text
//! before_suite ─► prepare_reactor(class) ─► stage_reactor ─► before_class
//!                        ▲                                       │
//!                        │            invoke(class, method) ◄────┘
//!                        │                       │
//!                        └──── next class ◄── after_class ─► ... ─► after_suite
//! ```
//!
//! The manager is an explicit context owned by the run's entry point.
//! Drivers that call it from several tasks share it as a
//! [`SharedReactorManager`], whose mutex serializes (re)staging.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::container::{CompositeResult, ContainerError, ContainerResult, TestContainerFactory};
use crate::inject::{Injectable, Injector};
use crate::listener::{Description, TestListener};
use crate::options::ExamOptions;
use crate::probe::TestProbeBuilder;
use crate::reactor::{
    ExamReactor, InvocationOutcome, LifecycleScope, ReactorError, ReactorResult, ReactorStrategy,
    StagedExamReactor,
};

/// A manager shared between driver tasks.
pub type SharedReactorManager<F> = Arc<tokio::sync::Mutex<ReactorManager<F>>>;

/// How test instances receive container-provided values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemType {
    /// Driver-side injection.
    #[default]
    Plain,
    /// Injection happens inside the container; the driver does nothing.
    Modular,
    /// Driver-side injection through a CDI-style injector.
    Cdi,
}

/// One option-producing configuration of a test class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub name: String,
    pub options: ExamOptions,
}

impl ConfigSource {
    pub fn new(name: impl Into<String>, options: ExamOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// One test method of a test class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    /// Argument sets; the method runs once per set, or once without
    /// arguments when empty.
    #[serde(default)]
    pub parameters: Vec<Vec<Value>>,
    /// Ignored methods are reported but never invoked.
    #[serde(default)]
    pub ignored: bool,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds an argument set.
    pub fn with_parameters(mut self, arguments: Vec<Value>) -> Self {
        self.parameters.push(arguments);
        self
    }

    /// Marks the method as ignored.
    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

/// Declarative metadata of a test class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestClass {
    pub name: String,
    #[serde(default)]
    pub configurations: Vec<ConfigSource>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    /// Strategy declared by the class, overriding the manager default.
    #[serde(default)]
    pub strategy: Option<ReactorStrategy>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn with_configuration(mut self, source: ConfigSource) -> Self {
        self.configurations.push(source);
        self
    }

    pub fn with_strategy(mut self, strategy: ReactorStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Option-producing configurations, in declaration order.
    pub fn list_configuration_providers(&self) -> &[ConfigSource] {
        &self.configurations
    }

    /// Test methods, in declaration order.
    pub fn list_test_methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }
}

/// Bridges driver callbacks onto reactor lifecycle.
pub struct ReactorManager<F: TestContainerFactory> {
    factory: Arc<F>,
    system_options: ExamOptions,
    default_strategy: Option<ReactorStrategy>,
    system_type: SystemType,
    injector: Option<Box<dyn Injector>>,

    pending: Option<ExamReactor<F>>,
    pending_strategy: ReactorStrategy,
    pending_classes: Vec<String>,

    staged: Option<StagedExamReactor<F::Container>>,
    staged_classes: HashSet<String>,

    methods: HashMap<(String, String), MethodDescriptor>,
    probe_addresses: HashMap<(String, String), String>,
    started_classes: HashSet<String>,
    suite_started: bool,
}

impl<F: TestContainerFactory> ReactorManager<F> {
    /// Creates a manager creating containers through `factory`.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            system_options: ExamOptions::new(),
            default_strategy: None,
            system_type: SystemType::default(),
            injector: None,
            pending: None,
            pending_strategy: ReactorStrategy::default(),
            pending_classes: Vec::new(),
            staged: None,
            staged_classes: HashSet::new(),
            methods: HashMap::new(),
            probe_addresses: HashMap::new(),
            started_classes: HashSet::new(),
            suite_started: false,
        }
    }

    /// Options merged into every class configuration.
    pub fn with_system_options(mut self, options: ExamOptions) -> Self {
        self.system_options = options;
        self
    }

    /// Strategy for classes that do not declare one.
    pub fn with_default_strategy(mut self, strategy: ReactorStrategy) -> Self {
        self.default_strategy = Some(strategy);
        self
    }

    pub fn with_system_type(mut self, system_type: SystemType) -> Self {
        self.system_type = system_type;
        self
    }

    /// Injector used for driver-side injection.
    pub fn with_injector<I: Injector + 'static>(mut self, injector: I) -> Self {
        self.injector = Some(Box::new(injector));
        self
    }

    /// Wraps the manager for use from several driver tasks.
    pub fn into_shared(self) -> SharedReactorManager<F> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Class metadata first, then the manager default, then `PerClass`.
    pub fn resolve_strategy(&self, class: &TestClass) -> ReactorStrategy {
        class
            .strategy
            .or(self.default_strategy)
            .unwrap_or_default()
    }

    /// The current staged reactor, if any.
    pub fn staged(&self) -> Option<&StagedExamReactor<F::Container>> {
        self.staged.as_ref()
    }

    /// Returns `true` if a prepared reactor waits to be staged.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Prepares the reactor for `class`.
    ///
    /// Every configuration source is merged with the system options and
    /// becomes one container set; the class's methods form one probe.
    /// Suite-scoped classes join a pending suite-scoped reactor. Returns
    /// `false` when the current staged reactor already holds the class and
    /// nothing needs staging.
    pub fn prepare_reactor(&mut self, class: &TestClass) -> ReactorResult<bool> {
        let strategy = self.resolve_strategy(class);

        if let Some(staged) = &self.staged
            && staged.strategy().scope() == LifecycleScope::Suite
            && self.staged_classes.contains(&class.name)
        {
            debug!("Reusing suite reactor for {}", class.name);
            return Ok(false);
        }

        let joins_pending = self.pending.is_some()
            && strategy.scope() == LifecycleScope::Suite
            && self.pending_strategy == strategy;

        if !joins_pending {
            if self.pending.take().is_some() {
                warn!(
                    "Discarding unstaged reactor for {}",
                    self.pending_classes.join(", ")
                );
                self.pending_classes.clear();
            }

            let mut reactor = ExamReactor::new(Arc::clone(&self.factory));
            let sources = class.list_configuration_providers();
            if sources.is_empty() {
                reactor.add_configuration(self.system_options.clone())?;
            }
            for source in sources {
                debug!("Configuration {} of {}", source.name, class.name);
                reactor.add_configuration(self.system_options.combine(&source.options))?;
            }
            self.pending = Some(reactor);
            self.pending_strategy = strategy;
        } else if !class.configurations.is_empty() {
            debug!(
                "Suite reactor keeps the configurations of {}; ignoring those of {}",
                self.pending_classes.join(", "),
                class.name
            );
        }

        let mut builder = TestProbeBuilder::new(format!("{}-probe", class.name));
        for method in class.list_test_methods() {
            let key = (class.name.clone(), method.name.clone());
            self.methods.insert(key.clone(), method.clone());
            if !method.ignored {
                let address = builder.add_test(&class.name, &method.name);
                self.probe_addresses
                    .insert(key, address.identifier().to_string());
            }
        }

        if let Some(reactor) = self.pending.as_mut() {
            reactor.add_probe(builder)?;
        }
        self.pending_classes.push(class.name.clone());
        Ok(true)
    }

    /// Stages the pending reactor, tearing down the current one first.
    ///
    /// # Errors
    ///
    /// - `ReactorError::NotStaged` - nothing was prepared
    /// - errors of [`ExamReactor::stage`]
    pub async fn stage_reactor(&mut self) -> ReactorResult<()> {
        let mut reactor = self.pending.take().ok_or(ReactorError::NotStaged)?;

        if let Some(mut previous) = self.staged.take() {
            let result = previous.tear_down().await;
            for (container, error) in result.failures() {
                warn!("Failed to tear down container {}: {}", container, error);
            }
            self.staged_classes.clear();
            self.started_classes.clear();
        }

        let staged = reactor.stage(self.pending_strategy).await?;
        info!(
            "Staged {} target(s) for {}",
            staged.targets().len(),
            self.pending_classes.join(", ")
        );
        self.staged_classes = self.pending_classes.drain(..).collect();
        self.staged = Some(staged);
        Ok(())
    }

    /// Suite start; forwarded once.
    pub async fn before_suite(&mut self) -> ReactorResult<()> {
        if self.suite_started {
            return Ok(());
        }
        self.suite_started = true;
        match self.staged.as_mut() {
            Some(staged) => staged.before_suite().await,
            None => Ok(()),
        }
    }

    /// Suite end; tears down whatever is still staged.
    pub async fn after_suite(&mut self) -> CompositeResult {
        self.suite_started = false;
        self.started_classes.clear();
        self.staged_classes.clear();
        if self.pending.take().is_some() {
            self.pending_classes.clear();
        }
        match self.staged.take() {
            Some(mut staged) => staged.after_suite().await,
            None => CompositeResult::new(),
        }
    }

    /// Class start; forwarded once per class.
    pub async fn before_class(&mut self, class_name: &str) -> ReactorResult<()> {
        if !self.started_classes.insert(class_name.to_string()) {
            return Ok(());
        }
        let staged = self.staged.as_mut().ok_or(ReactorError::NotStaged)?;
        staged.before_class().await
    }

    /// Class end; forwarded once per class.
    ///
    /// Class- and method-scoped reactors holding the class are torn down and
    /// released, whether or not `before_class` ran first.
    pub async fn after_class(&mut self, class_name: &str) -> CompositeResult {
        let started = self.started_classes.remove(class_name);
        if !started && !self.staged_classes.contains(class_name) {
            return CompositeResult::new();
        }

        match self.staged.as_ref().map(|s| s.strategy().scope()) {
            Some(LifecycleScope::Suite) | None => CompositeResult::new(),
            Some(_) => {
                self.staged_classes.clear();
                match self.staged.take() {
                    Some(mut staged) => staged.after_class().await,
                    None => CompositeResult::new(),
                }
            }
        }
    }

    /// Runs every container variant of `class.method`.
    ///
    /// Parameterized methods run once per argument set. Ignored methods
    /// are reported to `listener` and not invoked.
    pub async fn invoke(
        &mut self,
        class_name: &str,
        method_name: &str,
        listener: &dyn TestListener,
    ) -> ReactorResult<Vec<InvocationOutcome>> {
        let key = (class_name.to_string(), method_name.to_string());
        let caption = format!("{}.{}", class_name, method_name);

        if self.methods.get(&key).is_some_and(|m| m.ignored) {
            listener
                .test_ignored(&Description::method(class_name, method_name))
                .await;
            return Ok(Vec::new());
        }

        let identifier = self
            .probe_addresses
            .get(&key)
            .ok_or_else(|| ReactorError::UnknownAddress(caption.clone()))?;
        let staged = self.staged.as_mut().ok_or(ReactorError::NotStaged)?;

        let targets = staged.targets_for(identifier);
        if targets.is_empty() {
            return Err(ReactorError::UnknownAddress(caption));
        }

        let parameters = self
            .methods
            .get(&key)
            .map(|m| m.parameters.clone())
            .unwrap_or_default();

        let mut outcomes = Vec::new();
        for target in targets {
            if parameters.is_empty() {
                outcomes.push(staged.invoke(&target, listener).await?);
            } else {
                for arguments in &parameters {
                    let invocation = target.parameterized(arguments.clone());
                    outcomes.push(staged.invoke(&invocation, listener).await?);
                }
            }
        }
        Ok(outcomes)
    }

    /// Injects driver-side values into a test instance.
    ///
    /// Modular systems inject inside the container, so this does nothing
    /// for them.
    pub fn inject(&self, instance: &mut dyn Injectable) -> ContainerResult<()> {
        match self.system_type {
            SystemType::Modular => {
                debug!("Skipping driver-side injection for modular system");
                Ok(())
            }
            SystemType::Plain | SystemType::Cdi => match &self.injector {
                Some(injector) => injector.inject_fields(instance),
                None if instance.injection_points().is_empty() => Ok(()),
                None => Err(ContainerError::Injection(format!(
                    "no injector configured for {} field(s)",
                    instance.injection_points().len()
                ))),
            },
        }
    }

    /// Prepares, stages and runs one class.
    ///
    /// `after_class` runs even when starting containers or invoking a
    /// method fails.
    pub async fn run_class(
        &mut self,
        class: &TestClass,
        listener: &dyn TestListener,
    ) -> ReactorResult<Vec<InvocationOutcome>> {
        if self.prepare_reactor(class)? {
            self.stage_reactor().await?;
        }

        let mut outcomes = Vec::new();
        let result = self.run_methods(class, listener, &mut outcomes).await;

        let teardown = self.after_class(&class.name).await;
        for (container, error) in teardown.failures() {
            warn!("Failed to stop container {}: {}", container, error);
        }

        result.map(|()| outcomes)
    }

    /// Runs a whole suite.
    ///
    /// Suite-scoped classes share one staged reactor and run first; the
    /// other classes follow in declaration order, each with its own.
    pub async fn run_suite(
        &mut self,
        classes: &[TestClass],
        listener: &dyn TestListener,
    ) -> ReactorResult<Vec<InvocationOutcome>> {
        let (suite, others): (Vec<&TestClass>, Vec<&TestClass>) = classes
            .iter()
            .partition(|c| self.resolve_strategy(c).scope() == LifecycleScope::Suite);

        let mut outcomes = Vec::new();
        let result = self
            .run_suite_classes(&suite, &others, listener, &mut outcomes)
            .await;

        let teardown = self.after_suite().await;
        for (container, error) in teardown.failures() {
            warn!("Failed to stop container {}: {}", container, error);
        }

        result.map(|()| outcomes)
    }

    async fn run_suite_classes(
        &mut self,
        suite: &[&TestClass],
        others: &[&TestClass],
        listener: &dyn TestListener,
        outcomes: &mut Vec<InvocationOutcome>,
    ) -> ReactorResult<()> {
        if !suite.is_empty() {
            for class in suite {
                self.prepare_reactor(class)?;
            }
            self.stage_reactor().await?;
        }
        self.before_suite().await?;

        for class in suite.iter().chain(others) {
            outcomes.extend(self.run_class(class, listener).await?);
        }
        Ok(())
    }

    async fn run_methods(
        &mut self,
        class: &TestClass,
        listener: &dyn TestListener,
        outcomes: &mut Vec<InvocationOutcome>,
    ) -> ReactorResult<()> {
        self.before_class(&class.name).await?;
        for method in class.list_test_methods() {
            outcomes.extend(self.invoke(&class.name, &method.name, listener).await?);
        }
        Ok(())
    }
}
