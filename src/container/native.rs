//! In-process container implementation.
//!
//! The native container runs tests registered in a [`ProbeRegistry`]
//! inside the driver's own process. Every start creates a fresh runtime
//! (its own [`RuntimeStore`] and probe table), so nothing written by one
//! run of the container is visible to the next.
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | Per start: fresh runtime store and probe table |
//! | Probe format | JSON probe manifest |
//! | Panics | Caught and reported as errors |
//! | Variants | One container per `Framework` option |
//!
//! # Failures
//!
//! A [`RemoteFailure`] returned by a test crosses the container boundary
//! intact. `std::io::Error`, `serde_json::Error` and [`ContainerError`] keep
//! their type name; any other error arrives as `anyhow::Error` with its
//! message only. Wrap such errors with [`typed`] to keep their type name.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use exam::container::native::{check, NativeContainerFactory, ProbeRegistry};
//!
//! let mut registry = ProbeRegistry::new();
//! registry.register("Sample", "m1", |ctx| async move {
//!     ctx.runtime().set("visited", serde_json::json!(true));
//!     check(ctx.container() == "native", "unexpected container")?;
//!     Ok::<(), anyhow::Error>(())
//! });
//!
//! let factory = NativeContainerFactory::new(Arc::new(registry));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::{
    ContainerError, ContainerResult, ProbeHandle, ProbeState, RemoteFailure, TestContainer,
    TestContainerFactory,
};
use crate::address::TestAddress;
use crate::inject::{Injectable, Injector, ServiceInjector};
use crate::options::ExamOptions;
use crate::probe::ProbeManifest;

/// Container name used when no framework option is given.
pub const DEFAULT_CONTAINER_NAME: &str = "native";

/// Service key under which containers publish their own name.
pub const CONTAINER_NAME_SERVICE: &str = "exam.container.name";

/// Service key under which containers publish their runtime store.
pub const RUNTIME_STORE_SERVICE: &str = "exam.runtime.store";

/// Boxed future returned by registered tests.
pub type TestFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A registered test body.
pub type TestFn = Arc<dyn Fn(ProbeContext) -> TestFuture + Send + Sync>;

/// Fails with an assertion failure unless `condition` holds.
pub fn check(condition: bool, message: impl Into<String>) -> Result<(), RemoteFailure> {
    if condition {
        Ok(())
    } else {
        Err(RemoteFailure::assertion(message))
    }
}

/// Fails with an assumption failure unless `condition` holds.
pub fn assume(condition: bool, message: impl Into<String>) -> Result<(), RemoteFailure> {
    if condition {
        Ok(())
    } else {
        Err(RemoteFailure::assumption(message))
    }
}

/// Converts `error` into an error failure carrying its concrete type name.
///
/// Causes from [`std::error::Error::source`] are kept in the trace.
pub fn typed<E: std::error::Error>(error: E) -> RemoteFailure {
    let failure = RemoteFailure::error(std::any::type_name::<E>(), error.to_string());
    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    if causes.is_empty() {
        failure
    } else {
        failure.with_trace(causes.join("\n"))
    }
}

/// Test bodies addressable by `(class, method)`.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    tests: HashMap<(String, String), TestFn>,
}

impl ProbeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the body of `class.method`, replacing any earlier one.
    pub fn register<F, Fut>(&mut self, class: &str, method: &str, test: F) -> &mut Self
    where
        F: Fn(ProbeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let test: TestFn = Arc::new(move |ctx| test(ctx).boxed());
        self.tests
            .insert((class.to_string(), method.to_string()), test);
        self
    }

    /// Looks up the body of `class.method`.
    pub fn get(&self, class: &str, method: &str) -> Option<TestFn> {
        self.tests
            .get(&(class.to_string(), method.to_string()))
            .cloned()
    }

    /// Returns `true` if `class.method` is registered.
    pub fn contains(&self, class: &str, method: &str) -> bool {
        self.tests
            .contains_key(&(class.to_string(), method.to_string()))
    }

    /// Number of registered tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Key/value state owned by one run of a native container.
#[derive(Debug, Clone, Default)]
pub struct RuntimeStore {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl RuntimeStore {
    /// Stores a value.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.into(), value);
        }
    }

    /// Reads a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok().and_then(|v| v.get(key).cloned())
    }

    /// Returns `true` if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().map(|v| v.contains_key(key)).unwrap_or(false)
    }
}

/// What a test body sees of its container.
#[derive(Clone)]
pub struct ProbeContext {
    container: String,
    arguments: Vec<Value>,
    runtime: RuntimeStore,
    services: ServiceInjector,
}

impl ProbeContext {
    /// Name of the container running the test.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Invocation arguments.
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Deserializes the argument at `index`.
    pub fn argument<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .arguments
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("missing argument {}", index))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// State of the current container run.
    pub fn runtime(&self) -> &RuntimeStore {
        &self.runtime
    }

    /// Looks up a container-side service.
    pub fn service<T: std::any::Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services.service(key)
    }

    /// Injects container-side services into a test instance.
    pub fn inject(&self, instance: &mut dyn Injectable) -> ContainerResult<()> {
        self.services.inject_fields(instance)
    }
}

/// Factory for [`NativeTestContainer`]s.
///
/// Creates one container per `Framework` option, or a single container
/// named [`DEFAULT_CONTAINER_NAME`] when none is given.
pub struct NativeContainerFactory {
    registry: Arc<ProbeRegistry>,
    services: ServiceInjector,
}

impl NativeContainerFactory {
    /// Creates a factory running tests from `registry`.
    pub fn new(registry: Arc<ProbeRegistry>) -> Self {
        Self {
            registry,
            services: ServiceInjector::new(),
        }
    }

    /// Services made available to tests in every container.
    pub fn with_services(mut self, services: ServiceInjector) -> Self {
        self.services = services;
        self
    }
}

impl TestContainerFactory for NativeContainerFactory {
    type Container = NativeTestContainer;

    fn create(&self, options: &ExamOptions) -> ContainerResult<Vec<NativeTestContainer>> {
        let frameworks = options.frameworks();
        let names: Vec<&str> = if frameworks.is_empty() {
            vec![DEFAULT_CONTAINER_NAME]
        } else {
            frameworks
        };

        Ok(names
            .into_iter()
            .map(|name| NativeTestContainer {
                name: name.to_string(),
                registry: Arc::clone(&self.registry),
                services: self.services.clone(),
                runtime: None,
            })
            .collect())
    }
}

struct InstalledProbe {
    handle: ProbeHandle,
    manifest: ProbeManifest,
    state: ProbeState,
    start_level: Option<u32>,
}

struct NativeRuntime {
    store: RuntimeStore,
    services: ServiceInjector,
    probes: Vec<InstalledProbe>,
    next_handle: u64,
}

/// A container whose runtime lives inside the driver process.
pub struct NativeTestContainer {
    name: String,
    registry: Arc<ProbeRegistry>,
    services: ServiceInjector,
    runtime: Option<NativeRuntime>,
}

impl NativeTestContainer {
    /// Returns `true` while the container is started.
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Store of the current run, if started.
    pub fn runtime_store(&self) -> Option<&RuntimeStore> {
        self.runtime.as_ref().map(|r| &r.store)
    }

    fn runtime(&self) -> ContainerResult<&NativeRuntime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| ContainerError::NotStarted(self.name.clone()))
    }

    fn probe_mut(&mut self, handle: ProbeHandle) -> ContainerResult<&mut InstalledProbe> {
        let name = self.name.clone();
        self.runtime
            .as_mut()
            .ok_or_else(|| ContainerError::NotStarted(name.clone()))?
            .probes
            .iter_mut()
            .find(|p| p.handle == handle)
            .ok_or_else(|| {
                ContainerError::Configuration(format!("unknown probe {:?} in {}", handle, name))
            })
    }
}

/// Moves a test body's error across the container boundary.
///
/// [`RemoteFailure`]s round-trip through JSON and keep their identity.
/// Other errors keep their message and, for a few known types, their type
/// name; everything else is reported as `anyhow::Error`.
fn transfer_failure(error: anyhow::Error, context: String) -> ContainerError {
    if let Some(failure) = error.downcast_ref::<RemoteFailure>() {
        let transferred = serde_json::to_vec(failure)
            .and_then(|bytes| serde_json::from_slice::<RemoteFailure>(&bytes));
        if let Ok(failure) = transferred {
            return ContainerError::TestFailed(failure).wrap(context);
        }
    }

    let class_name = if error.is::<std::io::Error>() {
        "std::io::Error"
    } else if error.is::<serde_json::Error>() {
        "serde_json::Error"
    } else if error.is::<ContainerError>() {
        "exam::ContainerError"
    } else {
        "anyhow::Error"
    };

    ContainerError::Unserializable {
        class_name: class_name.to_string(),
        message: format!("{:#}", error),
    }
    .wrap(context)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "test panicked".to_string()
    }
}

#[async_trait]
impl TestContainer for NativeTestContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> ContainerResult<()> {
        if self.runtime.is_some() {
            debug!("Native container {} already started", self.name);
            return Ok(());
        }

        let store = RuntimeStore::default();
        let mut services = self.services.clone();
        services.register(CONTAINER_NAME_SERVICE, self.name.clone());
        services.register(RUNTIME_STORE_SERVICE, store.clone());

        self.runtime = Some(NativeRuntime {
            store,
            services,
            probes: Vec::new(),
            next_handle: 1,
        });
        info!("Started native container {}", self.name);
        Ok(())
    }

    async fn install(&mut self, location: &str, artifact: &[u8]) -> ContainerResult<ProbeHandle> {
        let name = self.name.clone();
        let registry = Arc::clone(&self.registry);
        let runtime = self
            .runtime
            .as_mut()
            .ok_or_else(|| ContainerError::NotStarted(name.clone()))?;

        let manifest =
            ProbeManifest::from_bytes(artifact).map_err(|e| ContainerError::InstallFailed {
                container: name.clone(),
                message: format!("{}: {}", location, e),
            })?;

        if let Some(missing) = manifest
            .instructions
            .iter()
            .find(|i| !registry.contains(&i.class, &i.method))
        {
            return Err(ContainerError::InstallFailed {
                container: name,
                message: format!(
                    "{} declares {}.{} but no test body is registered",
                    location, missing.class, missing.method
                ),
            });
        }

        let handle = ProbeHandle(runtime.next_handle);
        runtime.next_handle += 1;
        runtime.probes.push(InstalledProbe {
            handle,
            manifest,
            state: ProbeState::Active,
            start_level: None,
        });

        debug!("Installed {} into {} as {:?}", location, self.name, handle);
        Ok(handle)
    }

    async fn call(&self, address: &TestAddress) -> ContainerResult<()> {
        let runtime = self.runtime()?;

        let instruction = runtime
            .probes
            .iter()
            .filter(|p| p.state == ProbeState::Active)
            .find_map(|p| p.manifest.instruction(address.root()))
            .ok_or_else(|| ContainerError::UnknownTest(address.caption().to_string()))?;

        let test = self
            .registry
            .get(&instruction.class, &instruction.method)
            .ok_or_else(|| ContainerError::UnknownTest(address.caption().to_string()))?;

        let ctx = ProbeContext {
            container: self.name.clone(),
            arguments: address.arguments().to_vec(),
            runtime: runtime.store.clone(),
            services: runtime.services.clone(),
        };

        let context = format!(
            "invoking {}.{} in {}",
            instruction.class, instruction.method, self.name
        );

        match AssertUnwindSafe(async move { test(ctx).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(transfer_failure(error, context)),
            Err(payload) => Err(ContainerError::TestFailed(RemoteFailure::error(
                "panic",
                panic_message(payload.as_ref()),
            ))
            .wrap(context)),
        }
    }

    async fn set_start_level(&mut self, handle: ProbeHandle, level: u32) -> ContainerResult<()> {
        let probe = self.probe_mut(handle)?;
        probe.start_level = Some(level);
        Ok(())
    }

    async fn wait_for_state(
        &self,
        handle: ProbeHandle,
        state: ProbeState,
        _timeout: Duration,
    ) -> ContainerResult<()> {
        let runtime = self.runtime()?;
        let probe = runtime
            .probes
            .iter()
            .find(|p| p.handle == handle)
            .ok_or_else(|| {
                ContainerError::Configuration(format!("unknown probe {:?} in {}", handle, self.name))
            })?;

        // Native probes change state synchronously, so a mismatch is final.
        if probe.state == state {
            Ok(())
        } else {
            Err(ContainerError::Timeout(format!(
                "probe {:?} in {} is {:?}, expected {:?}",
                handle, self.name, probe.state, state
            )))
        }
    }

    async fn stop(&mut self) -> ContainerResult<()> {
        if let Some(mut runtime) = self.runtime.take() {
            for probe in &mut runtime.probes {
                probe.state = ProbeState::Stopped;
            }
            info!("Stopped native container {}", self.name);
        }
        Ok(())
    }
}
