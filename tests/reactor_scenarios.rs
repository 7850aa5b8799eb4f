//! End-to-end reactor scenarios against the native container.

use std::sync::Arc;

use serde_json::{Value, json};

use exam::container::native::{
    NativeContainerFactory, ProbeContext, ProbeRegistry, assume, check,
};
use exam::TestAddress;
use exam::listener::{RecordingListener, TestOutcome};
use exam::manager::{ConfigSource, MethodDescriptor, ReactorManager, TestClass};
use exam::options::{ExamOption, ExamOptions};
use exam::probe::TestProbeBuilder;
use exam::reactor::{ExamReactor, ReactorError, ReactorState, ReactorStrategy};

async fn writes(ctx: ProbeContext) -> anyhow::Result<()> {
    ctx.runtime().set("touched", json!(true));
    Ok(())
}

async fn sees_clean_runtime(ctx: ProbeContext) -> anyhow::Result<()> {
    check(!ctx.runtime().contains("touched"), "runtime was reused")?;
    Ok(())
}

async fn sees_shared_runtime(ctx: ProbeContext) -> anyhow::Result<()> {
    check(ctx.runtime().contains("touched"), "runtime was restarted")?;
    Ok(())
}

async fn records_container(ctx: ProbeContext) -> anyhow::Result<()> {
    ctx.runtime().set("container", Value::String(ctx.container().to_string()));
    Ok(())
}

async fn adds(ctx: ProbeContext) -> anyhow::Result<()> {
    let a: i64 = ctx.argument(0)?;
    let b: i64 = ctx.argument(1)?;
    let sum: i64 = ctx.argument(2)?;
    check(a + b == sum, format!("{} + {} != {}", a, b, sum))?;
    Ok(())
}

async fn fails(_ctx: ProbeContext) -> anyhow::Result<()> {
    check(false, "boom")?;
    Ok(())
}

async fn panics(_ctx: ProbeContext) -> anyhow::Result<()> {
    panic!("exploded");
}

async fn not_applicable(_ctx: ProbeContext) -> anyhow::Result<()> {
    assume(false, "needs a database")?;
    Ok(())
}

fn registry() -> Arc<ProbeRegistry> {
    let mut registry = ProbeRegistry::new();
    registry
        .register("Isolation", "writes", writes)
        .register("Isolation", "reads", sees_clean_runtime)
        .register("Writer", "writes", writes)
        .register("Reader", "reads", sees_shared_runtime)
        .register("Frameworks", "records", records_container)
        .register("Calc", "adds", adds)
        .register("Broken", "fails", fails)
        .register("Broken", "panics", panics)
        .register("Broken", "not_applicable", not_applicable);
    Arc::new(registry)
}

fn manager() -> ReactorManager<NativeContainerFactory> {
    ReactorManager::new(NativeContainerFactory::new(registry()))
}

fn isolation_class(strategy: ReactorStrategy) -> TestClass {
    TestClass::new("Isolation")
        .with_method(MethodDescriptor::new("writes"))
        .with_method(MethodDescriptor::new("reads"))
        .with_strategy(strategy)
}

#[tokio::test]
async fn test_per_method_restarts_runtime_between_methods() {
    let mut manager = manager();
    let listener = RecordingListener::new();

    let outcomes = manager
        .run_suite(&[isolation_class(ReactorStrategy::PerMethod)], &listener)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(listener.summary().success());
}

#[tokio::test]
async fn test_per_class_shares_runtime_between_methods() {
    let mut manager = manager();
    let listener = RecordingListener::new();

    manager
        .run_suite(&[isolation_class(ReactorStrategy::PerClass)], &listener)
        .await
        .unwrap();

    let failures = listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message, "runtime was reused");
    assert_eq!(failures[0].description.method_name.as_deref(), Some("reads"));
}

#[tokio::test]
async fn test_per_suite_shares_runtime_between_classes() {
    let mut manager = manager().with_default_strategy(ReactorStrategy::PerSuite);
    let listener = RecordingListener::new();

    let classes = [
        TestClass::new("Writer").with_method(MethodDescriptor::new("writes")),
        TestClass::new("Reader").with_method(MethodDescriptor::new("reads")),
    ];
    let outcomes = manager.run_suite(&classes, &listener).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(listener.summary().success(), "{:?}", listener.failures());
}

#[tokio::test]
async fn test_frameworks_each_get_their_own_container() {
    let mut manager = manager();
    let listener = RecordingListener::new();

    let options = ExamOptions::new()
        .with(ExamOption::Framework {
            name: "felix".to_string(),
        })
        .with(ExamOption::Framework {
            name: "equinox".to_string(),
        });
    let class = TestClass::new("Frameworks")
        .with_configuration(ConfigSource::new("both", options))
        .with_method(MethodDescriptor::new("records"));

    let outcomes = manager.run_suite(&[class], &listener).await.unwrap();

    let containers: Vec<&str> = outcomes.iter().map(|o| o.container.as_str()).collect();
    assert_eq!(containers, vec!["felix", "equinox"]);

    let methods: Vec<String> = listener
        .started()
        .into_iter()
        .filter_map(|d| d.method_name)
        .collect();
    assert_eq!(methods, vec!["records:felix", "records:equinox"]);
}

#[tokio::test]
async fn test_parameterized_method_runs_per_argument_set() {
    let mut manager = manager();
    let listener = RecordingListener::new();

    let class = TestClass::new("Calc").with_method(
        MethodDescriptor::new("adds")
            .with_parameters(vec![json!(1), json!(2), json!(3)])
            .with_parameters(vec![json!(2), json!(2), json!(5)]),
    );
    let outcomes = manager.run_suite(&[class], &listener).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].outcome, TestOutcome::Passed);
    assert_eq!(outcomes[1].outcome, TestOutcome::Failed);
    assert_eq!(listener.failures()[0].message, "2 + 2 != 5");
}

#[tokio::test]
async fn test_failures_are_reported_and_isolated() {
    let mut manager = manager();
    let listener = RecordingListener::new();

    let class = TestClass::new("Broken")
        .with_method(MethodDescriptor::new("fails"))
        .with_method(MethodDescriptor::new("panics"))
        .with_method(MethodDescriptor::new("not_applicable"))
        .with_method(MethodDescriptor::new("skipped").ignored());
    let outcomes = manager.run_suite(&[class], &listener).await.unwrap();

    let kinds: Vec<TestOutcome> = outcomes.iter().map(|o| o.outcome).collect();
    assert_eq!(
        kinds,
        vec![TestOutcome::Failed, TestOutcome::Error, TestOutcome::Skipped]
    );
    assert_eq!(listener.failures()[0].message, "boom");
    assert!(listener.failures()[1].message.contains("exploded"));
    assert_eq!(listener.assumption_failures()[0].message, "needs a database");

    let summary = listener.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.skipped, 2);
    assert!(!summary.success());
}

#[tokio::test]
async fn test_reactor_lifecycle_without_manager() {
    let mut reactor = ExamReactor::new(Arc::new(NativeContainerFactory::new(registry())));
    let mut probe = TestProbeBuilder::new("isolation-probe");
    probe.add_tests("Isolation", ["writes", "reads"]);
    reactor.add_probe(probe).unwrap();

    let mut staged = reactor.stage(ReactorStrategy::PerSuite).await.unwrap();
    assert_eq!(staged.state(), ReactorState::Staged);

    let listener = RecordingListener::new();
    for target in staged.targets() {
        staged.invoke(&target, &listener).await.unwrap();
    }
    assert_eq!(listener.failures().len(), 1);

    let first = staged.after_suite().await;
    assert!(first.is_success());
    assert_eq!(staged.state(), ReactorState::TornDown);
    assert!(staged.tear_down().await.is_empty());

    let stale = staged.targets_for("isolation-probe");
    assert!(stale.is_empty());
    let err = staged
        .invoke(&TestAddress::new("Isolation.writes"), &listener)
        .await
        .unwrap_err();
    assert!(matches!(err, ReactorError::UnknownAddress(_)));
}
