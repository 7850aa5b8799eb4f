//! exam CLI - Staged-reactor integration test runner.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use exam::config::{self, ClassConfig, ContainerConfig};
use exam::container::process::ProcessContainerFactory;
use exam::listener::{ConsoleListener, MultiListener, RunSummary, TestListener, TestOutcome};
use exam::manager::{ReactorManager, TestClass};
use exam::options::ExamOptions;
use exam::reactor::ReactorStrategy;
use exam::report::JUnitListener;

#[derive(Parser)]
#[command(name = "exam")]
#[command(about = "Staged-reactor integration test runner", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "exam.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests
    Run {
        /// Override the default reactor strategy
        #[arg(short, long, value_enum)]
        strategy: Option<ReactorStrategy>,

        /// Only run tests whose `Class.method` matches this regex
        #[arg(short, long)]
        filter: Option<String>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,
    },

    /// List configured test classes and methods
    List {
        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            strategy,
            filter,
            junit,
        } => run_tests(&cli.config, strategy, filter.as_deref(), junit, cli.verbose).await,
        Commands::List { format } => list_tests(&cli.config, &format),
        Commands::Validate => validate_config(&cli.config),
        Commands::Init => init_config(&cli.config),
    }
}

async fn run_tests(
    config_path: &Path,
    strategy: Option<ReactorStrategy>,
    filter: Option<&str>,
    junit_path: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let config = config::load_config(config_path)?;
    config::validate(&config)?;

    let filter = filter
        .map(Regex::new)
        .transpose()
        .context("Invalid --filter pattern")?;
    let classes = select_classes(&config.classes, filter.as_ref());
    if classes.is_empty() {
        println!("No tests match the filter.");
        return Ok(());
    }

    let strategy = strategy.unwrap_or(config.exam.strategy);
    let system_options = config.exam.system_options();
    info!("Using default strategy: {}", strategy);

    let factory = match &config.container {
        ContainerConfig::Process(process) => ProcessContainerFactory::new(process.clone()),
    };
    let mut manager = ReactorManager::new(factory)
        .with_system_options(system_options.clone())
        .with_default_strategy(strategy)
        .with_system_type(config.exam.system_type);

    let listener = create_listener(&config, junit_path, verbose);
    listener
        .run_started(planned_tests(&classes, &system_options))
        .await;

    let started = Instant::now();
    let outcomes = manager
        .run_suite(&classes, &listener)
        .await
        .context("Test run aborted")?;

    let mut summary = RunSummary::default();
    for outcome in &outcomes {
        summary.record(outcome.outcome);
    }
    for class in &classes {
        for method in class.list_test_methods().iter().filter(|m| m.ignored) {
            info!("Ignored: {}.{}", class.name, method.name);
            summary.record(TestOutcome::Skipped);
        }
    }
    summary.duration = started.elapsed();

    listener.run_finished(&summary).await;
    std::process::exit(summary.exit_code());
}

/// Test classes from the configuration, keeping only methods whose
/// `Class.method` matches `filter`. Classes left without methods are
/// dropped.
fn select_classes(classes: &[ClassConfig], filter: Option<&Regex>) -> Vec<TestClass> {
    classes
        .iter()
        .filter_map(|class| {
            let mut class = class.clone();
            if let Some(filter) = filter {
                class
                    .methods
                    .retain(|m| filter.is_match(&format!("{}.{}", class.name, m)));
            }
            (!class.methods.is_empty()).then(|| class.to_test_class())
        })
        .collect()
}

/// Number of invocations the run is expected to report, for progress.
fn planned_tests(classes: &[TestClass], system_options: &ExamOptions) -> usize {
    classes
        .iter()
        .map(|class| {
            let variants: usize = if class.configurations.is_empty() {
                system_options.frameworks().len().max(1)
            } else {
                class
                    .configurations
                    .iter()
                    .map(|c| system_options.combine(&c.options).frameworks().len().max(1))
                    .sum()
            };
            class
                .list_test_methods()
                .iter()
                .map(|m| {
                    if m.ignored {
                        1
                    } else {
                        m.parameters.len().max(1) * variants
                    }
                })
                .sum::<usize>()
        })
        .sum()
}

fn list_tests(config_path: &Path, format: &str) -> Result<()> {
    let config = config::load_config(config_path)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&config.classes)?;
            println!("{}", json);
        }
        _ => {
            for class in &config.classes {
                let strategy = class.strategy.unwrap_or(config.exam.strategy);
                println!("{} ({})", class.name, strategy);
                for method in &class.methods {
                    let mut markers = Vec::new();
                    if class.ignored.contains(method) {
                        markers.push("ignored".to_string());
                    }
                    if let Some(sets) = class.parameters.get(method) {
                        markers.push(format!("{} parameter sets", sets.len()));
                    }
                    if markers.is_empty() {
                        println!("  {}", method);
                    } else {
                        println!("  {} [{}]", method, markers.join(", "));
                    }
                }
            }
        }
    }

    Ok(())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let result = config::load_config(config_path)
        .and_then(|config| config::validate(&config).map(|()| config));

    match result {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Strategy: {}", config.exam.strategy);
            println!("  Timeout: {}s", config.exam.timeout_secs);

            let container_name = match &config.container {
                ContainerConfig::Process(_) => "process",
            };
            println!("  Container: {}", container_name);
            println!("  Classes: {}", config.classes.len());

            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit manually.",
            path.display()
        );
        std::process::exit(1);
    }

    std::fs::write(path, config::EXAMPLE_CONFIG)?;
    println!("Created {}", path.display());
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  exam run");

    Ok(())
}

fn create_listener(
    config: &config::Config,
    junit_override: Option<PathBuf>,
    verbose: bool,
) -> MultiListener {
    let mut multi = MultiListener::new();

    // Add console listener
    multi = multi.with_listener(ConsoleListener::new(verbose));

    // Add JUnit listener if enabled
    if config.report.junit || junit_override.is_some() {
        let junit_path = junit_override.unwrap_or_else(|| config.report.junit_path());
        multi = multi.with_listener(JUnitListener::new(junit_path));
    }

    multi
}
