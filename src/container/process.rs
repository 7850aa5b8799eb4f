//! Process container implementation.
//!
//! This container runs every test as a shell command on the local machine.
//! Each start gets its own working directory (a fresh temporary directory
//! unless one is configured) in which the optional setup command runs and
//! probe manifests are written.
//!
//! # Characteristics
//!
//! | Feature | Support |
//! |---------|---------|
//! | Isolation | Per start: fresh working directory |
//! | Test bodies | Shell command template |
//! | Arguments | JSON array in `EXAM_ARGS` |
//! | Timeouts | Per command (`call_timeout_secs`) |
//!
//! # Exit codes
//!
//! | Exit code | Reported as |
//! |-----------|-------------|
//! | 0 | Passed |
//! | 77 | Assumption failure |
//! | other | Assertion failure carrying stderr |
//! | killed by signal | Error |
//!
//! # Example Configuration
//!
//! ```toml
//! [container]
//! type = "process"
//! shell = "/bin/sh"
//! command = "./run-test.sh {class} {method}"
//! setup_command = "cp -r ~/fixtures ."
//! call_timeout_secs = 60
//!
//! [container.env]
//! LOG_LEVEL = "debug"
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    ContainerError, ContainerResult, ProbeHandle, ProbeState, RemoteFailure, TestContainer,
    TestContainerFactory,
};
use crate::address::TestAddress;
use crate::config::ProcessContainerConfig;
use crate::options::ExamOptions;
use crate::probe::ProbeManifest;

/// Container name used when no framework option is given.
pub const DEFAULT_CONTAINER_NAME: &str = "process";

/// Exit code a test command uses to report a failed assumption.
pub const ASSUMPTION_EXIT_CODE: i32 = 77;

/// Factory for [`ProcessTestContainer`]s.
pub struct ProcessContainerFactory {
    config: ProcessContainerConfig,
}

impl ProcessContainerFactory {
    /// Creates a factory from the `[container]` configuration.
    pub fn new(config: ProcessContainerConfig) -> Self {
        Self { config }
    }
}

impl TestContainerFactory for ProcessContainerFactory {
    type Container = ProcessTestContainer;

    fn create(&self, options: &ExamOptions) -> ContainerResult<Vec<ProcessTestContainer>> {
        if self.config.command.trim().is_empty() {
            return Err(ContainerError::Configuration(
                "process container needs a command template".to_string(),
            ));
        }

        let frameworks = options.frameworks();
        let names: Vec<&str> = if frameworks.is_empty() {
            vec![DEFAULT_CONTAINER_NAME]
        } else {
            frameworks
        };

        let mut env: Vec<(String, String)> = self
            .config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(options.environment());

        let vm_args = options.vm_args();
        if !vm_args.is_empty() {
            env.push(("EXAM_VM_ARGS".to_string(), shell_words::join(vm_args)));
        }
        let bundles = options.bundles();
        if !bundles.is_empty() {
            env.push(("EXAM_BUNDLES".to_string(), bundles.join(",")));
        }

        let working_dir = options
            .working_directory()
            .map(Path::to_path_buf)
            .or_else(|| self.config.working_dir.clone());

        Ok(names
            .into_iter()
            .map(|name| {
                let mut env = env.clone();
                env.push(("EXAM_CONTAINER".to_string(), name.to_string()));
                ProcessTestContainer {
                    name: name.to_string(),
                    config: self.config.clone(),
                    env,
                    working_dir: working_dir.clone(),
                    run: None,
                }
            })
            .collect())
    }
}

struct InstalledProbe {
    handle: ProbeHandle,
    manifest: ProbeManifest,
}

struct ProcessRun {
    workdir: PathBuf,
    // Removed from disk when the run is dropped.
    _tempdir: Option<tempfile::TempDir>,
    probes: Vec<InstalledProbe>,
    next_handle: u64,
}

/// A container that runs each test as a child process.
pub struct ProcessTestContainer {
    name: String,
    config: ProcessContainerConfig,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    run: Option<ProcessRun>,
}

impl ProcessTestContainer {
    /// Working directory of the current run, if started.
    pub fn working_dir(&self) -> Option<&Path> {
        self.run.as_ref().map(|r| r.workdir.as_path())
    }

    /// Returns `true` while the container is started.
    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    fn run(&self) -> ContainerResult<&ProcessRun> {
        self.run
            .as_ref()
            .ok_or_else(|| ContainerError::NotStarted(self.name.clone()))
    }

    /// Expands `{class}`, `{method}` and `{container}` with shell quoting.
    fn expand(&self, class: &str, method: &str) -> String {
        self.config
            .command
            .replace("{class}", &shell_words::quote(class))
            .replace("{method}", &shell_words::quote(method))
            .replace("{container}", &shell_words::quote(&self.name))
    }

    async fn run_shell(
        &self,
        command: &str,
        workdir: &Path,
        extra_env: &[(&str, String)],
    ) -> ContainerResult<std::process::Output> {
        let mut process = tokio::process::Command::new(&self.config.shell);
        process.arg("-c").arg(command);
        process.current_dir(workdir);

        for (key, value) in &self.env {
            process.env(key, value);
        }
        for (key, value) in extra_env {
            process.env(key, value);
        }

        process.stdin(Stdio::null());
        process.stdout(Stdio::piped());
        process.stderr(Stdio::piped());
        process.kill_on_drop(true);

        let timeout = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(timeout, process.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(ContainerError::Timeout(format!(
                "`{}` in {} did not finish within {:?}",
                command, self.name, timeout
            ))),
        }
    }
}

fn stderr_summary(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match output.status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        })
}

/// Maps a finished test command to its outcome.
fn command_outcome(output: &std::process::Output) -> Result<(), RemoteFailure> {
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    match output.status.code() {
        Some(0) => Ok(()),
        Some(ASSUMPTION_EXIT_CODE) => Err(RemoteFailure::assumption(stderr_summary(output))),
        Some(_) => Err(RemoteFailure::assertion(stderr_summary(output)).with_trace(stderr)),
        None => Err(RemoteFailure::error("signal", stderr_summary(output)).with_trace(stderr)),
    }
}

fn artifact_file_name(location: &str, handle: ProbeHandle) -> String {
    let stem: String = location
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}-{}.json", stem, handle.0)
}

#[async_trait]
impl TestContainer for ProcessTestContainer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> ContainerResult<()> {
        if self.run.is_some() {
            debug!("Process container {} already started", self.name);
            return Ok(());
        }

        let (workdir, tempdir) = match &self.working_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                (dir.clone(), None)
            }
            None => {
                let tempdir = tempfile::Builder::new()
                    .prefix(&format!("exam-{}-", self.name))
                    .tempdir()?;
                (tempdir.path().to_path_buf(), Some(tempdir))
            }
        };

        if let Some(setup) = &self.config.setup_command {
            let output = self.run_shell(setup, &workdir, &[]).await?;
            if !output.status.success() {
                return Err(ContainerError::StartFailed {
                    container: self.name.clone(),
                    message: format!("setup command failed: {}", stderr_summary(&output)),
                });
            }
        }

        info!(
            "Started process container {} in {}",
            self.name,
            workdir.display()
        );
        self.run = Some(ProcessRun {
            workdir,
            _tempdir: tempdir,
            probes: Vec::new(),
            next_handle: 1,
        });
        Ok(())
    }

    async fn install(&mut self, location: &str, artifact: &[u8]) -> ContainerResult<ProbeHandle> {
        let name = self.name.clone();
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| ContainerError::NotStarted(name.clone()))?;

        let manifest =
            ProbeManifest::from_bytes(artifact).map_err(|e| ContainerError::InstallFailed {
                container: name.clone(),
                message: format!("{}: {}", location, e),
            })?;

        let handle = ProbeHandle(run.next_handle);
        run.next_handle += 1;

        let path = run.workdir.join(artifact_file_name(location, handle));
        tokio::fs::write(&path, artifact)
            .await
            .map_err(|e| ContainerError::InstallFailed {
                container: name,
                message: format!("writing {}: {}", path.display(), e),
            })?;

        run.probes.push(InstalledProbe { handle, manifest });
        debug!("Installed {} into {} as {:?}", location, self.name, handle);
        Ok(handle)
    }

    async fn call(&self, address: &TestAddress) -> ContainerResult<()> {
        let run = self.run()?;
        let instruction = run
            .probes
            .iter()
            .find_map(|p| p.manifest.instruction(address.root()))
            .ok_or_else(|| ContainerError::UnknownTest(address.caption().to_string()))?;

        let command = self.expand(&instruction.class, &instruction.method);
        let arguments = serde_json::to_string(address.arguments())
            .map_err(|e| ContainerError::Configuration(format!("arguments: {}", e)))?;
        let extra_env = [
            ("EXAM_ARGS", arguments),
            ("EXAM_TEST_ID", address.root().to_string()),
        ];

        debug!("Running `{}` in {}", command, self.name);
        let output = self.run_shell(&command, &run.workdir, &extra_env).await?;

        command_outcome(&output).map_err(|failure| {
            ContainerError::TestFailed(failure).wrap(format!(
                "invoking {}.{} in {}",
                instruction.class, instruction.method, self.name
            ))
        })
    }

    async fn wait_for_state(
        &self,
        handle: ProbeHandle,
        state: ProbeState,
        _timeout: Duration,
    ) -> ContainerResult<()> {
        let run = self.run()?;
        if !run.probes.iter().any(|p| p.handle == handle) {
            return Err(ContainerError::Configuration(format!(
                "unknown probe {:?} in {}",
                handle, self.name
            )));
        }

        // Written manifests are usable at once.
        if state == ProbeState::Active {
            Ok(())
        } else {
            Err(ContainerError::Timeout(format!(
                "probe {:?} in {} is Active, expected {:?}",
                handle, self.name, state
            )))
        }
    }

    async fn stop(&mut self) -> ContainerResult<()> {
        let Some(run) = self.run.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if let Some(teardown) = &self.config.teardown_command {
            match self.run_shell(teardown, &run.workdir, &[]).await {
                Ok(output) if output.status.success() => {}
                Ok(output) => {
                    warn!(
                        "Teardown command of {} failed: {}",
                        self.name,
                        stderr_summary(&output)
                    );
                    result = Err(ContainerError::Other(anyhow::anyhow!(
                        "teardown command failed: {}",
                        stderr_summary(&output)
                    )));
                }
                Err(e) => result = Err(e),
            }
        }

        info!("Stopped process container {}", self.name);
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::options::ExamOption;
    use crate::probe::TestProbeBuilder;

    const SCRIPT: &str = r#"case {method} in
  pass) exit 0 ;;
  skip) echo "not on this platform" >&2; exit 77 ;;
  args) test "$EXAM_ARGS" = '[42]' ;;
  env) test "$EXAM_CONTAINER" = {container} && test "$GREETING" = hi ;;
  marker) test -f started ;;
  slow) sleep 5 ;;
  *) echo "broken {class}" >&2; exit 1 ;;
esac"#;

    fn config() -> ProcessContainerConfig {
        ProcessContainerConfig {
            command: SCRIPT.to_string(),
            env: HashMap::from([("GREETING".to_string(), "hi".to_string())]),
            setup_command: Some("touch started".to_string()),
            call_timeout_secs: 1,
            ..Default::default()
        }
    }

    async fn started(methods: &[&str]) -> (ProcessTestContainer, Vec<TestAddress>) {
        let factory = ProcessContainerFactory::new(config());
        let mut container = factory.create(&ExamOptions::new()).unwrap().remove(0);

        let mut builder = TestProbeBuilder::new("probe");
        let addresses = builder.add_tests("Sample", methods);
        let provider = builder.build();

        container.start().await.unwrap();
        let handle = container
            .install("probe", provider.stream().unwrap())
            .await
            .unwrap();
        container
            .wait_for_state(handle, ProbeState::Active, Duration::from_secs(1))
            .await
            .unwrap();
        (container, addresses)
    }

    #[test]
    fn test_factory_requires_command() {
        let factory = ProcessContainerFactory::new(ProcessContainerConfig::default());
        assert!(matches!(
            factory.create(&ExamOptions::new()),
            Err(ContainerError::Configuration(_))
        ));
    }

    #[test]
    fn test_template_is_quoted() {
        let factory = ProcessContainerFactory::new(ProcessContainerConfig {
            command: "run {class} {method} {container}".to_string(),
            ..Default::default()
        });
        let options = ExamOptions::new().with(ExamOption::Framework {
            name: "felix".into(),
        });
        let container = factory.create(&options).unwrap().remove(0);

        assert_eq!(
            container.expand("My Class", "it's"),
            r#"run 'My Class' 'it'\''s' felix"#
        );
    }

    #[tokio::test]
    async fn test_exit_codes_map_to_outcomes() {
        let (container, addresses) = started(&["pass", "skip", "broken"]).await;

        container.call(&addresses[0]).await.unwrap();

        let failure = container.call(&addresses[1]).await.unwrap_err().to_failure();
        assert_eq!(failure.kind, crate::listener::FailureKind::Assumption);
        assert_eq!(failure.message, "not on this platform");

        let failure = container.call(&addresses[2]).await.unwrap_err().to_failure();
        assert_eq!(failure.kind, crate::listener::FailureKind::Assertion);
        assert_eq!(failure.message, "broken Sample");
    }

    #[tokio::test]
    async fn test_arguments_and_environment() {
        let (container, addresses) = started(&["args", "env", "marker"]).await;

        container
            .call(&addresses[0].parameterized(vec![json!(42)]))
            .await
            .unwrap();
        assert!(container.call(&addresses[0]).await.is_err());
        container.call(&addresses[1]).await.unwrap();
        container.call(&addresses[2]).await.unwrap();
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let (container, addresses) = started(&["slow"]).await;
        let err = container.call(&addresses[0]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_stop_removes_temporary_workdir() {
        let (mut container, addresses) = started(&["pass"]).await;
        let workdir = container.working_dir().unwrap().to_path_buf();
        assert!(workdir.join("started").exists());

        container.stop().await.unwrap();
        container.stop().await.unwrap();
        assert!(!workdir.exists());
        assert!(matches!(
            container.call(&addresses[0]).await.unwrap_err(),
            ContainerError::NotStarted(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_setup_fails_start() {
        let factory = ProcessContainerFactory::new(ProcessContainerConfig {
            setup_command: Some("echo nope >&2; exit 3".to_string()),
            ..config()
        });
        let mut container = factory.create(&ExamOptions::new()).unwrap().remove(0);

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::StartFailed { .. }));
        assert!(!container.is_running());
    }
}
