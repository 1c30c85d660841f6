//! Programmatic stack file creation with builder pattern

use stackup_core::config::{
    CheckSpec, ComposeConfig, ConfigSnapshot, Defaults, HealthCheck, ProbeSpec, RuleConfig,
    ServiceConfig, Severity, StackConfig, StartSpec, StopSpec, ValidationConfig,
};
use stackup_core::retry::JitterPolicy;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating test stacks
pub struct TestStackBuilder {
    env_file: Option<PathBuf>,
    compose: Option<ComposeConfig>,
    defaults: Defaults,
    rules: Vec<RuleConfig>,
    services: HashMap<String, ServiceConfig>,
}

impl TestStackBuilder {
    pub fn new() -> Self {
        Self {
            env_file: None,
            compose: None,
            defaults: Defaults::default(),
            rules: Vec::new(),
            services: HashMap::new(),
        }
    }

    pub fn with_env_file(mut self, path: &str) -> Self {
        self.env_file = Some(PathBuf::from(path));
        self
    }

    pub fn with_compose(mut self, project: &str) -> Self {
        self.compose = Some(ComposeConfig {
            file: PathBuf::from("docker-compose.yml"),
            project: project.to_string(),
        });
        self
    }

    /// Default health gate budget for every service
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.defaults.health_interval = interval;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.defaults.grace_period = grace;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.defaults.check_timeout = timeout;
        self
    }

    pub fn add_rule(mut self, rule: TestRuleBuilder) -> Self {
        self.rules.push(rule.build());
        self
    }

    pub fn add_service(mut self, name: &str, service: TestServiceBuilder) -> Self {
        self.services.insert(name.to_string(), service.build());
        self
    }

    pub fn build(self) -> StackConfig {
        StackConfig {
            env_file: self.env_file,
            state_dir: None,
            compose: self.compose,
            defaults: self.defaults,
            validation: ValidationConfig { rules: self.rules },
            services: self.services,
        }
    }

    /// Snapshot rooted at `dir` with exactly `env` as its environment
    pub fn snapshot(self, dir: &Path, env: &[(&str, &str)]) -> Arc<ConfigSnapshot> {
        let env: BTreeMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(ConfigSnapshot::from_parts(self.build(), dir.to_path_buf(), env))
    }

    /// Write the stack to `dir/stackup.yaml` and return the path
    pub fn write_to_file(self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join("stackup.yaml");
        let contents = serde_yaml::to_string(&self.build()).map_err(std::io::Error::other)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

impl Default for TestStackBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test service configurations
pub struct TestServiceBuilder {
    start: StartSpec,
    stop: StopSpec,
    healthcheck: Option<HealthCheck>,
    depends_on: Vec<String>,
    required: bool,
    port: Option<u16>,
    timeout: Option<Duration>,
}

impl TestServiceBuilder {
    pub fn new(start: StartSpec) -> Self {
        Self {
            start,
            stop: StopSpec::default(),
            healthcheck: None,
            depends_on: Vec::new(),
            required: true,
            port: None,
            timeout: None,
        }
    }

    /// A local process
    pub fn process(command: &[&str]) -> Self {
        Self::new(StartSpec::Process {
            command: command.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            environment: BTreeMap::new(),
        })
    }

    /// A long-running local process using 'sleep'
    pub fn long_running() -> Self {
        Self::process(&["sleep", "3600"])
    }

    /// A start/stop script pair
    pub fn script(run: &str, stop: Option<&str>) -> Self {
        Self::new(StartSpec::Script {
            run: run.to_string(),
            stop: stop.map(str::to_string),
        })
    }

    /// A service the scripted backend answers for; the start spec is never executed
    pub fn fake() -> Self {
        Self::script("true", None)
    }

    pub fn compose() -> Self {
        Self::new(StartSpec::Compose { service: None })
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        if let StartSpec::Process { environment, .. } = &mut self.start {
            environment.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn with_working_dir(mut self, dir: &Path) -> Self {
        if let StartSpec::Process { working_dir, .. } = &mut self.start {
            *working_dir = Some(dir.to_path_buf());
        }
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stop_signal(mut self, signal: &str) -> Self {
        self.stop.signal = signal.to_string();
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.stop.grace_period = Some(grace);
        self
    }

    pub fn with_probe(mut self, probe: ProbeSpec) -> Self {
        self.healthcheck = Some(HealthCheck {
            probe,
            interval: None,
            probe_timeout: None,
            backoff: 1.0,
            jitter: JitterPolicy::None,
        });
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        if let Some(hc) = &mut self.healthcheck {
            hc.interval = Some(interval);
        }
        self
    }

    pub fn build(self) -> ServiceConfig {
        ServiceConfig {
            start: self.start,
            stop: self.stop,
            healthcheck: self.healthcheck,
            depends_on: self.depends_on,
            required: self.required,
            port: self.port,
            timeout: self.timeout,
        }
    }
}

/// Builder for validation rules declared in the stack file
pub struct TestRuleBuilder {
    rule: RuleConfig,
}

impl TestRuleBuilder {
    pub fn new(id: &str, severity: Severity, check: CheckSpec) -> Self {
        Self {
            rule: RuleConfig {
                id: id.to_string(),
                category: None,
                severity,
                depends_on: Vec::new(),
                timeout: None,
                remediation: None,
                check,
            },
        }
    }

    /// A rule requiring `name` to be set and non-empty
    pub fn env_var(id: &str, severity: Severity, name: &str) -> Self {
        Self::new(
            id,
            severity,
            CheckSpec::EnvVar {
                name: name.to_string(),
                pattern: None,
                non_empty: true,
            },
        )
    }

    pub fn command(id: &str, severity: Severity, command: &[&str]) -> Self {
        Self::new(
            id,
            severity,
            CheckSpec::Command {
                command: command.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.rule.depends_on = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.rule.timeout = Some(timeout);
        self
    }

    pub fn with_remediation(mut self, text: &str) -> Self {
        self.rule.remediation = Some(text.to_string());
        self
    }

    pub fn build(self) -> RuleConfig {
        self.rule
    }
}
