use std::str::FromStr;
use std::time::Duration;

/// Orchestrator configuration loaded from environment variables.
///
/// Defaults match a single-host development setup; override via the
/// environment in production.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum jobs dispatched concurrently across all batches (default: `10`).
    pub max_workers: usize,
    /// Per-call timeout for `process_with_payload` in seconds (default: `300`).
    pub dispatch_timeout_secs: u64,
    /// Overall deadline for one batch fan-out in seconds (default: `3600`).
    pub batch_deadline_secs: u64,
    /// Health probe timeout in seconds (default: `5`).
    pub probe_timeout_secs: u64,
    /// Prefix under which nodes register with discovery (default: `node.`).
    pub node_name_prefix: String,
    /// Base URL of the HTTP discovery service, if any.
    pub discovery_url: Option<String>,
    /// Static `node_id=endpoint,...` list used when no discovery URL is set.
    pub node_endpoints: Option<String>,
    /// Interval between background discovery runs in seconds (default: `30`).
    pub discovery_interval_secs: u64,
    /// Root directory of uploaded input artifacts (default: `uploads`).
    /// Job sources must live below it.
    pub uploads_dir: String,
    /// Root directory for result artifacts (default: `results`).
    pub results_dir: String,
    /// How long finished batches stay in the in-memory cache (default: `3600`).
    pub finished_batch_retention_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            dispatch_timeout_secs: 300,
            batch_deadline_secs: 3600,
            probe_timeout_secs: 5,
            node_name_prefix: "node.".into(),
            discovery_url: None,
            node_endpoints: None,
            discovery_interval_secs: 30,
            uploads_dir: "uploads".into(),
            results_dir: "results".into(),
            finished_batch_retention_secs: 3600,
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default   |
    /// |---------------------------------|-----------|
    /// | `MAX_WORKERS`                   | `10`      |
    /// | `DISPATCH_TIMEOUT_SECS`         | `300`     |
    /// | `BATCH_DEADLINE_SECS`           | `3600`    |
    /// | `PROBE_TIMEOUT_SECS`            | `5`       |
    /// | `NODE_NAME_PREFIX`              | `node.`   |
    /// | `DISCOVERY_URL`                 | (none)    |
    /// | `NODE_ENDPOINTS`                | (none)    |
    /// | `DISCOVERY_INTERVAL_SECS`       | `30`      |
    /// | `UPLOADS_DIR`                   | `uploads` |
    /// | `RESULTS_DIR`                   | `results` |
    /// | `FINISHED_BATCH_RETENTION_SECS` | `3600`    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_workers: usize = parse_var("MAX_WORKERS", defaults.max_workers);
        assert!(max_workers > 0, "MAX_WORKERS must be at least 1");

        Self {
            max_workers,
            dispatch_timeout_secs: parse_var("DISPATCH_TIMEOUT_SECS", defaults.dispatch_timeout_secs),
            batch_deadline_secs: parse_var("BATCH_DEADLINE_SECS", defaults.batch_deadline_secs),
            probe_timeout_secs: parse_var("PROBE_TIMEOUT_SECS", defaults.probe_timeout_secs),
            node_name_prefix: std::env::var("NODE_NAME_PREFIX")
                .unwrap_or(defaults.node_name_prefix),
            discovery_url: optional_var("DISCOVERY_URL"),
            node_endpoints: optional_var("NODE_ENDPOINTS"),
            discovery_interval_secs: parse_var(
                "DISCOVERY_INTERVAL_SECS",
                defaults.discovery_interval_secs,
            ),
            uploads_dir: std::env::var("UPLOADS_DIR").unwrap_or(defaults.uploads_dir),
            results_dir: std::env::var("RESULTS_DIR").unwrap_or(defaults.results_dir),
            finished_batch_retention_secs: parse_var(
                "FINISHED_BATCH_RETENTION_SECS",
                defaults.finished_batch_retention_secs,
            ),
        }
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn finished_batch_retention(&self) -> Duration {
        Duration::from_secs(self.finished_batch_retention_secs)
    }
}

/// Parse `name` from the environment, falling back to `default` when unset.
/// Panics on a malformed value so misconfiguration fails at startup.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
