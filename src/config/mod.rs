//! Process configuration.
//!
//! Both node kinds are configured from command-line flags. Every flag falls back to a
//! `REPLIKV_*` environment variable and then to a default, so a container can be driven
//! purely by environment.
//!
//! ```text
//! replicated-kv storage   --bind 0.0.0.0:5000 --name db-1 --discovery http://disc:7000 --data-dir ./data
//! replicated-kv discovery --bind 0.0.0.0:7000 --health-check-interval-ms 5000
//! ```

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(test)]
mod tests;

pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

pub const CHANGES_FILE_NAME: &str = "changes.log";
pub const LAST_CHANGE_ID_FILE_NAME: &str = "last-change-id";

/// Where the change log keeps its two files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeLogSettings {
    pub changes_file: PathBuf,
    pub last_change_id_file: PathBuf,
}

impl ChangeLogSettings {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            changes_file: dir.join(CHANGES_FILE_NAME),
            last_change_id_file: dir.join(LAST_CHANGE_ID_FILE_NAME),
        }
    }
}

/// Backoff applied by a recovery task when a replica keeps rejecting a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive rejections after which the replica is dropped from the replica set.
    pub max_attempts: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            max_attempts: 20,
        }
    }
}

impl RecoveryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling up to `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Identity a storage node registers under. Its address becomes `http://{name}:{port}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub name: String,
    pub bind: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNodeSettings {
    pub service: ServiceSettings,
    /// Base URL of the discovery service, e.g. `http://127.0.0.1:7000`.
    pub discovery_address: String,
    pub change_log: ChangeLogSettings,
    pub rpc_timeout: Duration,
    pub recovery: RecoveryPolicy,
    pub expiry_sweep_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryNodeSettings {
    pub bind: SocketAddr,
    pub health_check_interval: Duration,
    pub rpc_timeout: Duration,
}

impl Default for DiscoveryNodeSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 7000)),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Storage(StorageNodeSettings),
    Discovery(DiscoveryNodeSettings),
}

/// Parses `args` (including the program name) using the process environment as fallback.
pub fn from_args(args: &[String]) -> Result<Command> {
    parse(args, |key| std::env::var(key).ok())
}

pub fn usage(program: &str) -> String {
    format!(
        "Usage:\n  {program} storage [--bind <addr:port>] [--name <host>] [--discovery <url>] [--data-dir <dir>]\n                    [--rpc-timeout-ms <ms>] [--recovery-max-attempts <n>]\n  {program} discovery [--bind <addr:port>] [--health-check-interval-ms <ms>] [--rpc-timeout-ms <ms>]"
    )
}

/// Parses `args` with an injectable environment lookup.
pub fn parse<F>(args: &[String], env: F) -> Result<Command>
where
    F: Fn(&str) -> Option<String>,
{
    let program = args.first().map(String::as_str).unwrap_or("replicated-kv");
    let Some(mode) = args.get(1) else {
        bail!("missing mode\n{}", usage(program));
    };

    let mut flags: HashMap<String, String> = HashMap::new();
    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        let Some(name) = flag.strip_prefix("--") else {
            bail!("unexpected argument '{}'\n{}", flag, usage(program));
        };
        let value = args
            .get(i + 1)
            .with_context(|| format!("flag --{} requires a value", name))?;
        flags.insert(name.to_string(), value.clone());
        i += 2;
    }

    let lookup = |flag: &str, env_key: &str| flags.get(flag).cloned().or_else(|| env(env_key));

    let rpc_timeout = match lookup("rpc-timeout-ms", "REPLIKV_RPC_TIMEOUT_MS") {
        Some(ms) => Duration::from_millis(ms.parse().context("invalid --rpc-timeout-ms")?),
        None => DEFAULT_RPC_TIMEOUT,
    };

    match mode.as_str() {
        "storage" => {
            let bind: SocketAddr = lookup("bind", "REPLIKV_BIND")
                .unwrap_or_else(|| "0.0.0.0:5000".to_string())
                .parse()
                .context("invalid --bind")?;
            let name = lookup("name", "REPLIKV_NAME").unwrap_or_else(|| "127.0.0.1".to_string());
            let discovery_address = lookup("discovery", "REPLIKV_DISCOVERY_ADDRESS")
                .unwrap_or_else(|| "http://127.0.0.1:7000".to_string())
                .trim_end_matches('/')
                .to_string();
            let data_dir =
                lookup("data-dir", "REPLIKV_DATA_DIR").unwrap_or_else(|| "./data".to_string());

            let mut recovery = RecoveryPolicy::default();
            if let Some(attempts) = lookup("recovery-max-attempts", "REPLIKV_RECOVERY_MAX_ATTEMPTS")
            {
                recovery.max_attempts = attempts
                    .parse()
                    .context("invalid --recovery-max-attempts")?;
            }

            Ok(Command::Storage(StorageNodeSettings {
                service: ServiceSettings { name, bind },
                discovery_address,
                change_log: ChangeLogSettings::in_dir(data_dir),
                rpc_timeout,
                recovery,
                expiry_sweep_interval: DEFAULT_EXPIRY_SWEEP_INTERVAL,
            }))
        }
        "discovery" => {
            let bind: SocketAddr = lookup("bind", "REPLIKV_BIND")
                .unwrap_or_else(|| "0.0.0.0:7000".to_string())
                .parse()
                .context("invalid --bind")?;
            let health_check_interval = match lookup(
                "health-check-interval-ms",
                "REPLIKV_HEALTH_CHECK_INTERVAL_MS",
            ) {
                Some(ms) => Duration::from_millis(
                    ms.parse().context("invalid --health-check-interval-ms")?,
                ),
                None => DEFAULT_HEALTH_CHECK_INTERVAL,
            };

            Ok(Command::Discovery(DiscoveryNodeSettings {
                bind,
                health_check_interval,
                rpc_timeout,
            }))
        }
        other => bail!("unknown mode '{}'\n{}", other, usage(program)),
    }
}
