//! Configuration Tests
//!
//! ## Test Scopes
//! - **Parsing**: Flags, environment fallback and precedence, rejected command lines.
//! - **Backoff**: Recovery delays double and stop at the cap.

#[cfg(test)]
mod tests {
    use crate::config::{
        CHANGES_FILE_NAME, Command, DEFAULT_RPC_TIMEOUT, DiscoveryNodeSettings, RecoveryPolicy,
        parse,
    };
    use std::path::PathBuf;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_storage_flags_override_defaults() {
        let cmd = parse(
            &args(&[
                "replicated-kv",
                "storage",
                "--bind",
                "127.0.0.1:5001",
                "--name",
                "db-1",
                "--discovery",
                "http://disc:7000/",
                "--data-dir",
                "/tmp/node1",
            ]),
            |_| None,
        )
        .unwrap();

        let Command::Storage(settings) = cmd else {
            panic!("expected storage settings");
        };
        assert_eq!(settings.service.name, "db-1");
        assert_eq!(settings.service.bind.port(), 5001);
        assert_eq!(settings.discovery_address, "http://disc:7000");
        assert_eq!(
            settings.change_log.changes_file,
            PathBuf::from("/tmp/node1").join(CHANGES_FILE_NAME)
        );
        assert_eq!(settings.rpc_timeout, DEFAULT_RPC_TIMEOUT);
    }

    #[test]
    fn test_environment_fallback() {
        let cmd = parse(&args(&["replicated-kv", "discovery"]), |key| match key {
            "REPLIKV_BIND" => Some("127.0.0.1:7100".to_string()),
            "REPLIKV_HEALTH_CHECK_INTERVAL_MS" => Some("250".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            cmd,
            Command::Discovery(DiscoveryNodeSettings {
                bind: "127.0.0.1:7100".parse().unwrap(),
                health_check_interval: Duration::from_millis(250),
                rpc_timeout: DEFAULT_RPC_TIMEOUT,
            })
        );
    }

    #[test]
    fn test_flag_wins_over_environment() {
        let cmd = parse(
            &args(&["replicated-kv", "storage", "--name", "from-flag"]),
            |key| (key == "REPLIKV_NAME").then(|| "from-env".to_string()),
        )
        .unwrap();

        let Command::Storage(settings) = cmd else {
            panic!("expected storage settings");
        };
        assert_eq!(settings.service.name, "from-flag");
    }

    #[test]
    fn test_rejects_unknown_mode_and_dangling_flag() {
        assert!(parse(&args(&["replicated-kv", "gateway"]), |_| None).is_err());
        assert!(parse(&args(&["replicated-kv"]), |_| None).is_err());
        assert!(parse(&args(&["replicated-kv", "storage", "--bind"]), |_| None).is_err());
    }

    #[test]
    fn test_recovery_backoff_doubles_and_caps() {
        let policy = RecoveryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
            max_attempts: 5,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(700));
        assert_eq!(policy.backoff(40), Duration::from_millis(700));
    }
}
