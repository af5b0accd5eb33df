//! Integration tests for Chartpilot

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Isolated config, cache and state directories for one test
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let sandbox = Self {
                dir: TempDir::new().unwrap(),
            };
            let config = format!(
                concat!(
                    "[general]\nwrite_report = false\n\n",
                    "[cache]\ndir = {:?}\n\n",
                    "[monitor]\ninterval_secs = 1\n",
                    "probe_timeout_secs = 1\nlatency_ceiling_ms = 500\n",
                ),
                sandbox.path().join("cache")
            );
            std::fs::write(sandbox.config_path(), config).unwrap();
            sandbox
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn config_path(&self) -> PathBuf {
            self.path().join("config.toml")
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("chartpilot");
            cmd.env("CHARTPILOT_CONFIG", self.config_path())
                .env("XDG_STATE_HOME", self.path().join("state"))
                .env("CI", "1")
                .env_remove("RUST_LOG");
            cmd
        }

        fn plan(&self, command: &[&str]) -> PathBuf {
            let command = command
                .iter()
                .map(|t| format!("{:?}", t))
                .collect::<Vec<_>>()
                .join(", ");
            let plan = format!(
                r#"
environment = "staging"
image_prefix = "registry.example.com/shop"
tag_base = "2024.06"
command = [{command}]

[[groups]]
name = "data"

[[groups.charts]]
name = "orders"
version = "1.4.2"
namespace = "shop"
dependencies = ["postgres-primary"]

[[groups]]
name = "web"

[[groups.charts]]
name = "ui"
version = "1.2.0"
namespace = "web"

[[groups.charts]]
name = "api"
version = "3.0.1"
namespace = "web"
"#
            );
            let path = self.path().join("plan.toml");
            std::fs::write(&path, plan).unwrap();
            path
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("chartpilot")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("chart deployment orchestrator"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("chartpilot")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("chartpilot"));
    }

    #[test]
    fn config_path() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("max_concurrency = 5"));
    }

    #[test]
    fn config_init_writes_defaults() {
        let sandbox = Sandbox::new();
        let target = sandbox.path().join("fresh").join("config.toml");

        sandbox
            .cmd()
            .env("CHARTPILOT_CONFIG", &target)
            .args(["config", "init"])
            .assert()
            .success();

        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.contains("[monitor]"));
    }

    #[test]
    fn missing_explicit_config_fails_with_hint() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .env("CHARTPILOT_CONFIG", sandbox.path().join("nope.toml"))
            .args(["cache", "stats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"))
            .stderr(predicate::str::contains("chartpilot config init"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let sandbox = Sandbox::new();
        std::fs::write(sandbox.config_path(), "[deploy]\nmax_concurrency = 0\n").unwrap();

        sandbox
            .cmd()
            .args(["cache", "stats"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("max_concurrency"));
    }

    #[test]
    fn cache_stats_empty() {
        let sandbox = Sandbox::new();
        sandbox
            .cmd()
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"total_entries\": 0"));
    }

    #[test]
    fn invalid_plan_is_rejected() {
        let sandbox = Sandbox::new();
        let plan = sandbox.path().join("plan.toml");
        std::fs::write(&plan, "environment = \"dev\"\n").unwrap();

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid deployment plan"));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["true"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--group", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no group named missing"));
    }

    #[cfg(unix)]
    #[test]
    fn deploy_runs_every_group() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["true", "{release}"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("data orders success"))
            .stdout(predicate::str::contains("web ui success"))
            .stdout(predicate::str::contains("web api success"));
    }

    #[cfg(unix)]
    #[test]
    fn second_deploy_is_served_from_cache() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["true"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"cached\": true").not());

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"cached\": true"));

        sandbox
            .cmd()
            .args(["cache", "stats", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("total=3"));
    }

    #[cfg(unix)]
    #[test]
    fn failing_group_stops_the_run() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["sh", "-c", "echo release {release} broke >&2; exit 3"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--format", "plain"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("data orders failed"))
            .stdout(predicate::str::contains("web ui").not())
            .stderr(predicate::str::contains("1 chart(s) failed to deploy"));
    }

    #[cfg(unix)]
    #[test]
    fn keep_going_runs_later_groups() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["sh", "-c", "exit 1"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--keep-going", "--format", "plain"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("web api failed"))
            .stderr(predicate::str::contains("3 chart(s) failed to deploy"));
    }

    #[cfg(unix)]
    #[test]
    fn group_timeout_cancels_charts() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["sleep", "30"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--no-monitor", "--timeout", "1", "--format", "plain"])
            .timeout(std::time::Duration::from_secs(20))
            .assert()
            .failure()
            .stdout(predicate::str::contains("data orders failed"))
            .stderr(predicate::str::contains("Deployment group data timed out after 1s"));
    }

    #[cfg(unix)]
    #[test]
    fn deploy_with_monitoring_reports_insights() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["true"]);

        sandbox
            .cmd()
            .arg("deploy")
            .arg(&plan)
            .args(["--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"deployment_id\""))
            .stdout(predicate::str::contains("\"insights\""));
    }

    #[test]
    fn deps_check_without_endpoints_is_unknown() {
        let sandbox = Sandbox::new();
        let plan = sandbox.plan(&["true"]);

        sandbox
            .cmd()
            .args(["deps", "check"])
            .arg(&plan)
            .args(["--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("postgres-primary unknown"));
    }

    #[test]
    fn deploy_help() {
        cargo_bin_cmd!("chartpilot")
            .args(["deploy", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--dry-run"))
            .stdout(predicate::str::contains("--keep-going"));
    }
}
