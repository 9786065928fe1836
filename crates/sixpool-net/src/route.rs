//! Kernel route and ndppd configuration reconciler.
//!
//! Two side effects must track the current prefix: a local kernel route
//! (`ip route replace local <prefix>::/64 dev <iface>`) and an ndppd
//! configuration file with a `proxy <iface>` block carrying a
//! `rule <prefix>::/64 { static }` entry. Both are reconciled idempotently
//! by [`RouteEffector::run`].
//!
//! Every privileged invocation goes through the [`CommandRunner`] seam.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{NetError, NetResult};
use crate::prefix::PrefixInfo;

/// Default ndppd configuration path.
pub const DEFAULT_NDPPD_CONF: &str = "/etc/ndppd.conf";

/// How long to wait after restarting ndppd before trusting it.
pub const DEFAULT_RESTART_GRACE: Duration = Duration::from_secs(5);

/// Seam for privileged process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args..` with elevated privileges, succeeding only on
    /// exit status zero.
    async fn run_privileged(&self, program: &str, args: &[&str]) -> NetResult<()>;
}

/// Privileged runner for real hosts.
///
/// Runs commands directly when already root. Otherwise wraps them in
/// `sudo`, piping `SUDOPASS` on stdin (`sudo -S`) when the variable is
/// set, and relying on ambient sudo credentials when it is not.
pub struct SudoCommandRunner;

#[async_trait]
impl CommandRunner for SudoCommandRunner {
    async fn run_privileged(&self, program: &str, args: &[&str]) -> NetResult<()> {
        let command_display = format!("{program} {}", args.join(" "));
        let sudopass = std::env::var("SUDOPASS").ok();

        let mut cmd = if nix::unistd::geteuid().is_root() {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        } else {
            let mut cmd = Command::new("sudo");
            if sudopass.is_some() {
                cmd.arg("-S");
            }
            cmd.arg(program).args(args);
            cmd
        };

        let piping_pass = sudopass.is_some() && !nix::unistd::geteuid().is_root();
        cmd.stdin(if piping_pass {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        debug!(command = %command_display, "running privileged command");

        let mut child = cmd.spawn().map_err(|e| NetError::Spawn {
            command: command_display.clone(),
            source: e,
        })?;

        if piping_pass {
            if let (Some(mut stdin), Some(pass)) = (child.stdin.take(), sudopass) {
                use tokio::io::AsyncWriteExt;
                let _ = stdin.write_all(format!("{pass}\n").as_bytes()).await;
            }
        }

        let output = child.wait_with_output().await.map_err(|e| NetError::Spawn {
            command: command_display.clone(),
            source: e,
        })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(NetError::command_failed(
                command_display,
                output.status.code().unwrap_or(-1),
                stderr,
            ))
        }
    }
}

/// Idempotent reconciler for the route and proxy config of one prefix.
pub struct RouteEffector {
    interface: String,
    prefix: String,
    ndppd_conf: PathBuf,
    grace: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl RouteEffector {
    pub fn new(info: &PrefixInfo) -> Self {
        Self {
            interface: info.interface.clone(),
            prefix: info.prefix.clone(),
            ndppd_conf: PathBuf::from(DEFAULT_NDPPD_CONF),
            grace: DEFAULT_RESTART_GRACE,
            runner: Arc::new(SudoCommandRunner),
        }
    }

    pub fn with_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.ndppd_conf = path.into();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Install the local route. `replace` semantics keep this idempotent:
    /// re-running never fails on an existing route.
    pub async fn add_route(&self) -> NetResult<()> {
        let dest = format!("{}::/64", self.prefix);
        self.runner
            .run_privileged(
                "ip",
                &["route", "replace", "local", &dest, "dev", &self.interface],
            )
            .await
    }

    /// Remove the local route.
    pub async fn del_route(&self) -> NetResult<()> {
        let dest = format!("{}::/64", self.prefix);
        self.runner
            .run_privileged("ip", &["route", "del", "local", &dest, "dev", &self.interface])
            .await
    }

    /// Textual check that the config file already declares our proxy
    /// interface and prefix rule. A missing file is simply not current.
    pub fn is_config_current(&self) -> bool {
        let Ok(content) = std::fs::read_to_string(&self.ndppd_conf) else {
            debug!(path = %self.ndppd_conf.display(), "ndppd config not readable");
            return false;
        };

        let proxy_re = regex::Regex::new(&format!(
            r"proxy\s+{}",
            regex::escape(&self.interface)
        ))
        .expect("static pattern");
        let rule_re = regex::Regex::new(&format!(
            r"rule\s+{}::/64",
            regex::escape(&self.prefix)
        ))
        .expect("static pattern");

        proxy_re.is_match(&content) && rule_re.is_match(&content)
    }

    /// Canonical config content for the current interface and prefix.
    fn render_config(&self) -> String {
        format!(
            concat!(
                "route-ttl 30000\n",
                "proxy {iface} {{\n",
                "    router no\n",
                "    timeout 500\n",
                "    ttl 30000\n",
                "    rule {prefix}::/64 {{\n",
                "        static\n",
                "    }}\n",
                "}}\n",
            ),
            iface = self.interface,
            prefix = self.prefix
        )
    }

    /// Replace the config file with the canonical template.
    ///
    /// The content is staged in an unprivileged temp file, copied next to
    /// the target with privileges, then renamed into place so the final
    /// replacement is atomic on the config's filesystem.
    pub async fn rewrite_config(&self) -> NetResult<()> {
        let staged = tempfile::NamedTempFile::new()?;
        std::fs::write(staged.path(), self.render_config())?;

        let staged_path = staged.path().to_string_lossy().to_string();
        let target = self.ndppd_conf.to_string_lossy().to_string();
        let target_tmp = format!("{target}.tmp");

        self.runner
            .run_privileged("cp", &[&staged_path, &target_tmp])
            .await?;
        self.runner
            .run_privileged("mv", &[&target_tmp, &target])
            .await?;

        info!(path = %self.ndppd_conf.display(), "rewrote ndppd config");
        Ok(())
    }

    /// Restart the neighbor-discovery proxy daemon.
    pub async fn restart_proxy_daemon(&self) -> NetResult<()> {
        self.runner
            .run_privileged("systemctl", &["restart", "ndppd"])
            .await
    }

    /// Reconcile route and config.
    ///
    /// Always installs the route. When the config already matches, the
    /// daemon is left alone unless `force_restart` is set. Any restart is
    /// followed by a grace sleep so ndppd is answering solicitations
    /// before callers resume probing.
    pub async fn run(&self, force_restart: bool) -> NetResult<()> {
        self.add_route().await?;

        if self.is_config_current() {
            if force_restart {
                info!("ndppd config current, forcing restart");
                self.restart_proxy_daemon().await?;
                tokio::time::sleep(self.grace).await;
            } else {
                info!("ndppd config current, skipping restart");
            }
            return Ok(());
        }

        info!("ndppd config stale, rewriting and restarting");
        self.rewrite_config().await?;
        self.restart_proxy_daemon().await?;
        tokio::time::sleep(self.grace).await;
        Ok(())
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn conf_path(&self) -> &Path {
        &self.ndppd_conf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations and emulates `cp`/`mv` so config flows can be
    /// exercised without privileges.
    struct StubRunner {
        calls: Mutex<Vec<String>>,
    }

    impl StubRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for StubRunner {
        async fn run_privileged(&self, program: &str, args: &[&str]) -> NetResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{program} {}", args.join(" ")));
            match program {
                "cp" => {
                    std::fs::copy(args[0], args[1])?;
                }
                "mv" => {
                    std::fs::rename(args[0], args[1])?;
                }
                _ => {}
            }
            Ok(())
        }
    }

    fn effector(runner: Arc<StubRunner>, conf: &Path) -> RouteEffector {
        let info = PrefixInfo {
            interface: "eth0".into(),
            prefix: "2001:db8:1:2".into(),
            prefix_bits: 64,
        };
        RouteEffector::new(&info)
            .with_conf(conf)
            .with_grace(Duration::from_millis(0))
            .with_runner(runner)
    }

    #[tokio::test]
    async fn test_add_route_uses_replace() {
        let runner = StubRunner::new();
        let dir = tempfile::TempDir::new().unwrap();
        let effector = effector(runner.clone(), &dir.path().join("ndppd.conf"));

        effector.add_route().await.unwrap();
        effector.add_route().await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        // Same command both times; `replace` keeps the second run from failing.
        assert_eq!(calls[0], "ip route replace local 2001:db8:1:2::/64 dev eth0");
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_run_rewrites_when_config_missing() {
        let runner = StubRunner::new();
        let dir = tempfile::TempDir::new().unwrap();
        let conf = dir.path().join("ndppd.conf");
        let effector = effector(runner.clone(), &conf);

        effector.run(false).await.unwrap();

        let content = std::fs::read_to_string(&conf).unwrap();
        assert!(content.contains("proxy eth0 {"));
        assert!(content.contains("rule 2001:db8:1:2::/64 {"));
        assert!(content.contains("static"));
        assert!(effector.is_config_current());

        let calls = runner.calls();
        assert!(calls.iter().any(|c| c.starts_with("ip route replace")));
        assert!(calls.iter().any(|c| c == "systemctl restart ndppd"));
    }

    #[tokio::test]
    async fn test_run_skips_restart_when_current() {
        let runner = StubRunner::new();
        let dir = tempfile::TempDir::new().unwrap();
        let conf = dir.path().join("ndppd.conf");
        let effector = effector(runner.clone(), &conf);

        effector.run(false).await.unwrap();
        let first_calls = runner.calls().len();

        effector.run(false).await.unwrap();
        let calls = runner.calls();
        // Second run only re-installs the route.
        assert_eq!(calls.len(), first_calls + 1);
        assert!(calls.last().unwrap().starts_with("ip route replace"));
    }

    #[tokio::test]
    async fn test_run_force_restarts_current_config() {
        let runner = StubRunner::new();
        let dir = tempfile::TempDir::new().unwrap();
        let conf = dir.path().join("ndppd.conf");
        let effector = effector(runner.clone(), &conf);

        effector.run(false).await.unwrap();
        effector.run(true).await.unwrap();

        let restarts = runner
            .calls()
            .iter()
            .filter(|c| *c == "systemctl restart ndppd")
            .count();
        assert_eq!(restarts, 2);
    }

    #[tokio::test]
    async fn test_stale_config_detected() {
        let runner = StubRunner::new();
        let dir = tempfile::TempDir::new().unwrap();
        let conf = dir.path().join("ndppd.conf");
        std::fs::write(
            &conf,
            "route-ttl 30000\nproxy eth0 {\n    rule 2001:db8:9:9::/64 {\n        static\n    }\n}\n",
        )
        .unwrap();

        let effector = effector(runner, &conf);
        // Right interface, wrong prefix.
        assert!(!effector.is_config_current());
    }
}
