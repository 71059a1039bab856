//! Mutating host operations. Every entrypoint validates its target first and
//! only then reaches the system tool through [`ToolRunner`]; a forbidden
//! target is denied before any tool runs. Failures map to [`ControlError`]
//! and never escape as panics.
//!
//! These operations change process-wide OS state (iptables, systemctl) shared
//! by all sessions. No mutual exclusion is imposed here: the underlying tools
//! are atomic per invocation and concurrent identical commands are safe to
//! race, best effort.

use std::io;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::task;
use tracing::debug;

use crate::types::InterfaceConfig;

const PROTECTED_PIDS: &[u32] = &[0, 1];
const PROTECTED_PORTS: &[u16] = &[22, 80, 443];
const PROTECTED_SERVICES: &[&str] = &[
    "sshd",
    "ssh",
    "init",
    "dbus",
    "systemd",
    "systemd-journald",
    "systemd-logind",
    "systemd-udevd",
    "NetworkManager",
];
const PROTECTED_PATHS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/proc", "/root", "/run", "/sbin",
    "/sys", "/usr", "/var",
];

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

pub type ControlResult = Result<(), ControlError>;

#[derive(Debug, Error)]
pub enum ControlError {
    /// The target is on a hard-coded denylist; no tool was invoked.
    #[error("denied: {0}")]
    Denied(String),
    /// The command itself is malformed; no tool was invoked.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// The tool ran (or failed to run) and did not succeed.
    #[error("{0}")]
    Tool(String),
}

/// The tool-invocation boundary. Tests substitute a spy; production uses
/// [`SystemRunner`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs a system tool to completion. `Ok(true)` means zero exit status.
    async fn run(&self, program: &str, args: &[String]) -> io::Result<bool>;
}

pub struct SystemRunner;

#[async_trait]
impl ToolRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> io::Result<bool> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = tokio::time::timeout(TOOL_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("{program} timed out"))
            })??;
        if !output.status.success() {
            debug!(
                program,
                ?args,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tool exited nonzero"
            );
        }
        Ok(output.status.success())
    }
}

pub struct HostController {
    runner: Arc<dyn ToolRunner>,
}

impl HostController {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    pub async fn stop_process(&self, pid: u32) -> ControlResult {
        check_pid(pid)?;
        self.invoke("kill", vec!["-TERM".into(), pid.to_string()])
            .await
    }

    pub async fn set_priority(&self, pid: u32, priority: i32) -> ControlResult {
        check_pid(pid)?;
        if !(-20..=19).contains(&priority) {
            return Err(ControlError::Invalid(format!(
                "priority {priority} outside -20..=19"
            )));
        }
        self.invoke(
            "renice",
            vec![
                "-n".into(),
                priority.to_string(),
                "-p".into(),
                pid.to_string(),
            ],
        )
        .await
    }

    pub async fn start_service(&self, name: &str) -> ControlResult {
        // starting a protected service is harmless; stopping it is not
        self.service_op("start", name, false).await
    }

    pub async fn stop_service(&self, name: &str) -> ControlResult {
        self.service_op("stop", name, true).await
    }

    pub async fn restart_service(&self, name: &str) -> ControlResult {
        self.service_op("restart", name, true).await
    }

    async fn service_op(&self, verb: &str, name: &str, guarded: bool) -> ControlResult {
        if !is_valid_unit_name(name) {
            return Err(ControlError::Invalid(format!("unit name {name:?}")));
        }
        if guarded && is_protected_service(name) {
            return Err(ControlError::Denied(format!("service {name} is protected")));
        }
        self.invoke("systemctl", vec![verb.into(), format!("{name}.service")])
            .await
    }

    pub async fn block_ip(&self, ip: &str) -> ControlResult {
        let addr = parse_blockable_ip(ip)?;
        self.invoke("iptables", ip_rule_args("-A", addr)).await
    }

    pub async fn unblock_ip(&self, ip: &str) -> ControlResult {
        let addr = parse_blockable_ip(ip)?;
        self.invoke("iptables", ip_rule_args("-D", addr)).await
    }

    pub async fn block_port(&self, port: u16, protocol: &str) -> ControlResult {
        if PROTECTED_PORTS.contains(&port) {
            return Err(ControlError::Denied(format!("port {port} is protected")));
        }
        if !matches!(protocol, "tcp" | "udp") {
            return Err(ControlError::Invalid(format!("protocol {protocol:?}")));
        }
        self.invoke(
            "iptables",
            vec![
                "-A".into(),
                "INPUT".into(),
                "-p".into(),
                protocol.into(),
                "--dport".into(),
                port.to_string(),
                "-j".into(),
                "DROP".into(),
            ],
        )
        .await
    }

    /// Applies the present keys in a fixed order: address, mtu, link state.
    pub async fn configure_interface(&self, name: &str, config: &InterfaceConfig) -> ControlResult {
        if !is_valid_interface_name(name) {
            return Err(ControlError::Invalid(format!("interface name {name:?}")));
        }
        if config.ip_address.is_none() && config.mtu.is_none() && config.up.is_none() {
            return Err(ControlError::Invalid("empty interface config".into()));
        }
        if let Some(ref cidr) = config.ip_address {
            validate_cidr(cidr)?;
            self.invoke(
                "ip",
                vec![
                    "addr".into(),
                    "add".into(),
                    cidr.clone(),
                    "dev".into(),
                    name.into(),
                ],
            )
            .await?;
        }
        if let Some(mtu) = config.mtu {
            if !(576..=65_535).contains(&mtu) {
                return Err(ControlError::Invalid(format!("mtu {mtu}")));
            }
            self.invoke(
                "ip",
                vec![
                    "link".into(),
                    "set".into(),
                    name.into(),
                    "mtu".into(),
                    mtu.to_string(),
                ],
            )
            .await?;
        }
        if let Some(up) = config.up {
            let action = if up { "up" } else { "down" };
            self.invoke(
                "ip",
                vec!["link".into(), "set".into(), name.into(), action.into()],
            )
            .await?;
        }
        Ok(())
    }

    pub async fn delete_path(&self, path: &str) -> ControlResult {
        let target = check_path(path)?;
        run_fs(move || {
            if std::fs::symlink_metadata(&target)?.is_dir() {
                std::fs::remove_dir_all(&target)
            } else {
                std::fs::remove_file(&target)
            }
        })
        .await
    }

    pub async fn move_path(&self, source: &str, destination: &str) -> ControlResult {
        let from = check_path(source)?;
        let to = check_path(destination)?;
        run_fs(move || std::fs::rename(&from, &to)).await
    }

    async fn invoke(&self, program: &str, args: Vec<String>) -> ControlResult {
        match self.runner.run(program, &args).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ControlError::Tool(format!("{program} exited nonzero"))),
            Err(e) => Err(ControlError::Tool(format!("{program}: {e}"))),
        }
    }
}

async fn run_fs<F>(op: F) -> ControlResult
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    match task::spawn_blocking(op).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ControlError::Tool(e.to_string())),
        Err(e) => Err(ControlError::Tool(e.to_string())),
    }
}

fn check_pid(pid: u32) -> Result<(), ControlError> {
    if PROTECTED_PIDS.contains(&pid) || pid == std::process::id() {
        return Err(ControlError::Denied(format!("pid {pid} is protected")));
    }
    Ok(())
}

fn is_protected_service(name: &str) -> bool {
    let name = name.strip_suffix(".service").unwrap_or(name);
    PROTECTED_SERVICES.iter().any(|s| s.eq_ignore_ascii_case(name))
}

// systemd unit name characters; also keeps shell metacharacters out of argv
fn is_valid_unit_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':' | '\\'))
}

fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn parse_blockable_ip(ip: &str) -> Result<IpAddr, ControlError> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| ControlError::Invalid(format!("ip address {ip:?}")))?;
    if addr.is_loopback() || addr.is_unspecified() {
        return Err(ControlError::Denied(format!("address {addr} is protected")));
    }
    Ok(addr)
}

fn validate_cidr(cidr: &str) -> Result<(), ControlError> {
    let addr_part = cidr.split_once('/').map_or(cidr, |(a, _)| a);
    let prefix_ok = match cidr.split_once('/') {
        None => true,
        Some((_, p)) => p.parse::<u8>().map(|p| p <= 128).unwrap_or(false),
    };
    if addr_part.parse::<IpAddr>().is_ok() && prefix_ok {
        Ok(())
    } else {
        Err(ControlError::Invalid(format!("address {cidr:?}")))
    }
}

fn ip_rule_args(chain_op: &str, addr: IpAddr) -> Vec<String> {
    vec![
        chain_op.into(),
        "INPUT".into(),
        "-s".into(),
        addr.to_string(),
        "-j".into(),
        "DROP".into(),
    ]
}

fn check_path(path: &str) -> Result<std::path::PathBuf, ControlError> {
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    if !trimmed.starts_with('/') {
        return Err(ControlError::Invalid(format!(
            "path {path:?} is not absolute"
        )));
    }
    if PROTECTED_PATHS.contains(&trimmed) {
        return Err(ControlError::Denied(format!("path {trimmed} is protected")));
    }
    Ok(std::path::PathBuf::from(trimmed))
}

/// Spy for the tool-invocation boundary, shared by unit tests across modules.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations instead of touching the host.
    pub(crate) struct SpyRunner {
        pub calls: Mutex<Vec<(String, Vec<String>)>>,
        pub succeed: bool,
    }

    impl SpyRunner {
        pub(crate) fn ok() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                succeed: true,
            })
        }

        pub(crate) fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                succeed: false,
            })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolRunner for SpyRunner {
        async fn run(&self, program: &str, args: &[String]) -> io::Result<bool> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));
            Ok(self.succeed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SpyRunner;
    use super::*;

    #[tokio::test]
    async fn protected_pid_denied_before_tool_runs() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        for pid in [0u32, 1] {
            let err = ctl.stop_process(pid).await.unwrap_err();
            assert!(matches!(err, ControlError::Denied(_)), "{err}");
        }
        let err = ctl.stop_process(std::process::id()).await.unwrap_err();
        assert!(matches!(err, ControlError::Denied(_)));
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn stop_process_sends_sigterm() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        ctl.stop_process(4242).await.unwrap();
        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls[0].0, "kill");
        assert_eq!(calls[0].1, vec!["-TERM".to_string(), "4242".to_string()]);
    }

    #[tokio::test]
    async fn priority_outside_niceness_range_rejected() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        assert!(matches!(
            ctl.set_priority(4242, 42).await.unwrap_err(),
            ControlError::Invalid(_)
        ));
        assert_eq!(spy.call_count(), 0);
        ctl.set_priority(4242, -5).await.unwrap();
        assert_eq!(spy.call_count(), 1);
    }

    #[tokio::test]
    async fn protected_service_stop_denied_start_allowed() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        for name in ["sshd", "sshd.service", "SSHD"] {
            assert!(matches!(
                ctl.stop_service(name).await.unwrap_err(),
                ControlError::Denied(_)
            ));
            assert!(matches!(
                ctl.restart_service(name).await.unwrap_err(),
                ControlError::Denied(_)
            ));
        }
        assert_eq!(spy.call_count(), 0);

        ctl.start_service("sshd").await.unwrap();
        ctl.restart_service("nginx").await.unwrap();
        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, vec!["start".to_string(), "sshd.service".to_string()]);
        assert_eq!(
            calls[1].1,
            vec!["restart".to_string(), "nginx.service".to_string()]
        );
    }

    #[tokio::test]
    async fn shell_metacharacters_in_unit_name_rejected() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        for name in ["nginx; rm -rf /", "a b", "$(reboot)", ""] {
            assert!(matches!(
                ctl.restart_service(name).await.unwrap_err(),
                ControlError::Invalid(_)
            ));
        }
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn critical_ports_denied_before_tool_runs() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        for port in [22u16, 80, 443] {
            assert!(matches!(
                ctl.block_port(port, "tcp").await.unwrap_err(),
                ControlError::Denied(_)
            ));
        }
        assert_eq!(spy.call_count(), 0);
        ctl.block_port(8080, "udp").await.unwrap();
        assert_eq!(spy.call_count(), 1);
    }

    #[tokio::test]
    async fn block_ip_twice_does_not_panic() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        ctl.block_ip("1.2.3.4").await.unwrap();
        ctl.block_ip("1.2.3.4").await.unwrap();
        assert_eq!(spy.call_count(), 2);
        let calls = spy.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            vec![
                "-A".to_string(),
                "INPUT".to_string(),
                "-s".to_string(),
                "1.2.3.4".to_string(),
                "-j".to_string(),
                "DROP".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn loopback_and_garbage_addresses_rejected() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        assert!(matches!(
            ctl.block_ip("127.0.0.1").await.unwrap_err(),
            ControlError::Denied(_)
        ));
        assert!(matches!(
            ctl.block_ip("not-an-ip").await.unwrap_err(),
            ControlError::Invalid(_)
        ));
        assert!(matches!(
            ctl.unblock_ip("0.0.0.0").await.unwrap_err(),
            ControlError::Denied(_)
        ));
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn tool_failure_maps_to_error_not_panic() {
        let spy = SpyRunner::failing();
        let ctl = HostController::new(spy.clone());
        let err = ctl.block_ip("8.8.8.8").await.unwrap_err();
        assert!(matches!(err, ControlError::Tool(_)));
        assert_eq!(spy.call_count(), 1);
    }

    #[tokio::test]
    async fn configure_interface_applies_keys_in_order() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        let config = InterfaceConfig {
            ip_address: Some("192.168.1.5/24".into()),
            mtu: Some(1400),
            up: Some(false),
        };
        ctl.configure_interface("eth0", &config).await.unwrap();
        let calls = spy.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1[..2], ["addr".to_string(), "add".to_string()]);
        assert!(calls[1].1.contains(&"mtu".to_string()));
        assert_eq!(calls[2].1.last().map(String::as_str), Some("down"));
    }

    #[tokio::test]
    async fn configure_interface_rejects_bad_input() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        assert!(matches!(
            ctl.configure_interface("eth0", &InterfaceConfig::default())
                .await
                .unwrap_err(),
            ControlError::Invalid(_)
        ));
        let bad_addr = InterfaceConfig {
            ip_address: Some("10.0.0.1; reboot".into()),
            ..Default::default()
        };
        assert!(matches!(
            ctl.configure_interface("eth0", &bad_addr).await.unwrap_err(),
            ControlError::Invalid(_)
        ));
        assert!(matches!(
            ctl.configure_interface("eth0!!", &bad_addr).await.unwrap_err(),
            ControlError::Invalid(_)
        ));
        assert_eq!(spy.call_count(), 0);
    }

    #[tokio::test]
    async fn protected_paths_never_deleted() {
        let spy = SpyRunner::ok();
        let ctl = HostController::new(spy.clone());
        for path in ["/", "/etc", "/etc/", "/usr"] {
            assert!(matches!(
                ctl.delete_path(path).await.unwrap_err(),
                ControlError::Denied(_)
            ));
        }
        assert!(matches!(
            ctl.delete_path("relative/path").await.unwrap_err(),
            ControlError::Invalid(_)
        ));
    }

    #[tokio::test]
    async fn delete_and_move_operate_on_real_files() {
        let ctl = HostController::new(SpyRunner::ok());
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("victim.txt");
        std::fs::write(&file, b"data").expect("write");

        let moved = dir.path().join("renamed.txt");
        ctl.move_path(&file.to_string_lossy(), &moved.to_string_lossy())
            .await
            .unwrap();
        assert!(moved.exists() && !file.exists());

        ctl.delete_path(&moved.to_string_lossy()).await.unwrap();
        assert!(!moved.exists());

        // deleting it again reports failure rather than panicking
        assert!(matches!(
            ctl.delete_path(&moved.to_string_lossy()).await.unwrap_err(),
            ControlError::Tool(_)
        ));
    }
}
