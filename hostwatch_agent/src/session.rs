//! Per-connection session actor. A session owns the outbound FIFO for its
//! channel, the periodic feed task for push-style topics, and any attached
//! subprocess. Sessions are fully independent: nothing here is shared across
//! connections, so a stalled client or slow command only ever affects itself.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::{ControlError, ControlResult};
use crate::history::HISTORY_WINDOW;
use crate::inspector;
use crate::shell::ShellSession;
use crate::ssh::SshTarget;
use crate::state::AppState;
use crate::topic::Topic;
use crate::types::{
    FilesystemRequest, NetworkRequest, ProcessRequest, ServiceRequest, ShellRequest, SshRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Active,
    Closing,
    Closed,
}

pub struct Session {
    topic: Topic,
    state: AppState,
    peer: String,
    actor: String,
    outbound: mpsc::Sender<String>,
    active_tx: watch::Sender<bool>,
    feed: Option<JoinHandle<()>>,
    shell: Option<ShellSession>,
    current_path: String,
    phase: Phase,
}

impl Session {
    pub fn new(
        topic: Topic,
        state: AppState,
        peer: String,
        actor: String,
        outbound: mpsc::Sender<String>,
    ) -> Self {
        let (active_tx, _) = watch::channel(true);
        Self {
            topic,
            state,
            peer,
            actor,
            outbound,
            active_tx,
            feed: None,
            shell: None,
            current_path: "/".to_string(),
            phase: Phase::Connecting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handshake done. Push-style topics start their feed; pull-style topics
    /// get one snapshot up front; the shell topic spawns its subprocess.
    pub async fn activate(&mut self) {
        match self.topic {
            Topic::Shell => match ShellSession::spawn(self.outbound.clone()) {
                Ok(shell) => self.shell = Some(shell),
                Err(e) => {
                    warn!(error = %e, "failed to spawn shell");
                    self.send_text(
                        json!({"type": "shell_output", "output": format!("Error: {e}")})
                            .to_string(),
                    )
                    .await;
                }
            },
            Topic::Ssh => {}
            Topic::Network => self.push_network_snapshot().await,
            Topic::Filesystem => self.push_file_list().await,
            _ => {
                if let Some(period) = self.topic.interval() {
                    self.feed = Some(self.spawn_feed(period));
                }
            }
        }
        self.phase = Phase::Active;
        debug!(topic = self.topic.as_str(), peer = %self.peer, "session active");
    }

    /// Disconnect: flip the active flag so every loop exits at its next
    /// iteration boundary, then release the subprocess (bounded wait,
    /// escalating) and join the feed.
    pub async fn shutdown(&mut self) {
        self.phase = Phase::Closing;
        self.active_tx.send_replace(false);
        if let Some(shell) = self.shell.take() {
            shell.terminate().await;
        }
        if let Some(feed) = self.feed.take() {
            let _ = feed.await;
        }
        self.phase = Phase::Closed;
        debug!(topic = self.topic.as_str(), peer = %self.peer, "session closed");
    }

    /// Routes one inbound frame. Malformed input is answered with a generic
    /// error ack; nothing a client sends can take the session down.
    pub async fn handle_message(&mut self, text: &str) {
        if self.phase != Phase::Active {
            return;
        }
        match self.topic {
            Topic::Processes => self.on_process_request(text).await,
            Topic::Services => self.on_service_request(text).await,
            Topic::Network => self.on_network_request(text).await,
            Topic::Filesystem => self.on_filesystem_request(text).await,
            Topic::Shell => self.on_shell_request(text).await,
            Topic::Ssh => self.on_ssh_request(text).await,
            // telemetry-only topics accept no commands
            Topic::Cpu | Topic::Memory | Topic::Storage | Topic::Temperature => {
                self.reject_message("topic accepts no commands").await;
            }
        }
    }

    async fn on_process_request(&mut self, text: &str) {
        let req: ProcessRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        match req {
            ProcessRequest::Stop { pid } => {
                let result = self.state.controller.stop_process(pid).await;
                self.finish_command("stop", json!({"pid": pid}), &result).await;
            }
            ProcessRequest::SetPriority { pid, priority } => {
                let result = self.state.controller.set_priority(pid, priority).await;
                self.finish_command(
                    "set_priority",
                    json!({"pid": pid, "priority": priority}),
                    &result,
                )
                .await;
            }
        }
    }

    async fn on_service_request(&mut self, text: &str) {
        let req: ServiceRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        let (action, service, result) = match req {
            ServiceRequest::Start { service } => {
                let r = self.state.controller.start_service(&service).await;
                ("start", service, r)
            }
            ServiceRequest::Stop { service } => {
                let r = self.state.controller.stop_service(&service).await;
                ("stop", service, r)
            }
            ServiceRequest::Restart { service } => {
                let r = self.state.controller.restart_service(&service).await;
                ("restart", service, r)
            }
        };
        self.finish_command(action, json!({"service": service}), &result)
            .await;
    }

    async fn on_network_request(&mut self, text: &str) {
        let req: NetworkRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        match req {
            NetworkRequest::BlockIp { ip_address } => {
                let result = self.state.controller.block_ip(&ip_address).await;
                self.finish_command("block_ip", json!({"ip_address": ip_address}), &result)
                    .await;
            }
            NetworkRequest::UnblockIp { ip_address } => {
                let result = self.state.controller.unblock_ip(&ip_address).await;
                self.finish_command("unblock_ip", json!({"ip_address": ip_address}), &result)
                    .await;
            }
            NetworkRequest::BlockPort { port, protocol } => {
                let result = self.state.controller.block_port(port, &protocol).await;
                self.finish_command(
                    "block_port",
                    json!({"port": port, "protocol": protocol}),
                    &result,
                )
                .await;
            }
            NetworkRequest::ConfigureInterface { interface, config } => {
                let result = self
                    .state
                    .controller
                    .configure_interface(&interface, &config)
                    .await;
                self.finish_command("configure_interface", json!({"interface": interface}), &result)
                    .await;
            }
        }
        // network state visibly changed (or the client expects confirmation
        // it did not): refresh immediately instead of waiting for a tick
        self.push_network_snapshot().await;
    }

    async fn on_filesystem_request(&mut self, text: &str) {
        let req: FilesystemRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        match req {
            FilesystemRequest::List { path } | FilesystemRequest::Cd { path } => {
                self.current_path = path;
            }
            FilesystemRequest::Delete { path } => {
                let result = self.state.controller.delete_path(&path).await;
                self.finish_command("delete", json!({"path": path}), &result).await;
            }
            FilesystemRequest::Move { path, destination } => {
                let result = self.state.controller.move_path(&path, &destination).await;
                self.finish_command(
                    "move",
                    json!({"path": path, "destination": destination}),
                    &result,
                )
                .await;
            }
        }
        self.push_file_list().await;
    }

    async fn on_shell_request(&mut self, text: &str) {
        let req: ShellRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        let result = match self.shell.as_mut() {
            Some(shell) => shell.write_line(&req.command).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no shell attached",
            )),
        };
        let detail = truncate(&req.command, 200);
        let control_result = result
            .as_ref()
            .map(|_| ())
            .map_err(|e| ControlError::Tool(e.to_string()));
        self.audit_command("command", &detail, &control_result);
        if let Err(e) = result {
            self.send_text(
                json!({"type": "shell_output", "output": format!("Error: {e}")}).to_string(),
            )
            .await;
        }
    }

    async fn on_ssh_request(&mut self, text: &str) {
        let req: SshRequest = match serde_json::from_str(text) {
            Ok(req) => req,
            Err(_) => return self.reject_message("unrecognized message").await,
        };
        let target = SshTarget {
            host: req.host.clone(),
            port: req.port,
            username: req.username.clone(),
            identity_file: req.identity_file.clone(),
        };
        let outcome = target.exec(&req.command).await;
        let control_result = outcome
            .as_ref()
            .map(|_| ())
            .map_err(|e| ControlError::Tool(e.to_string()));
        self.audit_command(
            "exec",
            &format!("{} on {}", truncate(&req.command, 200), req.host),
            &control_result,
        );
        let frame = match outcome {
            Ok(output) => json!({
                "status": "success",
                "action": "exec",
                "host": req.host,
                "output": output,
            }),
            Err(e) => json!({
                "status": "error",
                "action": "exec",
                "host": req.host,
                "detail": e.to_string(),
            }),
        };
        self.send_text(frame.to_string()).await;
    }

    // ---------- outbound helpers ----------

    fn spawn_feed(&self, period: Duration) -> JoinHandle<()> {
        let topic = self.topic;
        let state = self.state.clone();
        let outbound = self.outbound.clone();
        let mut active = self.active_tx.subscribe();
        tokio::spawn(async move {
            loop {
                if !*active.borrow() {
                    break;
                }
                match topic_snapshot(topic, &state).await {
                    Ok(frame) => {
                        if outbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // transient: skip this tick, keep the cadence
                        warn!(topic = topic.as_str(), error = %e, "sampling tick failed");
                    }
                }
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    changed = active.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Samples live counters, records them, and pushes the recent window.
    async fn push_network_snapshot(&self) {
        let counters = inspector::network_counters(&self.state).await;
        self.state.history.record_network(&counters);
        let frame = json!({"usage": self.state.history.recent_network(HISTORY_WINDOW)});
        self.send_text(frame.to_string()).await;
    }

    async fn push_file_list(&self) {
        let entries = inspector::list_directory(&self.current_path).await;
        let frame = json!({
            "type": "file_list",
            "data": entries,
            "current_path": self.current_path,
        });
        self.send_text(frame.to_string()).await;
    }

    async fn finish_command(&self, action: &str, echo: Value, result: &ControlResult) {
        self.audit_command(action, &echo.to_string(), result);
        let mut frame = json!({
            "status": if result.is_ok() { "success" } else { "error" },
            "action": action,
        });
        if let (Some(obj), Some(extra)) = (frame.as_object_mut(), echo.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        if let (Some(obj), Err(e)) = (frame.as_object_mut(), result) {
            obj.insert("detail".into(), Value::String(e.to_string()));
        }
        self.send_text(frame.to_string()).await;
    }

    fn audit_command(&self, action: &str, detail: &str, result: &ControlResult) {
        let outcome = match result {
            Ok(()) => "success".to_string(),
            Err(e) => format!("error: {e}"),
        };
        self.state.audit.record(crate::sinks::AuditEntry::new(
            action,
            self.actor.clone(),
            format!("{detail} -> {outcome}"),
            self.peer.clone(),
        ));
        if let Err(ControlError::Denied(reason)) = result {
            self.state
                .notifier
                .notify(&format!("denied {action} from {}: {reason}", self.peer));
        }
    }

    async fn reject_message(&self, reason: &str) {
        debug!(topic = self.topic.as_str(), peer = %self.peer, reason, "rejected inbound message");
        self.send_text(
            json!({"status": "error", "action": "unknown", "detail": reason}).to_string(),
        )
        .await;
    }

    async fn send_text(&self, frame: String) {
        // a closed channel means the writer is gone; the session is on its
        // way down and the frame can be dropped
        let _ = self.outbound.send(frame).await;
    }
}

/// One outbound frame for a push-style topic.
pub(crate) async fn topic_snapshot(topic: Topic, state: &AppState) -> serde_json::Result<String> {
    let value = match topic {
        Topic::Processes => serde_json::to_value(inspector::processes(state).await)?,
        Topic::Services => serde_json::to_value(inspector::services().await)?,
        Topic::Cpu => json!({
            "type": "cpu_usage",
            "data": state.history.recent_cpu(HISTORY_WINDOW),
        }),
        Topic::Memory => json!({
            "type": "memory_usage",
            "data": state.history.recent_memory(HISTORY_WINDOW),
        }),
        Topic::Storage => json!({
            "type": "storage_info",
            "data": inspector::storage(state).await,
        }),
        Topic::Temperature => json!({
            "type": "temperature_info",
            "data": inspector::temperatures(state).await,
        }),
        // pull-style topics push through their own paths
        Topic::Network | Topic::Filesystem | Topic::Shell | Topic::Ssh => Value::Null,
    };
    serde_json::to_string(&value)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
