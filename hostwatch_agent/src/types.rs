//! Data types crossing the WebSocket boundary.
//! Keep this module minimal and stable — it defines the wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub status: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct NetworkCounters {
    pub interface: String,
    // cumulative totals since boot/agent start; clients diff to get rates
    pub received: u64,
    pub sent: u64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Clone)]
pub struct StorageInfo {
    pub device: String,
    pub mount_point: String,
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent_used: f32,
    pub fs_type: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct TemperatureReading {
    pub label: String,
    pub current: f32,
    pub high: f32,
    pub critical: f32,
    pub unit: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub permissions: String,
    pub owner: u32,
    pub group: u32,
}

/// One recorded usage sample (cpu or memory percent).
#[derive(Debug, Serialize, Clone)]
pub struct UsagePoint {
    pub recorded_at: DateTime<Utc>,
    pub usage: f32,
}

// ---------- Inbound control messages, one vocabulary per topic ----------

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProcessRequest {
    Stop { pid: u32 },
    SetPriority { pid: u32, priority: i32 },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServiceRequest {
    Start { service: String },
    Stop { service: String },
    Restart { service: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NetworkRequest {
    BlockIp {
        ip_address: String,
    },
    UnblockIp {
        ip_address: String,
    },
    BlockPort {
        port: u16,
        #[serde(default = "default_protocol")]
        protocol: String,
    },
    ConfigureInterface {
        interface: String,
        config: InterfaceConfig,
    },
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct InterfaceConfig {
    pub ip_address: Option<String>,
    pub mtu: Option<u32>,
    pub up: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FilesystemRequest {
    List {
        #[serde(default = "default_path")]
        path: String,
    },
    Cd {
        #[serde(default = "default_path")]
        path: String,
    },
    Delete {
        path: String,
    },
    Move {
        path: String,
        destination: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct ShellRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct SshRequest {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: Option<String>,
    pub identity_file: Option<String>,
    pub command: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_port_defaults_to_tcp() {
        let req: NetworkRequest =
            serde_json::from_str(r#"{"action": "block_port", "port": 8080}"#).unwrap();
        match req {
            NetworkRequest::BlockPort { port, protocol } => {
                assert_eq!(port, 8080);
                assert_eq!(protocol, "tcp");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = serde_json::from_str::<ServiceRequest>(r#"{"action": "reload", "service": "x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn filesystem_list_defaults_to_root() {
        let req: FilesystemRequest = serde_json::from_str(r#"{"action": "list"}"#).unwrap();
        match req {
            FilesystemRequest::List { path } => assert_eq!(path, "/"),
            other => panic!("unexpected request: {other:?}"),
        }
    }
}
