//! Read-only host sampling. Everything here is best effort: an individual
//! unreadable item (process gone mid-scan, permission-denied sensor, broken
//! directory entry) is skipped, never surfaced as a call-level failure.
//! Sampling is blocking OS work, so it runs under `spawn_blocking` and leaves
//! the cooperative scheduler free.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::PoisonError;

use chrono::{DateTime, Utc};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate};
use tokio::process::Command;
use tokio::task;
use tracing::warn;

use crate::state::AppState;
use crate::types::{
    FileEntry, NetworkCounters, ProcessInfo, ServiceInfo, StorageInfo, TemperatureReading,
};

/// Full process table, heaviest CPU consumers first.
pub async fn processes(state: &AppState) -> Vec<ProcessInfo> {
    let sys = state.sys.clone();
    task::spawn_blocking(move || {
        let mut sys = sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything().without_tasks(),
        );
        let total_mem = sys.total_memory().max(1);
        let mut list: Vec<ProcessInfo> = sys
            .processes()
            .values()
            .map(|p| ProcessInfo {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                status: p.status().to_string(),
                cpu_percent: p.cpu_usage(),
                memory_percent: (p.memory() as f32 / total_mem as f32) * 100.0,
            })
            .collect();
        // fix enumeration order before ranking: the process table is a map
        list.sort_by_key(|p| p.pid);
        sort_processes(&mut list);
        list
    })
    .await
    .unwrap_or_default()
}

/// Stable descending sort by cpu_percent; ties keep their input order.
pub(crate) fn sort_processes(list: &mut [ProcessInfo]) {
    list.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
}

/// Service units as systemd reports them. Missing or failing `systemctl`
/// degrades to an empty list.
pub async fn services() -> Vec<ServiceInfo> {
    let output = Command::new("systemctl")
        .args([
            "list-units",
            "--type=service",
            "--all",
            "--plain",
            "--no-legend",
            "--no-pager",
        ])
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            parse_service_list(&String::from_utf8_lossy(&out.stdout))
        }
        Ok(out) => {
            warn!(status = %out.status, "systemctl list-units exited nonzero");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "systemctl unavailable");
            Vec::new()
        }
    }
}

// Lines look like "cron.service loaded active running Regular background …".
// Failed units may carry a leading marker glyph; tolerate it.
pub(crate) fn parse_service_list(raw: &str) -> Vec<ServiceInfo> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace().peekable();
            if matches!(parts.peek(), Some(&"●") | Some(&"*") | Some(&"x")) {
                parts.next();
            }
            let unit = parts.next()?;
            let name = unit.strip_suffix(".service")?;
            let _load = parts.next()?;
            let active = parts.next()?;
            Some(ServiceInfo {
                name: name.to_string(),
                status: active.to_string(),
            })
        })
        .collect()
}

/// Cumulative per-interface byte counters, sorted by interface name.
pub async fn network_counters(state: &AppState) -> Vec<NetworkCounters> {
    let nets = state.networks.clone();
    task::spawn_blocking(move || {
        let mut nets = nets.lock().unwrap_or_else(PoisonError::into_inner);
        nets.refresh(true);
        let sampled_at = Utc::now();
        let mut counters: Vec<NetworkCounters> = nets
            .iter()
            .map(|(name, data)| NetworkCounters {
                interface: name.clone(),
                received: data.total_received(),
                sent: data.total_transmitted(),
                sampled_at,
            })
            .collect();
        counters.sort_by(|a, b| a.interface.cmp(&b.interface));
        counters
    })
    .await
    .unwrap_or_default()
}

/// Mounted filesystems with capacity figures, sorted by mount point.
/// Zero-capacity pseudo-filesystems are filtered out.
pub async fn storage(state: &AppState) -> Vec<StorageInfo> {
    let disks = state.disks.clone();
    task::spawn_blocking(move || {
        let mut disks = disks.lock().unwrap_or_else(PoisonError::into_inner);
        disks.refresh(true);
        let mut mounts: Vec<StorageInfo> = disks
            .iter()
            .filter(|d| d.total_space() > 0)
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space();
                let used = total.saturating_sub(free);
                StorageInfo {
                    device: d.name().to_string_lossy().into_owned(),
                    mount_point: d.mount_point().to_string_lossy().into_owned(),
                    total,
                    used,
                    free,
                    percent_used: (used as f32 / total as f32) * 100.0,
                    fs_type: d.file_system().to_string_lossy().into_owned(),
                }
            })
            .collect();
        mounts.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
        mounts
    })
    .await
    .unwrap_or_default()
}

pub async fn cpu_usage_percent(state: &AppState) -> f32 {
    let sys = state.sys.clone();
    task::spawn_blocking(move || {
        let mut sys = sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_cpu_usage();
        sys.global_cpu_usage()
    })
    .await
    .unwrap_or(0.0)
}

pub async fn memory_usage_percent(state: &AppState) -> f32 {
    let sys = state.sys.clone();
    task::spawn_blocking(move || {
        let mut sys = sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_memory();
        let total = sys.total_memory().max(1);
        let used = total.saturating_sub(sys.available_memory());
        (used as f32 / total as f32) * 100.0
    })
    .await
    .unwrap_or(0.0)
}

/// Readings grouped by sensor category: usage-style gauges (cpu, memory,
/// per-mount disk) plus whatever hardware sensors the host exposes, mapped
/// into the matching category by label.
pub async fn temperatures(state: &AppState) -> BTreeMap<String, Vec<TemperatureReading>> {
    let mut groups: BTreeMap<String, Vec<TemperatureReading>> = BTreeMap::new();

    groups.entry("CPU".into()).or_default().push(TemperatureReading {
        label: "CPU Usage".into(),
        current: cpu_usage_percent(state).await,
        high: 80.0,
        critical: 90.0,
        unit: "%".into(),
    });
    groups.entry("Memory".into()).or_default().push(TemperatureReading {
        label: "Memory Usage".into(),
        current: memory_usage_percent(state).await,
        high: 80.0,
        critical: 90.0,
        unit: "%".into(),
    });
    for mount in storage(state).await {
        groups.entry("Storage".into()).or_default().push(TemperatureReading {
            label: format!("Disk Usage ({})", mount.mount_point),
            current: mount.percent_used,
            high: 80.0,
            critical: 90.0,
            unit: "%".into(),
        });
    }

    let components = state.components.clone();
    let sensor_readings = task::spawn_blocking(move || {
        let mut components = components.lock().unwrap_or_else(PoisonError::into_inner);
        components.refresh(true);
        let mut readings: Vec<(&'static str, TemperatureReading)> = components
            .iter()
            .filter_map(|c| {
                let category = component_category(c.label())?;
                let current = c.temperature()?;
                Some((
                    category,
                    TemperatureReading {
                        label: c.label().to_string(),
                        current,
                        high: c.max().unwrap_or(80.0),
                        critical: c.critical().unwrap_or(90.0),
                        unit: "°C".into(),
                    },
                ))
            })
            .collect();
        readings.sort_by(|a, b| a.1.label.cmp(&b.1.label));
        readings
    })
    .await
    .unwrap_or_default();

    for (category, reading) in sensor_readings {
        groups.entry(category.into()).or_default().push(reading);
    }
    groups
}

pub(crate) fn component_category(label: &str) -> Option<&'static str> {
    let l = label.to_ascii_lowercase();
    if l.contains("cpu")
        || l.contains("package")
        || l.contains("tctl")
        || l.contains("tdie")
        || l.contains("core")
    {
        Some("CPU")
    } else if l.contains("dimm") || l.contains("mem") {
        Some("Memory")
    } else if l.contains("nvme") || l.contains("ssd") || l.contains("hdd") || l.contains("drive") {
        Some("Storage")
    } else if l.contains("bat") {
        Some("Battery")
    } else if l.contains("fan") {
        Some("Fans")
    } else {
        None
    }
}

/// Directory listing for the filesystem browser; entries that cannot be
/// stat'ed are skipped.
pub async fn list_directory(path: &str) -> Vec<FileEntry> {
    let path = path.to_string();
    task::spawn_blocking(move || {
        let mut entries: Vec<FileEntry> = match std::fs::read_dir(Path::new(&path)) {
            Ok(iter) => iter
                .filter_map(|e| e.ok())
                .filter_map(|e| file_entry(&e.path()))
                .collect(),
            Err(e) => {
                warn!(%path, error = %e, "directory unreadable");
                Vec::new()
            }
        };
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    })
    .await
    .unwrap_or_default()
}

fn file_entry(path: &Path) -> Option<FileEntry> {
    let metadata = std::fs::symlink_metadata(path).ok()?;
    let modified_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
    let (permissions, owner, group) = ownership(&metadata);
    Some(FileEntry {
        path: path.to_string_lossy().into_owned(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        kind: if metadata.is_dir() { "directory" } else { "file" }.to_string(),
        size: metadata.len(),
        modified_at,
        permissions,
        owner,
        group,
    })
}

#[cfg(unix)]
fn ownership(metadata: &std::fs::Metadata) -> (String, u32, u32) {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    (
        format!("{:03o}", metadata.permissions().mode() & 0o777),
        metadata.uid(),
        metadata.gid(),
    )
}

#[cfg(not(unix))]
fn ownership(_metadata: &std::fs::Metadata) -> (String, u32, u32) {
    ("000".to_string(), 0, 0)
}
