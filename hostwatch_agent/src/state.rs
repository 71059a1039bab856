//! Shared agent state: persistent sysinfo handles plus the collaborator
//! seams every session reaches through. Handles live behind `std::sync`
//! mutexes because sampling runs on the blocking pool, not the scheduler.

use std::sync::{Arc, Mutex};

use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    RefreshKind, System,
};

use crate::controller::{HostController, SystemRunner};
use crate::history::{HistoryStore, MemoryHistory};
use crate::sinks::{AuditSink, LogAuditSink, LogNotifier, Notifier};

#[derive(Clone)]
pub struct AppState {
    pub sys: Arc<Mutex<System>>,
    pub networks: Arc<Mutex<Networks>>,
    pub disks: Arc<Mutex<Disks>>,
    pub components: Arc<Mutex<Components>>,

    pub history: Arc<dyn HistoryStore>,
    pub controller: Arc<HostController>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,

    pub auth_token: Option<String>,
}

impl AppState {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything())
            .with_processes(ProcessRefreshKind::everything().without_tasks());
        let mut sys = System::new_with_specifics(refresh_kind);
        sys.refresh_all();

        Self {
            sys: Arc::new(Mutex::new(sys)),
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
            disks: Arc::new(Mutex::new(Disks::new_with_refreshed_list())),
            components: Arc::new(Mutex::new(Components::new_with_refreshed_list())),
            history: Arc::new(MemoryHistory::default()),
            controller: Arc::new(HostController::new(Arc::new(SystemRunner))),
            audit: Arc::new(LogAuditSink),
            notifier: Arc::new(LogNotifier),
            auth_token: std::env::var("HOSTWATCH_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
