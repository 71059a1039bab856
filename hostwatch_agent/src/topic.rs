//! Topic registry: every telemetry or control stream the agent serves.

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Processes,
    Services,
    Network,
    Cpu,
    Memory,
    Storage,
    Temperature,
    Filesystem,
    Shell,
    Ssh,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Processes => "processes",
            Topic::Services => "services",
            Topic::Network => "network",
            Topic::Cpu => "cpu",
            Topic::Memory => "memory",
            Topic::Storage => "storage",
            Topic::Temperature => "temperature",
            Topic::Filesystem => "filesystem",
            Topic::Shell => "shell",
            Topic::Ssh => "ssh",
        }
    }

    /// Push cadence. `None` marks a pull-style topic: one snapshot on connect,
    /// refreshed out-of-band after a mutating command instead of on a timer.
    pub fn interval(&self) -> Option<Duration> {
        let default_ms: u64 = match self {
            Topic::Processes | Topic::Services | Topic::Cpu | Topic::Memory => 1_000,
            Topic::Temperature => 5_000,
            Topic::Storage => 30_000,
            Topic::Network | Topic::Filesystem | Topic::Shell | Topic::Ssh => return None,
        };
        Some(Duration::from_millis(interval_override_ms(
            self.as_str(),
            default_ms,
        )))
    }
}

impl FromStr for Topic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processes" => Ok(Topic::Processes),
            "services" => Ok(Topic::Services),
            "network" => Ok(Topic::Network),
            "cpu" => Ok(Topic::Cpu),
            "memory" => Ok(Topic::Memory),
            "storage" => Ok(Topic::Storage),
            "temperature" => Ok(Topic::Temperature),
            "filesystem" => Ok(Topic::Filesystem),
            "shell" => Ok(Topic::Shell),
            "ssh" => Ok(Topic::Ssh),
            _ => Err(()),
        }
    }
}

// Cadence is policy, not correctness: overridable per topic, e.g.
// HOSTWATCH_STORAGE_INTERVAL_MS=5000.
fn interval_override_ms(topic: &str, default_ms: u64) -> u64 {
    std::env::var(format!("HOSTWATCH_{}_INTERVAL_MS", topic.to_uppercase()))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_names() {
        for name in [
            "processes",
            "services",
            "network",
            "cpu",
            "memory",
            "storage",
            "temperature",
            "filesystem",
            "shell",
            "ssh",
        ] {
            let topic: Topic = name.parse().expect(name);
            assert_eq!(topic.as_str(), name);
        }
        assert!("gpu".parse::<Topic>().is_err());
    }

    #[test]
    fn pull_topics_have_no_cadence() {
        assert!(Topic::Network.interval().is_none());
        assert!(Topic::Filesystem.interval().is_none());
        assert!(Topic::Shell.interval().is_none());
        assert!(Topic::Ssh.interval().is_none());
        assert!(Topic::Processes.interval().is_some());
    }
}
