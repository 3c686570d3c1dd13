//! Remote Host Metadata
//!
//! Kernel, architecture, CPU, memory and OS release of a connected host,
//! gathered with a handful of read-only commands. Parsing is pure string
//! work; a probe that fails leaves its fields empty.

use serde::Serialize;
use tracing::debug;

use crate::ports::CommandRunner;

/// Everything known about a remote host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostMetadata {
    pub kernel_version: String,
    pub arch: String,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub os_release: OsRelease,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CpuInfo {
    pub cores: u32,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    /// Total memory in GB (10^9 bytes), rounded
    pub total_gb: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    /// Lowercased distribution id, e.g. `ubuntu`
    pub id: String,
    pub name: String,
    pub version: String,
    pub version_id: String,
    pub pretty_name: String,
}

impl HostMetadata {
    /// Run every probe through `runner`.
    pub async fn fetch(runner: &dyn CommandRunner) -> Self {
        let cpu = parse_cpuinfo(&runner.run("cat /proc/cpuinfo").await.unwrap_stdout());
        let arch = runner.run("arch").await.unwrap_stdout();

        let os_release = {
            let release = runner.run("cat /etc/os-release").await.unwrap_stdout();
            if release.is_empty() {
                parse_issue(&runner.run("cat /etc/issue").await.unwrap_stdout())
            } else {
                parse_os_release(&release)
            }
        };

        let kernel_version = runner.run("uname -r").await.unwrap_stdout();
        let memory = parse_meminfo(&runner.run("cat /proc/meminfo").await.unwrap_stdout());

        let metadata = Self {
            kernel_version,
            arch,
            cpu,
            memory,
            os_release,
        };
        debug!(?metadata, "Fetched host metadata");
        metadata
    }
}

/// First `model name` and the number of `processor` entries.
#[must_use]
pub fn parse_cpuinfo(raw: &str) -> CpuInfo {
    let mut info = CpuInfo::default();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => info.cores += 1,
            "model name" if info.model.is_empty() => info.model = value.trim().to_string(),
            _ => {}
        }
    }
    info
}

/// `MemTotal` from `/proc/meminfo`, converted from kB to GB.
#[must_use]
pub fn parse_meminfo(raw: &str) -> MemoryInfo {
    let total_kb = raw
        .lines()
        .find_map(|line| {
            let mut fields = line.split_whitespace();
            (fields.next()? == "MemTotal:")
                .then(|| fields.next()?.parse::<u64>().ok())
                .flatten()
        })
        .unwrap_or(0);

    MemoryInfo {
        total_gb: (total_kb + 500_000) / 1_000_000,
    }
}

/// `KEY=value` pairs of `/etc/os-release`, quotes stripped.
#[must_use]
pub fn parse_os_release(raw: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_matches('"');
        let value = value.trim().trim_matches('"').to_string();
        match key {
            "NAME" => release.name = value,
            "VERSION" => release.version = value,
            "ID" => release.id = value.to_lowercase(),
            "VERSION_ID" => release.version_id = value,
            "PRETTY_NAME" => release.pretty_name = value,
            _ => {}
        }
    }
    release
}

/// `/etc/issue` only yields a name.
#[must_use]
pub fn parse_issue(raw: &str) -> OsRelease {
    let name = raw.trim().to_string();
    OsRelease {
        pretty_name: name.clone(),
        name,
        ..OsRelease::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::exec::mock::MockRunner;

    const CPUINFO: &str = "processor\t: 0\n\
                           vendor_id\t: GenuineIntel\n\
                           model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz\n\
                           \n\
                           processor\t: 1\n\
                           model name\t: Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz\n";

    const OS_RELEASE: &str = r#"PRETTY_NAME="Ubuntu 22.04.4 LTS"
NAME="Ubuntu"
VERSION_ID="22.04"
VERSION="22.04.4 LTS (Jammy Jellyfish)"
ID=Ubuntu
ID_LIKE=debian
"#;

    // ============== Parsers ==============

    #[test]
    fn test_parse_cpuinfo() {
        let cpu = parse_cpuinfo(CPUINFO);
        assert_eq!(cpu.cores, 2);
        assert_eq!(cpu.model, "Intel(R) Xeon(R) CPU E5-2680 v4 @ 2.40GHz");
    }

    #[test]
    fn test_parse_cpuinfo_without_model() {
        let cpu = parse_cpuinfo("processor\t: 0\nHardware\t: BCM2835\n");
        assert_eq!(cpu.cores, 1);
        assert!(cpu.model.is_empty());
    }

    #[test]
    fn test_parse_meminfo_rounds_to_gb() {
        assert_eq!(parse_meminfo("MemTotal:       16318480 kB\nMemFree: 1 kB").total_gb, 16);
        assert_eq!(parse_meminfo("MemTotal: 1500000 kB").total_gb, 2);
        assert_eq!(parse_meminfo("MemTotal: 1499999 kB").total_gb, 1);
        assert_eq!(parse_meminfo("garbage").total_gb, 0);
    }

    #[test]
    fn test_parse_os_release() {
        let release = parse_os_release(OS_RELEASE);
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.name, "Ubuntu");
        assert_eq!(release.version_id, "22.04");
        assert_eq!(release.version, "22.04.4 LTS (Jammy Jellyfish)");
        assert_eq!(release.pretty_name, "Ubuntu 22.04.4 LTS");
    }

    #[test]
    fn test_parse_issue() {
        let release = parse_issue("Welcome to BusyBox v1.36\n");
        assert_eq!(release.name, "Welcome to BusyBox v1.36");
        assert_eq!(release.pretty_name, release.name);
        assert!(release.id.is_empty());
    }

    // ============== Fetch ==============

    #[tokio::test]
    async fn test_fetch_collects_all_probes() {
        let runner = MockRunner::new()
            .with("cat /proc/cpuinfo", CPUINFO)
            .with("arch", "x86_64")
            .with("cat /etc/os-release", OS_RELEASE)
            .with("uname -r", "5.15.0-105-generic")
            .with("cat /proc/meminfo", "MemTotal: 8000000 kB");

        let metadata = HostMetadata::fetch(&runner).await;
        assert_eq!(metadata.arch, "x86_64");
        assert_eq!(metadata.kernel_version, "5.15.0-105-generic");
        assert_eq!(metadata.memory.total_gb, 8);
        assert_eq!(metadata.cpu.cores, 2);
        assert_eq!(metadata.os_release.id, "ubuntu");
    }

    #[tokio::test]
    async fn test_failed_probes_leave_fields_empty() {
        let runner = MockRunner::new().with("cat /etc/issue", "Alpine Linux 3.19");
        let metadata = HostMetadata::fetch(&runner).await;

        assert_eq!(metadata.os_release.name, "Alpine Linux 3.19");
        assert!(metadata.kernel_version.is_empty());
        assert_eq!(metadata.cpu, CpuInfo::default());
        assert!(runner.calls().contains(&"cat /etc/issue".to_string()));
    }
}
