//! System inventory collection.
//!
//! Individual probe failures degrade to `Unknown` values and a warning; an
//! inventory snapshot is always produced.

use hostlink_core::messages::{
    AgentFacts, CpuFacts, DiskFacts, Inventory, MemoryFacts, NetworkFacts, OsFacts, rfc3339_now,
};
use hostlink_core::util::round2;
use std::net::IpAddr;
use sysinfo::{Disks, Networks, System};
use tracing::warn;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Collect a full inventory snapshot. Blocking; run it off the async
/// scheduler via `spawn_blocking`.
pub fn collect_inventory(version: &str) -> Inventory {
    let mut sys = System::new_all();
    sys.refresh_all();

    Inventory {
        os: os_facts(),
        cpu: cpu_facts(&sys),
        memory: memory_facts(&sys),
        disks: disk_facts(),
        network: network_facts(),
        agent: AgentFacts {
            version: version.to_string(),
        },
        timestamp: rfc3339_now(),
    }
}

/// OS identification, also used standalone by the health handler.
pub fn os_facts() -> OsFacts {
    OsFacts {
        name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
        build: System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
        platform: std::env::consts::OS.to_string(),
    }
}

fn cpu_facts(sys: &System) -> CpuFacts {
    let model = sys
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| "Unknown".to_string());
    CpuFacts {
        cores: sys.cpus().len(),
        model,
    }
}

fn memory_facts(sys: &System) -> MemoryFacts {
    MemoryFacts {
        total_gb: round2(sys.total_memory() as f64 / BYTES_PER_GIB),
        available_gb: round2(sys.available_memory() as f64 / BYTES_PER_GIB),
    }
}

fn disk_facts() -> Vec<DiskFacts> {
    let disks = Disks::new_with_refreshed_list();
    let mut facts: Vec<DiskFacts> = disks
        .list()
        .iter()
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| DiskFacts {
            drive: drive_name(&disk.mount_point().display().to_string()),
            total_gb: round2(disk.total_space() as f64 / BYTES_PER_GIB),
            free_gb: round2(disk.available_space() as f64 / BYTES_PER_GIB),
        })
        .collect();
    // The same volume can be listed once per mount entry.
    facts.dedup_by(|a, b| a.drive == b.drive);
    if facts.is_empty() {
        warn!("No disks found for inventory");
    }
    facts
}

/// `C:\` reports as `C:`; other mount points keep their path.
fn drive_name(mount_point: &str) -> String {
    let trimmed = mount_point.trim_end_matches(['\\', '/']);
    if trimmed.is_empty() {
        mount_point.to_string()
    } else {
        trimmed.to_string()
    }
}

fn network_facts() -> NetworkFacts {
    let networks = Networks::new_with_refreshed_list();
    for (_name, data) in &networks {
        for ip in data.ip_networks() {
            if let IpAddr::V4(addr) = ip.addr {
                if !addr.is_loopback() {
                    return NetworkFacts {
                        primary_ip: addr.to_string(),
                    };
                }
            }
        }
    }
    warn!("No non-loopback IPv4 address found");
    NetworkFacts::default()
}
