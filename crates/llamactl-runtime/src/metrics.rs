//! Host metrics sampled with sysinfo, plus NVIDIA GPU figures from
//! `nvidia-smi` when one is present.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use llamactl_core::ServiceState;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::debug;

const GPU_QUERY: &str = "--query-gpu=utilization.gpu,memory.used,memory.total,power.draw,power.limit,temperature.gpu,name";

/// One host metrics sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetrics {
    /// Global CPU usage in percent.
    pub cpu_usage: f32,
    /// Used memory in bytes.
    pub memory_used: u64,
    /// Total memory in bytes.
    pub memory_total: u64,
    /// Used memory in percent of total.
    pub memory_usage: f32,
    /// Used space of the root filesystem in percent.
    pub disk_usage: f32,
    /// Models the managed process reports as available.
    pub active_models: usize,
    /// Managed-process uptime in seconds.
    pub uptime: u64,
    /// First NVIDIA GPU. Absent on hosts without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuMetrics>,
    /// Sample time, unix milliseconds.
    pub timestamp: i64,
}

/// GPU figures as reported by `nvidia-smi`. Unreported values read zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuMetrics {
    pub name: String,
    /// Utilization in percent.
    pub usage: f32,
    /// MiB.
    pub memory_used: f32,
    /// MiB.
    pub memory_total: f32,
    pub memory_usage: f32,
    /// Watts.
    pub power_draw: f32,
    /// Watts.
    pub power_limit: f32,
    /// Degrees Celsius.
    pub temperature: f32,
}

struct HostState {
    system: System,
    disks: Disks,
}

/// Samples CPU, memory, disk and GPU usage. CPU usage is computed between
/// consecutive refreshes, so the first sample after construction may read
/// zero.
pub struct MetricsCollector {
    host: Mutex<HostState>,
    /// Cleared once `nvidia-smi` turns out not to be installed.
    gpu_tool: AtomicBool,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            host: Mutex::new(HostState {
                system,
                disks: Disks::new_with_refreshed_list(),
            }),
            gpu_tool: AtomicBool::new(true),
        }
    }

    /// Take a sample, combining host figures with the supervisor snapshot.
    pub async fn sample(&self, state: &ServiceState) -> HostMetrics {
        let (cpu_usage, memory_used, memory_total, disk_usage) = {
            let mut host = self.host.lock().unwrap_or_else(PoisonError::into_inner);
            host.system.refresh_cpu_usage();
            host.system.refresh_memory();
            host.disks.refresh(true);
            (
                host.system.global_cpu_usage(),
                host.system.used_memory(),
                host.system.total_memory(),
                root_disk_usage(&host.disks),
            )
        };

        HostMetrics {
            cpu_usage,
            memory_used,
            memory_total,
            memory_usage: percent(memory_used, memory_total),
            disk_usage,
            active_models: state.models.iter().filter(|m| m.available).count(),
            uptime: state.uptime,
            gpu: self.sample_gpu().await,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    async fn sample_gpu(&self) -> Option<GpuMetrics> {
        if !self.gpu_tool.load(Ordering::Relaxed) {
            return None;
        }
        let output = match Command::new("nvidia-smi")
            .args([GPU_QUERY, "--format=csv,noheader,nounits"])
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    debug!("nvidia-smi not installed, GPU metrics disabled");
                    self.gpu_tool.store(false, Ordering::Relaxed);
                }
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        // If multiple GPUs, take the first one
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .and_then(parse_gpu_line)
    }
}

/// Usage of the filesystem mounted at `/`, or of the first disk listed.
fn root_disk_usage(disks: &Disks) -> f32 {
    let disk = disks
        .list()
        .iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());
    disk.map_or(0.0, |disk| {
        let total = disk.total_space();
        percent(total.saturating_sub(disk.available_space()), total)
    })
}

/// Parse one `nvidia-smi` CSV row in `GPU_QUERY` order.
fn parse_gpu_line(line: &str) -> Option<GpuMetrics> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let &[usage, used, total, draw, limit, temperature, name] = fields.as_slice() else {
        return None;
    };
    let number = |field: &str| field.parse::<f32>().unwrap_or(0.0);
    let (memory_used, memory_total) = (number(used), number(total));
    Some(GpuMetrics {
        name: if name.is_empty() {
            "Unknown GPU".to_string()
        } else {
            name.to_string()
        },
        usage: number(usage),
        memory_used,
        memory_total,
        memory_usage: if memory_total > 0.0 {
            memory_used / memory_total * 100.0
        } else {
            0.0
        },
        power_draw: number(draw),
        power_limit: number(limit),
        temperature: number(temperature),
    })
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn percent(part: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((part as f64 / total as f64) * 100.0) as f32
}
