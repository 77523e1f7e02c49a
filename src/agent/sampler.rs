//! Built-in samplers.
//!
//! - [`RuntimeSampler`]: this process and its tokio runtime, plus the
//!   `PollCount` and `RandomValue` liveness metrics
//! - [`HostSampler`]: host memory and per-CPU utilization
//!
//! `sysinfo` refreshes block, so both run them on the blocking pool. Each
//! sampler keeps its `System` between ticks because CPU usage is computed from
//! the difference between two refreshes.

use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::agent::{AgentError, Sampler};
use crate::model::WireItem;

/// Counter incremented by one on every poll.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge refreshed with a random value on every poll.
pub const RANDOM_VALUE: &str = "RandomValue";

async fn with_system<T, F>(system: &Arc<Mutex<System>>, f: F) -> Result<T, AgentError>
where
    T: Send + 'static,
    F: FnOnce(&mut System) -> T + Send + 'static,
{
    let system = Arc::clone(system);
    tokio::task::spawn_blocking(move || f(&mut system.lock()))
        .await
        .map_err(|e| AgentError::Sampler(e.to_string()))
}

/// Process and runtime statistics.
#[derive(Debug)]
pub struct RuntimeSampler {
    system: Arc<Mutex<System>>,
    pid: Option<Pid>,
}

impl Default for RuntimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| tracing::warn!(error = %e, "Process stats unavailable"))
            .ok();
        Self {
            system: Arc::new(Mutex::new(System::new())),
            pid,
        }
    }
}

fn process_stats(system: &mut System, pid: Pid) -> Vec<WireItem> {
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    let Some(process) = system.process(pid) else {
        return Vec::new();
    };

    let disk = process.disk_usage();
    vec![
        WireItem::gauge("ResidentMemory", process.memory() as f64),
        WireItem::gauge("VirtualMemory", process.virtual_memory() as f64),
        WireItem::gauge("ProcessCPU", f64::from(process.cpu_usage())),
        WireItem::gauge("DiskReadBytes", disk.total_read_bytes as f64),
        WireItem::gauge("DiskWrittenBytes", disk.total_written_bytes as f64),
        WireItem::gauge("RunTimeSeconds", process.run_time() as f64),
    ]
}

#[async_trait::async_trait]
impl Sampler for RuntimeSampler {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn sample(&self) -> Result<Vec<WireItem>, AgentError> {
        let mut items = match self.pid {
            Some(pid) => with_system(&self.system, move |system| process_stats(system, pid)).await?,
            None => Vec::new(),
        };

        let runtime = tokio::runtime::Handle::current().metrics();
        items.push(WireItem::gauge("RuntimeWorkers", runtime.num_workers() as f64));
        items.push(WireItem::gauge(
            "RuntimeAliveTasks",
            runtime.num_alive_tasks() as f64,
        ));
        items.push(WireItem::gauge(RANDOM_VALUE, rand::random::<f64>()));
        items.push(WireItem::counter(POLL_COUNT, 1));

        Ok(items)
    }
}

/// Host memory and CPU statistics.
#[derive(Debug)]
pub struct HostSampler {
    system: Arc<Mutex<System>>,
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSampler {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }
}

fn host_stats(system: &mut System) -> Vec<WireItem> {
    system.refresh_memory();
    system.refresh_cpu_usage();

    let mut items = vec![
        WireItem::gauge("TotalMemory", system.total_memory() as f64),
        WireItem::gauge("FreeMemory", system.free_memory() as f64),
        WireItem::gauge("UsedMemory", system.used_memory() as f64),
    ];
    items.extend(system.cpus().iter().enumerate().map(|(i, cpu)| {
        WireItem::gauge(format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage()))
    }));
    items
}

#[async_trait::async_trait]
impl Sampler for HostSampler {
    fn name(&self) -> &str {
        "host"
    }

    async fn sample(&self) -> Result<Vec<WireItem>, AgentError> {
        with_system(&self.system, host_stats).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricKind;

    fn find<'a>(items: &'a [WireItem], id: &str) -> Option<&'a WireItem> {
        items.iter().find(|item| item.id == id)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runtime_sampler_emits_liveness_metrics() {
        let sampler = RuntimeSampler::new();
        let items = sampler.sample().await.unwrap();

        assert_eq!(find(&items, POLL_COUNT), Some(&WireItem::counter(POLL_COUNT, 1)));

        let random = find(&items, RANDOM_VALUE).unwrap();
        assert_eq!(random.kind, MetricKind::Gauge);
        assert!((0.0..1.0).contains(&random.value.unwrap()));

        let workers = find(&items, "RuntimeWorkers").unwrap();
        assert_eq!(workers.value, Some(2.0));

        assert!(items.iter().all(|item| item.validate().is_ok()));
    }

    #[tokio::test]
    async fn test_runtime_sampler_counts_one_per_sample() {
        let sampler = RuntimeSampler::new();
        for _ in 0..3 {
            let items = sampler.sample().await.unwrap();
            let polls: Vec<_> = items.iter().filter(|item| item.id == POLL_COUNT).collect();
            assert_eq!(polls.len(), 1);
            assert_eq!(polls[0].delta, Some(1));
        }
    }

    #[tokio::test]
    async fn test_host_sampler_reports_memory_and_cpus() {
        let sampler = HostSampler::new();
        let items = sampler.sample().await.unwrap();

        for name in ["TotalMemory", "FreeMemory", "UsedMemory"] {
            let item = find(&items, name).unwrap();
            assert_eq!(item.kind, MetricKind::Gauge);
        }
        assert!(find(&items, "CPUutilization0").is_none());
        let cpus = items
            .iter()
            .filter(|item| item.id.starts_with("CPUutilization"))
            .count();
        if cpus > 0 {
            assert!(find(&items, "CPUutilization1").is_some());
        }
        assert_eq!(sampler.name(), "host");
    }
}
