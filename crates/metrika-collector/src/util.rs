use crate::Collector;
use anyhow::Result;
use metrika_common::Metric;
use sysinfo::System;

/// Per-core gauges are named `CPUutilization1`, `CPUutilization2`, ...
pub const CPU_UTILIZATION_PREFIX: &str = "CPUutilization";

/// Host memory and per-core CPU utilisation.
pub struct UtilCollector {
    system: System,
}

impl UtilCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta between two refreshes
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for UtilCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for UtilCollector {
    fn name(&self) -> &str {
        "util"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let mut metrics = vec![
            Metric::gauge("TotalMemory", self.system.total_memory() as f64),
            Metric::gauge("FreeMemory", self.system.free_memory() as f64),
        ];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("{CPU_UTILIZATION_PREFIX}{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(metrics)
    }
}
