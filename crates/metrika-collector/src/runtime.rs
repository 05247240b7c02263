use crate::Collector;
use anyhow::Result;
use metrika_common::Metric;
use rand::Rng;
use std::alloc::{GlobalAlloc, Layout, System as SystemAlloc};
use std::sync::atomic::{AtomicU64, Ordering};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Names of the memory-management gauges reported every poll.
pub const RUNTIME_GAUGES: [&str; 27] = [
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
];

pub const RANDOM_VALUE: &str = "RandomValue";

/// Global allocator wrapper that keeps allocation statistics.
///
/// Install it in a binary with
/// `#[global_allocator] static ALLOC: CountingAllocator = CountingAllocator::new();`.
pub struct CountingAllocator {
    mallocs: AtomicU64,
    frees: AtomicU64,
    live_bytes: AtomicU64,
    total_bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

impl CountingAllocator {
    pub const fn new() -> Self {
        Self {
            mallocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            live_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            mallocs: self.mallocs.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
        }
    }

    fn record_alloc(&self, size: usize) {
        let size = size as u64;
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
    }

    fn record_free(&self, size: usize) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(size as u64, Ordering::Relaxed);
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc(layout);
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = SystemAlloc.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        SystemAlloc.dealloc(ptr, layout);
        self.record_free(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = SystemAlloc.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            self.record_free(layout.size());
            self.record_alloc(new_size);
        }
        new_ptr
    }
}

/// Point-in-time copy of the allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub mallocs: u64,
    pub frees: u64,
    pub live_bytes: u64,
    pub total_bytes: u64,
    pub peak_bytes: u64,
}

/// Samples allocator counters and process memory into the runtime gauge set,
/// plus a [`RANDOM_VALUE`] gauge in `[0.1, 99.99]`.
///
/// There is no collector in this runtime, so the GC-related gauges
/// (`NumGC`, `PauseTotalNs`, `NextGC`, ...) are always zero.
pub struct RuntimeCollector {
    allocator: Option<&'static CountingAllocator>,
    system: System,
    pid: Option<Pid>,
}

impl RuntimeCollector {
    pub fn new(allocator: Option<&'static CountingAllocator>) -> Self {
        Self {
            allocator,
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn process_memory(&mut self) -> (u64, u64) {
        let Some(pid) = self.pid else {
            return (0, 0);
        };
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        self.system
            .process(pid)
            .map(|p| (p.memory(), p.virtual_memory()))
            .unwrap_or((0, 0))
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        let alloc = self.allocator.map(|a| a.stats()).unwrap_or_default();
        let (resident, _virtual) = self.process_memory();

        let heap_sys = alloc.peak_bytes;
        let heap_inuse = alloc.live_bytes;
        let sys = resident.max(heap_sys);

        let value = |name: &str| -> f64 {
            match name {
                "Alloc" | "HeapAlloc" | "HeapInuse" => heap_inuse as f64,
                "TotalAlloc" => alloc.total_bytes as f64,
                "Mallocs" => alloc.mallocs as f64,
                "Frees" => alloc.frees as f64,
                "HeapObjects" => alloc.mallocs.saturating_sub(alloc.frees) as f64,
                "HeapSys" => heap_sys as f64,
                "HeapIdle" => heap_sys.saturating_sub(heap_inuse) as f64,
                "Sys" => sys as f64,
                "OtherSys" => sys.saturating_sub(heap_sys) as f64,
                _ => 0.0,
            }
        };

        let mut metrics: Vec<Metric> = RUNTIME_GAUGES
            .iter()
            .map(|name| Metric::gauge(*name, value(name)))
            .collect();
        metrics.push(Metric::gauge(
            RANDOM_VALUE,
            rand::thread_rng().gen_range(0.1..=99.99),
        ));
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrika_common::MetricValue;

    static TRACKED: CountingAllocator = CountingAllocator::new();

    #[test]
    fn allocator_counts_alloc_and_free() {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let before = TRACKED.stats();
        unsafe {
            let p = TRACKED.alloc(layout);
            assert!(!p.is_null());
            TRACKED.dealloc(p, layout);
        }
        let after = TRACKED.stats();
        assert_eq!(after.mallocs - before.mallocs, 1);
        assert_eq!(after.frees - before.frees, 1);
        assert_eq!(after.total_bytes - before.total_bytes, 64);
        assert_eq!(after.live_bytes, before.live_bytes);
        assert!(after.peak_bytes >= 64);
    }

    #[test]
    fn reports_every_runtime_gauge_and_random_value() {
        let mut collector = RuntimeCollector::new(Some(&TRACKED));
        let metrics = collector.collect().unwrap();
        assert_eq!(metrics.len(), RUNTIME_GAUGES.len() + 1);
        for name in RUNTIME_GAUGES {
            assert!(metrics.iter().any(|m| m.name == name), "missing {name}");
        }
        let random = metrics.iter().find(|m| m.name == RANDOM_VALUE).unwrap();
        match random.value {
            MetricValue::Gauge(v) => assert!((0.1..=99.99).contains(&v)),
            MetricValue::Counter(_) => panic!("RandomValue must be a gauge"),
        }
    }

    #[test]
    fn gc_gauges_are_zero() {
        let mut collector = RuntimeCollector::new(None);
        let metrics = collector.collect().unwrap();
        for name in ["NumGC", "PauseTotalNs", "NextGC", "GCCPUFraction"] {
            let m = metrics.iter().find(|m| m.name == name).unwrap();
            assert_eq!(m.value, MetricValue::Gauge(0.0));
        }
    }
}
