//! Static metric definitions exported by the collector.
//!
//! The schema is built once at startup and shared immutably; every sample
//! references one of its descriptors, which pins the metric name and the
//! order label values are supplied in.

use std::sync::Arc;

use crate::sample::Sample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[display("counter")]
    Counter,
    #[display("gauge")]
    Gauge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: String,
    pub help: &'static str,
    pub label_names: &'static [&'static str],
    pub kind: MetricKind,
}

pub const DEVICE_LABELS: &[&str] = &["minor_number", "uuid", "name"];
pub const DRIVER_INFO_LABELS: &[&str] = &["minor_number", "uuid", "name", "version"];
pub const PROCESS_LABELS: &[&str] = &["minor_number", "pid", "process_name"];

const METRIC_COUNT: usize = 10;

/// Logical metric keys, in exposition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    DeviceCount,
    DriverInfo,
    MemoryUsed,
    MemoryTotal,
    PowerUsage,
    Temperature,
    ProcessInfo,
    UtilizationGpu,
    UtilizationMemory,
    UtilizationGpuAverage,
}

impl MetricKey {
    pub const ALL: [MetricKey; METRIC_COUNT] = [
        MetricKey::DeviceCount,
        MetricKey::DriverInfo,
        MetricKey::MemoryUsed,
        MetricKey::MemoryTotal,
        MetricKey::PowerUsage,
        MetricKey::Temperature,
        MetricKey::ProcessInfo,
        MetricKey::UtilizationGpu,
        MetricKey::UtilizationMemory,
        MetricKey::UtilizationGpuAverage,
    ];

    /// Metric name without the namespace prefix.
    pub const fn key(self) -> &'static str {
        match self {
            MetricKey::DeviceCount => "device_count",
            MetricKey::DriverInfo => "driver_info",
            MetricKey::MemoryUsed => "memory_used",
            MetricKey::MemoryTotal => "memory_total",
            MetricKey::PowerUsage => "power_usage",
            MetricKey::Temperature => "temperature",
            MetricKey::ProcessInfo => "process_info",
            MetricKey::UtilizationGpu => "utilization_gpu",
            MetricKey::UtilizationMemory => "utilization_memory",
            MetricKey::UtilizationGpuAverage => "utilization_gpu_average",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    fn help(self) -> &'static str {
        match self {
            MetricKey::DeviceCount => "Number of GPU devices.",
            MetricKey::DriverInfo => "NVIDIA driver version, carried as a label. Value is always 0.",
            MetricKey::MemoryUsed => "Memory used by the GPU device in bytes.",
            MetricKey::MemoryTotal => "Total memory of the GPU device in bytes.",
            MetricKey::PowerUsage => "Power usage of the GPU device in milliwatts.",
            MetricKey::Temperature => "Temperature of the GPU device in celsius.",
            MetricKey::ProcessInfo => "Memory used by a process running on the GPU device in bytes.",
            MetricKey::UtilizationGpu => {
                "Percent of time over the past sample period during which one or more kernels were executing on the GPU device."
            }
            MetricKey::UtilizationMemory => {
                "Percent of time over the past sample period during which device memory was being read or written."
            }
            MetricKey::UtilizationGpuAverage => {
                "GPU utilization as reported by the device, averaged over the trailing window."
            }
        }
    }

    fn label_names(self) -> &'static [&'static str] {
        match self {
            MetricKey::DeviceCount => &[],
            MetricKey::DriverInfo => DRIVER_INFO_LABELS,
            MetricKey::ProcessInfo => PROCESS_LABELS,
            _ => DEVICE_LABELS,
        }
    }

    fn kind(self) -> MetricKind {
        match self {
            MetricKey::DeviceCount | MetricKey::DriverInfo => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }
}

/// Immutable mapping from [`MetricKey`] to its descriptor.
#[derive(Debug)]
pub struct MetricSchema {
    descriptors: [Arc<MetricDescriptor>; METRIC_COUNT],
}

impl MetricSchema {
    /// Builds all descriptors, prefixing names with `namespace` when it is
    /// not empty.
    pub fn new(namespace: &str) -> Self {
        let descriptors = MetricKey::ALL.map(|key| {
            let name = if namespace.is_empty() {
                key.key().to_string()
            } else {
                format!("{namespace}_{}", key.key())
            };
            Arc::new(MetricDescriptor {
                name,
                help: key.help(),
                label_names: key.label_names(),
                kind: key.kind(),
            })
        });
        Self { descriptors }
    }

    pub fn get(&self, key: MetricKey) -> &Arc<MetricDescriptor> {
        &self.descriptors[key.index()]
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<MetricDescriptor>> {
        self.descriptors.iter()
    }

    /// Builds a sample for `key`; `label_values` must follow the
    /// descriptor's label order.
    pub fn sample(&self, key: MetricKey, label_values: Vec<String>, value: f64) -> Sample {
        let descriptor = self.get(key);
        debug_assert_eq!(
            descriptor.label_names.len(),
            label_values.len(),
            "label arity mismatch for {}",
            descriptor.name
        );
        Sample {
            descriptor: Arc::clone(descriptor),
            label_values,
            value,
        }
    }
}

impl Default for MetricSchema {
    fn default() -> Self {
        Self::new("nvidia")
    }
}
