use std::ffi::OsString;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use nvml_wrapper::enum_wrappers::device::Sampling;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::enums::device::SampleValue;
use nvml_wrapper::enums::device::UsedGpuMemory;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;

use super::DeviceHandle;
use super::DeviceLibrary;
use super::LibraryError;
use super::LibraryLoader;
use super::MemoryInfo;
use super::Utilization;
use crate::sample::ProcessUsage;

pub const DEFAULT_LIB_PATH: &str = "libnvidia-ml.so.1";

/// Longest process name requested from NVML.
const PROCESS_NAME_LENGTH: usize = 64;

/// Loads NVML from the default search path, falling back to an explicit
/// library path.
#[derive(Debug, Clone)]
pub struct NvmlLoader {
    lib_path: OsString,
}

impl NvmlLoader {
    pub fn new(lib_path: impl Into<OsString>) -> Self {
        Self {
            lib_path: lib_path.into(),
        }
    }
}

impl Default for NvmlLoader {
    fn default() -> Self {
        Self::new(DEFAULT_LIB_PATH)
    }
}

impl LibraryLoader for NvmlLoader {
    type Library = NvmlLibrary;

    fn load(&self) -> Result<NvmlLibrary, LibraryError> {
        let nvml = match Nvml::init() {
            Ok(nvml) => nvml,
            Err(e) => {
                tracing::debug!("Standard NVML init failed ({e}), trying {:?}", self.lib_path);
                Nvml::builder().lib_path(&self.lib_path).init()?
            }
        };
        Ok(NvmlLibrary { nvml })
    }
}

pub struct NvmlLibrary {
    nvml: Nvml,
}

impl DeviceLibrary for NvmlLibrary {
    type Device<'a> = NvmlDevice<'a>;

    fn device_count(&self) -> Result<u32, LibraryError> {
        Ok(self.nvml.device_count()?)
    }

    fn device_by_index(&self, index: u32) -> Result<NvmlDevice<'_>, LibraryError> {
        Ok(NvmlDevice {
            nvml: &self.nvml,
            device: self.nvml.device_by_index(index)?,
        })
    }

    fn driver_version(&self) -> Result<String, LibraryError> {
        Ok(self.nvml.sys_driver_version()?)
    }

    fn shutdown(self) -> Result<(), LibraryError> {
        Ok(self.nvml.shutdown()?)
    }
}

pub struct NvmlDevice<'nvml> {
    nvml: &'nvml Nvml,
    device: Device<'nvml>,
}

impl DeviceHandle for NvmlDevice<'_> {
    #[cfg(target_os = "linux")]
    fn minor_number(&self) -> Result<u32, LibraryError> {
        Ok(self.device.minor_number()?)
    }

    #[cfg(not(target_os = "linux"))]
    fn minor_number(&self) -> Result<u32, LibraryError> {
        Err(LibraryError::Driver(
            "minor numbers are only reported on linux".to_string(),
        ))
    }

    fn uuid(&self) -> Result<String, LibraryError> {
        Ok(self.device.uuid()?)
    }

    fn name(&self) -> Result<String, LibraryError> {
        Ok(self.device.name()?)
    }

    fn memory_info(&self) -> Result<MemoryInfo, LibraryError> {
        let memory_info = self.device.memory_info()?;
        Ok(MemoryInfo {
            total: memory_info.total,
            used: memory_info.used,
        })
    }

    fn power_usage(&self) -> Result<u32, LibraryError> {
        Ok(self.device.power_usage()?)
    }

    fn temperature(&self) -> Result<u32, LibraryError> {
        Ok(self.device.temperature(TemperatureSensor::Gpu)?)
    }

    fn processes(&self) -> Result<Vec<ProcessUsage>, LibraryError> {
        let processes = self.device.running_compute_processes()?;
        Ok(processes
            .into_iter()
            .filter_map(|process| {
                let name = self.nvml.sys_process_name(process.pid, PROCESS_NAME_LENGTH);
                resolve_process(process.pid, process.used_gpu_memory, name)
            })
            .collect())
    }

    fn utilization(&self) -> Result<Utilization, LibraryError> {
        let utilization = self.device.utilization_rates()?;
        Ok(Utilization {
            gpu: utilization.gpu,
            memory: utilization.memory,
        })
    }

    fn average_utilization(&self, window: Duration) -> Result<u32, LibraryError> {
        // NVML keeps a ring buffer of utilization samples; ask for the ones
        // newer than the window start (microseconds since the epoch)
        let since = SystemTime::now()
            .checked_sub(window)
            .and_then(|start| start.duration_since(UNIX_EPOCH).ok())
            .map(|start| start.as_micros() as u64)
            .unwrap_or(0);

        let samples = match self.device.samples(Sampling::GpuUtilization, since) {
            Ok(samples) => samples,
            Err(NvmlError::NotFound) => return Err(LibraryError::NoSamples(window)),
            Err(e) => return Err(e.into()),
        };

        mean_utilization(samples.iter().map(|sample| sample_as_f64(&sample.value)))
            .ok_or(LibraryError::NoSamples(window))
    }
}

/// Keeps a process only when both its memory and its name resolve; one
/// unresolvable process never hides the others.
fn resolve_process(
    pid: u32,
    used_gpu_memory: UsedGpuMemory,
    name: Result<String, NvmlError>,
) -> Option<ProcessUsage> {
    let used_memory_bytes = match used_gpu_memory {
        UsedGpuMemory::Used(bytes) => bytes,
        UsedGpuMemory::Unavailable => {
            tracing::debug!(pid, "Skipping process: memory usage not reported");
            return None;
        }
    };
    // processes in other containers are not always resolvable
    let process_name = match name {
        Ok(name) if !name.is_empty() => name,
        Ok(_) => {
            tracing::debug!(pid, "Skipping process: empty process name");
            return None;
        }
        Err(e) => {
            tracing::debug!(pid, "Skipping process: name unavailable: {e}");
            return None;
        }
    };
    Some(ProcessUsage {
        pid,
        process_name,
        used_memory_bytes,
    })
}

fn sample_as_f64(value: &SampleValue) -> f64 {
    match *value {
        SampleValue::F64(v) => v,
        SampleValue::U32(v) => v as f64,
        SampleValue::U64(v) => v as f64,
        SampleValue::I64(v) => v as f64,
    }
}

/// Integer mean of the sampled percentages, `None` for an empty window.
fn mean_utilization(values: impl Iterator<Item = f64>) -> Option<u32> {
    let (sum, count) = values.fold((0.0, 0u32), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| (sum / count as f64) as u32)
}
