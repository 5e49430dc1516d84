//! Capability interface over the native device-management library.
//!
//! Scanning code only talks to these traits; [`nvml`] binds them to NVML and
//! [`mock`] provides an in-memory backend for tests.

use std::time::Duration;

use nvml_wrapper::error::NvmlError;

use crate::sample::Device;
use crate::sample::ProcessUsage;

pub mod mock;
pub mod nvml;

/// Errors reported by the device library.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("NVML call failed: {0}")]
    Nvml(#[from] NvmlError),
    #[error("no samples reported in the last {0:?}")]
    NoSamples(Duration),
    #[error("library session already closed")]
    SessionClosed,
    #[error("{0}")]
    Driver(String),
}

/// Every query issued against a single device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum DeviceQuery {
    #[display("minor_number")]
    MinorNumber,
    #[display("uuid")]
    Uuid,
    #[display("name")]
    Name,
    #[display("memory_info")]
    MemoryInfo,
    #[display("power_usage")]
    PowerUsage,
    #[display("temperature")]
    Temperature,
    #[display("processes")]
    Processes,
    #[display("utilization")]
    Utilization,
    #[display("average_utilization")]
    AverageUtilization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Utilization {
    /// Percent of time a kernel was executing.
    pub gpu: u32,
    /// Percent of time device memory was read or written.
    pub memory: u32,
}

/// Produces an initialized library; one call per session.
pub trait LibraryLoader: Send + Sync {
    type Library: DeviceLibrary;

    fn load(&self) -> Result<Self::Library, LibraryError>;
}

/// An initialized device library.
///
/// Device handles borrow the library, so a handle is only usable while the
/// library it came from is alive.
pub trait DeviceLibrary {
    type Device<'a>: DeviceHandle
    where
        Self: 'a;

    fn device_count(&self) -> Result<u32, LibraryError>;

    fn device_by_index(&self, index: u32) -> Result<Self::Device<'_>, LibraryError>;

    /// Globally reported driver version.
    fn driver_version(&self) -> Result<String, LibraryError>;

    /// Releases the native library.
    fn shutdown(self) -> Result<(), LibraryError>;
}

pub trait DeviceHandle {
    fn minor_number(&self) -> Result<u32, LibraryError>;

    fn uuid(&self) -> Result<String, LibraryError>;

    fn name(&self) -> Result<String, LibraryError>;

    fn memory_info(&self) -> Result<MemoryInfo, LibraryError>;

    /// Instantaneous power draw in milliwatts.
    fn power_usage(&self) -> Result<u32, LibraryError>;

    /// Die temperature in degrees celsius.
    fn temperature(&self) -> Result<u32, LibraryError>;

    fn processes(&self) -> Result<Vec<ProcessUsage>, LibraryError>;

    fn utilization(&self) -> Result<Utilization, LibraryError>;

    /// GPU utilization averaged by the library over the trailing `window`.
    fn average_utilization(&self, window: Duration) -> Result<u32, LibraryError>;

    /// Resolves the identity labels, stopping at the first failed query.
    fn identity(&self) -> Result<Device, (DeviceQuery, LibraryError)> {
        let minor_number = self
            .minor_number()
            .map_err(|e| (DeviceQuery::MinorNumber, e))?;
        let uuid = self.uuid().map_err(|e| (DeviceQuery::Uuid, e))?;
        let name = self.name().map_err(|e| (DeviceQuery::Name, e))?;

        Ok(Device {
            minor_number,
            uuid,
            name,
        })
    }
}
