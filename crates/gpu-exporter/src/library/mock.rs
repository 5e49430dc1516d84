//! In-memory device library for tests.
//!
//! Every query can be made to fail per device, and the loader counts session
//! lifecycle calls so tests can assert on open/close pairing.

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::DeviceHandle;
use super::DeviceLibrary;
use super::DeviceQuery;
use super::LibraryError;
use super::LibraryLoader;
use super::MemoryInfo;
use super::Utilization;
use crate::sample::ProcessUsage;

/// Lifecycle counters shared between a loader and the libraries it loads.
#[derive(Debug, Default)]
pub struct CallCounters {
    opened: AtomicUsize,
    closed: AtomicUsize,
    count_queries: AtomicUsize,
    handle_queries: AtomicUsize,
}

impl CallCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn count_queries(&self) -> usize {
        self.count_queries.load(Ordering::SeqCst)
    }

    pub fn handle_queries(&self) -> usize {
        self.handle_queries.load(Ordering::SeqCst)
    }
}

/// A simulated GPU.
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub minor_number: u32,
    pub uuid: String,
    pub name: String,
    pub memory: MemoryInfo,
    pub power_usage: u32,
    pub temperature: u32,
    pub processes: Vec<ProcessUsage>,
    pub utilization: Utilization,
    pub average_utilization: u32,
    failing: HashSet<DeviceQuery>,
    unavailable: bool,
}

impl MockDevice {
    /// A device where every query succeeds, with values derived from `minor_number`.
    pub fn healthy(minor_number: u32) -> Self {
        Self {
            minor_number,
            uuid: format!("GPU-0000000{minor_number}-mock"),
            name: "NVIDIA A100-SXM4-40GB".to_string(),
            memory: MemoryInfo {
                total: 40 * 1024 * 1024 * 1024,
                used: (minor_number as u64 + 1) * 1024 * 1024 * 1024,
            },
            power_usage: 60_000 + minor_number * 1_000,
            temperature: 40 + minor_number,
            processes: Vec::new(),
            utilization: Utilization {
                gpu: 50 + minor_number,
                memory: 20 + minor_number,
            },
            average_utilization: 45 + minor_number,
            failing: HashSet::new(),
            unavailable: false,
        }
    }

    pub fn with_process(mut self, pid: u32, process_name: &str, used_memory_bytes: u64) -> Self {
        self.processes.push(ProcessUsage {
            pid,
            process_name: process_name.to_string(),
            used_memory_bytes,
        });
        self
    }

    /// Makes `query` fail on this device.
    pub fn failing(mut self, query: DeviceQuery) -> Self {
        self.failing.insert(query);
        self
    }

    /// Makes fetching the handle itself fail.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    fn check(&self, query: DeviceQuery) -> Result<(), LibraryError> {
        if self.failing.contains(&query) {
            Err(LibraryError::Driver(format!("mock {query} failure")))
        } else {
            Ok(())
        }
    }
}

impl DeviceHandle for &MockDevice {
    fn minor_number(&self) -> Result<u32, LibraryError> {
        self.check(DeviceQuery::MinorNumber)?;
        Ok(self.minor_number)
    }

    fn uuid(&self) -> Result<String, LibraryError> {
        self.check(DeviceQuery::Uuid)?;
        Ok(self.uuid.clone())
    }

    fn name(&self) -> Result<String, LibraryError> {
        self.check(DeviceQuery::Name)?;
        Ok(self.name.clone())
    }

    fn memory_info(&self) -> Result<MemoryInfo, LibraryError> {
        self.check(DeviceQuery::MemoryInfo)?;
        Ok(self.memory)
    }

    fn power_usage(&self) -> Result<u32, LibraryError> {
        self.check(DeviceQuery::PowerUsage)?;
        Ok(self.power_usage)
    }

    fn temperature(&self) -> Result<u32, LibraryError> {
        self.check(DeviceQuery::Temperature)?;
        Ok(self.temperature)
    }

    fn processes(&self) -> Result<Vec<ProcessUsage>, LibraryError> {
        self.check(DeviceQuery::Processes)?;
        Ok(self.processes.clone())
    }

    fn utilization(&self) -> Result<Utilization, LibraryError> {
        self.check(DeviceQuery::Utilization)?;
        Ok(self.utilization)
    }

    fn average_utilization(&self, window: Duration) -> Result<u32, LibraryError> {
        if self.failing.contains(&DeviceQuery::AverageUtilization) {
            return Err(LibraryError::NoSamples(window));
        }
        Ok(self.average_utilization)
    }
}

/// Loader handing out [`MockLibrary`] sessions over a fixed device list.
#[derive(Debug, Clone)]
pub struct MockLoader {
    devices: Arc<Vec<MockDevice>>,
    init_error: Option<String>,
    transient_init_failures: Arc<AtomicUsize>,
    load_delay: Duration,
    count_error: Option<String>,
    driver_version: Option<String>,
    calls: Arc<CallCounters>,
}

impl MockLoader {
    pub fn new(devices: Vec<MockDevice>) -> Self {
        Self {
            devices: Arc::new(devices),
            init_error: None,
            transient_init_failures: Arc::default(),
            load_delay: Duration::ZERO,
            count_error: None,
            driver_version: Some("550.54.15".to_string()),
            calls: Arc::default(),
        }
    }

    pub fn failing_init(mut self, message: &str) -> Self {
        self.init_error = Some(message.to_string());
        self
    }

    /// Fails the next `attempts` loads, then behaves normally.
    pub fn failing_init_times(self, attempts: usize) -> Self {
        self.transient_init_failures.store(attempts, Ordering::SeqCst);
        self
    }

    /// Blocks every load for `delay`, simulating a hung driver.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing_count(mut self, message: &str) -> Self {
        self.count_error = Some(message.to_string());
        self
    }

    pub fn without_driver_version(mut self) -> Self {
        self.driver_version = None;
        self
    }

    pub fn calls(&self) -> &CallCounters {
        &self.calls
    }
}

impl LibraryLoader for MockLoader {
    type Library = MockLibrary;

    fn load(&self) -> Result<MockLibrary, LibraryError> {
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        if let Some(message) = &self.init_error {
            return Err(LibraryError::Driver(message.clone()));
        }
        let transient = self.transient_init_failures.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |left| left.checked_sub(1),
        );
        if transient.is_ok() {
            return Err(LibraryError::Driver("driver not loaded yet".to_string()));
        }
        self.calls.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockLibrary {
            loader: self.clone(),
        })
    }
}

#[derive(Debug)]
pub struct MockLibrary {
    loader: MockLoader,
}

impl DeviceLibrary for MockLibrary {
    type Device<'a> = &'a MockDevice;

    fn device_count(&self) -> Result<u32, LibraryError> {
        self.loader.calls.count_queries.fetch_add(1, Ordering::SeqCst);
        match &self.loader.count_error {
            Some(message) => Err(LibraryError::Driver(message.clone())),
            None => Ok(self.loader.devices.len() as u32),
        }
    }

    fn device_by_index(&self, index: u32) -> Result<&MockDevice, LibraryError> {
        self.loader.calls.handle_queries.fetch_add(1, Ordering::SeqCst);
        match self.loader.devices.get(index as usize) {
            Some(device) if !device.unavailable => Ok(device),
            Some(_) => Err(LibraryError::Driver(format!("device {index} is lost"))),
            None => Err(LibraryError::Driver(format!("invalid device index {index}"))),
        }
    }

    fn driver_version(&self) -> Result<String, LibraryError> {
        self.loader
            .driver_version
            .clone()
            .ok_or_else(|| LibraryError::Driver("driver version not reported".to_string()))
    }

    fn shutdown(self) -> Result<(), LibraryError> {
        self.loader.calls.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
