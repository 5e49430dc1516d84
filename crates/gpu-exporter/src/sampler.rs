//! Per-device telemetry extraction.
//!
//! Identity (minor number, uuid, name) is required: those values label almost
//! every sample, so a device without them produces nothing. Every other field
//! is read independently and a failure drops only that field's samples.

use std::time::Duration;

use crate::error::DeviceError;
use crate::error::FieldExtractionError;
use crate::library::DeviceHandle;
use crate::library::DeviceQuery;
use crate::library::LibraryError;
use crate::sample::Device;
use crate::sample::Sample;
use crate::schema::MetricKey;
use crate::schema::MetricSchema;

/// Trailing window for the averaged GPU utilization.
pub const AVERAGE_WINDOW: Duration = Duration::from_secs(10);

/// Everything extracted from one identified device.
#[derive(Debug)]
pub struct DeviceSamples {
    pub device: Device,
    pub samples: Vec<Sample>,
    pub failures: Vec<FieldExtractionError>,
}

/// Outcome of reading one telemetry field.
enum FieldOutcome {
    Samples(Vec<Sample>),
    Failed(DeviceQuery, LibraryError),
}

impl FieldOutcome {
    fn read<T>(
        query: DeviceQuery,
        result: Result<T, LibraryError>,
        into_samples: impl FnOnce(T) -> Vec<Sample>,
    ) -> Self {
        match result {
            Ok(value) => FieldOutcome::Samples(into_samples(value)),
            Err(e) => FieldOutcome::Failed(query, e),
        }
    }
}

pub struct DeviceSampler<'a> {
    schema: &'a MetricSchema,
    average_window: Duration,
}

impl<'a> DeviceSampler<'a> {
    pub fn new(schema: &'a MetricSchema) -> Self {
        Self {
            schema,
            average_window: AVERAGE_WINDOW,
        }
    }

    pub fn with_average_window(mut self, window: Duration) -> Self {
        self.average_window = window;
        self
    }

    /// Reads every field of the device at `index`.
    ///
    /// `driver_version` is the session-wide version, `None` when it could not
    /// be read; in that case no `driver_info` sample is produced.
    #[tracing::instrument(level = "debug", skip(self, handle, driver_version))]
    pub fn sample<H: DeviceHandle>(
        &self,
        index: u32,
        handle: &H,
        driver_version: Option<&str>,
    ) -> Result<DeviceSamples, DeviceError> {
        let device = handle
            .identity()
            .map_err(|(query, source)| DeviceError::Identity {
                index,
                query,
                source,
            })?;
        let labels = device.labels();
        let schema = self.schema;

        let mut samples = Vec::new();
        if let Some(version) = driver_version {
            let mut driver_labels = labels.clone();
            driver_labels.push(version.to_string());
            samples.push(schema.sample(MetricKey::DriverInfo, driver_labels, 0.0));
        }

        let gauge = |key: MetricKey, value: f64| schema.sample(key, labels.clone(), value);

        let outcomes = [
            FieldOutcome::read(DeviceQuery::MemoryInfo, handle.memory_info(), |memory| {
                vec![
                    gauge(MetricKey::MemoryUsed, memory.used as f64),
                    gauge(MetricKey::MemoryTotal, memory.total as f64),
                ]
            }),
            FieldOutcome::read(DeviceQuery::PowerUsage, handle.power_usage(), |milliwatts| {
                vec![gauge(MetricKey::PowerUsage, milliwatts as f64)]
            }),
            FieldOutcome::read(DeviceQuery::Temperature, handle.temperature(), |celsius| {
                vec![gauge(MetricKey::Temperature, celsius as f64)]
            }),
            FieldOutcome::read(DeviceQuery::Processes, handle.processes(), |processes| {
                let minor = device.minor_number.to_string();
                processes
                    .into_iter()
                    .map(|process| {
                        schema.sample(
                            MetricKey::ProcessInfo,
                            vec![minor.clone(), process.pid.to_string(), process.process_name],
                            process.used_memory_bytes as f64,
                        )
                    })
                    .collect()
            }),
            FieldOutcome::read(DeviceQuery::Utilization, handle.utilization(), |utilization| {
                vec![
                    gauge(MetricKey::UtilizationGpu, utilization.gpu as f64),
                    gauge(MetricKey::UtilizationMemory, utilization.memory as f64),
                ]
            }),
            FieldOutcome::read(
                DeviceQuery::AverageUtilization,
                handle.average_utilization(self.average_window),
                |average| vec![gauge(MetricKey::UtilizationGpuAverage, average as f64)],
            ),
        ];

        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                FieldOutcome::Samples(field_samples) => samples.extend(field_samples),
                FieldOutcome::Failed(query, source) => {
                    tracing::warn!(
                        device_index = index,
                        uuid = %device.uuid,
                        "Skipping {query}: {source}"
                    );
                    failures.push(FieldExtractionError {
                        index,
                        minor_number: device.minor_number,
                        query,
                        source,
                    });
                }
            }
        }

        Ok(DeviceSamples {
            device,
            samples,
            failures,
        })
    }
}
