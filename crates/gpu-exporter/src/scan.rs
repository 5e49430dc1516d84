//! One full collection pass over every device.

use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use tokio_util::sync::CancellationToken;

use crate::error::DeviceError;
use crate::error::FieldExtractionError;
use crate::error::ScanError;
use crate::library::LibraryError;
use crate::library::LibraryLoader;
use crate::sample::SampleSink;
use crate::sampler::DeviceSampler;
use crate::sampler::AVERAGE_WINDOW;
use crate::schema::MetricKey;
use crate::schema::MetricSchema;
use crate::session::NativeSession;

/// What happened during a scan that completed.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Devices reported by enumeration, including ones later skipped.
    pub device_count: u32,
    pub sampled_devices: u32,
    pub samples_emitted: usize,
    pub device_errors: Vec<DeviceError>,
    pub field_errors: Vec<FieldExtractionError>,
    pub driver_version_error: Option<LibraryError>,
}

/// Drives scans against devices provided by `B`.
///
/// Scans are synchronous. Concurrent calls are serialized by the session
/// lock for their whole open-to-close bracket.
pub struct ScanOrchestrator<B> {
    loader: B,
    schema: Arc<MetricSchema>,
    average_window: Duration,
}

impl<B: LibraryLoader> ScanOrchestrator<B> {
    pub fn new(loader: B, schema: Arc<MetricSchema>) -> Self {
        Self {
            loader,
            schema,
            average_window: AVERAGE_WINDOW,
        }
    }

    pub fn with_average_window(mut self, window: Duration) -> Self {
        self.average_window = window;
        self
    }

    pub fn schema(&self) -> &Arc<MetricSchema> {
        &self.schema
    }

    /// Runs one scan, pushing samples into `sink` as they are produced.
    ///
    /// `cancel` is checked before each device; samples already emitted stay
    /// valid when a scan is cancelled. The session is closed on every path
    /// once it has been opened.
    #[tracing::instrument(skip_all)]
    pub fn scan<S: SampleSink>(
        &self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, Report<ScanError>> {
        let session = NativeSession::open(&self.loader).inspect_err(|e| {
            tracing::error!("Couldn't open device library session: {e:?}");
        })?;

        let outcome = self.scan_devices(&session, sink, cancel);

        if let Err(e) = session.close() {
            tracing::warn!("Failed to close device library session: {e}");
        }

        outcome
    }

    fn scan_devices<S: SampleSink>(
        &self,
        session: &NativeSession<B::Library>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<ScanReport, Report<ScanError>> {
        let device_count = session
            .device_count()
            .change_context(ScanError::Enumeration)
            .inspect_err(|e| tracing::error!("Device enumeration failed: {e:?}"))?;

        let mut report = ScanReport {
            device_count,
            ..Default::default()
        };

        // attempted count, not the number of devices that end up sampled
        let count_sample = self
            .schema
            .sample(MetricKey::DeviceCount, Vec::new(), device_count as f64);
        sink.emit(count_sample)
            .change_context(ScanError::SinkClosed)?;
        report.samples_emitted += 1;

        let driver_version = match session.driver_version() {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!("Driver version unavailable, omitting driver info: {e}");
                report.driver_version_error = Some(e);
                None
            }
        };

        let sampler = DeviceSampler::new(&self.schema).with_average_window(self.average_window);

        for index in 0..device_count {
            if cancel.is_cancelled() {
                tracing::info!("Scan cancelled before device {index}");
                return Err(Report::new(ScanError::Cancelled {
                    completed: index,
                    total: device_count,
                }));
            }

            let handle = match session.handle_at(index) {
                Ok(handle) => handle,
                Err(source) => {
                    let error = DeviceError::Unavailable { index, source };
                    tracing::warn!("Skipping device: {error}");
                    report.device_errors.push(error);
                    continue;
                }
            };

            match sampler.sample(index, &handle, driver_version.as_deref()) {
                Ok(device_samples) => {
                    for sample in device_samples.samples {
                        sink.emit(sample).change_context(ScanError::SinkClosed)?;
                        report.samples_emitted += 1;
                    }
                    report.field_errors.extend(device_samples.failures);
                    report.sampled_devices += 1;
                }
                Err(error) => {
                    tracing::warn!("Skipping device: {error}");
                    report.device_errors.push(error);
                }
            }
        }

        tracing::debug!(
            device_count = report.device_count,
            sampled_devices = report.sampled_devices,
            samples = report.samples_emitted,
            "scan finished"
        );
        Ok(report)
    }
}
