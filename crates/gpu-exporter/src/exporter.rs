//! Periodic scans written out as encoded metric lines.
//!
//! Each scan runs on the blocking pool and streams samples back over a
//! channel. A scan that outlives its timeout is cancelled and abandoned; no
//! new scan starts until the abandoned one has returned, so at most one
//! session is ever open.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use error_stack::Report;
use error_stack::ResultExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ExporterConfig;
use crate::encoders::MetricsEncoder;
use crate::error::ExportError;
use crate::error::ScanError;
use crate::library::LibraryLoader;
use crate::sample::Sample;
use crate::scan::ScanOrchestrator;
use crate::scan::ScanReport;

const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(10);

type ScanTask = JoinHandle<Result<ScanReport, Report<ScanError>>>;

pub struct Exporter<B, W> {
    orchestrator: Arc<ScanOrchestrator<B>>,
    encoder: Box<dyn MetricsEncoder>,
    writer: W,
    config: ExporterConfig,
    abandoned: Option<ScanTask>,
}

impl<B, W> Exporter<B, W>
where
    B: LibraryLoader + 'static,
    W: Write + Send,
{
    pub fn new(
        orchestrator: ScanOrchestrator<B>,
        encoder: Box<dyn MetricsEncoder>,
        writer: W,
        config: ExporterConfig,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            encoder,
            writer,
            config,
            abandoned: None,
        }
    }

    /// Scans on every interval tick until `token` is cancelled.
    ///
    /// Failed scans are logged and retried on the next tick.
    pub async fn run(mut self, token: CancellationToken) {
        let mut interval =
            tokio::time::interval(self.config.scan_interval.max(MIN_SCAN_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval = ?self.config.scan_interval,
            timeout = ?self.config.scan_timeout,
            "Starting GPU metrics exporter"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("GPU metrics exporter cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.scan_once(&token).await {
                        Ok(_) => {}
                        Err(_) if token.is_cancelled() => {}
                        Err(e)
                            if matches!(e.current_context(), ExportError::PreviousScanRunning) =>
                        {
                            tracing::warn!("Skipping scan: {e}");
                        }
                        Err(e) => tracing::error!("GPU metrics scan failed: {e:?}"),
                    }
                }
            }
        }
    }

    /// Runs one scan and writes every sample it produced.
    ///
    /// All samples of a scan share one timestamp. Samples that arrived before
    /// a failure or timeout are still written.
    pub async fn scan_once(
        &mut self,
        token: &CancellationToken,
    ) -> Result<ScanReport, Report<ExportError>> {
        if let Some(previous) = self.abandoned.take() {
            if !previous.is_finished() {
                self.abandoned = Some(previous);
                return Err(Report::new(ExportError::PreviousScanRunning));
            }
        }

        let timestamp = unix_timestamp_nanos();
        let (tx, mut rx) = mpsc::unbounded_channel::<Sample>();
        let scan_token = token.child_token();
        let mut task: ScanTask = tokio::task::spawn_blocking({
            let orchestrator = self.orchestrator.clone();
            let scan_token = scan_token.clone();
            move || {
                let mut sink = tx;
                orchestrator.scan(&mut sink, &scan_token)
            }
        });

        let deadline = tokio::time::sleep(self.config.scan_timeout);
        tokio::pin!(deadline);

        let mut write_error = None;
        let joined = loop {
            tokio::select! {
                biased;
                Some(sample) = rx.recv() => {
                    if let Err(e) = self.write_sample(&sample, timestamp) {
                        write_error.get_or_insert(e);
                    }
                }
                joined = &mut task => break Some(joined),
                _ = &mut deadline => break None,
            }
        };

        let Some(joined) = joined else {
            scan_token.cancel();
            self.abandoned = Some(task);
            if let Err(e) = self.writer.flush() {
                tracing::warn!("Failed to flush metrics after scan timeout: {e}");
            }
            return Err(Report::new(ExportError::Timeout(self.config.scan_timeout)));
        };

        // the sender is gone once the task returned
        while let Ok(sample) = rx.try_recv() {
            if let Err(e) = self.write_sample(&sample, timestamp) {
                write_error.get_or_insert(e);
            }
        }
        let flushed = match write_error {
            Some(e) => Err(e),
            None => self.writer.flush(),
        };

        let report = joined
            .change_context(ExportError::Panicked)?
            .change_context(ExportError::Scan)?;
        flushed.change_context(ExportError::Write)?;

        tracing::info!(
            devices = report.device_count,
            sampled = report.sampled_devices,
            samples = report.samples_emitted,
            skipped_devices = report.device_errors.len(),
            failed_fields = report.field_errors.len(),
            "GPU scan completed"
        );
        Ok(report)
    }

    fn write_sample(&mut self, sample: &Sample, timestamp: i64) -> std::io::Result<()> {
        let line = self.encoder.encode_sample(sample, timestamp);
        self.writer.write_all(line.as_bytes())
    }
}

fn unix_timestamp_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default()
}
