use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::library::nvml::NvmlLoader;
use crate::library::nvml::DEFAULT_LIB_PATH;
use crate::scan::ScanOrchestrator;
use crate::schema::MetricSchema;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan GPUs periodically and append encoded samples to the metrics file
    Daemon(DaemonArgs),
    /// Run a single scan and print encoded samples to stdout
    Scan(ScanArgs),
}

/// Options shared by every command that scans devices.
#[derive(Args, Clone, Debug)]
pub struct CollectorArgs {
    #[arg(
        long,
        env = "GPU_EXPORTER_NAMESPACE",
        default_value = "nvidia",
        help = "Prefix for every metric name"
    )]
    pub namespace: String,

    #[arg(
        long,
        env = "GPU_EXPORTER_NVML_LIB_PATH",
        default_value = DEFAULT_LIB_PATH,
        help = "NVML library to load when the default search path fails"
    )]
    pub nvml_lib_path: PathBuf,

    #[arg(
        long,
        env = "GPU_EXPORTER_AVERAGE_WINDOW_SECS",
        default_value = "10",
        help = "Trailing window in seconds for the averaged GPU utilization"
    )]
    pub average_window_secs: u64,

    #[arg(
        long,
        env = "GPU_EXPORTER_METRICS_FORMAT",
        default_value = "influx",
        help = "Metrics format, either 'influx' or 'json'"
    )]
    pub metrics_format: String,
}

impl CollectorArgs {
    /// Builds an NVML-backed orchestrator from these options.
    pub fn orchestrator(&self) -> ScanOrchestrator<NvmlLoader> {
        let schema = Arc::new(MetricSchema::new(&self.namespace));
        ScanOrchestrator::new(NvmlLoader::new(self.nvml_lib_path.as_os_str()), schema)
            .with_average_window(Duration::from_secs(self.average_window_secs))
    }
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub collector: CollectorArgs,

    #[arg(
        long,
        env = "GPU_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/logs/gpu-metrics.log",
        help = "Path for writing encoded GPU samples, rotated daily"
    )]
    pub metrics_file: PathBuf,

    #[arg(
        long,
        env = "GPU_EXPORTER_SCAN_INTERVAL_SECS",
        default_value = "15",
        help = "Seconds between the start of two scans"
    )]
    pub scan_interval_secs: u64,

    #[arg(
        long,
        env = "GPU_EXPORTER_SCAN_TIMEOUT_SECS",
        default_value = "10",
        help = "Seconds before a running scan is abandoned"
    )]
    pub scan_timeout_secs: u64,
}

#[derive(Parser, Clone, Debug)]
pub struct ScanArgs {
    #[command(flatten)]
    pub collector: CollectorArgs,

    #[arg(
        long,
        env = "GPU_EXPORTER_SCAN_TIMEOUT_SECS",
        default_value = "10",
        help = "Seconds before the scan is abandoned"
    )]
    pub scan_timeout_secs: u64,
}

/// Scheduling settings for [`crate::exporter::Exporter`].
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub scan_interval: Duration,
    pub scan_timeout: Duration,
}

impl From<&DaemonArgs> for ExporterConfig {
    fn from(args: &DaemonArgs) -> Self {
        Self {
            scan_interval: Duration::from_secs(args.scan_interval_secs.max(1)),
            scan_timeout: Duration::from_secs(args.scan_timeout_secs.max(1)),
        }
    }
}

impl From<&ScanArgs> for ExporterConfig {
    fn from(args: &ScanArgs) -> Self {
        Self {
            scan_interval: Duration::ZERO,
            scan_timeout: Duration::from_secs(args.scan_timeout_secs.max(1)),
        }
    }
}
