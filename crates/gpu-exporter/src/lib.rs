//! Polling GPU metrics collector.
//!
//! A [`scan::ScanOrchestrator`] opens one device library session per scan,
//! samples every device through a [`sampler::DeviceSampler`] and pushes the
//! resulting [`sample::Sample`]s into a [`sample::SampleSink`]. The
//! [`exporter::Exporter`] drives scans periodically and writes them out with
//! one of the [`encoders`].

pub mod config;
pub mod encoders;
pub mod error;
pub mod exporter;
pub mod library;
pub mod logging;
pub mod runtime;
pub mod sample;
pub mod sampler;
pub mod scan;
pub mod schema;
pub mod session;

pub use error::ScanError;
pub use sample::Sample;
pub use sample::SampleSink;
pub use scan::ScanOrchestrator;
pub use scan::ScanReport;
pub use schema::MetricSchema;
