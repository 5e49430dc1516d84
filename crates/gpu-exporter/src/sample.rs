use std::sync::Arc;

use crate::schema::MetricDescriptor;
use crate::schema::MetricKind;

/// Identity of a physical GPU, resolved fresh on every scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub minor_number: u32,
    pub uuid: String,
    pub name: String,
}

impl Device {
    /// Label values in the `minor_number, uuid, name` order shared by every
    /// per-device descriptor.
    pub fn labels(&self) -> Vec<String> {
        vec![
            self.minor_number.to_string(),
            self.uuid.clone(),
            self.name.clone(),
        ]
    }
}

/// Memory held by one process on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessUsage {
    pub pid: u32,
    pub process_name: String,
    pub used_memory_bytes: u64,
}

/// One fully resolved metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub descriptor: Arc<MetricDescriptor>,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn kind(&self) -> MetricKind {
        self.descriptor.kind
    }

    /// Label name/value pairs in descriptor order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.descriptor
            .label_names
            .iter()
            .copied()
            .zip(self.label_values.iter().map(String::as_str))
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

/// The consumer of a scan went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
#[display("sample sink closed")]
pub struct SinkClosed;

impl core::error::Error for SinkClosed {}

/// Receives samples as the scan produces them.
pub trait SampleSink {
    fn emit(&mut self, sample: Sample) -> Result<(), SinkClosed>;
}

impl SampleSink for Vec<Sample> {
    fn emit(&mut self, sample: Sample) -> Result<(), SinkClosed> {
        self.push(sample);
        Ok(())
    }
}

impl SampleSink for std::sync::mpsc::Sender<Sample> {
    fn emit(&mut self, sample: Sample) -> Result<(), SinkClosed> {
        self.send(sample).map_err(|_| SinkClosed)
    }
}

impl SampleSink for tokio::sync::mpsc::UnboundedSender<Sample> {
    fn emit(&mut self, sample: Sample) -> Result<(), SinkClosed> {
        self.send(sample).map_err(|_| SinkClosed)
    }
}
