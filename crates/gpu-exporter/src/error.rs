use core::error::Error;

use std::time::Duration;

use crate::library::DeviceQuery;
use crate::library::LibraryError;

/// Failures that end a scan. Used as the `error_stack::Report` context; the
/// library error that caused it stays attached as the report's source.
#[derive(Debug, PartialEq, Eq, derive_more::Display)]
pub enum ScanError {
    #[display("device library session unavailable")]
    SessionUnavailable,
    #[display("failed to enumerate devices")]
    Enumeration,
    #[display("scan cancelled after {completed} of {total} devices")]
    Cancelled { completed: u32, total: u32 },
    #[display("sample sink closed")]
    SinkClosed,
}

impl Error for ScanError {}

/// A device skipped entirely for this scan.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device {index} unavailable: {source}")]
    Unavailable { index: u32, source: LibraryError },
    #[error("device {index} identity query {query} failed: {source}")]
    Identity {
        index: u32,
        query: DeviceQuery,
        source: LibraryError,
    },
}

impl DeviceError {
    pub fn index(&self) -> u32 {
        match self {
            DeviceError::Unavailable { index, .. } | DeviceError::Identity { index, .. } => *index,
        }
    }
}

/// One telemetry field that could not be read; only its samples are dropped.
#[derive(Debug, thiserror::Error)]
#[error("{query} failed on device {index} (minor {minor_number}): {source}")]
pub struct FieldExtractionError {
    pub index: u32,
    pub minor_number: u32,
    pub query: DeviceQuery,
    pub source: LibraryError,
}

/// Failures of one exporter tick.
#[derive(Debug, PartialEq, Eq, derive_more::Display)]
pub enum ExportError {
    #[display("scan failed")]
    Scan,
    #[display("scan exceeded {_0:?} and was abandoned")]
    Timeout(Duration),
    #[display("previous scan is still running")]
    PreviousScanRunning,
    #[display("scan task panicked")]
    Panicked,
    #[display("failed to write metrics")]
    Write,
}

impl Error for ExportError {}
