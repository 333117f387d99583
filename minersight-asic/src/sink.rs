//! Destinations for discovery results and polling cycles.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

use minersight_common::{CycleReport, DeviceRecord, Format, OutputConfig, encode};

/// Sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink receiver closed")]
    Closed,
    #[error("failed to encode record: {0}")]
    Encode(#[from] minersight_common::Error),
    #[error("failed to write record: {0}")]
    Io(#[from] io::Error),
}

/// Receives the outcome of every polling cycle.
pub trait TelemetrySink: Send + Sync {
    fn deliver_cycle(&self, report: CycleReport) -> Result<(), SinkError>;
}

/// Receives the records produced by every scan.
pub trait DiscoverySink: Send + Sync {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError>;
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn deliver_cycle(&self, report: CycleReport) -> Result<(), SinkError> {
        (**self).deliver_cycle(report)
    }
}

impl<T: DiscoverySink + ?Sized> DiscoverySink for Arc<T> {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError> {
        (**self).deliver_devices(records)
    }
}

/// Fan discovery results out to two sinks. Both are attempted; the first
/// error is returned.
impl<A: DiscoverySink, B: DiscoverySink> DiscoverySink for (A, B) {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError> {
        let first = self.0.deliver_devices(records);
        let second = self.1.deliver_devices(records);
        first.and(second)
    }
}

/// Forwards records over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> ChannelSink<T> {
    /// Create a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink<CycleReport> {
    fn deliver_cycle(&self, report: CycleReport) -> Result<(), SinkError> {
        self.tx.send(report).map_err(|_| SinkError::Closed)
    }
}

impl DiscoverySink for ChannelSink<Vec<DeviceRecord>> {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError> {
        self.tx.send(records.to_vec()).map_err(|_| SinkError::Closed)
    }
}

/// Serializes records to a writer.
///
/// JSON output is one object per line. CBOR records are written back to
/// back, which a streaming CBOR decoder reads as a sequence.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: Mutex<W>,
    format: Format,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, format: Format) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    fn write_record<T: Serialize>(&self, record: &T) -> Result<(), SinkError> {
        let mut bytes = encode(record, self.format)?;
        if self.format == Format::Json {
            bytes.push(b'\n');
        }

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Consume the sink and return the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

/// A [`WriterSink`] over stdout or a file, chosen at runtime.
pub type OutputSink = WriterSink<Box<dyn Write + Send>>;

impl OutputSink {
    /// Write to standard output.
    pub fn stdout(format: Format) -> Self {
        Self::new(Box::new(io::stdout()), format)
    }

    /// Append to a file, creating it if needed.
    pub fn file(path: impl AsRef<Path>, format: Format) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(Box::new(file), format))
    }

    /// Open the destination named by the output config.
    pub fn open(output: &OutputConfig) -> io::Result<Self> {
        match &output.path {
            Some(path) => Self::file(path, output.format),
            None => Ok(Self::stdout(output.format)),
        }
    }
}

impl<W: Write + Send> TelemetrySink for WriterSink<W> {
    fn deliver_cycle(&self, report: CycleReport) -> Result<(), SinkError> {
        self.write_record(&report)
    }
}

impl<W: Write + Send> DiscoverySink for WriterSink<W> {
    fn deliver_devices(&self, records: &[DeviceRecord]) -> Result<(), SinkError> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }
}
