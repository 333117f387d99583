//! Discovery and telemetry collection for ASIC miners.
//!
//! Miners expose a cgminer-style API: one JSON command per TCP connection
//! on port 4028, answered by a JSON object keyed by the uppercased command.
//!
//! # Components
//!
//! - [`client`] - `ProtocolClient`, one request/response exchange per call
//! - [`parser`] - pure normalization of responses into `TelemetrySample` fields
//! - [`scanner`] - `NetworkScanner`, CIDR enumeration, probing and identification
//! - [`poller`] - `PollingOrchestrator`, the fixed-delay polling loop
//! - [`registry`] - `DeviceRegistry`, the upsert-by-address device store
//! - [`sink`] - where scan records and cycle reports go
//!
//! # Request framing
//!
//! ```text
//! {"command": "summary"}\n
//! ```

pub mod cidr;
pub mod client;
pub mod config;
pub mod identify;
pub mod parser;
pub mod poller;
pub mod registry;
pub mod scanner;
pub mod sink;

pub use client::{Command, ProtocolClient, QueryError, Response};
pub use poller::{OrchestratorState, PollOptions, PollerError, PollingOrchestrator};
pub use registry::{DeviceRegistry, DeviceSource};
pub use scanner::{NetworkScanner, ScanError};
pub use sink::{ChannelSink, DiscoverySink, OutputSink, TelemetrySink, WriterSink};
