//! Telemetry wire types and the synthetic data source.

mod simulator;

pub use simulator::{ChannelSpec, Simulator};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which source produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Serial,
}

impl SourceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Serial => "serial",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One telemetry sample across all enabled channels.
///
/// This is the exact shape serialized onto the WebSocket:
/// `{"timestamp": <float seconds UTC>, "source": "...", "channels": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: f64,
    pub source: SourceKind,
    pub channels: BTreeMap<String, f64>,
}
