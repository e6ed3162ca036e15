//! Probe module for path tracing.
//!
//! Runs the external `traceroute` binary and parses its output.

mod parser;
mod traceroute;

pub use parser::*;
pub use traceroute::*;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("command failed: {0}")]
    Command(String),
}

impl ProbeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProbeError::Timeout(_) => FailureKind::Timeout,
            ProbeError::UnknownHost(_) => FailureKind::UnknownHost,
            ProbeError::Command(_) => FailureKind::Execution,
        }
    }
}

/// Category of a failed probe, as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownHost,
    Timeout,
    Execution,
}

impl FailureKind {
    /// Human-readable label for dashboards.
    pub fn message(&self) -> &'static str {
        match self {
            FailureKind::UnknownHost => "Unknown host, check DNS",
            FailureKind::Timeout => "Probe timed out",
            FailureKind::Execution => "Probe execution failed",
        }
    }
}

/// Something that can trace the path to a target and return the raw text.
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run(&self, target: &str) -> Result<String, ProbeError>;
}
