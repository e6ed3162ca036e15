//! Traceroute runner backed by the system binary.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ProbeError, ProbeRunner};

/// Runs the configured traceroute binary with the target as its only
/// argument.
///
/// The caller owns the timeout; dropping the future kills the child.
#[derive(Debug, Clone)]
pub struct TracerouteRunner {
    program: String,
}

impl TracerouteRunner {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

#[async_trait]
impl ProbeRunner for TracerouteRunner {
    async fn run(&self, target: &str) -> Result<String, ProbeError> {
        // Add jitter to avoid thundering herd
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let output = Command::new(&self.program)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProbeError::Command(format!("failed to execute {}: {}", self.program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(target, &stderr, &stdout))
    }
}

/// Map a failed run to an error category based on what the tool printed.
fn classify_failure(target: &str, stderr: &str, stdout: &str) -> ProbeError {
    let text = format!("{}\n{}", stderr, stdout).to_lowercase();
    let unresolved = [
        "name or service not known",
        "unknown host",
        "cannot resolve",
        "cannot handle \"host\"",
        "temporary failure in name resolution",
        "nodename nor servname",
    ];

    if unresolved.iter().any(|needle| text.contains(needle)) {
        return ProbeError::UnknownHost(target.to_string());
    }

    let detail = stderr.trim();
    if detail.is_empty() {
        ProbeError::Command(format!("traceroute exited with an error for {}", target))
    } else {
        ProbeError::Command(detail.to_string())
    }
}
