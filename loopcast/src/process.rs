//! External process invocation with a hard time limit
//!
//! Used for the ffmpeg video mux step. The child is killed if the limit
//! expires; stderr is captured so callers can surface it verbatim.

use crate::error::{Error, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `program` with `args`, waiting at most `timeout`
///
/// Spawn failures come back as `Error::Io` so each caller can wrap them in
/// its own error kind. Expiry returns `Error::Timeout` naming `step`.
/// A non-zero exit is not an error here; inspect `Output::status`.
pub async fn run_with_timeout(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
    step: &str,
) -> Result<Output> {
    debug!(
        program = %program.display(),
        args = ?args,
        timeout_secs = timeout.as_secs(),
        "Spawning external process for {}", step
    );

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping the wait future on expiry drops the child, which kills it
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(Error::Timeout {
            step: step.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

/// Render captured stderr for an error message
pub fn stderr_text(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr).trim_end().to_string()
}
