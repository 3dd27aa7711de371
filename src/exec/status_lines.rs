// src/exec/status_lines.rs

//! Worker status reporting over stdout.
//!
//! A task command reports progress and counters by printing lines such as:
//!
//! ```text
//! RUNDAG_PROGRESS 0.25
//! RUNDAG_COUNTER OUTPUT_PARTITIONS=8
//! ```
//!
//! Every other line is logged at debug and otherwise ignored. Output that
//! is not valid UTF-8 is decoded lossily so the pipe keeps draining.

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::engine::RuntimeEvent;
use crate::ids::AttemptId;
use crate::types::Counters;

static PROGRESS_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*RUNDAG_PROGRESS\s+([0-9]*\.?[0-9]+)\s*$").ok());

static COUNTER_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^\s*RUNDAG_COUNTER\s+([A-Za-z_][A-Za-z0-9_.-]*)\s*=\s*(-?[0-9]+)\s*$").ok()
});

#[derive(Debug, Clone, PartialEq)]
pub enum StatusLine {
    Progress(f32),
    Counter(String, i64),
}

pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    if let Some(caps) = PROGRESS_RE.as_ref().and_then(|re| re.captures(line)) {
        let value: f32 = caps.get(1)?.as_str().parse().ok()?;
        return Some(StatusLine::Progress(value.clamp(0.0, 1.0)));
    }
    if let Some(caps) = COUNTER_RE.as_ref().and_then(|re| re.captures(line)) {
        let name = caps.get(1)?.as_str().to_string();
        let value: i64 = caps.get(2)?.as_str().parse().ok()?;
        return Some(StatusLine::Counter(name, value));
    }
    None
}

/// Next line of `reader` without its line terminator, or `None` at end of
/// stream. Invalid UTF-8 is replaced rather than treated as an error.
pub(crate) async fn next_lossy_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    match reader.read_until(b'\n', buf).await {
        Ok(0) => None,
        Ok(_) => {
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            Some(String::from_utf8_lossy(buf).into_owned())
        }
        Err(err) => {
            debug!(error = %err, "output stream read failed");
            None
        }
    }
}

/// Read an attempt's stdout until it closes, turning status lines into
/// `StatusUpdate` events.
///
/// The caller awaits the handle before reporting completion so updates are
/// never delivered after `Completed`.
pub fn spawn_stdout_monitor(
    attempt: AttemptId,
    stdout: ChildStdout,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut progress = 0.0f32;

        while let Some(line) = next_lossy_line(&mut reader, &mut buf).await {
            debug!(%attempt, "stdout: {}", line);

            let mut counters = Counters::new();
            match parse_status_line(&line) {
                Some(StatusLine::Progress(p)) => progress = p,
                Some(StatusLine::Counter(name, value)) => {
                    counters.insert(name, value);
                }
                None => continue,
            }

            let _ = runtime_tx
                .send(RuntimeEvent::StatusUpdate {
                    attempt,
                    progress,
                    counters,
                })
                .await;
        }

        debug!(%attempt, "stdout monitor ended");
    })
}
