//! Result sinks.
//!
//! Processing loops forward every detection result to a `ResultSink`. Aggregation
//! and upload happen downstream of the sink; the kernel does not interpret results.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionResult;
use crate::pool::WorkerKey;
use crate::StreamId;

/// One detection result, tagged with the frame it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamResult {
    pub stream: StreamId,
    pub sequence: u64,
    /// Worker that ran the detection, as `gpu{device}_{index}`.
    pub worker: String,
    /// Capture-to-result latency in milliseconds.
    pub latency_ms: u64,
    pub result: DetectionResult,
}

impl StreamResult {
    pub fn new(
        stream: StreamId,
        sequence: u64,
        worker: WorkerKey,
        latency_ms: u64,
        result: DetectionResult,
    ) -> Self {
        Self {
            stream,
            sequence,
            worker: worker.to_string(),
            latency_ms,
            result,
        }
    }
}

pub trait ResultSink: Send + Sync {
    fn submit(&self, result: StreamResult) -> Result<()>;
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn submit(&self, result: StreamResult) -> Result<()> {
        let line = serde_json::to_string(&result).context("serialize stream result")?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow!("result sink lock poisoned"))?;
        writeln!(out, "{}", line).context("write stream result")?;
        out.flush().context("flush stream result")?;
        Ok(())
    }
}

/// Logs detections at info and empty results at debug.
#[derive(Default)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn submit(&self, result: StreamResult) -> Result<()> {
        if result.result.is_empty() {
            log::debug!(
                "{} #{}: no detections ({} ms, {})",
                result.stream,
                result.sequence,
                result.latency_ms,
                result.worker
            );
        } else {
            log::info!(
                "{} #{}: motion={} boxes={} confidence={:.2} ({} ms, {})",
                result.stream,
                result.sequence,
                result.result.motion_detected,
                result.result.detections.len(),
                result.result.confidence,
                result.latency_ms,
                result.worker
            );
        }
        Ok(())
    }
}

/// Keeps every result in memory.
#[derive(Default)]
pub struct CollectingSink {
    results: Mutex<Vec<StreamResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<StreamResult> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for CollectingSink {
    fn submit(&self, result: StreamResult) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow!("result sink lock poisoned"))?
            .push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceId;

    fn result(seq: u64) -> StreamResult {
        StreamResult::new(
            StreamId::from("cam0"),
            seq,
            WorkerKey {
                device: DeviceId(0),
                index: 1,
            },
            3,
            DetectionResult::default(),
        )
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() -> Result<()> {
        let sink = JsonLinesSink::new(Vec::new());
        sink.submit(result(1))?;
        sink.submit(result(2))?;

        let text = String::from_utf8(sink.into_inner())?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0])?;
        assert_eq!(first["stream"], "cam0");
        assert_eq!(first["sequence"], 1);
        assert_eq!(first["worker"], "gpu0_1");
        Ok(())
    }

    #[test]
    fn collecting_sink_keeps_order() -> Result<()> {
        let sink = CollectingSink::new();
        assert!(sink.is_empty());
        for seq in 1..=3 {
            sink.submit(result(seq))?;
        }
        let seqs: Vec<u64> = sink.results().iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        LogSink.submit(result(4))?;
        Ok(())
    }
}
