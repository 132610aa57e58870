//! Bounded debug trace of link traffic
//!
//! Keeps the last few frames sent and received so that a failed session can
//! be inspected after the fact. The trace is only ever written out on demand
//! and plays no part in protocol decisions.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default number of entries kept
pub const DEFAULT_TRACE_CAPACITY: usize = 10;

/// What a trace entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDirection {
    /// Bytes written to the device
    Sent,
    /// Bytes received from the device
    Received,
    /// Link opened marker
    Opened,
    /// Link closed marker
    Closed,
}

impl TraceDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceDirection::Sent => "TX",
            TraceDirection::Received => "RX",
            TraceDirection::Opened => "OPEN",
            TraceDirection::Closed => "CLOSE",
        }
    }
}

/// One recorded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub direction: TraceDirection,
    pub data: Vec<u8>,
    /// Monotonic time since the trace was created
    pub timestamp: Duration,
}

/// Fixed-capacity ring buffer of trace entries, oldest evicted first
#[derive(Debug)]
pub struct DebugTrace {
    capacity: usize,
    entries: VecDeque<TraceEntry>,
    started: Instant,
}

impl DebugTrace {
    /// Create a trace holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            started: Instant::now(),
        }
    }

    /// Record an event, evicting the oldest entry when full
    pub fn record(&mut self, direction: TraceDirection, data: &[u8]) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            direction,
            data: data.to_vec(),
            timestamp: self.started.elapsed(),
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render the trace as text, one entry per line
    ///
    /// ```text
    ///      0.012ms OPEN
    ///      1.204ms TX    21 24 05
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = write!(
                out,
                "{:>12.3}ms {:<5}",
                entry.timestamp.as_secs_f64() * 1000.0,
                entry.direction.as_str()
            );
            for byte in &entry.data {
                let _ = write!(out, " {:02X}", byte);
            }
            out.push('\n');
        }
        out
    }

    /// Write the rendered trace to `path`, replacing any previous content
    pub async fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        tokio::fs::write(path, self.render()).await
    }
}

impl Default for DebugTrace {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}
