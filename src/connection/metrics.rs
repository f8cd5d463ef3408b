//! Per-query performance spans

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Read,
    Write,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Read => "read",
            QueryMode::Write => "write",
        }
    }
}

/// A finished query span
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpan {
    pub mode: QueryMode,
    pub statement: String,
    pub started_at: SystemTime,
    pub stopped_at: SystemTime,
    pub duration: Duration,
}

/// Receives every finished span
pub trait MetricsSink: Send + Sync {
    fn record(&self, span: &QuerySpan);
}

/// Handle of an open span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

#[derive(Debug)]
struct OpenSpan {
    mode: QueryMode,
    statement: String,
    started_at: SystemTime,
    started: Instant,
}

/// Tracks open spans so each is closed exactly once
#[derive(Debug, Default)]
pub struct SpanTracker {
    next: u64,
    open: HashMap<u64, OpenSpan>,
}

impl SpanTracker {
    pub fn start(&mut self, mode: QueryMode, statement: &str) -> SpanId {
        self.next += 1;
        self.open.insert(
            self.next,
            OpenSpan {
                mode,
                statement: statement.to_string(),
                started_at: SystemTime::now(),
                started: Instant::now(),
            },
        );
        SpanId(self.next)
    }

    /// Close a span. Closing one that is not open is a programming error.
    pub fn stop(&mut self, id: SpanId) -> Result<QuerySpan> {
        let span = self
            .open
            .remove(&id.0)
            .ok_or_else(|| Error::Metrics(format!("span {} is not open", id.0)))?;
        Ok(QuerySpan {
            mode: span.mode,
            statement: span.statement,
            started_at: span.started_at,
            stopped_at: SystemTime::now(),
            duration: span.started.elapsed(),
        })
    }

    pub fn open_spans(&self) -> usize {
        self.open.len()
    }
}

/// Emits each span as a `tracing` debug event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, span: &QuerySpan) {
        tracing::debug!(
            target: "daokit::metrics",
            mode = span.mode.as_str(),
            elapsed_us = span.duration.as_micros() as u64,
            statement = %span.statement,
            "query finished"
        );
    }
}

/// Keeps every span in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    spans: Mutex<Vec<QuerySpan>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<QuerySpan> {
        self.spans.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }
}

impl MetricsSink for CollectingSink {
    fn record(&self, span: &QuerySpan) {
        self.spans.lock().push(span.clone());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _span: &QuerySpan) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_closes_once() {
        let mut tracker = SpanTracker::default();
        let id = tracker.start(QueryMode::Read, "SELECT 1");
        assert_eq!(tracker.open_spans(), 1);

        let span = tracker.stop(id).unwrap();
        assert_eq!(span.mode, QueryMode::Read);
        assert_eq!(span.statement, "SELECT 1");
        assert!(span.stopped_at >= span.started_at);

        assert!(matches!(tracker.stop(id), Err(Error::Metrics(_))));
    }

    #[test]
    fn test_unopened_span_errors() {
        let mut tracker = SpanTracker::default();
        assert!(tracker.stop(SpanId(42)).is_err());
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingSink::new();
        let mut tracker = SpanTracker::default();
        let id = tracker.start(QueryMode::Write, "DELETE FROM t");
        sink.record(&tracker.stop(id).unwrap());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.spans()[0].mode, QueryMode::Write);
    }
}
