//! Run output: JSON-lines log records, stimulus trace and summary

use anyhow::{Context, Result};
use serde::Serialize;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use trialstate::{LogRecord, LogSink, Presenter, RunSummary, StateId, StimulusRequest};

struct JsonLinesInner<W> {
    writer: W,
    written: usize,
    error: Option<io::Error>,
}

/// Writes one JSON object per log record
///
/// Clones share the writer, so the caller can keep a handle to call
/// [`JsonLinesSink::finish`] after the experiment took ownership of another.
/// The first write error is kept and later records are dropped.
pub struct JsonLinesSink<W: Write> {
    inner: Rc<RefCell<JsonLinesInner<W>>>,
}

impl<W: Write> Clone for JsonLinesSink<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Rc::new(RefCell::new(JsonLinesInner {
                writer,
                written: 0,
                error: None,
            })),
        }
    }

    /// Flush the writer and report the number of records written
    pub fn finish(&self) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if let Some(err) = inner.error.take() {
            return Err(err).context("Failed to write log record");
        }
        inner.writer.flush().context("Failed to flush log output")?;
        Ok(inner.written)
    }
}

impl<W: Write> LogSink for JsonLinesSink<W> {
    fn record(&mut self, record: LogRecord) {
        let mut inner = self.inner.borrow_mut();
        if inner.error.is_some() {
            return;
        }
        let result = serde_json::to_writer(&mut inner.writer, &record)
            .map_err(io::Error::from)
            .and_then(|_| inner.writer.write_all(b"\n"));
        match result {
            Ok(()) => inner.written += 1,
            Err(err) => {
                log::error!("Dropping log output after write error: {}", err);
                inner.error = Some(err);
            }
        }
    }
}

/// Presenter that traces show/hide calls instead of drawing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracePresenter;

impl Presenter for TracePresenter {
    fn show(&mut self, request: &StimulusRequest) -> Option<f64> {
        log::info!(
            "[{:>9.4}s] show {} {:?}",
            request.requested_at,
            request.stimulus,
            request.params
        );
        None
    }

    fn hide(&mut self, state: StateId, requested_at: f64) -> Option<f64> {
        log::info!("[{:>9.4}s] hide {}", requested_at, state);
        None
    }
}

/// Summary of one session, printed at the end and written with `--summary`
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: String,
    pub ticks: u64,
    pub frames: u64,
    pub records: usize,
    pub duration: Option<f64>,
    /// Wall-clock start in RFC 3339
    pub started: Option<String>,
    pub events_left: usize,
}

impl SessionReport {
    pub fn new(session: &str, summary: &RunSummary, frames: u64, records: usize, events_left: usize) -> Self {
        Self {
            session: session.to_string(),
            ticks: summary.ticks,
            frames,
            records,
            duration: summary.duration(),
            started: summary.session_started.map(|t| t.to_rfc3339()),
            events_left,
        }
    }

    pub fn print(&self) {
        println!("\n═══════════════════════════════════════════════════════");
        println!("  Session: {}", self.session);
        if let Some(started) = &self.started {
            println!("  Started: {}", started);
        }
        match self.duration {
            Some(duration) => println!("  Duration: {:.4}s", duration),
            None => println!("  Duration: (not started)"),
        }
        println!("  Ticks: {} ({} frames)", self.ticks, self.frames);
        println!("  Log records: {}", self.records);
        if self.events_left > 0 {
            println!("  Unused scripted events: {}", self.events_left);
        }
        println!("═══════════════════════════════════════════════════════");
    }
}
