//! Event sinks and the registry that fans events out to them
//!
//! Each sink is its own formatter: the registry hands every sink the same
//! immutable [`Event`] exactly once, in registration order. A failing sink is
//! logged and skipped; it never takes down the other sinks or the caller.
//! With no sinks registered, emission is a single atomic load.

use eyre::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::event::Event;
use super::sid::Sid;

/// An output target for trace events.
pub trait Sink: Send {
    /// Short name used when logging sink failures.
    fn name(&self) -> &'static str;

    /// Write one event. Errors are swallowed by the registry.
    fn emit(&mut self, event: &Event) -> Result<()>;

    /// Flush buffered output. Called at process exit and before exec.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Holds the active sinks and dispatches each event to all of them.
pub struct SinkRegistry {
    enabled: AtomicBool,
    sinks: Mutex<Vec<Box<dyn Sink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            sinks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, sink: Box<dyn Sink>) {
        let mut sinks = self.sinks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sinks.push(sink);
        self.enabled.store(true, Ordering::Release);
    }

    /// Cheap check for the fully-disabled case.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Dispatch `event` to every sink in registration order. Safe to call
    /// from any thread; a sink failure never reaches the caller.
    pub fn emit(&self, event: &Event) {
        if !self.is_enabled() {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.emit(event) {
                log::warn!("Failed to emit to {} sink: {e:#}", sink.name());
            }
        }
    }

    pub fn flush(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut sinks = self.sinks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.flush() {
                log::warn!("Failed to flush {} sink: {e:#}", sink.name());
            }
        }
    }
}

/// Writes one JSON object per line into a per-process file under the trace
/// directory, named by the final segment of the process's identifier.
pub struct JsonlSink {
    file: File,
}

impl JsonlSink {
    pub fn open(dir: &Path, sid: &Sid) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create trace directory {}", dir.display()))?;

        let path = dir.join(format!("{}.jsonl", sid.last_segment()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open trace file {}", path.display()))?;

        Ok(Self { file })
    }
}

impl Sink for JsonlSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(self.file, "{json}").context("Failed to write event")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().context("Failed to flush trace file")?;
        Ok(())
    }
}

/// Renders the colored one-line form to stderr, leaving stdout to the
/// traced command itself.
pub struct StderrSink;

impl Sink for StderrSink {
    fn name(&self) -> &'static str {
        "stderr"
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        eprintln!("{}", event.format_display());
        Ok(())
    }
}

/// POSTs each event as JSON to a configured endpoint.
pub struct HttpSink {
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let body = serde_json::to_string(event).context("Failed to serialize event")?;

        ureq::post(&self.endpoint)
            .header("Content-Type", "application/json")
            .send(body.as_bytes())
            .with_context(|| format!("HTTP request to {} failed", self.endpoint))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Arc;

    /// Records the kind names of everything emitted through it.
    pub(crate) struct MemorySink {
        pub tag: &'static str,
        pub seen: Arc<Mutex<Vec<String>>>,
    }

    impl Sink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        fn emit(&mut self, event: &Event) -> Result<()> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, event.kind.name()));
            Ok(())
        }
    }

    /// Records full events for assertions on fields.
    pub(crate) struct CaptureSink {
        pub events: Arc<Mutex<Vec<Event>>>,
    }

    impl Sink for CaptureSink {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn emit(&mut self, event: &Event) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    pub(crate) struct FailingSink;

    impl Sink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn emit(&mut self, _event: &Event) -> Result<()> {
            eyre::bail!("sink is broken")
        }
    }
}
