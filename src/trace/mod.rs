//! Execution tracing core
//!
//! Records a chronological stream of structured events (process start/exit,
//! counters, timers, data points, defects) for this process and correlates it
//! with every process it spawns via hierarchical session identifiers.
//!
//! The [`TraceSession`] is the single process-context object: constructed
//! once at startup, cloned freely (it is an `Arc` handle), and every exit
//! route funnels through [`TraceSession::finish`] so that exactly one
//! exit/atexit event pair is emitted no matter how the process terminates.

use eyre::{Report, Result, eyre};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::config::{Config, TraceConfig, TraceSinkKind};

pub mod child;
pub mod defect;
pub mod event;
pub mod sid;
pub mod sink;
pub mod thread;

pub use defect::Defect;
pub use event::{Event, EventKind};
pub use sid::Sid;
pub use sink::{HttpSink, JsonlSink, Sink, SinkRegistry, StderrSink};

use thread::ThreadRegistry;

/// Environment variable carrying the session identifier to spawned children.
pub const SID_ENV_VAR: &str = "SPOOR_SID";

/// Process status for a fatal defect. Distinct from usage errors (129) and
/// die-style errors (128).
pub const DEFECT_EXIT_CODE: i32 = 99;

fn open_sink(kind: TraceSinkKind, config: &TraceConfig, sid: &Sid) -> Result<Box<dyn Sink>> {
    match kind {
        TraceSinkKind::File => {
            let dir = Config::expand_path(&config.dir);
            Ok(Box::new(JsonlSink::open(&dir, sid)?))
        }
        TraceSinkKind::Stderr => Ok(Box::new(StderrSink)),
        TraceSinkKind::Http => {
            let endpoint = config
                .http_endpoint
                .clone()
                .ok_or_else(|| eyre!("http sink configured without trace.http_endpoint"))?;
            Ok(Box::new(HttpSink::new(endpoint)))
        }
    }
}

const UNSTARTED: u8 = 0;
const RUNNING: u8 = 1;
const EXITING: u8 = 2;
const TERMINATED: u8 = 3;

struct SessionInner {
    sid: Sid,
    phase: AtomicU8,
    cmd_name: OnceLock<String>,
    exit_code: OnceLock<i32>,
    sinks: SinkRegistry,
    threads: ThreadRegistry,
    defects: Mutex<Vec<Defect>>,
    escalate_on_exit: bool,
}

/// Handle to the process's trace state. Cheap to clone, safe to share
/// across threads.
#[derive(Clone)]
pub struct TraceSession {
    inner: Arc<SessionInner>,
}

impl TraceSession {
    fn new(sid: Sid, sinks: SinkRegistry, escalate_on_exit: bool) -> Self {
        let session = Self {
            inner: Arc::new(SessionInner {
                sid,
                phase: AtomicU8::new(UNSTARTED),
                cmd_name: OnceLock::new(),
                exit_code: OnceLock::new(),
                sinks,
                threads: ThreadRegistry::new(),
                defects: Mutex::new(Vec::new()),
                escalate_on_exit,
            }),
        };
        // The main thread is traced from the start; worker threads opt in
        // through thread_start.
        let _ = session.inner.threads.register("main");
        session
    }

    /// Build the session for this process: adopt or mint the session
    /// identifier, open the configured sinks, and emit the startup events.
    pub fn bootstrap(config: &TraceConfig, argv: Vec<String>, inherited_sid: Option<String>) -> Self {
        let (sid, inherited_defect) = match inherited_sid {
            Some(value) => match Sid::inherited(&value) {
                Some(sid) => (sid, None),
                None => (Sid::root(), Some(value)),
            },
            None => (Sid::root(), None),
        };

        let sinks = SinkRegistry::new();
        if config.enabled {
            for kind in &config.sinks {
                match open_sink(*kind, config, &sid) {
                    Ok(sink) => sinks.register(sink),
                    Err(e) => log::warn!("Failed to open {kind:?} sink: {e:#}"),
                }
            }
        }

        let session = Self::new(sid, sinks, config.escalate_on_exit);
        session.process_start(argv);

        for (key, value) in config.def_params() {
            session.emit(EventKind::DefParam { key, value });
        }

        if let Some(bad) = inherited_defect {
            session.report_defect(Defect::recoverable(format!(
                "inherited session id '{bad}' is malformed, started a fresh root"
            )));
        }

        session
    }

    #[cfg(test)]
    pub(crate) fn bootstrap_for_tests(sid: Sid, sinks: SinkRegistry) -> Self {
        let session = Self::new(sid, sinks, false);
        session.process_start(vec!["spoor".to_string(), "test".to_string()]);
        session
    }

    fn process_start(&self, argv: Vec<String>) {
        let started = self
            .inner
            .phase
            .compare_exchange(UNSTARTED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !started {
            return;
        }
        self.emit(EventKind::Version {
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        self.emit(EventKind::Start { argv });
    }

    pub fn sid(&self) -> &Sid {
        &self.inner.sid
    }

    fn phase(&self) -> u8 {
        self.inner.phase.load(Ordering::Acquire)
    }

    fn running(&self) -> bool {
        self.phase() == RUNNING
    }

    /// Hot-path gate: tracing is a no-op once exiting or with no sinks.
    fn active(&self) -> bool {
        self.running() && self.inner.sinks.is_enabled()
    }

    fn emit(&self, kind: EventKind) {
        let label = self
            .inner
            .threads
            .current_label()
            .unwrap_or_else(|| "unknown".to_string());
        self.emit_as(&label, kind);
    }

    fn emit_as(&self, label: &str, kind: EventKind) {
        if self.phase() == TERMINATED || !self.inner.sinks.is_enabled() {
            return;
        }
        let event = Event::new(&self.inner.sid, label, kind);
        self.inner.sinks.emit(&event);
    }

    pub(crate) fn flush_sinks(&self) {
        self.inner.sinks.flush();
    }

    /// Record the command name. First caller wins; re-setting is a no-op and
    /// emits nothing.
    pub fn set_command_name(&self, name: &str) {
        if !self.running() {
            return;
        }
        if self.inner.cmd_name.set(name.to_string()).is_ok() {
            self.emit(EventKind::CmdName { name: name.to_string() });
        }
    }

    /// Emit one structured fact. Any thread, any number of times.
    pub fn data(&self, category: &str, key: &str, value: &str) {
        if !self.active() {
            return;
        }
        self.emit(EventKind::Data {
            category: category.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Emit one application error event, immediately. Always non-fatal.
    pub fn error(&self, message: &str) {
        if !self.running() {
            return;
        }
        self.emit(EventKind::Error {
            message: message.to_string(),
        });
    }

    /// Record a command alias expansion.
    pub fn alias(&self, alias: &str, expansion: &[String]) {
        if !self.active() {
            return;
        }
        self.emit(EventKind::Alias {
            alias: alias.to_string(),
            expansion: expansion.to_vec(),
        });
    }

    /// Report an internal-consistency defect. A recoverable defect is
    /// recorded and control returns to the caller; a fatal one terminates the
    /// process after flushing aggregates and emitting the exit event pair.
    pub fn report_defect(&self, defect: Defect) {
        if !self.running() {
            return;
        }
        self.emit(EventKind::Bug {
            message: defect.message().to_string(),
            location: defect.location().to_string(),
        });
        log::error!("defect: {defect}");

        if defect.is_fatal() {
            self.fatal_terminate();
        }
        self.inner
            .defects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(defect);
    }

    /// Terminate fatally if any recoverable defects have been recorded.
    /// Otherwise returns normally.
    #[track_caller]
    pub fn escalate_if_defects(&self) {
        if !self.running() {
            return;
        }
        let count = self
            .inner
            .defects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if count == 0 {
            return;
        }
        let defect = Defect::fatal(format!("{count} recoverable defect(s) recorded"));
        self.emit(EventKind::Bug {
            message: defect.message().to_string(),
            location: defect.location().to_string(),
        });
        log::error!("defect: {defect}");
        self.fatal_terminate();
    }

    fn fatal_terminate(&self) -> ! {
        let code = self.finish(DEFECT_EXIT_CODE);
        std::process::exit(code);
    }

    fn usage_defect(&self, err: Report) {
        self.report_defect(Defect::recoverable(err.to_string()));
    }

    /// Register the calling thread for tracing under `label`.
    pub fn thread_start(&self, label: &str) {
        if !self.active() {
            return;
        }
        match self.inner.threads.register(label) {
            Ok(()) => self.emit(EventKind::ThreadStart {
                label: label.to_string(),
            }),
            Err(e) => self.usage_defect(e),
        }
    }

    /// End the calling thread's traced lifetime: emit its per-thread summary
    /// and merge its partial sums into the process totals.
    pub fn thread_exit(&self) {
        if !self.active() {
            return;
        }
        match self.inner.threads.exit_current() {
            Ok(slots) => {
                for (id, partial) in &slots.counters {
                    self.emit_as(
                        &slots.label,
                        EventKind::ThCounter {
                            label: slots.label.clone(),
                            id: id.clone(),
                            partial: *partial,
                        },
                    );
                }
                for (id, timer) in &slots.timers {
                    self.emit_as(
                        &slots.label,
                        EventKind::ThTimer {
                            label: slots.label.clone(),
                            id: id.clone(),
                            elapsed: timer.elapsed.as_secs_f64(),
                            count: timer.count,
                        },
                    );
                }
                self.emit_as(
                    &slots.label,
                    EventKind::ThreadExit {
                        label: slots.label.clone(),
                    },
                );
            }
            Err(e) => self.usage_defect(e),
        }
    }

    /// Add `delta` (may be negative) to the calling thread's partial sum.
    pub fn counter_add(&self, id: &str, delta: i64) {
        if !self.active() {
            return;
        }
        if let Err(e) = self.inner.threads.counter_add(id, delta) {
            self.usage_defect(e);
        }
    }

    pub fn timer_start(&self, id: &str) {
        if !self.active() {
            return;
        }
        if let Err(e) = self.inner.threads.timer_start(id) {
            self.usage_defect(e);
        }
    }

    pub fn timer_stop(&self, id: &str) {
        if !self.active() {
            return;
        }
        if let Err(e) = self.inner.threads.timer_stop(id) {
            self.usage_defect(e);
        }
    }

    /// Terminate the trace: flush every thread's totals, emit one aggregate
    /// event per counter and timer id, then the exit/atexit pair. Idempotent;
    /// the first exit route wins and later calls return the recorded code.
    pub fn finish(&self, code: i32) -> i32 {
        let first = self
            .inner
            .phase
            .compare_exchange(RUNNING, EXITING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !first {
            return *self.inner.exit_code.get().unwrap_or(&code);
        }

        let mut code = code;
        let pending = self
            .inner
            .defects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if self.inner.escalate_on_exit && pending > 0 && code == 0 {
            let defect = Defect::fatal(format!("exiting with {pending} unescalated recoverable defect(s)"));
            self.emit(EventKind::Bug {
                message: defect.message().to_string(),
                location: defect.location().to_string(),
            });
            log::error!("defect: {defect}");
            code = DEFECT_EXIT_CODE;
        }
        let _ = self.inner.exit_code.set(code);

        let totals = self.inner.threads.process_exit();
        for (id, total) in &totals.counters {
            self.emit(EventKind::Counter {
                id: id.clone(),
                total: *total,
            });
        }
        for (id, total) in &totals.timers {
            self.emit(EventKind::Timer {
                id: id.clone(),
                elapsed: total.elapsed.as_secs_f64(),
                count: total.count,
            });
        }

        self.emit(EventKind::Exit { code });
        self.emit(EventKind::Atexit { code });
        self.inner.sinks.flush();
        self.inner.phase.store(TERMINATED, Ordering::Release);
        code
    }
}
