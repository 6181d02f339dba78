//! Per-thread counter/timer slots and the process-wide aggregator
//!
//! Each traced thread owns its slots; in steady state only the owning thread
//! touches them, so the per-slot mutex is never contended. The registry keeps
//! a handle to every live thread's slots so the process-exit path can
//! force-stop timers that were left running anywhere, then fold everything
//! into the process totals under the single aggregate lock.

use eyre::{Result, bail};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A named start/stop interval accumulator. Non-reentrant per thread.
#[derive(Debug, Clone, Default)]
pub struct TimerSlot {
    pub elapsed: Duration,
    pub count: u64,
    running: Option<Instant>,
}

impl TimerSlot {
    /// Begin an interval. Returns false if one is already running.
    fn start(&mut self) -> bool {
        if self.running.is_some() {
            return false;
        }
        self.running = Some(Instant::now());
        true
    }

    /// Complete the running interval. Returns false if none is running.
    fn stop(&mut self) -> bool {
        match self.running.take() {
            Some(started) => {
                self.elapsed += started.elapsed();
                self.count += 1;
                true
            }
            None => false,
        }
    }

    /// Stop a dangling interval at "now". Returns true if one was running.
    fn force_stop(&mut self) -> bool {
        if self.running.is_some() { self.stop() } else { false }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

/// Counter and timer slots owned by one traced thread.
#[derive(Debug, Clone)]
pub struct ThreadSlots {
    pub label: String,
    pub counters: IndexMap<String, i64>,
    pub timers: IndexMap<String, TimerSlot>,
}

impl ThreadSlots {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            counters: IndexMap::new(),
            timers: IndexMap::new(),
        }
    }
}

type ThreadHandle = Arc<Mutex<ThreadSlots>>;

thread_local! {
    // (registry id, handle): the id guards against a stale handle from an
    // earlier session on the same OS thread.
    static CURRENT: RefCell<Option<(u64, ThreadHandle)>> = const { RefCell::new(None) };
}

static REGISTRY_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-wide totals for every counter and timer id ever merged.
#[derive(Debug, Clone, Default)]
pub struct AggregateTotals {
    pub counters: IndexMap<String, i64>,
    pub timers: IndexMap<String, TimerTotal>,
}

#[derive(Debug, Clone, Default)]
pub struct TimerTotal {
    pub elapsed: Duration,
    pub count: u64,
}

impl AggregateTotals {
    fn merge(&mut self, slots: &ThreadSlots) {
        for (id, partial) in &slots.counters {
            *self.counters.entry(id.clone()).or_default() += partial;
        }
        for (id, slot) in &slots.timers {
            let total = self.timers.entry(id.clone()).or_default();
            total.elapsed += slot.elapsed;
            total.count += slot.count;
        }
    }
}

/// Tracks the live traced threads of one process and owns the aggregate map.
pub struct ThreadRegistry {
    id: u64,
    live: Mutex<Vec<ThreadHandle>>,
    totals: Mutex<AggregateTotals>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            id: REGISTRY_SEQ.fetch_add(1, Ordering::Relaxed),
            live: Mutex::new(Vec::new()),
            totals: Mutex::new(AggregateTotals::default()),
        }
    }

    fn current(&self) -> Option<ThreadHandle> {
        CURRENT.with(|c| {
            c.borrow()
                .as_ref()
                .filter(|(id, _)| *id == self.id)
                .map(|(_, handle)| handle.clone())
        })
    }

    /// Label of the calling thread, if it is registered with this registry.
    pub fn current_label(&self) -> Option<String> {
        let handle = self.current()?;
        let slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
        Some(slots.label.clone())
    }

    /// Register the calling thread under `label`. At most once per thread.
    pub fn register(&self, label: &str) -> Result<()> {
        if self.current().is_some() {
            bail!("thread is already registered as '{label}'");
        }

        let handle: ThreadHandle = Arc::new(Mutex::new(ThreadSlots::new(label)));
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());
        CURRENT.with(|c| *c.borrow_mut() = Some((self.id, handle)));
        Ok(())
    }

    /// Add `delta` to the calling thread's partial sum for `id`.
    pub fn counter_add(&self, id: &str, delta: i64) -> Result<()> {
        let Some(handle) = self.current() else {
            bail!("counter '{id}' touched on an unregistered thread");
        };
        let mut slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
        *slots.counters.entry(id.to_string()).or_default() += delta;
        Ok(())
    }

    pub fn timer_start(&self, id: &str) -> Result<()> {
        let Some(handle) = self.current() else {
            bail!("timer '{id}' started on an unregistered thread");
        };
        let mut slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
        if !slots.timers.entry(id.to_string()).or_default().start() {
            bail!("timer '{id}' is already running on this thread");
        }
        Ok(())
    }

    pub fn timer_stop(&self, id: &str) -> Result<()> {
        let Some(handle) = self.current() else {
            bail!("timer '{id}' stopped on an unregistered thread");
        };
        let mut slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let stopped = slots.timers.get_mut(id).map(TimerSlot::stop).unwrap_or(false);
        if !stopped {
            bail!("timer '{id}' stopped but was not running");
        }
        Ok(())
    }

    /// End the calling thread's traced lifetime: force-stop anything still
    /// running, fold its slots into the process totals, and return a snapshot
    /// for the per-thread summary events.
    pub fn exit_current(&self) -> Result<ThreadSlots> {
        let Some(handle) = CURRENT.with(|c| {
            c.borrow_mut()
                .take_if(|(id, _)| *id == self.id)
                .map(|(_, handle)| handle)
        }) else {
            bail!("thread exit on an unregistered thread");
        };

        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|h| !Arc::ptr_eq(h, &handle));

        let mut slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
        force_stop_running(&mut slots);

        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(&slots);

        Ok(slots.clone())
    }

    /// Fold every still-live thread's running totals into the aggregates and
    /// return the final process-wide totals. Invoked once, by the process
    /// termination path.
    pub fn process_exit(&self) -> AggregateTotals {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in live.drain(..) {
            let mut slots = handle.lock().unwrap_or_else(PoisonError::into_inner);
            force_stop_running(&mut slots);
            self.totals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .merge(&slots);
        }

        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn force_stop_running(slots: &mut ThreadSlots) {
    for (id, timer) in slots.timers.iter_mut() {
        if timer.force_stop() {
            log::warn!("timer '{}' on thread '{}' was never stopped, forced at exit", id, slots.label);
        }
    }
}
