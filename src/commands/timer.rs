//! Timer exercise unit
//!
//! Runs start/sleep/stop cycles against the named timer, either on the main
//! thread or across worker threads. The aggregate timer event at exit must
//! count every completed interval.

use eyre::{Result, eyre};
use std::thread;
use std::time::Duration;

use crate::trace::TraceSession;

pub fn run(session: &TraceSession, count: u32, delay_ms: u64, threads: Option<usize>, id: &str) -> Result<i32> {
    match threads {
        None | Some(0) => intervals(session, count, delay_ms, id),
        Some(n) => {
            let mut workers = Vec::with_capacity(n);
            for _ in 0..n {
                let session = session.clone();
                let id = id.to_string();
                workers.push(thread::spawn(move || {
                    session.thread_start("worker");
                    intervals(&session, count, delay_ms, &id);
                    session.thread_exit();
                }));
            }
            for worker in workers {
                worker.join().map_err(|_| eyre!("timer worker thread panicked"))?;
            }
        }
    }

    Ok(0)
}

fn intervals(session: &TraceSession, count: u32, delay_ms: u64, id: &str) {
    for _ in 0..count {
        session.timer_start(id);
        thread::sleep(Duration::from_millis(delay_ms));
        session.timer_stop(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::sink::testing::CaptureSink;
    use crate::trace::{EventKind, Sid, SinkRegistry};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_two_threads_of_five_intervals_aggregate_to_ten() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sinks = SinkRegistry::new();
        sinks.register(Box::new(CaptureSink { events: events.clone() }));
        let session = TraceSession::bootstrap_for_tests(Sid::root(), sinks);

        run(&session, 5, 10, Some(2), "walk").unwrap();
        session.finish(0);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            EventKind::Timer { id, elapsed, count: 10 } if id == "walk" && *elapsed >= 0.1
        )));
        let summaries = events
            .iter()
            .filter(|e| matches!(&e.kind, EventKind::ThTimer { count: 5, .. }))
            .count();
        assert_eq!(summaries, 2);
    }
}
