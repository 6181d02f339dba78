//! Counter exercise unit
//!
//! Adds each value to the named counter, either on the main thread or once
//! per worker thread. The aggregate counter event at exit must equal the sum
//! of every addition regardless of interleaving.

use eyre::{Result, eyre};
use std::thread;

use crate::trace::TraceSession;

pub fn run(session: &TraceSession, values: &[i64], threads: Option<usize>, id: &str) -> Result<i32> {
    match threads {
        None | Some(0) => {
            for value in values {
                session.counter_add(id, *value);
            }
        }
        Some(n) => {
            let mut workers = Vec::with_capacity(n);
            for _ in 0..n {
                let session = session.clone();
                let values = values.to_vec();
                let id = id.to_string();
                workers.push(thread::spawn(move || {
                    session.thread_start("worker");
                    for value in values {
                        session.counter_add(&id, value);
                    }
                    session.thread_exit();
                }));
            }
            for worker in workers {
                worker.join().map_err(|_| eyre!("counter worker thread panicked"))?;
            }
        }
    }

    Ok(0)
}
