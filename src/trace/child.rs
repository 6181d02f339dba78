//! Child process correlation
//!
//! Brackets spawned children with child_start/child_exit events (or
//! exec/exec_result for process replacement) and hands each child its
//! extended session identifier through the environment, so an instrumented
//! child joins the spawn tree one level deeper.

use eyre::{Result, bail};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::Command;
use std::time::Instant;

use super::event::EventKind;
use super::{SID_ENV_VAR, TraceSession};

/// Exit status used when the child command cannot be launched at all.
const SPAWN_FAILURE_CODE: i32 = 127;

/// Exit status used when process replacement fails.
const EXEC_FAILURE_CODE: i32 = 126;

fn exit_code(status: std::process::ExitStatus) -> i32 {
    // A signal death surfaces as 128 + signal, the shell convention.
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

/// Run `argv` as a child process, wait for it, and return its exit code
/// unchanged. The child observes the extended session identifier in
/// `SPOOR_SID`.
pub fn run_child(session: &TraceSession, argv: &[String]) -> Result<i32> {
    if argv.is_empty() {
        bail!("expect <child_command_line>");
    }

    session.emit(EventKind::ChildStart { argv: argv.to_vec() });
    let child_sid = session.sid().extend();
    let started = Instant::now();

    let program = which::which(&argv[0]);
    log::debug!("Spawning child {:?} as {}", argv, child_sid);

    let status = match program {
        Ok(program) => Command::new(program)
            .args(&argv[1..])
            .env(SID_ENV_VAR, child_sid.as_str())
            .status(),
        Err(e) => {
            log::warn!("Child command '{}' not found: {}", argv[0], e);
            session.emit(EventKind::ChildExit {
                code: SPAWN_FAILURE_CODE,
                elapsed: started.elapsed().as_secs_f64(),
            });
            return Ok(SPAWN_FAILURE_CODE);
        }
    };

    let code = match status {
        Ok(status) => exit_code(status),
        Err(e) => {
            log::warn!("Failed to launch child {:?}: {}", argv, e);
            SPAWN_FAILURE_CODE
        }
    };

    session.emit(EventKind::ChildExit {
        code,
        elapsed: started.elapsed().as_secs_f64(),
    });

    Ok(code)
}

/// Replace this process image with `argv`. On success this never returns and
/// no further events are possible from this process; the replacement runs
/// under the extended identifier. If the replacement fails, an exec_result
/// event records the outcome and the failure code is returned.
pub fn exec_replace(session: &TraceSession, argv: &[String]) -> Result<i32> {
    if argv.is_empty() {
        bail!("expect <command_args>");
    }

    session.emit(EventKind::Exec { argv: argv.to_vec() });
    let child_sid = session.sid().extend();

    let program = match which::which(&argv[0]) {
        Ok(program) => program,
        Err(e) => {
            log::warn!("Exec target '{}' not found: {}", argv[0], e);
            session.emit(EventKind::ExecResult { code: SPAWN_FAILURE_CODE });
            return Ok(SPAWN_FAILURE_CODE);
        }
    };

    // Anything buffered must reach the sinks before the image goes away.
    session.flush_sinks();

    let err = Command::new(program)
        .args(&argv[1..])
        .env(SID_ENV_VAR, child_sid.as_str())
        .exec();

    // Only reached when the replacement failed.
    log::warn!("Failed to exec {:?}: {}", argv, err);
    session.emit(EventKind::ExecResult { code: EXEC_FAILURE_CODE });

    Ok(EXEC_FAILURE_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::sink::testing::CaptureSink;
    use crate::trace::{Event, Sid, SinkRegistry};
    use std::sync::{Arc, Mutex};

    fn session_with_capture() -> (TraceSession, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sinks = SinkRegistry::new();
        sinks.register(Box::new(CaptureSink { events: events.clone() }));
        (
            TraceSession::bootstrap_for_tests(Sid::root(), sinks),
            events,
        )
    }

    #[test]
    fn test_child_exit_code_is_propagated() {
        let (session, events) = session_with_capture();

        let code = run_child(&session, &["false".to_string()]).unwrap();
        assert_eq!(code, 1);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e.kind, EventKind::ChildStart { .. })));
        assert!(events.iter().any(|e| matches!(
            e.kind,
            EventKind::ChildExit { code: 1, elapsed } if elapsed >= 0.0
        )));
    }

    #[test]
    fn test_missing_child_yields_spawn_failure_code() {
        let (session, events) = session_with_capture();

        let code = run_child(&session, &["spoor-no-such-command".to_string()]).unwrap();
        assert_eq!(code, SPAWN_FAILURE_CODE);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e.kind,
            EventKind::ChildExit { code, .. } if code == SPAWN_FAILURE_CODE
        )));
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        let (session, _) = session_with_capture();
        assert!(run_child(&session, &[]).is_err());
        assert!(exec_replace(&session, &[]).is_err());
    }
}
