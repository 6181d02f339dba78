//! Emit one error event per message
//!
//! Errors are expected, recoverable conditions: each call emits immediately,
//! none of them affect the process exit code.

use eyre::Result;

use crate::trace::TraceSession;

pub fn run(session: &TraceSession, messages: &[String]) -> Result<i32> {
    for message in messages {
        session.error(message);
    }
    Ok(0)
}
