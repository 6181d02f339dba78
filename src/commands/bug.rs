//! Defect reporting units
//!
//! `bug` records recoverable defects and, with `--escalate`, terminates
//! fatally when any were recorded. `fatal-bug` terminates on the spot. Both
//! exercise the single reporting path that branches on the defect tag.

use eyre::Result;

use crate::trace::{Defect, TraceSession};

pub fn run(session: &TraceSession, messages: &[String], escalate: bool) -> Result<i32> {
    for message in messages {
        session.report_defect(Defect::recoverable(message.clone()));
    }

    if escalate {
        // Does not return when any defect was recorded above.
        session.escalate_if_defects();
    }

    Ok(0)
}

pub fn run_fatal(session: &TraceSession, message: &str) -> Result<i32> {
    session.report_defect(Defect::fatal(message.to_string()));
    // A fatal defect terminates inside report_defect; this is only reached
    // if the session was already past its running phase.
    Ok(crate::trace::DEFECT_EXIT_CODE)
}
