//! Replace this process with another command
//!
//! On success the exec never returns and the replacement runs one level
//! deeper in the spawn tree; on failure the exec_result event records the
//! outcome and its code is propagated.

use eyre::Result;

use crate::trace::{TraceSession, child};

pub fn run(session: &TraceSession, argv: &[String]) -> Result<i32> {
    child::exec_replace(session, argv)
}
