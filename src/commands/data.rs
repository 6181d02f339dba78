//! Emit data events from <category> <key> <value> triples

use eyre::{Result, bail};

use crate::trace::TraceSession;

const USAGE: &str = "expect <category> <key> <value> [<category> <key> <value> ...]";

pub fn run(session: &TraceSession, values: &[String]) -> Result<i32> {
    if values.is_empty() || values.len() % 3 != 0 {
        bail!("{USAGE}");
    }

    for triple in values.chunks_exact(3) {
        if triple.iter().any(|v| v.is_empty()) {
            bail!("{USAGE}");
        }
        session.data(&triple[0], &triple[1], &triple[2]);
    }

    Ok(0)
}
