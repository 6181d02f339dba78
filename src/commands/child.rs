//! Run a child command under the extended session identifier
//!
//! The first word of the command line may be an alias from config; the
//! expansion is recorded as an alias event before the child is launched.
//! The child's exit code becomes this process's exit code, unchanged.

use eyre::Result;

use crate::config::Config;
use crate::trace::{TraceSession, child};

pub fn run(session: &TraceSession, argv: &[String], config: &Config) -> Result<i32> {
    // Empty command lines are allowed so harnesses can nest arbitrarily
    // deep child chains and let the innermost one be empty.
    if argv.is_empty() {
        return Ok(0);
    }

    let argv = expand_alias(session, argv, config);
    child::run_child(session, &argv)
}

fn expand_alias(session: &TraceSession, argv: &[String], config: &Config) -> Vec<String> {
    let Some(expansion) = config.aliases.get(&argv[0]) else {
        return argv.to_vec();
    };

    session.alias(&argv[0], expansion);
    log::info!("Expanded alias '{}' to {:?}", argv[0], expansion);

    let mut expanded = expansion.clone();
    expanded.extend_from_slice(&argv[1..]);
    expanded
}
