//! Internal-consistency defect records
//!
//! A defect is either recoverable (recorded, execution continues, optionally
//! escalated later) or fatal (the process terminates after flushing). Both
//! carry the source location of the call that reported them.

use std::fmt;
use std::panic::Location;

/// Outcome of a failed internal-consistency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
    Recoverable { message: String, location: String },
    Fatal { message: String, location: String },
}

impl Defect {
    #[track_caller]
    pub fn recoverable(message: impl Into<String>) -> Self {
        Defect::Recoverable {
            message: message.into(),
            location: caller_location(),
        }
    }

    #[track_caller]
    pub fn fatal(message: impl Into<String>) -> Self {
        Defect::Fatal {
            message: message.into(),
            location: caller_location(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Defect::Recoverable { message, .. } | Defect::Fatal { message, .. } => message,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            Defect::Recoverable { location, .. } | Defect::Fatal { location, .. } => location,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Defect::Fatal { .. })
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.location())
    }
}

#[track_caller]
fn caller_location() -> String {
    let loc = Location::caller();
    format!("{}:{}", loc.file(), loc.line())
}
