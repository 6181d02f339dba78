//! Hierarchical session identifiers
//!
//! Every traced process owns exactly one `Sid`. A root process mints a fresh
//! single-segment identifier; each spawned child receives its parent's
//! identifier extended by one segment, so the segment count equals the depth
//! of the process in the spawn tree.

use chrono::Utc;
use lazy_regex::{Lazy, Regex, lazy_regex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Segments are timestamp + pid (+ spawn sequence for extended segments).
static SEGMENT_RE: Lazy<Regex> = lazy_regex!(r"^[0-9]{8}T[0-9]{6}\.[0-9]{6}Z-P[0-9a-f]+(-S[0-9]+)?$");

/// Monotonic per-process spawn sequence, salts extended segments so two
/// children of the same parent never collide.
static NEXT_SPAWN: AtomicU64 = AtomicU64::new(0);

/// A hierarchical session identifier: `/`-separated segments, one per
/// process in the spawn chain. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sid(String);

fn own_segment() -> String {
    format!(
        "{}-P{:x}",
        Utc::now().format("%Y%m%dT%H%M%S%.6fZ"),
        std::process::id()
    )
}

impl Sid {
    /// Mint a fresh root identifier for a process with no traced parent.
    pub fn root() -> Self {
        Sid(own_segment())
    }

    /// Adopt an identifier inherited from the parent process.
    ///
    /// Returns `None` if the value does not look like something we minted;
    /// the caller falls back to [`Sid::root`] and records a usage defect.
    pub fn inherited(value: &str) -> Option<Self> {
        if value.is_empty() {
            return None;
        }
        if value.split('/').all(|seg| SEGMENT_RE.is_match(seg)) {
            Some(Sid(value.to_string()))
        } else {
            None
        }
    }

    /// Produce the identifier for a child about to be spawned: this
    /// identifier extended by one fresh segment.
    pub fn extend(&self) -> Sid {
        let seq = NEXT_SPAWN.fetch_add(1, Ordering::Relaxed);
        Sid(format!("{}/{}-S{}", self.0, own_segment(), seq))
    }

    /// Number of segments; equals this process's depth in the spawn tree.
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// The segment identifying this process itself. Used to name the
    /// per-process trace file.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
