//! Read traced events back from the trace directory
//!
//! Collects every per-process JSONL file under the trace directory, orders
//! the events by timestamp, and prints the most recent ones.

use colored::*;
use eyre::{Context, Result};
use regex::Regex;
use std::fs;
use walkdir::WalkDir;

use crate::config::Config;
use crate::trace::Event;

pub fn run(last: usize, filter: Option<&str>, config: &Config) -> Result<i32> {
    let dir = Config::expand_path(&config.trace.dir);
    let filter = filter.map(Regex::new).transpose().context("Invalid --filter regex")?;

    if !dir.is_dir() {
        println!("{} No traces under {}", "∅".dimmed(), dir.display());
        return Ok(0);
    }

    let mut events = Vec::new();
    for entry in WalkDir::new(&dir).into_iter().filter_map(|e| e.ok()) {
        if entry.path().extension().is_none_or(|ext| ext != "jsonl") {
            continue;
        }
        let content = match fs::read_to_string(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Failed to read {}: {}", entry.path().display(), e);
                continue;
            }
        };
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(event) = serde_json::from_str::<Event>(line) {
                if let Some(ref re) = filter
                    && !re.is_match(event.kind.name())
                {
                    continue;
                }
                events.push(event);
            }
        }
    }

    // RFC 3339 timestamps order lexicographically.
    events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let start = if last == 0 { 0 } else { events.len().saturating_sub(last) };
    for event in &events[start..] {
        println!("{}", event.format_display());
    }

    Ok(0)
}
