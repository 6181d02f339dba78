//! The structured event record handed to every sink
//!
//! Events are produced once, never mutated, and carry a common envelope
//! (timestamps, session identifier, thread label) plus kind-specific fields.
//! The JSON wire form tags the kind under `"event"`, e.g.
//! `{"event":"counter","id":"objects","total":42,...}`.

use chrono::{Local, Utc};
use colored::*;
use serde::{Deserialize, Serialize};

use super::sid::Sid;

/// Kind-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Version { version: String },
    Start { argv: Vec<String> },
    CmdName { name: String },
    DefParam { key: String, value: String },
    Data { category: String, key: String, value: String },
    Error { message: String },
    Bug { message: String, location: String },
    ChildStart { argv: Vec<String> },
    ChildExit { code: i32, elapsed: f64 },
    Exec { argv: Vec<String> },
    ExecResult { code: i32 },
    Alias { alias: String, expansion: Vec<String> },
    ThreadStart { label: String },
    ThreadExit { label: String },
    Timer { id: String, elapsed: f64, count: u64 },
    ThTimer { label: String, id: String, elapsed: f64, count: u64 },
    Counter { id: String, total: i64 },
    ThCounter { label: String, id: String, partial: i64 },
    Exit { code: i32 },
    Atexit { code: i32 },
}

impl EventKind {
    /// Wire name of the kind, as it appears in the `"event"` field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Version { .. } => "version",
            EventKind::Start { .. } => "start",
            EventKind::CmdName { .. } => "cmd_name",
            EventKind::DefParam { .. } => "def_param",
            EventKind::Data { .. } => "data",
            EventKind::Error { .. } => "error",
            EventKind::Bug { .. } => "bug",
            EventKind::ChildStart { .. } => "child_start",
            EventKind::ChildExit { .. } => "child_exit",
            EventKind::Exec { .. } => "exec",
            EventKind::ExecResult { .. } => "exec_result",
            EventKind::Alias { .. } => "alias",
            EventKind::ThreadStart { .. } => "thread_start",
            EventKind::ThreadExit { .. } => "thread_exit",
            EventKind::Timer { .. } => "timer",
            EventKind::ThTimer { .. } => "th_timer",
            EventKind::Counter { .. } => "counter",
            EventKind::ThCounter { .. } => "th_counter",
            EventKind::Exit { .. } => "exit",
            EventKind::Atexit { .. } => "atexit",
        }
    }
}

/// A single traced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Timestamp (UTC ISO 8601)
    pub timestamp: String,
    /// Local time for display
    pub local_time: String,
    /// Session identifier of the emitting process
    pub sid: String,
    /// Label of the emitting thread
    pub thread: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Stamp a new event with the current time.
    pub fn new(sid: &Sid, thread: &str, kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            local_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            sid: sid.to_string(),
            thread: thread.to_string(),
            kind,
        }
    }

    /// Format for terminal display
    pub fn format_display(&self) -> String {
        let kind_colored = match self.kind {
            EventKind::Version { .. } | EventKind::Start { .. } => self.kind.name().green(),
            EventKind::Exit { .. } | EventKind::Atexit { .. } => self.kind.name().red(),
            EventKind::Error { .. } | EventKind::Bug { .. } => self.kind.name().red().bold(),
            EventKind::Timer { .. } | EventKind::Counter { .. } => self.kind.name().cyan(),
            EventKind::ThTimer { .. } | EventKind::ThCounter { .. } => self.kind.name().blue(),
            EventKind::ChildStart { .. } | EventKind::ChildExit { .. } | EventKind::Exec { .. } | EventKind::ExecResult { .. } => {
                self.kind.name().yellow()
            }
            _ => self.kind.name().normal(),
        };

        let sid = self.sid.rsplit('/').next().unwrap_or(&self.sid);
        let mut parts = vec![
            self.local_time.dimmed().to_string(),
            format!("[{}]", &sid[..12.min(sid.len())]).dimmed().to_string(),
            kind_colored.to_string(),
            self.thread.bold().to_string(),
        ];

        if let Some(detail) = self.format_detail() {
            parts.push(detail);
        }

        parts.join(" ")
    }

    fn format_detail(&self) -> Option<String> {
        match &self.kind {
            EventKind::Version { version } => Some(version.clone()),
            EventKind::Start { argv } | EventKind::ChildStart { argv } | EventKind::Exec { argv } => {
                Some(argv.join(" "))
            }
            EventKind::CmdName { name } => Some(name.clone()),
            EventKind::DefParam { key, value } => Some(format!("{key}={value}")),
            EventKind::Data { category, key, value } => Some(format!("{category}/{key}={value}")),
            EventKind::Error { message } => Some(message.clone()),
            EventKind::Bug { message, location } => Some(format!("{message} ({location})")),
            EventKind::ChildExit { code, elapsed } => Some(format!("code={code} elapsed={elapsed:.3}s")),
            EventKind::ExecResult { code } => Some(format!("code={code}")),
            EventKind::Alias { alias, expansion } => Some(format!("{alias} -> {}", expansion.join(" "))),
            EventKind::ThreadStart { label } | EventKind::ThreadExit { label } => Some(label.clone()),
            EventKind::Timer { id, elapsed, count } => {
                Some(format!("{id} count={count} elapsed={elapsed:.3}s"))
            }
            EventKind::ThTimer { label, id, elapsed, count } => {
                Some(format!("{label}/{id} count={count} elapsed={elapsed:.3}s"))
            }
            EventKind::Counter { id, total } => Some(format!("{id} total={total}")),
            EventKind::ThCounter { label, id, partial } => Some(format!("{label}/{id} partial={partial}")),
            EventKind::Exit { code } | EventKind::Atexit { code } => Some(format!("code={code}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form_is_tagged_snake_case() {
        let event = Event::new(
            &Sid::root(),
            "main",
            EventKind::ThCounter {
                label: "worker".to_string(),
                id: "requests".to_string(),
                partial: 7,
            },
        );

        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["event"], "th_counter");
        assert_eq!(json["partial"], 7);
        assert_eq!(json["thread"], "main");
        assert!(json["sid"].as_str().unwrap().contains("-P"));
    }

    #[test]
    fn test_wire_form_round_trips() {
        let event = Event::new(
            &Sid::root(),
            "main",
            EventKind::ChildExit { code: 3, elapsed: 0.25 },
        );
        let parsed: Event = serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_display_contains_kind_and_detail() {
        let event = Event::new(
            &Sid::root(),
            "main",
            EventKind::Counter {
                id: "objects".to_string(),
                total: 42,
            },
        );
        let display = event.format_display();
        assert!(display.contains("counter"));
        assert!(display.contains("total=42"));
    }
}
