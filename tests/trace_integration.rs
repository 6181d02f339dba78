//! Integration tests for the tracing core
//!
//! Each test runs the spoor binary with tracing forced into a temp
//! directory, then reads the per-process JSONL files back and asserts on
//! the emitted event stream:
//! - exit-code propagation and the exit/atexit pair on every exit route
//! - session-identifier depth across spawned and exec'd children
//! - counter/timer aggregation across threads
//! - defect semantics (recoverable, escalated, fatal)

use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Helper to get the spoor binary path
fn spoor_binary() -> PathBuf {
    // When running tests, the binary is in target/debug/spoor
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps
    path.push("spoor");
    path
}

/// Isolated home + trace directory for one traced invocation tree.
struct TraceFixture {
    home: TempDir,
    trace_dir: PathBuf,
}

impl TraceFixture {
    fn new() -> Self {
        let home = TempDir::new().expect("Failed to create temp home");
        let trace_dir = home.path().join("traces");
        Self { home, trace_dir }
    }

    /// Write a config file and point SPOOR_CONFIG at it.
    fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.home.path().join("spoor.yaml");
        fs::write(&path, yaml).expect("Failed to write config");
        path
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(spoor_binary());
        cmd.current_dir(self.home.path())
            .env("HOME", self.home.path())
            .env("SPOOR_TRACE", &self.trace_dir)
            .env("SPOOR_CONFIG", self.home.path().join("spoor.yaml"))
            .env_remove("SPOOR_DIR")
            .env_remove("SPOOR_SID")
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("XDG_DATA_HOME")
            .env_remove("RUST_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command().args(args).output().expect("Failed to execute spoor")
    }

    /// All events of every process in the tree, one Vec per trace file,
    /// shallowest process first.
    fn processes(&self) -> Vec<Vec<Value>> {
        let mut processes = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.trace_dir) {
            for entry in entries.flatten() {
                let content = fs::read_to_string(entry.path()).unwrap();
                let events: Vec<Value> = content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| serde_json::from_str(l).unwrap())
                    .collect();
                assert!(!events.is_empty(), "empty trace file {:?}", entry.path());
                processes.push(events);
            }
        }
        processes.sort_by_key(|events| sid_depth(&events[0]));
        processes
    }

    /// Events of the single traced process; fails if there were children.
    fn events(&self) -> Vec<Value> {
        let mut processes = self.processes();
        assert_eq!(processes.len(), 1, "expected exactly one traced process");
        processes.remove(0)
    }
}

fn sid_depth(event: &Value) -> usize {
    event["sid"].as_str().unwrap().split('/').count()
}

fn kinds(events: &[Value]) -> Vec<&str> {
    events.iter().map(|e| e["event"].as_str().unwrap()).collect()
}

fn find<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["event"] == kind).collect()
}

#[test]
fn test_return_propagates_code_and_emits_exit_pair() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["return", "7"]);
    assert_eq!(output.status.code(), Some(7));

    let events = fixture.events();
    let kinds = kinds(&events);
    assert_eq!(kinds[0], "version");
    assert_eq!(kinds[1], "start");
    assert!(kinds.contains(&"cmd_name"));
    assert!(kinds.contains(&"def_param"));

    let exits = find(&events, "exit");
    let atexits = find(&events, "atexit");
    assert_eq!(exits.len(), 1);
    assert_eq!(atexits.len(), 1);
    assert_eq!(exits[0]["code"], 7);
    assert_eq!(atexits[0]["code"], 7);

    let cmd_name = find(&events, "cmd_name");
    assert_eq!(cmd_name[0]["name"], "return");
}

#[test]
fn test_explicit_exit_emits_exactly_one_pair() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["exit", "5"]);
    assert_eq!(output.status.code(), Some(5));

    let events = fixture.events();
    assert_eq!(find(&events, "exit").len(), 1);
    assert_eq!(find(&events, "atexit").len(), 1);
    assert_eq!(find(&events, "exit")[0]["code"], 5);
}

#[test]
fn test_normal_termination_yields_code_zero_pair() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["error", "x"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    assert_eq!(find(&events, "exit")[0]["code"], 0);
    assert_eq!(find(&events, "atexit")[0]["code"], 0);
}

#[test]
fn test_three_errors_emit_three_events_before_exit() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["error", "one", "two", "three"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    let kinds = kinds(&events);
    let error_positions: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == "error")
        .map(|(i, _)| i)
        .collect();
    let exit_position = kinds.iter().position(|k| *k == "exit").unwrap();

    assert_eq!(error_positions.len(), 3);
    assert!(error_positions.iter().all(|p| *p < exit_position));

    let messages: Vec<&str> = find(&events, "error")
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["one", "two", "three"]);
}

#[test]
fn test_data_events_carry_their_triples() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["data", "io", "reads", "10", "net", "conns", "2"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    let data = find(&events, "data");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["category"], "io");
    assert_eq!(data[0]["key"], "reads");
    assert_eq!(data[0]["value"], "10");
    assert_eq!(data[1]["category"], "net");
}

#[test]
fn test_malformed_data_triples_die() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["data", "io", "reads"]);
    assert_eq!(output.status.code(), Some(128));
}

#[test]
fn test_usage_errors_exit_129() {
    let fixture = TraceFixture::new();
    assert_eq!(fixture.run(&[]).status.code(), Some(129));
    assert_eq!(fixture.run(&["return", "notanint"]).status.code(), Some(129));
    assert_eq!(fixture.run(&["no-such-command"]).status.code(), Some(129));
}

#[test]
fn test_child_exit_code_propagates_and_sid_deepens() {
    let fixture = TraceFixture::new();
    let bin = spoor_binary();
    let output = fixture.run(&["child", bin.to_str().unwrap(), "return", "9"]);
    assert_eq!(output.status.code(), Some(9));

    let processes = fixture.processes();
    assert_eq!(processes.len(), 2);
    let parent = &processes[0];
    let child = &processes[1];

    // Parent brackets the child and propagates its code.
    let child_start = find(parent, "child_start");
    let child_exit = find(parent, "child_exit");
    assert_eq!(child_start.len(), 1);
    assert_eq!(child_exit.len(), 1);
    assert_eq!(child_exit[0]["code"], 9);
    assert!(child_exit[0]["elapsed"].as_f64().unwrap() >= 0.0);
    assert_eq!(find(parent, "exit")[0]["code"], 9);

    // The child's identifier is the parent's extended by one segment.
    let parent_sid = parent[0]["sid"].as_str().unwrap();
    let child_sid = child[0]["sid"].as_str().unwrap();
    assert_eq!(sid_depth(&parent[0]), 1);
    assert_eq!(sid_depth(&child[0]), 2);
    assert!(child_sid.starts_with(&format!("{parent_sid}/")));

    // The instrumented child emits its own full lifecycle.
    assert_eq!(find(child, "exit")[0]["code"], 9);
    assert_eq!(find(child, "atexit").len(), 1);
}

#[test]
fn test_nested_children_deepen_by_one_per_hop() {
    let fixture = TraceFixture::new();
    let bin = spoor_binary();
    let bin = bin.to_str().unwrap();
    let output = fixture.run(&["child", bin, "child", bin, "return", "3"]);
    assert_eq!(output.status.code(), Some(3));

    let processes = fixture.processes();
    assert_eq!(processes.len(), 3);
    let depths: Vec<usize> = processes.iter().map(|p| sid_depth(&p[0])).collect();
    assert_eq!(depths, vec![1, 2, 3]);
}

#[test]
fn test_missing_child_command_exits_127() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["child", "spoor-definitely-not-installed"]);
    assert_eq!(output.status.code(), Some(127));

    let events = fixture.events();
    assert_eq!(find(&events, "child_exit")[0]["code"], 127);
}

#[test]
fn test_alias_expansion_is_recorded() {
    let fixture = TraceFixture::new();
    let bin = spoor_binary();
    fixture.write_config(&format!(
        "aliases:\n  nine: [\"{}\", \"return\", \"9\"]\n",
        bin.display()
    ));

    let output = fixture.run(&["child", "nine"]);
    assert_eq!(output.status.code(), Some(9));

    let processes = fixture.processes();
    let parent = &processes[0];
    let alias = find(parent, "alias");
    assert_eq!(alias.len(), 1);
    assert_eq!(alias[0]["alias"], "nine");
    assert_eq!(alias[0]["expansion"][1], "return");
}

#[test]
fn test_exec_replaces_process_under_deeper_sid() {
    let fixture = TraceFixture::new();
    let bin = spoor_binary();
    let output = fixture.run(&["exec", bin.to_str().unwrap(), "return", "4"]);
    assert_eq!(output.status.code(), Some(4));

    let processes = fixture.processes();
    assert_eq!(processes.len(), 2);
    let outer = &processes[0];
    let inner = &processes[1];

    // The outer image emitted exec and then was replaced: no exit pair.
    assert_eq!(find(outer, "exec").len(), 1);
    assert!(find(outer, "exit").is_empty());
    assert!(find(outer, "atexit").is_empty());

    // The replacement runs one level deeper and exits normally.
    assert_eq!(sid_depth(&inner[0]), 2);
    assert_eq!(find(inner, "exit")[0]["code"], 4);
}

#[test]
fn test_counter_aggregate_is_sum_of_values() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["counter", "1", "2", "3", "4", "--id", "objects"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    let counters = find(&events, "counter");
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0]["id"], "objects");
    assert_eq!(counters[0]["total"], 10);
}

#[test]
fn test_counter_aggregates_across_threads() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["counter", "3", "4", "--threads", "4", "--id", "objects"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();

    // One partial-sum event per worker, each with its own label.
    let partials = find(&events, "th_counter");
    assert_eq!(partials.len(), 4);
    for partial in &partials {
        assert_eq!(partial["partial"], 7);
        assert_eq!(partial["label"], "worker");
        assert_eq!(partial["thread"], "worker");
    }

    // Thread lifecycle events bracket the partials.
    assert_eq!(find(&events, "thread_start").len(), 4);
    assert_eq!(find(&events, "thread_exit").len(), 4);

    // Aggregate is the sum over all threads.
    assert_eq!(find(&events, "counter")[0]["total"], 28);
}

#[test]
fn test_timer_counts_intervals_and_accumulates_elapsed() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["timer", "5", "10", "--id", "walk"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    let timers = find(&events, "timer");
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0]["id"], "walk");
    assert_eq!(timers[0]["count"], 5);
    assert!(timers[0]["elapsed"].as_f64().unwrap() >= 0.05);
}

#[test]
fn test_timer_aggregates_across_threads() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["timer", "5", "10", "--threads", "2", "--id", "walk"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();

    // Per-thread summaries: five intervals each.
    let summaries = find(&events, "th_timer");
    assert_eq!(summaries.len(), 2);
    for summary in &summaries {
        assert_eq!(summary["count"], 5);
        assert!(summary["elapsed"].as_f64().unwrap() >= 0.05);
    }

    // Aggregate: ten intervals, at least the total imposed delay.
    let timer = find(&events, "timer")[0];
    assert_eq!(timer["count"], 10);
    assert!(timer["elapsed"].as_f64().unwrap() >= 0.1);
}

#[test]
fn test_recoverable_bugs_do_not_terminate() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["bug", "first", "second"]);
    assert_eq!(output.status.code(), Some(0));

    let events = fixture.events();
    let bugs = find(&events, "bug");
    assert_eq!(bugs.len(), 2);
    assert_eq!(bugs[0]["message"], "first");
    assert!(bugs[0]["location"].as_str().unwrap().contains(".rs"));
    assert_eq!(find(&events, "exit")[0]["code"], 0);
}

#[test]
fn test_escalated_bugs_terminate_with_defect_code() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["bug", "first", "--escalate"]);
    assert_eq!(output.status.code(), Some(99));

    let events = fixture.events();
    assert_eq!(find(&events, "exit").len(), 1);
    assert_eq!(find(&events, "atexit").len(), 1);
    assert_eq!(find(&events, "exit")[0]["code"], 99);
}

#[test]
fn test_bug_requires_a_message() {
    let fixture = TraceFixture::new();
    let output = fixture.command().args(["bug", "--escalate"]).output().unwrap();
    assert_eq!(output.status.code(), Some(129));
}

#[test]
fn test_fatal_bug_terminates_after_one_exit_pair() {
    let fixture = TraceFixture::new();
    let output = fixture.run(&["fatal-bug", "broken invariant"]);
    assert_eq!(output.status.code(), Some(99));

    let events = fixture.events();
    let bugs = find(&events, "bug");
    assert_eq!(bugs.len(), 1);
    assert_eq!(bugs[0]["message"], "broken invariant");
    assert_eq!(find(&events, "exit").len(), 1);
    assert_eq!(find(&events, "atexit").len(), 1);
    assert_eq!(find(&events, "exit")[0]["code"], 99);
}

#[test]
fn test_escalate_on_exit_policy_from_config() {
    let fixture = TraceFixture::new();
    fixture.write_config("trace:\n  escalate_on_exit: true\n");

    let output = fixture.run(&["bug", "leftover"]);
    assert_eq!(output.status.code(), Some(99));

    let events = fixture.events();
    assert_eq!(find(&events, "exit")[0]["code"], 99);
}

#[test]
fn test_def_params_report_config_settings() {
    let fixture = TraceFixture::new();
    fixture.run(&["return", "0"]);

    let events = fixture.events();
    let params: Vec<&str> = find(&events, "def_param")
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert!(params.contains(&"trace.sinks"));
    assert!(params.contains(&"trace.escalate_on_exit"));
}

#[test]
fn test_disabled_tracing_writes_nothing() {
    let fixture = TraceFixture::new();
    let output = fixture
        .command()
        .env_remove("SPOOR_TRACE")
        .args(["return", "6"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(6));
    assert!(!fixture.trace_dir.exists());
}

#[test]
fn test_events_share_one_sid_and_carry_thread_labels() {
    let fixture = TraceFixture::new();
    fixture.run(&["counter", "1", "--threads", "2"]);

    let events = fixture.events();
    let sids: Vec<&str> = events.iter().map(|e| e["sid"].as_str().unwrap()).collect();
    assert!(sids.iter().all(|s| *s == sids[0]));

    let main_events = find(&events, "start");
    assert_eq!(main_events[0]["thread"], "main");
}

#[test]
fn test_show_reads_back_traced_events() {
    let fixture = TraceFixture::new();
    fixture.run(&["return", "0"]);

    let output = fixture.run(&["show", "--last", "0", "--filter", "exit"]);
    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("exit"));
}
