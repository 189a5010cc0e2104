//! History Log Integration Tests
//!
//! Tests for the JSONL format, concurrent appends and replay order.

use omnitide::core::{hash_input, HistoryLog};
use omnitide::domain::{HistoryEntry, DEFAULT_SNIPPET_CHARS};
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_entry_line_format() {
    let temp = TempDir::new().unwrap();
    let log = HistoryLog::new(temp.path().join("history.jsonl"));
    let run_id = Uuid::new_v4();

    let entry = HistoryEntry::new(run_id, "build", Some(0), "shell_command", false)
        .with_command("make")
        .with_exit_code(Some(2))
        .with_output("", "no rule to make target", DEFAULT_SNIPPET_CHARS)
        .with_duration(40)
        .with_error("Command 'make' exited with code Some(2)");
    log.append(&entry).await.unwrap();

    let raw = std::fs::read_to_string(log.path()).unwrap();
    assert_eq!(raw.lines().count(), 1);

    let line: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(line["run_id"], run_id.to_string());
    assert_eq!(line["step_id"], "build");
    assert_eq!(line["action_index"], 0);
    assert_eq!(line["exit_code"], 2);
    assert_eq!(line["success"], false);
    assert_eq!(line["stderr_snippet"], "no rule to make target");
    assert!(line["timestamp"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_concurrent_appends_do_not_interleave() {
    let temp = TempDir::new().unwrap();
    let log = HistoryLog::new(temp.path().join("history.jsonl"));
    let big = "y".repeat(DEFAULT_SNIPPET_CHARS);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let log = log.clone();
        let big = big.clone();
        tasks.push(tokio::spawn(async move {
            let run_id = Uuid::new_v4();
            for i in 0..25 {
                let entry = HistoryEntry::new(run_id, format!("w{}", worker), Some(i), "write_file", true)
                    .with_output(&big, "", DEFAULT_SNIPPET_CHARS);
                log.append(&entry).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let entries = log.replay().await.unwrap();
    assert_eq!(entries.len(), 200);

    let summary = log.summary().await.unwrap();
    assert_eq!(summary.total, 200);
    assert_eq!(summary.succeeded, 200);
    assert_eq!(summary.runs, 8);

    // Per-run order is preserved
    let first_run = entries[0].run_id;
    let indices: Vec<usize> = log
        .for_run(first_run)
        .await
        .unwrap()
        .iter()
        .filter_map(|e| e.action_index)
        .collect();
    assert_eq!(indices, (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_tail_returns_latest() {
    let temp = TempDir::new().unwrap();
    let log = HistoryLog::new(temp.path().join("history.jsonl"));
    let run_id = Uuid::new_v4();

    for i in 0..10 {
        log.append(&HistoryEntry::new(run_id, "s", Some(i), "sleep", true))
            .await
            .unwrap();
    }

    let tail = log.tail(3).await.unwrap();
    let indices: Vec<_> = tail.iter().filter_map(|e| e.action_index).collect();
    assert_eq!(indices, vec![7, 8, 9]);

    assert_eq!(log.tail(100).await.unwrap().len(), 10);
}

#[test]
fn test_hash_input() {
    let a = hash_input(r#"{"step_id": "a"}"#);
    assert_eq!(a.len(), 16);
    assert_eq!(a, hash_input(r#"{"step_id": "a"}"#));
    assert_ne!(a, hash_input(r#"{"step_id": "b"}"#));
}
