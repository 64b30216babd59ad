//! The event log hash chain verifies when untouched, survives a restart,
//! and reports the first tampered line.

use bl_audit::{verify_hash_chain, EventLog, JsonlEventSink, VerifyResult};
use bl_schemas::EventSink;
use serde_json::json;

#[test]
fn untampered_chain_verifies_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut log = EventLog::new(&path, true).unwrap();
    for i in 0..5 {
        log.append("bid_submitted", json!({ "rfq_id": format!("r{i}"), "amount": 100 + i }))
            .unwrap();
    }

    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 5 });
}

#[test]
fn tampered_params_detected_at_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");

    let mut log = EventLog::new(&path, true).unwrap();
    for i in 0..5 {
        log.append("bid_awarded", json!({ "index": i })).unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let tampered: Vec<String> = content
        .lines()
        .enumerate()
        .map(|(i, l)| {
            if i == 2 {
                l.replace("\"index\":2", "\"index\":99")
            } else {
                l.to_string()
            }
        })
        .collect();
    std::fs::write(&path, tampered.join("\n")).unwrap();

    match verify_hash_chain(&path).unwrap() {
        VerifyResult::Broken { line, .. } => assert_eq!(line, 3),
        other => panic!("expected broken chain, got {other:?}"),
    }
}

#[test]
fn sink_resumes_chain_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("events.jsonl");

    {
        let sink = JsonlEventSink::open(&path, true).unwrap();
        sink.log_event("rfq_created", json!({ "rfq_id": "r1" }));
        sink.log_event("bid_submitted", json!({ "rfq_id": "r1" }));
    }
    {
        let sink = JsonlEventSink::open(&path, true).unwrap();
        sink.log_event("bid_awarded", json!({ "rfq_id": "r1" }));
    }

    assert_eq!(verify_hash_chain(&path).unwrap(), VerifyResult::Valid { lines: 3 });
    let resumed = EventLog::resume(&path, true).unwrap();
    assert_eq!(resumed.seq(), 3);
}
