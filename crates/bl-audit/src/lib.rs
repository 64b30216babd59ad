//! bl-audit
//!
//! Append-only procurement event log: JSON Lines, one event per line, with an
//! optional SHA-256 hash chain (`hash_prev` + `hash_self`) so that edits to
//! past lines are detectable by [`verify_hash_chain`].
//!
//! [`JsonlEventSink`] plugs the log into services as their
//! [`bl_schemas::EventSink`]; [`MemoryEventSink`] records events in memory.

use anyhow::{Context, Result};
use bl_schemas::EventSink;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Namespace for deterministic event ids.
const EVENT_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c0b_4f1e_9a7d_4b52_8e11_0d3a_55c2_a901);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub name: String,
    pub params: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only writer. Not `Sync`; share it through [`JsonlEventSink`].
pub struct EventLog {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl EventLog {
    /// Creates the writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {:?}", parent))?;
        }
        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Open an existing log and continue its chain after the last line.
    pub fn resume(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let mut log = Self::new(&path, hash_chain)?;
        if !log.path.exists() {
            return Ok(log);
        }
        let content = fs::read_to_string(&log.path)
            .with_context(|| format!("read event log {:?}", log.path))?;
        if let Some(last) = content.lines().rev().find(|l| !l.trim().is_empty()) {
            let ev: AuditEvent =
                serde_json::from_str(last.trim()).context("parse last event line")?;
            log.last_hash = ev.hash_self;
            log.seq = ev.seq + 1;
        }
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }

    pub fn append(&mut self, name: &str, params: Value) -> Result<AuditEvent> {
        let event_id = derive_event_id(self.last_hash.as_deref(), name, &params, self.seq)?;
        let mut ev = AuditEvent {
            event_id,
            seq: self.seq,
            ts_utc: Utc::now(),
            name: name.to_string(),
            params,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            ev.hash_self = Some(compute_event_hash(&ev)?);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        self.seq += 1;
        if self.hash_chain {
            self.last_hash = ev.hash_self.clone();
        }
        Ok(ev)
    }
}

/// Deterministic id from chain position and content.
fn derive_event_id(prev: Option<&str>, name: &str, params: &Value, seq: u64) -> Result<Uuid> {
    let body = canonical_json_line(params)?;
    let material = format!("{}|{}|{}|{}", prev.unwrap_or("-"), seq, name, body);
    Ok(Uuid::new_v5(&EVENT_ID_NAMESPACE, material.as_bytes()))
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open event log {:?}", path))?;
    f.write_all(line.as_bytes())
        .context("write event line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Compact JSON with object keys sorted recursively.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize event failed")?;
    serde_json::to_string(&sort_keys(&raw)).context("json stringify failed")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Hash of the canonical event with `hash_self` cleared.
pub fn compute_event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { lines: usize },
    Broken { line: usize, reason: String },
}

pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read event log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut expected_seq: Option<u64> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let ev: AuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse event at line {}", i + 1))?;
        line_count += 1;

        if let Some(want) = expected_seq {
            if ev.seq != want {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("seq gap: expected {want}, got {}", ev.seq),
                });
            }
        }
        expected_seq = Some(ev.seq + 1);

        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {:?}, got {:?}",
                    prev_hash, ev.hash_prev
                ),
            });
        }

        if let Some(ref claimed) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!("hash_self mismatch: claimed {claimed}, recomputed {recomputed}"),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// [`EventSink`] writing to an [`EventLog`]. Write failures are logged and
/// dropped; callers never see them.
pub struct JsonlEventSink {
    log: Mutex<EventLog>,
}

impl JsonlEventSink {
    pub fn new(log: EventLog) -> Self {
        Self {
            log: Mutex::new(log),
        }
    }

    pub fn open(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        Ok(Self::new(EventLog::resume(path, hash_chain)?))
    }
}

impl EventSink for JsonlEventSink {
    fn log_event(&self, name: &str, params: Value) {
        let mut log = match self.log.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = log.append(name, params) {
            warn!(event = name, error = %e, "event log append failed");
        }
    }
}

/// In-memory sink, for tests and for running without an audit file.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        match self.events.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|(n, _)| n).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn log_event(&self, name: &str, params: Value) {
        let mut g = match self.events.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        g.push((name.to_string(), params));
    }
}
