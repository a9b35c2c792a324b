use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use weft_core::error::{Result, WeftError};
use weft_core::types::{event_types, CompactionEvent, RunId, SessionEvent};

/// Filters for an event query. Empty query returns the full history.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub node_id: Option<String>,
    pub event_type: Option<String>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Summary of one run's logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub event_count: usize,
    pub compaction_count: usize,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
}

/// Append-only per-run event log plus a parallel compaction log.
///
/// Layout: `<root>/sessions/<run_id>/events.jsonl` and `compactions.jsonl`,
/// one JSON record per line. Crash-resilient: a partial final line loses at
/// most that one record. Events are never mutated; `delete_run` is the sole
/// destructive operation.
pub struct SessionStore {
    root: PathBuf,
    /// Next sequence number per run, lazily recovered from disk.
    next_seq: Mutex<HashMap<String, u64>>,
}

impl SessionStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("sessions"))?;
        Ok(Self {
            root,
            next_seq: Mutex::new(HashMap::new()),
        })
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join("sessions").join(&run_id.0)
    }

    /// Append an event, assigning its monotonic per-run sequence number.
    /// Returns the event as written.
    pub fn append_event(&self, mut event: SessionEvent) -> Result<SessionEvent> {
        let dir = self.run_dir(&event.run_id);
        std::fs::create_dir_all(&dir)?;

        let mut next_seq = self
            .next_seq
            .lock()
            .map_err(|_| WeftError::Io(std::io::Error::other("sequence lock poisoned")))?;
        let seq = match next_seq.get(&event.run_id.0) {
            Some(seq) => *seq,
            None => recover_next_seq(&dir.join("events.jsonl"))?,
        };
        event.seq = seq;

        append_line(&dir.join("events.jsonl"), &serde_json::to_string(&event)?)?;
        next_seq.insert(event.run_id.0.clone(), seq + 1);

        debug!(run_id = %event.run_id, seq, event_type = %event.event_type, "Event appended");
        Ok(event)
    }

    /// Append a compaction record, mirroring it into the main event log so
    /// the timeline stays continuous.
    pub fn append_compaction_event(&self, compaction: CompactionEvent) -> Result<()> {
        let dir = self.run_dir(&compaction.run_id);
        std::fs::create_dir_all(&dir)?;

        append_line(
            &dir.join("compactions.jsonl"),
            &serde_json::to_string(&compaction)?,
        )?;

        let mut mirror = SessionEvent::new(&compaction.run_id, event_types::COMPACTION)
            .with_refs(vec![format!(
                "span:{}..{}",
                compaction.span.from_seq, compaction.span.to_seq
            )])
            .with_payload(serde_json::to_value(&compaction.summary)?);
        mirror.node_id = compaction.node_id.clone();
        self.append_event(mirror)?;

        info!(
            run_id = %compaction.run_id,
            from_seq = compaction.span.from_seq,
            to_seq = compaction.span.to_seq,
            "Compaction recorded"
        );
        Ok(())
    }

    /// Filtered, ordered read of the full event history.
    pub fn events(&self, run_id: &RunId, query: &EventQuery) -> Result<Vec<SessionEvent>> {
        let events: Vec<SessionEvent> = read_jsonl(&self.run_dir(run_id).join("events.jsonl"))?;
        let mut out: Vec<SessionEvent> = events
            .into_iter()
            .filter(|e| {
                query
                    .node_id
                    .as_ref()
                    .map_or(true, |n| e.node_id.as_deref() == Some(n.as_str()))
            })
            .filter(|e| {
                query
                    .event_type
                    .as_ref()
                    .map_or(true, |t| &e.event_type == t)
            })
            .filter(|e| query.before.map_or(true, |ts| e.ts < ts))
            .filter(|e| query.after.map_or(true, |ts| e.ts > ts))
            .collect();
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    /// Events strictly after the latest compaction span. With no compaction
    /// yet, this is the full history.
    pub fn uncompacted_events(&self, run_id: &RunId) -> Result<Vec<SessionEvent>> {
        let events = self.events(run_id, &EventQuery::default())?;
        match self.latest_compaction(run_id)? {
            Some(compaction) => Ok(events
                .into_iter()
                .filter(|e| e.seq > compaction.span.to_seq)
                .collect()),
            None => Ok(events),
        }
    }

    /// The most recent compaction record, if any.
    pub fn latest_compaction(&self, run_id: &RunId) -> Result<Option<CompactionEvent>> {
        let compactions: Vec<CompactionEvent> =
            read_jsonl(&self.run_dir(run_id).join("compactions.jsonl"))?;
        Ok(compactions.into_iter().max_by_key(|c| c.span.to_seq))
    }

    pub fn run_metadata(&self, run_id: &RunId) -> Result<RunMetadata> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Err(WeftError::RunNotFound(run_id.0.clone()));
        }
        let events: Vec<SessionEvent> = read_jsonl(&dir.join("events.jsonl"))?;
        let compactions: Vec<CompactionEvent> = read_jsonl(&dir.join("compactions.jsonl"))?;
        Ok(RunMetadata {
            run_id: run_id.clone(),
            event_count: events.len(),
            compaction_count: compactions.len(),
            first_ts: events.first().map(|e| e.ts),
            last_ts: events.last().map(|e| e.ts),
        })
    }

    /// List known run ids, sorted.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs = Vec::new();
        let entries = match std::fs::read_dir(self.root.join("sessions")) {
            Ok(entries) => entries,
            Err(_) => return Ok(runs),
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                runs.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Remove a run's logs entirely. The sole destructive operation.
    pub fn delete_run(&self, run_id: &RunId) -> Result<()> {
        let dir = self.run_dir(run_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.next_seq
            .lock()
            .map_err(|_| WeftError::Io(std::io::Error::other("sequence lock poisoned")))?
            .remove(&run_id.0);
        info!(run_id = %run_id, "Run deleted");
        Ok(())
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Ok(Vec::new()),
    };
    let mut records = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

/// One past the highest sequence number already on disk.
fn recover_next_seq(path: &Path) -> Result<u64> {
    let events: Vec<SessionEvent> = read_jsonl(path)?;
    Ok(events.iter().map(|e| e.seq + 1).max().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::types::{CompactionSummary, EventSpan};

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn summary() -> CompactionSummary {
        CompactionSummary {
            goal: "ship the report".into(),
            decisions: vec!["markdown output".into()],
            constraints: vec![],
            open_questions: vec![],
            next_actions: vec!["write conclusion".into()],
            failures_so_far: vec![],
        }
    }

    #[test]
    fn test_append_assigns_monotonic_seq() {
        let (_dir, store) = store();
        let run = RunId::from_str("r1");
        let e1 = store.append_event(SessionEvent::new(&run, "node_started")).unwrap();
        let e2 = store.append_event(SessionEvent::new(&run, "node_completed")).unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
    }

    #[test]
    fn test_seq_recovered_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunId::from_str("r1");
        {
            let store = SessionStore::open(dir.path()).unwrap();
            store.append_event(SessionEvent::new(&run, "a")).unwrap();
            store.append_event(SessionEvent::new(&run, "b")).unwrap();
        }
        // Fresh store over the same tree resumes numbering
        let store = SessionStore::open(dir.path()).unwrap();
        let e = store.append_event(SessionEvent::new(&run, "c")).unwrap();
        assert_eq!(e.seq, 3);
    }

    #[test]
    fn test_query_filters() {
        let (_dir, store) = store();
        let run = RunId::from_str("r1");
        store
            .append_event(SessionEvent::new(&run, "node_started").with_node("a"))
            .unwrap();
        store
            .append_event(SessionEvent::new(&run, "node_completed").with_node("a"))
            .unwrap();
        store
            .append_event(SessionEvent::new(&run, "node_started").with_node("b"))
            .unwrap();

        let by_node = store
            .events(
                &run,
                &EventQuery {
                    node_id: Some("a".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_node.len(), 2);

        let by_type = store
            .events(
                &run,
                &EventQuery {
                    event_type: Some("node_started".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_type.len(), 2);

        let limited = store
            .events(
                &run,
                &EventQuery {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].seq, 1);
    }

    #[test]
    fn test_compaction_boundary() {
        let (_dir, store) = store();
        let run = RunId::from_str("r1");
        let first = store.append_event(SessionEvent::new(&run, "a")).unwrap();
        let second = store.append_event(SessionEvent::new(&run, "b")).unwrap();

        store
            .append_compaction_event(CompactionEvent {
                run_id: run.clone(),
                node_id: None,
                span: EventSpan {
                    from_seq: first.seq,
                    to_seq: second.seq,
                },
                summary: summary(),
                artifacts_index: vec![],
                created_at: Utc::now(),
            })
            .unwrap();

        let after = store.append_event(SessionEvent::new(&run, "c")).unwrap();

        // Only events strictly after the span: the compaction mirror + "c"
        let uncompacted = store.uncompacted_events(&run).unwrap();
        assert!(uncompacted.iter().all(|e| e.seq > second.seq));
        assert!(uncompacted.iter().any(|e| e.seq == after.seq));
        assert!(uncompacted
            .iter()
            .any(|e| e.event_type == event_types::COMPACTION));

        // Full history is untouched: original events still present
        let all = store.events(&run, &EventQuery::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].event_type, "a");
    }

    #[test]
    fn test_latest_compaction_picks_widest_seq() {
        let (_dir, store) = store();
        let run = RunId::from_str("r1");
        for event_type in ["a", "b", "c", "d"] {
            store.append_event(SessionEvent::new(&run, event_type)).unwrap();
        }
        for to_seq in [2, 4] {
            store
                .append_compaction_event(CompactionEvent {
                    run_id: run.clone(),
                    node_id: None,
                    span: EventSpan {
                        from_seq: 1,
                        to_seq,
                    },
                    summary: summary(),
                    artifacts_index: vec![],
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let latest = store.latest_compaction(&run).unwrap().unwrap();
        assert_eq!(latest.span.to_seq, 4);
    }

    #[test]
    fn test_run_metadata_and_delete() {
        let (_dir, store) = store();
        let run = RunId::from_str("r1");
        store.append_event(SessionEvent::new(&run, "a")).unwrap();

        let metadata = store.run_metadata(&run).unwrap();
        assert_eq!(metadata.event_count, 1);
        assert_eq!(metadata.compaction_count, 0);

        store.delete_run(&run).unwrap();
        assert!(matches!(
            store.run_metadata(&run),
            Err(WeftError::RunNotFound(_))
        ));
        // Numbering restarts after deletion
        let e = store.append_event(SessionEvent::new(&run, "fresh")).unwrap();
        assert_eq!(e.seq, 1);
    }

    #[test]
    fn test_missing_run_reads_empty() {
        let (_dir, store) = store();
        let run = RunId::from_str("ghost");
        assert!(store.events(&run, &EventQuery::default()).unwrap().is_empty());
        assert!(store.latest_compaction(&run).unwrap().is_none());
    }
}
