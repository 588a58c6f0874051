use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// JSONL log for one search session.
///
/// Each line is `{type, session_id, ts, ...payload}`; payload keys win over
/// the envelope. The file is opened on the first emit and kept open for the
/// writer's lifetime. Clones share the handle, so lines never interleave.
#[derive(Debug, Clone)]
pub struct EventWriter {
    log: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            log: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn for_new_session(path: impl Into<PathBuf>) -> Self {
        Self::new(path, new_session_id())
    }

    pub fn path(&self) -> &Path {
        &self.log.path
    }

    pub fn session_id(&self) -> &str {
        &self.log.session_id
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = self.envelope(event_type, payload);
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let mut slot = self
            .log
            .file
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(open_append(&self.log.path)?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.log.path.display()))?;
        }

        Ok(event)
    }

    /// Like [`EventWriter::emit`], but a failed write only warns on stderr.
    pub fn emit_lossy(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            eprintln!("vestis: dropped {event_type} event: {err:#}");
        }
    }

    fn envelope(&self, event_type: &str, mut payload: EventPayload) -> Value {
        payload
            .entry("type")
            .or_insert_with(|| Value::String(event_type.to_string()));
        payload
            .entry("session_id")
            .or_insert_with(|| Value::String(self.log.session_id.clone()));
        payload
            .entry("ts")
            .or_insert_with(|| Value::String(timestamp()));
        Value::Object(payload)
    }
}

fn open_append(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open event log {}", path.display()))
}

pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{EventPayload, EventWriter};

    fn read_events(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .map(|line| serde_json::from_str(line).map_err(Into::into))
            .collect()
    }

    #[test]
    fn submitted_event_carries_envelope_and_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "session-7");

        let mut payload = EventPayload::new();
        payload.insert("seq".to_string(), json!(1));
        payload.insert("has_image".to_string(), json!(false));
        let emitted = writer.emit("search_submitted", payload)?;

        let events = read_events(&path)?;
        assert_eq!(events, vec![emitted]);
        assert_eq!(events[0]["type"], json!("search_submitted"));
        assert_eq!(events[0]["session_id"], json!("session-7"));
        assert_eq!(events[0]["seq"], json!(1));
        DateTime::parse_from_rfc3339(events[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn payload_keys_win_over_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "session-7");

        let mut payload = EventPayload::new();
        payload.insert("session_id".to_string(), json!("replayed"));
        let emitted = writer.emit("search_ready", payload)?;

        assert_eq!(emitted["type"], json!("search_ready"));
        assert_eq!(emitted["session_id"], json!("replayed"));
        Ok(())
    }

    #[test]
    fn clones_share_one_log_across_threads() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::for_new_session(&path);

        thread::scope(|scope| {
            for worker in 0..4 {
                let writer = writer.clone();
                scope.spawn(move || {
                    for n in 0..5 {
                        let mut payload = EventPayload::new();
                        payload.insert("product_id".to_string(), json!(format!("{worker}-{n}")));
                        writer.emit_lossy("image_loaded", payload);
                    }
                });
            }
        });

        let events = read_events(&path)?;
        assert_eq!(events.len(), 20);
        assert!(events
            .iter()
            .all(|event| event["session_id"] == json!(writer.session_id())));
        assert!(uuid::Uuid::parse_str(writer.session_id()).is_ok());
        Ok(())
    }

    #[test]
    fn unwritable_log_reports_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        fs::write(&blocker, b"")?;
        let writer = EventWriter::new(blocker.join("events.jsonl"), "session-7");

        assert!(writer.emit("session_reset", EventPayload::new()).is_err());
        writer.emit_lossy("session_reset", EventPayload::new());
        Ok(())
    }
}
