use super::*;
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Append-only log of every line received from the console.
///
/// Cloning shares the underlying buffer: the line reader appends, callers
/// take snapshots.
#[derive(Debug, Clone, Default)]
pub struct ResponseLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, line: &str) -> Result<(), ConsoleError> {
        let mut guard = self
            .lines
            .lock()
            .map_err(|e| ConsoleError::InternalError(format!("response log lock error: {e}")))?;
        guard.push(line.to_string());
        Ok(())
    }

    /// Snapshot of all lines received so far, in arrival order.
    pub fn lines(&self) -> Result<Vec<String>, ConsoleError> {
        let guard = self
            .lines
            .lock()
            .map_err(|e| ConsoleError::InternalError(format!("response log lock error: {e}")))?;
        Ok(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.lines.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the log to `path`, one line per received line.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConsoleError> {
        let path = path.as_ref();
        let mut text = self.lines()?.join("\n");
        text.push('\n');
        std::fs::write(path, text).map_err(|source| ConsoleError::LogFileError {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and every received line.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    LineReceived {
        line: String,
    },
    PromptDetected {
        line: String,
        state: DeviceState,
    },
    StateChanged {
        from: DeviceState,
        to: DeviceState,
    },
    /// Command written by the state machine. Credentials are redacted.
    CommandSent {
        command: String,
    },
    ProbeSent {
        silent_probes: usize,
    },
    RetryCounted {
        attempt: usize,
        line: String,
    },
    ConfigLineSent {
        index: usize,
        line: String,
    },
    ConfigSaved,
    SessionClosed {
        reason: String,
    },
}

/// In-memory session recorder.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConsoleError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::InternalError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record a received console line when enabled.
    pub fn record_line(&self, line: &str) -> Result<(), ConsoleError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::LineReceived {
            line: line.to_string(),
        })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConsoleError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConsoleError::InternalError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConsoleError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| ConsoleError::InternalError(format!("record encode error: {e}")))?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConsoleError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line)
                .map_err(|e| ConsoleError::InternalError(format!("record decode error: {e}")))?;
            parsed.push(entry);
        }

        let mut guard = recorder
            .entries
            .lock()
            .map_err(|e| ConsoleError::InternalError(format!("record lock error: {e}")))?;
        *guard = parsed;
        drop(guard);

        Ok(recorder)
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline replayer backed by session recording data.
///
/// Feeds recorded console lines back through a classifier so prompt rule
/// changes can be checked against real device captures.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
}

impl SessionReplayer {
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self { entries }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConsoleError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Recorded console lines, in arrival order.
    pub fn device_lines(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::LineReceived { line } => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Recorded commands, in send order.
    pub fn commands(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::CommandSent { command } => Some(command.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Recorded `(from, to)` state changes.
    pub fn state_changes(&self) -> Vec<(DeviceState, DeviceState)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }

    /// Configuration lines that were pushed, with their script line index.
    pub fn config_lines(&self) -> Vec<(usize, &str)> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::ConfigLineSent { index, line } => Some((*index, line.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Prompt detections as they were recorded.
    pub fn recorded_prompts(&self) -> Vec<PromptEvent> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.event {
                SessionEvent::PromptDetected { line, state } => {
                    Some(PromptEvent::new(line.clone(), *state))
                }
                _ => None,
            })
            .collect()
    }

    /// Re-classifies every recorded line with `classifier`.
    pub fn replay_prompts(&self, classifier: &PromptClassifier) -> Vec<PromptEvent> {
        self.device_lines()
            .into_iter()
            .filter_map(|line| {
                classifier
                    .classify(line)
                    .map(|state| PromptEvent::new(line, state))
            })
            .collect()
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
