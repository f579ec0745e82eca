use super::*;
use crate::device::WRITE_MEMORY;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::Path;

/// Keywords whose arguments are credentials in IOS configuration.
static SECRET_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"(?i)\b(secret|password|key-string|community)\b.*$") {
        Ok(re) => re,
        Err(err) => panic!("invalid SECRET_ARGUMENT regex: {err}"),
    }
});

/// Masks everything after a credential keyword, for logs, errors and recordings.
pub fn redact_config_line(line: &str) -> Cow<'_, str> {
    SECRET_ARGUMENT.replace(line, "$1 <redacted>")
}

/// Configuration lines to push, as read from the input file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigScript {
    lines: Vec<String>,
}

impl ConfigScript {
    /// Splits `text` into lines, trimming surrounding whitespace from each.
    ///
    /// Blank lines are kept: an empty line is sent as a bare return.
    pub fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(|line| line.trim().to_string()).collect(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConsoleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConsoleError::ConfigFileError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines that will actually be written: `!` comment lines are left out.
    pub fn effective_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .filter(|line| !is_comment(line))
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('!')
}

/// Outcome of a configuration push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PushReport {
    /// Lines written to the device.
    pub sent: usize,
    /// Comment lines skipped.
    pub skipped: usize,
    /// Hex SHA-256 over the written lines, each terminated by `\n`.
    pub digest: String,
}

/// Writes a [`ConfigScript`] to the device line by line.
///
/// Each line goes out as `line\r\n`, followed by the inter-line delay so the
/// console can keep up. The pusher does not wait for prompts.
pub struct ConfigPusher {
    inter_line_delay: Duration,
    save_settle: Duration,
    recorder: Option<SessionRecorder>,
}

impl ConfigPusher {
    pub fn new(config: &ProvisionConfig) -> Self {
        Self {
            inter_line_delay: config.inter_line_delay(),
            save_settle: config.save_settle(),
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Option<SessionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Pushes every non-comment line of `script`, in file order.
    ///
    /// Stops at the first failed write.
    pub async fn push<W>(&self, writer: &mut W, script: &ConfigScript) -> Result<PushReport, ConsoleError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Sending configuration ({} lines)...", script.len());
        let mut hasher = Sha256::new();
        let mut sent = 0usize;
        let mut skipped = 0usize;

        for (index, line) in script.lines().iter().enumerate() {
            if is_comment(line) {
                trace!("Skipping comment line {}", index + 1);
                skipped += 1;
                continue;
            }
            let payload = format!("{line}\r\n");
            let shown = redact_config_line(line);
            send_bytes(writer, payload.as_bytes(), &shown).await?;
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
            sent += 1;
            debug!("Sent config line {}: '{}'", index + 1, shown);
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::ConfigLineSent {
                    index,
                    line: shown.into_owned(),
                });
            }
            tokio::time::sleep(self.inter_line_delay).await;
        }

        let digest = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>();
        info!("Configuration sent: {} lines, {} comments skipped.", sent, skipped);
        Ok(PushReport {
            sent,
            skipped,
            digest,
        })
    }

    /// Writes the running configuration to startup.
    pub async fn save<W>(&self, writer: &mut W) -> Result<(), ConsoleError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("Saving running-config to startup-config...");
        send_bytes(writer, WRITE_MEMORY, &command_label(WRITE_MEMORY)).await?;
        tokio::time::sleep(self.save_settle).await;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConfigSaved);
        }
        Ok(())
    }
}
