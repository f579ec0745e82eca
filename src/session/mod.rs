//! Serial console session management and device state transitions.
//!
//! This module owns the console byte stream for the duration of a provisioning
//! run. A background line reader drains the stream and classifies prompts,
//! while the foreground drives the device to global configuration mode and
//! pushes the configuration.
//!
//! # Main Components
//!
//! - [`ConsoleSession`] - Scoped owner of the byte stream and its reader task
//! - [`DeviceStateMachine`] - Prompt-driven transitions to global config mode
//! - [`ConfigPusher`] - Line-by-line configuration writer
//! - [`provision`] - The full run: transitions, confirmation, push, save
//! - [`ResponseLog`] / [`SessionRecorder`] - What the device said, and what we did

use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ProvisionConfig;
use crate::device::{DeviceState, PromptClassifier, PromptEvent};
use crate::error::ConsoleError;

pub use machine::{DeviceStateMachine, TransitionReport, run_transitions};
pub use operator::{Operator, ScriptedOperator};
pub use pusher::{ConfigPusher, ConfigScript, PushReport, redact_config_line};
pub use reader::spawn_line_reader;
pub use recording::{
    ResponseLog, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
    SessionReplayer,
};
pub use workflow::{ProvisionOutcome, ProvisionReport, provision, provision_session};

/// A console session over an open duplex byte stream.
///
/// The read half belongs to the line reader task; the write half stays here
/// and is only used by the foreground flow.
pub struct ConsoleSession<S> {
    writer: WriteHalf<S>,
    reader_task: JoinHandle<()>,
    prompts: mpsc::Receiver<PromptEvent>,
    raw_feed: broadcast::Sender<String>,
    log: ResponseLog,
    recorder: Option<SessionRecorder>,
    config: ProvisionConfig,
    closed: bool,
}

/// Writes `bytes` to the device and flushes.
///
/// `label` is what appears in logs and errors; callers pass a redacted label
/// for credentials.
pub(crate) async fn send_bytes<W>(
    writer: &mut W,
    bytes: &[u8],
    label: &str,
) -> Result<(), ConsoleError>
where
    W: AsyncWrite + Unpin,
{
    trace!("Sending {:?}", label);
    writer
        .write_all(bytes)
        .await
        .map_err(|source| ConsoleError::WriteError {
            command: label.to_string(),
            source,
        })?;
    writer
        .flush()
        .await
        .map_err(|source| ConsoleError::WriteError {
            command: label.to_string(),
            source,
        })
}

/// Human-readable form of a control sequence for logs and recordings.
pub(crate) fn command_label(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        "<return>".to_string()
    } else {
        trimmed.to_string()
    }
}

mod console;
mod machine;
mod operator;
mod pusher;
mod reader;
mod recording;
mod workflow;
