//! Error types for serial console sessions and device state management.
//!
//! This module defines all errors that can occur while opening the console,
//! driving the device through its prompt states, and pushing configuration.
//! Undecodable bytes read from the console are not an error: the line reader
//! drops them silently.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during console provisioning.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// The serial console could not be opened.
    ///
    /// Nothing was acquired, so no cleanup is needed.
    #[error("failed to open console channel: {0}")]
    ChannelOpenError(String),

    /// A write to the device failed mid-session.
    ///
    /// `command` is the redacted text of what was being sent.
    #[error("failed to send '{command}': {source}")]
    WriteError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Unclassified prompts exhausted the retry budget.
    #[error("max retries reached ({0}) without reaching global config mode")]
    MaxRetriesExceeded(usize),

    /// The device stayed silent through every probe of the silence budget.
    #[error("no recognizable prompt after {0} probes")]
    ClassificationTimeout(usize),

    /// The line reader stopped while the state machine was waiting for a prompt.
    ///
    /// This happens when the console reports EOF or a fatal read error.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The console session has already been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// A prompt rule pattern failed to compile.
    #[error("invalid prompt pattern: {0}")]
    InvalidPattern(String),

    /// Provisioning settings are inconsistent.
    #[error("invalid provision config: {0}")]
    InvalidConfig(String),

    /// An operator hook (password or confirmation) failed.
    #[error("operator input failed: {0}")]
    OperatorError(String),

    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigFileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The response log could not be written.
    #[error("failed to write log file {path}: {source}")]
    LogFileError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ConsoleError {
    /// Returns true for errors raised after the console was acquired.
    ///
    /// These are the failures that require the session to be closed before
    /// the error is reported.
    pub fn requires_cleanup(&self) -> bool {
        matches!(
            self,
            ConsoleError::WriteError { .. }
                | ConsoleError::MaxRetriesExceeded(_)
                | ConsoleError::ClassificationTimeout(_)
                | ConsoleError::ChannelDisconnectError
                | ConsoleError::OperatorError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ConsoleError;

    #[test]
    fn fatal_session_errors_require_cleanup() {
        assert!(ConsoleError::MaxRetriesExceeded(15).requires_cleanup());
        assert!(ConsoleError::ClassificationTimeout(15).requires_cleanup());
        assert!(
            ConsoleError::WriteError {
                command: "conf t".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            }
            .requires_cleanup()
        );
        assert!(!ConsoleError::ChannelOpenError("busy".to_string()).requires_cleanup());
    }

    #[test]
    fn write_error_message_names_the_command() {
        let err = ConsoleError::WriteError {
            command: "hostname R1".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert!(err.to_string().contains("hostname R1"));
    }
}
