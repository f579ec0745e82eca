//! Prompt classification for network device consoles.
//!
//! This module maps a line of console output to the device state it signals.
//! Classification is an ordered walk over a fixed rule list: the first rule
//! whose pattern matches (and whose exclusion does not) decides the state.
//! The `regex` crate has no look-around, so "`#` not followed by `(config)#`"
//! is expressed as a pattern plus an exclusion pattern.

use std::fmt;

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Bare return, used both as a probe and to dismiss autoinstall.
pub const PROBE: &[u8] = b"\r\n";

/// Declines the initial configuration dialog.
pub const DECLINE_DIALOG: &[u8] = b"no\r\n";

/// Requests privileged exec mode.
pub const ENABLE: &[u8] = b"en\r";

/// Enters global configuration mode.
pub const CONFIGURE_TERMINAL: &[u8] = b"conf t\r";

/// Saves the running configuration to startup configuration.
pub const WRITE_MEMORY: &[u8] = b"write memory\r";

/// The prompt state a device console is presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    #[default]
    Unknown,
    /// First-boot setup wizard asking to enter the initial configuration dialog.
    InitialConfigDialog,
    /// Autoinstall banner or "Press RETURN to get started".
    AutoinstallPrompt,
    /// Line or enable password prompt.
    PasswordPrompt,
    /// `Router>`
    UserExecMode,
    /// `Router#`
    PrivilegedExecMode,
    /// `Router(config)#`
    GlobalConfigMode,
}

impl DeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::InitialConfigDialog => "initial_config_dialog",
            DeviceState::AutoinstallPrompt => "autoinstall_prompt",
            DeviceState::PasswordPrompt => "password_prompt",
            DeviceState::UserExecMode => "user_exec_mode",
            DeviceState::PrivilegedExecMode => "privileged_exec_mode",
            DeviceState::GlobalConfigMode => "global_config_mode",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A console line that matched a prompt rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PromptEvent {
    pub line: String,
    pub state: DeviceState,
}

impl PromptEvent {
    pub fn new(line: impl Into<String>, state: DeviceState) -> Self {
        Self {
            line: line.into(),
            state,
        }
    }
}

/// One classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRule {
    pub state: DeviceState,
    /// Alternatives; any match selects the rule.
    pub patterns: Vec<String>,
    /// The rule is skipped when this pattern also matches the line.
    pub unless: Option<String>,
}

impl PromptRule {
    pub fn new<I, S>(state: DeviceState, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            state,
            patterns: patterns
                .into_iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            unless: None,
        }
    }

    pub fn unless(mut self, pattern: impl AsRef<str>) -> Self {
        self.unless = Some(pattern.as_ref().to_string());
        self
    }
}

/// The fixed Cisco IOS console rule list, in precedence order.
pub fn default_rules() -> Vec<PromptRule> {
    vec![
        PromptRule::new(
            DeviceState::InitialConfigDialog,
            [r"initial configuration dialog"],
        ),
        PromptRule::new(
            DeviceState::AutoinstallPrompt,
            [r"terminate autoinstall", r"Press RETURN"],
        ),
        PromptRule::new(
            DeviceState::PasswordPrompt,
            [r"User Access Verification", r"Password:"],
        ),
        PromptRule::new(DeviceState::UserExecMode, [r">"]),
        PromptRule::new(DeviceState::PrivilegedExecMode, [r"#"]).unless(r"\(config\)#"),
        PromptRule::new(DeviceState::GlobalConfigMode, [r"\(config\)#"]),
    ]
}

/// Ordered prompt classifier.
#[derive(Clone)]
pub struct PromptClassifier {
    /// All rule patterns, compiled together for a single scan per line
    all_regex: RegexSet,

    /// Maps regex index in `all_regex` to rule index
    regex_rule_map: Vec<usize>,

    /// Rule states, in precedence order
    states: Vec<DeviceState>,

    /// Per-rule exclusion patterns
    exclusions: Vec<Option<Regex>>,
}

impl PromptClassifier {
    /// Builds a classifier from rules listed in precedence order.
    pub fn from_rules(rules: Vec<PromptRule>) -> Result<Self, ConsoleError> {
        let mut regexs = Vec::new();
        let mut regex_rule_map = Vec::new();
        let mut states = Vec::with_capacity(rules.len());
        let mut exclusions = Vec::with_capacity(rules.len());

        for (rule_index, rule) in rules.into_iter().enumerate() {
            if rule.patterns.is_empty() {
                return Err(ConsoleError::InvalidPattern(format!(
                    "rule for state '{}' has no patterns",
                    rule.state
                )));
            }
            for pattern in rule.patterns {
                regexs.push(pattern);
                regex_rule_map.push(rule_index);
            }
            let exclusion = match rule.unless {
                Some(pattern) => Some(Regex::new(&pattern).map_err(|err| {
                    ConsoleError::InvalidPattern(format!(
                        "invalid exclusion for state '{}': {}",
                        rule.state, err
                    ))
                })?),
                None => None,
            };
            states.push(rule.state);
            exclusions.push(exclusion);
        }

        let all_regex = RegexSet::new(&regexs).map_err(|err| {
            ConsoleError::InvalidPattern(format!("failed to build prompt regex set: {}", err))
        })?;

        Ok(Self {
            all_regex,
            regex_rule_map,
            states,
            exclusions,
        })
    }

    /// Returns the state signalled by `line`, or `None` for ordinary output.
    pub fn classify(&self, line: &str) -> Option<DeviceState> {
        let mut matched = vec![false; self.states.len()];
        for index in self.all_regex.matches(line).into_iter() {
            if let Some(rule) = self.regex_rule_map.get(index) {
                matched[*rule] = true;
            }
        }

        let state = matched
            .iter()
            .enumerate()
            .filter(|(_, hit)| **hit)
            .map(|(rule, _)| rule)
            .find(|rule| {
                self.exclusions[*rule]
                    .as_ref()
                    .map(|exclusion| !exclusion.is_match(line))
                    .unwrap_or(true)
            })
            .map(|rule| self.states[rule]);
        trace!("Classified '{:?}' as {:?}", line, state);
        state
    }
}

impl Default for PromptClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

static DEFAULT_CLASSIFIER: Lazy<PromptClassifier> = Lazy::new(|| {
    match PromptClassifier::from_rules(default_rules()) {
        Ok(classifier) => classifier,
        Err(err) => panic!("invalid default prompt rules: {err}"),
    }
});

/// Classifies a line with the default rule list.
pub fn classify(line: &str) -> Option<DeviceState> {
    DEFAULT_CLASSIFIER.classify(line)
}

/// Matches carriage returns, backspaces and NUL padding at the start of a line.
///
/// Consoles redraw prompts with `\r` and erase echoed characters with `\b`,
/// which would otherwise end up in the response log.
pub static IGNORE_START_LINE: Lazy<Regex> = Lazy::new(|| {
    match Regex::new(r"^(\x00+)|^(\r+(\s+\r+)*)|^(\u{8}+(\s+\u{8}+)*)") {
        Ok(re) => re,
        Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
    }
});

/// Normalizes a raw console line: strips redraw noise and surrounding whitespace.
pub fn clean_line(raw: &str) -> &str {
    let start = IGNORE_START_LINE
        .find(raw)
        .map(|m| m.end())
        .unwrap_or(0);
    raw[start..].trim_matches(|c: char| c.is_whitespace() || c == '\0')
}
