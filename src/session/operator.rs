use super::*;
use std::collections::VecDeque;

/// Hooks for the human at the console.
///
/// Both methods block until the operator answers. The state machine calls
/// [`Operator::password`] whenever the device asks for a credential, and the
/// workflow calls [`Operator::confirm`] before pushing and before saving.
pub trait Operator: Send {
    /// Returns the password to send to the device.
    fn password(&mut self) -> Result<String, ConsoleError>;

    /// Asks a yes/no question.
    fn confirm(&mut self, question: &str) -> Result<bool, ConsoleError>;
}

/// Non-interactive operator with pre-set answers.
///
/// Confirmation answers are consumed in order; once they run out,
/// `default_answer` is used. A missing password is an operator error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOperator {
    password: Option<String>,
    answers: VecDeque<bool>,
    default_answer: bool,
    password_requests: usize,
    questions: Vec<String>,
}

impl ScriptedOperator {
    /// Operator that confirms everything.
    pub fn accept_all() -> Self {
        Self {
            default_answer: true,
            ..Self::default()
        }
    }

    /// Operator that declines everything.
    pub fn decline_all() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_answers(mut self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.answers.extend(answers);
        self
    }

    /// Number of times the password was requested.
    pub fn password_requests(&self) -> usize {
        self.password_requests
    }

    /// Questions asked so far, in order.
    pub fn questions(&self) -> &[String] {
        &self.questions
    }
}

impl Operator for ScriptedOperator {
    fn password(&mut self) -> Result<String, ConsoleError> {
        self.password_requests += 1;
        self.password
            .clone()
            .ok_or_else(|| ConsoleError::OperatorError("no password configured".to_string()))
    }

    fn confirm(&mut self, question: &str) -> Result<bool, ConsoleError> {
        self.questions.push(question.to_string());
        Ok(self.answers.pop_front().unwrap_or(self.default_answer))
    }
}
