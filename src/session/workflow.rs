use super::*;

const CONFIRM_PUSH: &str = "The device should be clean (erase startup-config, then reload). \
Confirm sending config to device?";
const CONFIRM_SAVE: &str = "Save running-config to startup-config?";

/// How a provisioning run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// The configuration was pushed.
    Applied,
    /// The operator declined the push; nothing was sent.
    Declined,
}

/// Result of a provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProvisionReport {
    pub outcome: ProvisionOutcome,
    pub transitions: TransitionReport,
    pub push: Option<PushReport>,
    pub saved: bool,
    /// Every line the device printed during the session.
    pub response_log: Vec<String>,
}

/// Opens a session on `stream` and runs [`provision_session`] on it.
///
/// The stream is closed on every path, including errors.
pub async fn provision<S, O>(
    stream: S,
    script: &ConfigScript,
    config: &ProvisionConfig,
    operator: &mut O,
    recorder: Option<SessionRecorder>,
) -> Result<ProvisionReport, ConsoleError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    O: Operator + ?Sized,
{
    let mut session = ConsoleSession::open(stream, config.clone(), recorder)?;
    provision_session(&mut session, script, operator).await
}

/// Runs transitions, push confirmation, push and optional save on `session`.
///
/// The session is closed before this returns, whatever the outcome. Its
/// response log stays readable afterwards.
pub async fn provision_session<S, O>(
    session: &mut ConsoleSession<S>,
    script: &ConfigScript,
    operator: &mut O,
) -> Result<ProvisionReport, ConsoleError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    O: Operator + ?Sized,
{
    let result = run_steps(session, script, operator).await;
    let reason = match &result {
        Ok((ProvisionOutcome::Applied, ..)) => "provisioned".to_string(),
        Ok((ProvisionOutcome::Declined, ..)) => "declined by operator".to_string(),
        Err(err) => err.to_string(),
    };
    session.close(&reason).await;

    let (outcome, transitions, push, saved) = result?;
    Ok(ProvisionReport {
        outcome,
        transitions,
        push,
        saved,
        response_log: session.response_log().lines()?,
    })
}

async fn run_steps<S, O>(
    session: &mut ConsoleSession<S>,
    script: &ConfigScript,
    operator: &mut O,
) -> Result<(ProvisionOutcome, TransitionReport, Option<PushReport>, bool), ConsoleError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    O: Operator + ?Sized,
{
    let transitions = session.reach_global_config(operator).await?;

    if !operator.confirm(CONFIRM_PUSH)? {
        info!("Operator declined sending config.");
        return Ok((ProvisionOutcome::Declined, transitions, None, false));
    }

    let push = session.push_config(script).await?;

    let save = session.config().save_after_push || operator.confirm(CONFIRM_SAVE)?;
    if save {
        session.save_config().await?;
    }
    Ok((ProvisionOutcome::Applied, transitions, Some(push), save))
}
