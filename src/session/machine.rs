use super::*;
use crate::device::{CONFIGURE_TERMINAL, DECLINE_DIALOG, ENABLE, PROBE};
use tokio::sync::mpsc::error::TryRecvError;

/// Summary of a successful transition run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionReport {
    pub final_state: DeviceState,
    /// Unclassified prompts counted against the retry budget.
    pub retries: usize,
    /// Probes written because no prompt arrived in time.
    pub probes: usize,
    /// Responses written to the device, probes excluded.
    pub commands_sent: usize,
    /// Every state the device was observed in, in order, without repeats.
    pub states_seen: Vec<DeviceState>,
}

/// Drives a device from whatever prompt it shows to global configuration mode.
///
/// The machine only writes; prompts come from the line reader through the
/// prompt queue. Its belief about the device state is updated from every
/// prompt it acts on.
pub struct DeviceStateMachine {
    config: ProvisionConfig,
    state: DeviceState,
    retries: usize,
    probes: usize,
    /// Consecutive probes without an answer
    silent_probes: usize,
    commands_sent: usize,
    states_seen: Vec<DeviceState>,
    recorder: Option<SessionRecorder>,
}

impl DeviceStateMachine {
    pub fn new(config: ProvisionConfig) -> Self {
        Self {
            config,
            state: DeviceState::Unknown,
            retries: 0,
            probes: 0,
            silent_probes: 0,
            commands_sent: 0,
            states_seen: Vec::new(),
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Option<SessionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Current belief about the device state.
    pub fn current_state(&self) -> DeviceState {
        self.state
    }

    /// Retries counted so far.
    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Probes written so far.
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Runs until the device reports global configuration mode.
    ///
    /// # Errors
    ///
    /// - [`ConsoleError::MaxRetriesExceeded`] once `max_retries` unclassified
    ///   prompts were seen.
    /// - [`ConsoleError::ClassificationTimeout`] when the silence budget of
    ///   consecutive probes is used up. Probes never count as retries.
    /// - [`ConsoleError::ChannelDisconnectError`] when the line reader is gone.
    /// - [`ConsoleError::WriteError`] / [`ConsoleError::OperatorError`] from
    ///   writes and password requests.
    pub async fn run<W, O>(
        &mut self,
        writer: &mut W,
        prompts: &mut mpsc::Receiver<PromptEvent>,
        operator: &mut O,
    ) -> Result<TransitionReport, ConsoleError>
    where
        W: AsyncWrite + Unpin,
        O: Operator + ?Sized,
    {
        // An event picked up while waiting after a response is handled next.
        let mut pending: Option<PromptEvent> = None;

        loop {
            if self.retries >= self.config.max_retries {
                warn!("Max retries reached ({}). Giving up.", self.retries);
                return Err(ConsoleError::MaxRetriesExceeded(self.retries));
            }

            let event = match pending.take() {
                Some(event) => event,
                None => match self.next_event(prompts, self.config.wait_interval()).await? {
                    Some(event) => event,
                    None => {
                        self.probe(writer).await?;
                        tokio::time::sleep(self.config.wait_interval()).await;
                        continue;
                    }
                },
            };
            self.silent_probes = 0;
            self.observe(&event);

            match event.state {
                DeviceState::GlobalConfigMode => {
                    info!("Entered Global Config Mode (config)#.");
                    return Ok(self.report());
                }
                DeviceState::InitialConfigDialog => {
                    info!("Initial configuration dialog detected. Sending 'no'.");
                    self.send(writer, DECLINE_DIALOG).await?;
                    pending = self.follow_up(prompts).await?;
                }
                DeviceState::AutoinstallPrompt => {
                    info!("Autoinstall prompt detected. Sending return.");
                    self.send(writer, PROBE).await?;
                    pending = self.follow_up(prompts).await?;
                }
                DeviceState::PasswordPrompt => {
                    info!("Password prompt detected.");
                    self.send_password(writer, operator).await?;
                    pending = self.follow_up(prompts).await?;
                }
                DeviceState::UserExecMode => {
                    info!("Entered User Exec Mode (>). Sending 'en'.");
                    self.send(writer, ENABLE).await?;
                    match self.follow_up(prompts).await? {
                        Some(next) if next.state == DeviceState::PasswordPrompt => {
                            self.observe(&next);
                            info!("Enable password requested.");
                            self.send_password(writer, operator).await?;
                            tokio::time::sleep(self.config.credential_settle()).await;
                        }
                        other => pending = other,
                    }
                }
                DeviceState::PrivilegedExecMode => {
                    info!("Entered Privileged Exec Mode (#). Sending 'conf t'.");
                    self.send(writer, CONFIGURE_TERMINAL).await?;
                    pending = self.follow_up(prompts).await?;
                }
                DeviceState::Unknown => {
                    self.retries += 1;
                    warn!(
                        "Unknown device state. Retrying... ({}/{})",
                        self.retries, self.config.max_retries
                    );
                    if let Some(recorder) = self.recorder.as_ref() {
                        let _ = recorder.record_event(SessionEvent::RetryCounted {
                            attempt: self.retries,
                            line: event.line.clone(),
                        });
                    }
                    tokio::time::sleep(self.config.wait_interval()).await;
                }
            }
        }
    }

    /// Waits up to `timeout` for a prompt, then keeps only the newest queued one.
    ///
    /// `Ok(None)` means the wait timed out.
    async fn next_event(
        &self,
        prompts: &mut mpsc::Receiver<PromptEvent>,
        timeout: Duration,
    ) -> Result<Option<PromptEvent>, ConsoleError> {
        let first = match tokio::time::timeout(timeout, prompts.recv()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(ConsoleError::ChannelDisconnectError),
            Ok(Some(event)) => event,
        };

        let mut latest = first;
        let mut skipped = 0usize;
        loop {
            match prompts.try_recv() {
                Ok(event) => {
                    skipped += 1;
                    latest = event;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if skipped > 0 {
            trace!("Skipped {} stale prompt(s), acting on '{}'", skipped, latest.line);
        }
        Ok(Some(latest))
    }

    /// Lets the device settle after a response, then briefly waits for its answer.
    async fn follow_up(
        &self,
        prompts: &mut mpsc::Receiver<PromptEvent>,
    ) -> Result<Option<PromptEvent>, ConsoleError> {
        tokio::time::sleep(self.config.settle_delay()).await;
        let next = self
            .next_event(prompts, self.config.secondary_wait())
            .await?;
        if next.is_none() {
            info!("No prompt after response. Reading current device prompt...");
        }
        Ok(next)
    }

    fn observe(&mut self, event: &PromptEvent) {
        debug!("Device state: {} ('{}')", event.state, event.line);
        if event.state != self.state {
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::StateChanged {
                    from: self.state,
                    to: event.state,
                });
            }
            self.state = event.state;
        }
        if self.states_seen.last() != Some(&event.state) {
            self.states_seen.push(event.state);
        }
    }

    async fn probe<W>(&mut self, writer: &mut W) -> Result<(), ConsoleError>
    where
        W: AsyncWrite + Unpin,
    {
        let limit = self.config.silent_probe_limit();
        if self.silent_probes >= limit {
            warn!("No recognizable prompt after {} probes.", self.silent_probes);
            return Err(ConsoleError::ClassificationTimeout(self.silent_probes));
        }
        info!("Reading current device prompt...");
        send_bytes(writer, PROBE, &command_label(PROBE)).await?;
        self.probes += 1;
        self.silent_probes += 1;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ProbeSent {
                silent_probes: self.silent_probes,
            });
        }
        Ok(())
    }

    async fn send<W>(&mut self, writer: &mut W, bytes: &[u8]) -> Result<(), ConsoleError>
    where
        W: AsyncWrite + Unpin,
    {
        let label = command_label(bytes);
        send_bytes(writer, bytes, &label).await?;
        self.commands_sent += 1;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandSent { command: label });
        }
        Ok(())
    }

    async fn send_password<W, O>(&mut self, writer: &mut W, operator: &mut O) -> Result<(), ConsoleError>
    where
        W: AsyncWrite + Unpin,
        O: Operator + ?Sized,
    {
        let password = operator.password()?;
        let line = format!("{}\r\n", password.trim());
        send_bytes(writer, line.as_bytes(), "<password>").await?;
        self.commands_sent += 1;
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandSent {
                command: "<password>".to_string(),
            });
        }
        Ok(())
    }

    fn report(&self) -> TransitionReport {
        TransitionReport {
            final_state: self.state,
            retries: self.retries,
            probes: self.probes,
            commands_sent: self.commands_sent,
            states_seen: self.states_seen.clone(),
        }
    }
}

/// Runs a fresh [`DeviceStateMachine`] with `config`.
pub async fn run_transitions<W, O>(
    writer: &mut W,
    prompts: &mut mpsc::Receiver<PromptEvent>,
    operator: &mut O,
    config: &ProvisionConfig,
) -> Result<TransitionReport, ConsoleError>
where
    W: AsyncWrite + Unpin,
    O: Operator + ?Sized,
{
    DeviceStateMachine::new(config.clone())
        .run(writer, prompts, operator)
        .await
}
