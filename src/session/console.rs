use super::*;
use crate::config::{PROMPT_QUEUE_CAPACITY, RAW_FEED_CAPACITY};

impl<S> ConsoleSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Takes ownership of `stream` and starts the line reader.
    ///
    /// Must be called from within a tokio runtime. The config is validated
    /// before the stream is touched.
    pub fn open(
        stream: S,
        config: ProvisionConfig,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, ConsoleError> {
        Self::open_with_classifier(stream, config, PromptClassifier::default(), recorder)
    }

    /// Like [`ConsoleSession::open`], classifying prompts with `classifier`.
    pub fn open_with_classifier(
        stream: S,
        config: ProvisionConfig,
        classifier: PromptClassifier,
        recorder: Option<SessionRecorder>,
    ) -> Result<Self, ConsoleError> {
        config.validate()?;

        let (read_half, writer) = tokio::io::split(stream);
        let (prompt_tx, prompts) = mpsc::channel::<PromptEvent>(PROMPT_QUEUE_CAPACITY);
        let (raw_feed, _) = broadcast::channel::<String>(RAW_FEED_CAPACITY);
        let log = ResponseLog::new();

        let reader_task = spawn_line_reader(
            read_half,
            classifier,
            prompt_tx,
            raw_feed.clone(),
            log.clone(),
            recorder.clone(),
            config.read_timeout(),
        );
        debug!("Console session opened");

        Ok(Self {
            writer,
            reader_task,
            prompts,
            raw_feed,
            log,
            recorder,
            config,
            closed: false,
        })
    }

    /// Subscribes to every line the device prints from now on.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<String> {
        self.raw_feed.subscribe()
    }

    /// Shared handle to the response log; stays readable after close.
    pub fn response_log(&self) -> &ResponseLog {
        &self.log
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drives the device to global configuration mode.
    ///
    /// On a fatal error the session is closed before the error is returned.
    pub async fn reach_global_config<O>(
        &mut self,
        operator: &mut O,
    ) -> Result<TransitionReport, ConsoleError>
    where
        O: Operator + ?Sized,
    {
        self.ensure_open()?;
        let mut machine =
            DeviceStateMachine::new(self.config.clone()).with_recorder(self.recorder.clone());
        let result = machine
            .run(&mut self.writer, &mut self.prompts, operator)
            .await;
        self.close_on_fatal(result).await
    }

    /// Pushes `script` line by line.
    pub async fn push_config(&mut self, script: &ConfigScript) -> Result<PushReport, ConsoleError> {
        self.ensure_open()?;
        let result = self.pusher().push(&mut self.writer, script).await;
        self.close_on_fatal(result).await
    }

    /// Sends `write memory`.
    pub async fn save_config(&mut self) -> Result<(), ConsoleError> {
        self.ensure_open()?;
        let result = self.pusher().save(&mut self.writer).await;
        self.close_on_fatal(result).await
    }

    /// Closes the console: shuts the write half down and stops the reader.
    ///
    /// Only the first call does anything.
    pub async fn close(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("Closing console...");

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::SessionClosed {
                reason: reason.to_string(),
            });
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!("Failed to shut down console writer: {:?}", e);
        }
        self.reader_task.abort();
        self.prompts.close();
        debug!("Console closed ({})", reason);
    }

    fn pusher(&self) -> ConfigPusher {
        ConfigPusher::new(&self.config).with_recorder(self.recorder.clone())
    }

    fn ensure_open(&self) -> Result<(), ConsoleError> {
        if self.closed {
            return Err(ConsoleError::ConnectClosedError);
        }
        Ok(())
    }

    async fn close_on_fatal<T>(&mut self, result: Result<T, ConsoleError>) -> Result<T, ConsoleError> {
        if let Err(err) = &result
            && err.requires_cleanup()
        {
            let reason = err.to_string();
            self.close(&reason).await;
        }
        result
    }
}

impl<S> Drop for ConsoleSession<S> {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Console session dropped without close; stopping line reader");
            self.reader_task.abort();
        }
    }
}
