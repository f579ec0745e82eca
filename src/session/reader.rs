use super::*;
use crate::device::clean_line;
use std::io::ErrorKind;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::error::TrySendError;

/// Background line reader.
///
/// Drains the console, splits the byte stream on `\n`, and republishes every
/// non-empty line on the raw feed and into the response log. Lines that match
/// a prompt rule are also queued for the state machine. It never writes, and
/// it never waits on the prompt queue: when the queue is full the event is
/// dropped, so the log keeps filling after the state machine stops reading.
struct LineReader<R> {
    reader: R,
    classifier: PromptClassifier,
    prompts: mpsc::Sender<PromptEvent>,
    raw_feed: broadcast::Sender<String>,
    log: ResponseLog,
    recorder: Option<SessionRecorder>,
    read_timeout: Duration,
    prompt_feed_open: bool,
}

/// Spawns the line reader task for `reader`.
///
/// The task ends on EOF or a fatal read error; otherwise it runs until it is
/// aborted by [`ConsoleSession::close`]. A partial line still buffered when a
/// read times out is flushed as a line, because consoles do not terminate
/// prompts such as `Router>` with a newline.
pub fn spawn_line_reader<R>(
    reader: R,
    classifier: PromptClassifier,
    prompts: mpsc::Sender<PromptEvent>,
    raw_feed: broadcast::Sender<String>,
    log: ResponseLog,
    recorder: Option<SessionRecorder>,
    read_timeout: Duration,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let reader = LineReader {
        reader,
        classifier,
        prompts,
        raw_feed,
        log,
        recorder,
        read_timeout,
        prompt_feed_open: true,
    };
    tokio::spawn(reader.run())
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let mut buffer: Vec<u8> = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            match tokio::time::timeout(self.read_timeout, self.reader.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    debug!("Console reported EOF");
                    break;
                }
                Ok(Ok(n)) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line = buffer.drain(..=newline_pos).collect::<Vec<u8>>();
                        self.publish(&line);
                    }
                }
                Ok(Err(err))
                    if matches!(
                        err.kind(),
                        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Ok(Err(err)) => {
                    debug!("Console read failed: {:?}", err);
                    break;
                }
                Err(_) => {
                    // Read timeout: whatever is buffered is most likely a prompt.
                    if !buffer.is_empty() {
                        let line = std::mem::take(&mut buffer);
                        self.publish(&line);
                    }
                }
            }
        }

        if !buffer.is_empty() {
            self.publish(&buffer);
        }
        debug!("Line reader ended.");
    }

    fn publish(&mut self, raw: &[u8]) {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(err) => {
                trace!("Dropping undecodable console bytes: {}", err);
                return;
            }
        };
        let line = clean_line(text);
        if line.is_empty() {
            return;
        }
        trace!("Read line: '{:?}'", line);

        let _ = self.log.append(line);
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_line(line);
        }
        // No subscribers is fine.
        let _ = self.raw_feed.send(line.to_string());

        let Some(state) = self.classifier.classify(line) else {
            return;
        };
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::PromptDetected {
                line: line.to_string(),
                state,
            });
        }
        if !self.prompt_feed_open {
            return;
        }
        match self.prompts.try_send(PromptEvent::new(line, state)) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!("Prompt queue full, dropping '{}'", event.line);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Prompt receiver dropped; reader keeps logging.");
                self.prompt_feed_open = false;
            }
        }
    }
}
