#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio::time::Interval;

/// Behaviour of the simulated device on the far end of the console.
#[derive(Debug, Clone, Default)]
pub struct DeviceScript {
    /// Written as soon as the device starts.
    pub banner: String,
    /// `(command, reply)` pairs, answered in order.
    pub replies: Vec<(String, String)>,
    /// A line printed periodically, regardless of input.
    pub chatter: Option<(Duration, String)>,
    /// Drop the connection right after the banner.
    pub hang_up: bool,
    /// Echo every command back as `<prompt><command>` on its own line.
    pub echo_prompt: Option<String>,
}

impl DeviceScript {
    pub fn banner(banner: &str) -> Self {
        Self {
            banner: banner.to_string(),
            ..Self::default()
        }
    }

    pub fn reply(mut self, command: &str, reply: &str) -> Self {
        self.replies.push((command.to_string(), reply.to_string()));
        self
    }

    pub fn chatter(mut self, every: Duration, line: &str) -> Self {
        self.chatter = Some((every, line.to_string()));
        self
    }

    pub fn echo(mut self, prompt: &str) -> Self {
        self.echo_prompt = Some(prompt.to_string());
        self
    }

    pub fn hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }
}

/// Runs `script` on the device end of the pipe.
///
/// Commands are split on `\r` with `\n` stripped, so a probe shows up as an
/// empty string. Resolves to every command received once the console
/// shuts its end down.
pub fn spawn_device(mut stream: DuplexStream, script: DeviceScript) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut received = Vec::new();
        if !script.banner.is_empty() && stream.write_all(script.banner.as_bytes()).await.is_err() {
            return received;
        }
        if script.hang_up {
            return received;
        }

        let mut replies: VecDeque<(String, String)> = script.replies.into();
        let mut ticker = script
            .chatter
            .as_ref()
            .map(|(every, _)| tokio::time::interval(*every));
        let mut pending = Vec::new();
        let mut buf = [0u8; 512];

        loop {
            let n = tokio::select! {
                read = stream.read(&mut buf) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                },
                _ = tick(&mut ticker) => {
                    if let Some((_, line)) = script.chatter.as_ref()
                        && stream.write_all(line.as_bytes()).await.is_err()
                    {
                        break;
                    }
                    continue;
                }
            };
            pending.extend_from_slice(&buf[..n]);
            while let Some(pos) = pending.iter().position(|b| *b == b'\r') {
                let raw = pending.drain(..=pos).collect::<Vec<u8>>();
                let command = String::from_utf8_lossy(&raw).replace(['\r', '\n'], "");
                if replies
                    .front()
                    .is_some_and(|(expected, _)| *expected == command)
                    && let Some((_, reply)) = replies.pop_front()
                {
                    let _ = stream.write_all(reply.as_bytes()).await;
                } else if let Some(prompt) = script.echo_prompt.as_ref() {
                    let echo = format!("{prompt}{command}\r\n");
                    let _ = stream.write_all(echo.as_bytes()).await;
                }
                received.push(command);
            }
        }
        received
    })
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Console end of the pipe that counts shutdowns and can fail writes.
pub struct CountingStream {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
    fail_writes: bool,
}

impl CountingStream {
    pub fn new(inner: DuplexStream) -> (Self, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                shutdowns: shutdowns.clone(),
                fail_writes: false,
            },
            shutdowns,
        )
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }
}

impl AsyncRead for CountingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "console unplugged",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// A device pipe plus a counting console end.
pub fn console_pair(script: DeviceScript) -> (CountingStream, Arc<AtomicUsize>, JoinHandle<Vec<String>>) {
    let (device, console) = tokio::io::duplex(4096);
    let (console, shutdowns) = CountingStream::new(console);
    (console, shutdowns, spawn_device(device, script))
}
