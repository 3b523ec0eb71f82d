use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use vigil_client::ClientError;

use crate::backoff::reconnect_backoff_ms;
use crate::conn::{ConnState, SessionStatus};

const FRAME_CHANNEL_CAPACITY: usize = 100;

/// One decoded server-sent event: optional event name plus JSON payload.
/// Heartbeats never appear here; the session absorbs them.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: Value,
}

/// Idempotent teardown handle for a push subscription. Releasing aborts the
/// session task, publishes the terminal `Closed` state, and guarantees no
/// delivery afterwards. Dropping the last clone releases too, so the
/// no-leak invariant holds independent of caller discipline.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    task: JoinHandle<()>,
    status: watch::Sender<SessionStatus>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    fn new(task: JoinHandle<()>, status: watch::Sender<SessionStatus>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                task,
                status,
                released: AtomicBool::new(false),
            }),
        }
    }

    pub fn release(&self) {
        self.inner.close();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}

impl HandleInner {
    fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.task.abort();
        self.status.send_replace(SessionStatus {
            state: ConnState::Closed,
            error: None,
        });
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.close();
    }
}

/// A long-lived push subscription: one spawned task that connects, decodes
/// frames, and reconnects with escalating backoff on transport failure.
pub struct SseSession {
    pub frames: mpsc::Receiver<SseFrame>,
    pub status: watch::Receiver<SessionStatus>,
    pub handle: SubscriptionHandle,
}

impl SseSession {
    /// The client passed here must not carry a total request timeout, or the
    /// stream would be cut off by it.
    pub fn connect(http: reqwest::Client, url: impl Into<String>) -> Self {
        let url = url.into();
        let (frames_tx, frames) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (status_tx, status) = watch::channel(SessionStatus::default());

        let task_status = status_tx.clone();
        let task = tokio::spawn(async move {
            run_session(http, url, frames_tx, task_status).await;
        });

        Self {
            frames,
            status,
            handle: SubscriptionHandle::new(task, status_tx),
        }
    }
}

async fn run_session(
    http: reqwest::Client,
    url: String,
    frames_tx: mpsc::Sender<SseFrame>,
    status: watch::Sender<SessionStatus>,
) {
    let mut consecutive_errors: u32 = 0;
    loop {
        status.send_modify(|s| s.state = ConnState::Connecting);

        let failure = match http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                // Accepted stream: the authoritative Open transition.
                status.send_replace(SessionStatus {
                    state: ConnState::Open,
                    error: None,
                });
                consecutive_errors = 0;
                pump_frames(resp, &frames_tx, &status).await
            }
            Ok(resp) => {
                let code = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                Some(ClientError::from_error_body(code, &body).to_string())
            }
            Err(e) => Some(e.to_string()),
        };

        let Some(message) = failure else {
            // Receiver dropped; the subscription is over.
            return;
        };

        tracing::warn!(url = %url, error = %message, "push subscription lost; will reconnect");
        status.send_replace(SessionStatus {
            state: ConnState::Error,
            error: Some(message),
        });

        consecutive_errors += 1;
        tokio::time::sleep(Duration::from_millis(reconnect_backoff_ms(consecutive_errors))).await;
    }
}

/// Reads the accepted stream to exhaustion. Returns the failure message to
/// reconnect with, or `None` when the consumer is gone and the session
/// should end.
async fn pump_frames(
    resp: reqwest::Response,
    frames_tx: &mpsc::Sender<SseFrame>,
    status: &watch::Sender<SessionStatus>,
) -> Option<String> {
    let mut parser = FrameParser::default();
    let mut bytes = resp.bytes_stream();

    while let Some(chunk) = bytes.next().await {
        match chunk {
            Ok(chunk) => {
                for frame in parser.push(&chunk) {
                    if is_heartbeat(&frame) {
                        status.send_replace(SessionStatus {
                            state: ConnState::Open,
                            error: None,
                        });
                        continue;
                    }
                    if frames_tx.send(frame).await.is_err() {
                        return None;
                    }
                }
            }
            Err(e) => return Some(e.to_string()),
        }
    }
    Some("stream closed by server".to_string())
}

fn is_heartbeat(frame: &SseFrame) -> bool {
    frame.data.get("type").and_then(Value::as_str) == Some("heartbeat")
}

/// Incremental SSE decoder: buffers bytes across chunk boundaries, splits
/// `event:`/`data:` fields, and emits one frame per blank-line terminator.
/// Frames whose data is not valid JSON are dropped with a log.
#[derive(Debug, Default)]
struct FrameParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl FrameParser {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                if let Some(frame) = self.finish_frame() {
                    frames.push(frame);
                }
                continue;
            }
            if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim_start().to_string());
            } else if let Some(data) = line.strip_prefix("data:") {
                self.data_lines
                    .push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // comment and retry fields are ignored
        }
        frames
    }

    fn finish_frame(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();

        match serde_json::from_str(&payload) {
            Ok(data) => Some(SseFrame { event, data }),
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed stream frame");
                None
            }
        }
    }
}
