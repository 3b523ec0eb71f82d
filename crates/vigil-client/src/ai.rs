use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use vigil_schema::{
    AnalyzeRequest, AnalyzeResponse, AskInsightRequest, AskInsightResponse, ChatRequest,
    ChatResponse, ChatStreamFrame, DiagnosisReport, ExplainRequest, ExplainResponse,
    RuleGenRequest, RuleGenResponse,
};

use crate::api::ApiClient;
use crate::error::{ClientError, Result};

/// Shared call state for the AI request–response channel: `loading` is set
/// for the duration of any in-flight call and `error` holds the last
/// surfaced failure until the next call clears it.
#[derive(Debug, Clone, Default)]
pub struct CallState {
    pub loading: bool,
    pub error: Option<String>,
}

/// Reassembles complete lines from a byte stream whose chunk boundaries
/// fall anywhere, including mid-line. Partial trailing input is buffered
/// until the closing newline arrives.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            lines.push(line);
        }
        lines
    }
}

/// Clears `loading` when the streaming response is dropped or runs out,
/// whichever comes first.
struct LoadingGuard(watch::Sender<CallState>);

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.0.send_modify(|s| s.loading = false);
    }
}

/// Typed channel for the AI endpoints. Every call follows one contract:
/// set `loading`, clear the prior `error`, issue exactly one request, and
/// clear `loading` on every exit path.
pub struct AiClient {
    api: ApiClient,
    state: watch::Sender<CallState>,
}

impl AiClient {
    pub fn new(api: ApiClient) -> Self {
        let (state, _) = watch::channel(CallState::default());
        Self { api, state }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Observable call state; subscribe before issuing calls to never miss
    /// a transition.
    pub fn state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    fn begin(&self) {
        self.state.send_replace(CallState {
            loading: true,
            error: None,
        });
    }

    fn finish<T>(&self, result: &Result<T>) {
        let error = result.as_ref().err().map(ToString::to_string);
        self.state.send_replace(CallState {
            loading: false,
            error,
        });
    }

    pub async fn generate_rule(&self, req: &RuleGenRequest) -> Result<RuleGenResponse> {
        self.begin();
        let result = self.api.post_json("/api/ai/generate-rule", req).await;
        self.finish(&result);
        result
    }

    pub async fn explain_event(&self, req: &ExplainRequest) -> Result<ExplainResponse> {
        self.begin();
        let result = self.api.post_json("/api/ai/explain", req).await;
        self.finish(&result);
        result
    }

    pub async fn analyze_context(&self, req: &AnalyzeRequest) -> Result<AnalyzeResponse> {
        self.begin();
        let result = self.api.post_json("/api/ai/analyze", req).await;
        self.finish(&result);
        result
    }

    pub async fn ask_about_insight(&self, req: &AskInsightRequest) -> Result<AskInsightResponse> {
        self.begin();
        let result = self.api.post_json("/api/ai/sentinel/ask", req).await;
        self.finish(&result);
        result
    }

    pub async fn diagnose(&self) -> Result<DiagnosisReport> {
        self.begin();
        let result = self.api.get_json("/api/ai/diagnose").await;
        self.finish(&result);
        result
    }

    pub async fn chat(&self, session_id: &str, message: &str) -> Result<ChatResponse> {
        self.begin();
        let req = ChatRequest {
            message: message.to_string(),
            session_id: session_id.to_string(),
        };
        let result = self.api.post_json("/api/ai/chat", &req).await;
        self.finish(&result);
        result
    }

    /// Streaming chat. Yields decoded `data:` frames; a frame may arrive
    /// split across network chunks, so bytes are line-buffered until a full
    /// frame is available. Malformed frames are dropped with a log; an
    /// `error` frame or transport failure terminates the stream with an
    /// `Err` item and parks the message in the shared state.
    pub async fn chat_stream(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<impl Stream<Item = Result<ChatStreamFrame>> + Send> {
        self.begin();
        let req = ChatRequest {
            message: message.to_string(),
            session_id: session_id.to_string(),
        };
        let resp = match self
            .api
            .http()
            .post(self.api.url("/api/ai/chat/stream"))
            .json(&req)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let err = ClientError::from(e);
                self.state.send_replace(CallState {
                    loading: false,
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = ClientError::from_error_body(status.as_u16(), &body);
            self.state.send_replace(CallState {
                loading: false,
                error: Some(err.to_string()),
            });
            return Err(err);
        }

        let state = self.state.clone();
        let guard = LoadingGuard(self.state.clone());
        let byte_stream = resp.bytes_stream();

        Ok(async_stream::stream! {
            let _guard = guard;
            tokio::pin!(byte_stream);
            let mut lines = LineBuffer::default();

            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        for line in lines.push(&bytes) {
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };

                            match serde_json::from_str::<ChatStreamFrame>(data) {
                                Ok(frame) => {
                                    if let Some(msg) = frame.error {
                                        state.send_modify(|s| s.error = Some(msg.clone()));
                                        yield Err(ClientError::Stream(msg));
                                        return;
                                    }
                                    let done = frame.done;
                                    yield Ok(frame);
                                    if done {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "dropping malformed chat stream frame");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let err = ClientError::from(e);
                        state.send_modify(|s| s.error = Some(err.to_string()));
                        yield Err(err);
                        return;
                    }
                }
            }
        })
    }
}
