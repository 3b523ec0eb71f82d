use chrono::Utc;
use tokio_stream::StreamExt;
use uuid::Uuid;
use vigil_schema::{ChatMessage, ChatRole};

use crate::ai::AiClient;
use crate::api::ApiClient;
use crate::error::Result;

/// One chat conversation: transcript, rolling context summary, and the
/// session id shared with the backend. The id is client-generated at first;
/// the first server-issued value overwrites it and stays authoritative for
/// every later call. Create one per consumer and drop it when done — there
/// is no process-wide shared conversation.
#[derive(Debug, Clone)]
pub struct ChatSession {
    session_id: String,
    transcript: Vec<ChatMessage>,
    context_summary: String,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            session_id: generate_session_id(),
            transcript: Vec::new(),
            context_summary: String::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn context_summary(&self) -> &str {
        &self.context_summary
    }

    pub fn has_messages(&self) -> bool {
        !self.transcript.is_empty()
    }

    /// Send one message and wait for the full reply. The user message is
    /// appended optimistically and rolled back if the request fails.
    pub async fn send(&mut self, ai: &AiClient, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        self.transcript.push(ChatMessage::user(content, now_ms()));

        match ai.chat(&self.session_id, content).await {
            Ok(resp) => {
                self.session_id = resp.session_id;
                self.context_summary = resp.context_summary;
                self.transcript
                    .push(ChatMessage::assistant(resp.message, resp.timestamp));
                Ok(())
            }
            Err(e) => {
                self.transcript.pop();
                Err(e)
            }
        }
    }

    /// Streaming variant: folds content tokens into one assistant message
    /// as they arrive. Rolls back the optimistic user message on any
    /// in-stream error.
    pub async fn send_streaming(&mut self, ai: &AiClient, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(());
        }
        self.transcript.push(ChatMessage::user(content, now_ms()));

        let stream = match ai.chat_stream(&self.session_id, content).await {
            Ok(stream) => stream,
            Err(e) => {
                self.transcript.pop();
                return Err(e);
            }
        };
        tokio::pin!(stream);

        let mut assembled = String::new();
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(frame) => {
                    assembled.push_str(&frame.content);
                    if let Some(sid) = frame.session_id {
                        self.session_id = sid;
                    }
                    if frame.done {
                        break;
                    }
                }
                Err(e) => {
                    self.transcript.pop();
                    return Err(e);
                }
            }
        }

        self.transcript
            .push(ChatMessage::assistant(assembled, now_ms()));
        Ok(())
    }

    /// Replace the local transcript with server-side history, when any
    /// exists for this session.
    pub async fn load_history(&mut self, api: &ApiClient) -> Result<()> {
        let history = api.chat_history(&self.session_id).await?;
        if !history.is_empty() {
            self.transcript = history;
        }
        Ok(())
    }

    /// Clear the conversation on both ends. Local state resets even when
    /// the server call fails; the next send starts a fresh session.
    pub async fn clear(&mut self, api: &ApiClient) {
        if let Err(e) = api.clear_chat(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "failed to clear chat history");
        }
        self.transcript.clear();
        self.context_summary.clear();
        self.session_id = generate_session_id();
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::Assistant)
    }
}

fn generate_session_id() -> String {
    format!("chat-{}", Uuid::new_v4())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
