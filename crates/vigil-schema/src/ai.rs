use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub context_summary: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub duration_ms: i64,
    pub timestamp: i64,
    #[serde(default)]
    pub message_count: usize,
}

/// One decoded `data:` frame on the streaming chat response. The terminal
/// frame carries `done: true` or an `error`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamFrame {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleGenContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_item: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub recent_actions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleGenRequest {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RuleGenContext>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub examples: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleGenResponse {
    pub rule: Value,
    pub yaml: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub simulation: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResponse {
    pub explanation: String,
    #[serde(default)]
    pub root_cause: String,
    #[serde(default)]
    pub matched_rule: Option<Value>,
    #[serde(default)]
    pub related_events: Vec<Value>,
    #[serde(default)]
    pub suggested_actions: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzeTarget {
    Process,
    Workload,
    Rule,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    #[serde(rename = "type")]
    pub target: AnalyzeTarget,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub summary: String,
    #[serde(default)]
    pub anomalies: Vec<Value>,
    #[serde(default)]
    pub baseline_status: String,
    #[serde(default)]
    pub recommendations: Vec<Value>,
    #[serde(default)]
    pub related_insights: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskInsightRequest {
    pub insight: Value,
    pub question: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskInsightResponse {
    pub answer: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub related_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisReport {
    pub analysis: String,
    #[serde(default)]
    pub snapshot_summary: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub duration_ms: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStatus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub is_local: bool,
    pub status: String,
}
