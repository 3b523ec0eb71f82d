use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use vigil_schema::{
    AiStatus, Alert, ChatMessage, DetectionRule, GeneratedRule, Insight, InsightsResponse,
    LearningStatus, ProbeStats, ProcessInfo, SystemStats, Workload,
};

use crate::error::{ClientError, Result};

/// Typed client for the backend's REST surface. One shared reqwest client,
/// one shared non-2xx extraction rule.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_default();
        Self::with_client(http, base_url)
    }

    /// Streaming endpoints must not inherit the request timeout, so the
    /// subscription layer passes its own client here.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        Self::decode(resp).await
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(resp).await
    }

    pub(crate) async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Self::expect_success(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ClientError::from_error_body(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(Into::into)
    }

    async fn expect_success(resp: reqwest::Response) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::from_error_body(status.as_u16(), &body))
    }

    // --- telemetry ---

    pub async fn system_stats(&self) -> Result<SystemStats> {
        self.get_json("/api/stats").await
    }

    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        self.get_json("/api/alerts").await
    }

    pub async fn insights(&self, limit: usize) -> Result<Vec<Insight>> {
        let resp: InsightsResponse = self
            .get_json(&format!("/api/ai/sentinel/insights?limit={limit}"))
            .await?;
        Ok(resp.insights)
    }

    pub async fn rules(&self) -> Result<Vec<DetectionRule>> {
        self.get_json("/api/rules").await
    }

    pub async fn workloads(&self) -> Result<Vec<Workload>> {
        self.get_json("/api/workloads").await
    }

    pub async fn workload(&self, id: &str) -> Result<Workload> {
        self.get_json(&format!("/api/workloads/{id}")).await
    }

    pub async fn ancestors(&self, pid: u32) -> Result<Vec<ProcessInfo>> {
        self.get_json(&format!("/api/ancestors/{pid}")).await
    }

    pub async fn probe_stats(&self) -> Result<Vec<ProbeStats>> {
        self.get_json("/api/probes/stats").await
    }

    // --- learning mode ---

    pub async fn learning_status(&self) -> Result<LearningStatus> {
        self.get_json("/api/learning/status").await
    }

    pub async fn start_learning(&self, duration_secs: u64) -> Result<()> {
        self.post_unit("/api/learning/start", &serde_json::json!({ "duration": duration_secs }))
            .await
    }

    pub async fn stop_learning(&self) -> Result<Vec<GeneratedRule>> {
        self.post_json("/api/learning/stop", &serde_json::json!({}))
            .await
    }

    pub async fn apply_whitelist(&self, indices: &[usize]) -> Result<()> {
        self.post_unit("/api/learning/apply", &serde_json::json!({ "indices": indices }))
            .await
    }

    // --- rules ---

    pub async fn promote_rule(&self, name: &str) -> Result<()> {
        self.post_unit(&format!("/api/rules/{name}/promote"), &serde_json::json!({}))
            .await
    }

    // --- chat bookkeeping ---

    pub async fn ai_status(&self) -> Result<AiStatus> {
        self.get_json("/api/ai/status").await
    }

    pub async fn chat_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        self.get_json(&format!("/api/ai/chat/history?sessionId={session_id}"))
            .await
    }

    pub async fn clear_chat(&self, session_id: &str) -> Result<()> {
        self.post_unit(
            "/api/ai/chat/clear",
            &serde_json::json!({ "sessionId": session_id }),
        )
        .await
    }
}
