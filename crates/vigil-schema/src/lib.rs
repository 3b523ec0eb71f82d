use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod ai;

pub use ai::*;

/// Anything that flows through a deduplicating buffer. The id is the sole
/// dedup key: two items with the same id are the same logical event.
pub trait StreamItem {
    fn item_id(&self) -> &str;
}

/// Closed severity set used by the counter ledgers. Raw alert severities
/// stay strings on the wire; anything that doesn't parse lands in no bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Critical,
    High,
    Warning,
    Info,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "warning" => Some(Self::Warning),
            "info" => Some(Self::Info),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub severity: String,
    pub rule_name: String,
    pub description: String,
    pub pid: u32,
    pub process_name: String,
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub cgroup_id: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub blocked: bool,
}

impl StreamItem for Alert {
    fn item_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    TestingPromotion,
    Anomaly,
    Optimization,
    DailyReport,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Action descriptor attached to an insight by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightActionDesc {
    pub label: String,
    pub action_id: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InsightKind,
    pub title: String,
    pub summary: String,
    pub confidence: f64,
    pub severity: InsightSeverity,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub actions: Vec<InsightActionDesc>,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    pub fn action(&self, action_id: &str) -> Option<&InsightActionDesc> {
        self.actions.iter().find(|a| a.action_id == action_id)
    }
}

impl StreamItem for Insight {
    fn item_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsightsResponse {
    #[serde(default)]
    pub insights: Vec<Insight>,
}

/// One frame on the sentinel push channel: either a keepalive or an insight.
#[derive(Debug, Clone)]
pub enum SentinelMessage {
    Heartbeat,
    Insight(Box<Insight>),
}

impl SentinelMessage {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("type").and_then(Value::as_str) == Some("heartbeat") {
            return Ok(Self::Heartbeat);
        }
        serde_json::from_value::<Insight>(value).map(|i| Self::Insight(Box::new(i)))
    }
}

/// Raw probe events on the live stream, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Exec {
        timestamp: i64,
        pid: u32,
        ppid: u32,
        cgroup_id: String,
        comm: String,
        parent_comm: String,
        #[serde(default)]
        blocked: bool,
    },
    #[serde(rename_all = "camelCase")]
    Connect {
        timestamp: i64,
        pid: u32,
        cgroup_id: String,
        family: u16,
        port: u16,
        addr: String,
        #[serde(default)]
        blocked: bool,
    },
    #[serde(rename_all = "camelCase")]
    File {
        timestamp: i64,
        pid: u32,
        cgroup_id: String,
        flags: u32,
        filename: String,
        #[serde(default)]
        blocked: bool,
    },
}

impl StreamEvent {
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Exec { timestamp, .. }
            | Self::Connect { timestamp, .. }
            | Self::File { timestamp, .. } => *timestamp,
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            Self::Exec { pid, .. } | Self::Connect { pid, .. } | Self::File { pid, .. } => *pid,
        }
    }
}

/// Per-second event rates pushed on `/api/events`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EventRates {
    pub exec: i64,
    pub file: i64,
    pub network: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub process_count: i64,
    pub container_count: i64,
    pub events_per_sec: i64,
    pub alert_count: i64,
    pub probe_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    pub comm: String,
    pub cgroup_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub id: String,
    pub cgroup_path: String,
    pub exec_count: i64,
    pub file_count: i64,
    pub connect_count: i64,
    pub alert_count: i64,
    pub blocked_count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStats {
    pub id: String,
    pub name: String,
    pub tracepoint: String,
    pub active: bool,
    pub events_rate: i64,
    pub total_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    pub name: String,
    pub description: String,
    pub severity: String,
    pub action: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "match", default)]
    pub match_fields: HashMap<String, String>,
    #[serde(default)]
    pub yaml: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStatus {
    pub active: bool,
    pub start_time: i64,
    pub duration: i64,
    pub pattern_count: i64,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedRule {
    pub name: String,
    pub description: String,
    pub severity: String,
    pub action: String,
    pub yaml: String,
    #[serde(default)]
    pub selected: bool,
}
