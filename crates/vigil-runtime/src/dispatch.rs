use std::sync::Arc;

use tokio::sync::Mutex;
use vigil_client::{ApiClient, ClientError};
use vigil_schema::InsightActionDesc;
use vigil_stream::InsightFeed;

/// Closed set of actions the client knows how to carry out. Server-sent
/// descriptors name actions by id; anything outside this set is carried as
/// `Unrecognized` and refused at dispatch time rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Promote { rule_name: String },
    Dismiss,
    Investigate { event_id: String },
    Unrecognized { raw: String },
}

impl ActionKind {
    pub fn from_desc(desc: &InsightActionDesc) -> Self {
        match desc.action_id.as_str() {
            "promote" => {
                let rule_name = desc
                    .params
                    .get("rule_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Self::Promote { rule_name }
            }
            "dismiss" => Self::Dismiss,
            "investigate" => {
                let event_id = desc
                    .params
                    .get("event_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Self::Investigate { event_id }
            }
            other => Self::Unrecognized {
                raw: other.to_string(),
            },
        }
    }
}

/// What the caller should do after a dispatched action completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionEffect {
    /// The insight was consumed and dropped from the feed.
    Removed,
    /// Jump to the named event's detail view; the insight stays.
    Navigate { event_id: String },
    /// Nothing to do (unknown action or missing descriptor).
    None,
}

/// Dispatches one insight action by id. Unknown ids and missing descriptors
/// are logged and reported as `ActionEffect::None` rather than failing the
/// caller; only a network failure on a server-backed action is an error,
/// and in that case the insight is left in place.
pub async fn execute_action(
    api: &ApiClient,
    feed: &Arc<Mutex<InsightFeed>>,
    insight_id: &str,
    action_id: &str,
) -> Result<ActionEffect, ClientError> {
    let kind = {
        let feed = feed.lock().await;
        let Some(insight) = feed.insights().find(|i| i.id == insight_id) else {
            tracing::warn!(insight_id, "action dispatch on unknown insight");
            return Ok(ActionEffect::None);
        };
        let Some(desc) = insight.action(action_id) else {
            tracing::warn!(insight_id, action_id, "insight carries no such action");
            return Ok(ActionEffect::None);
        };
        ActionKind::from_desc(desc)
    };

    match kind {
        ActionKind::Promote { rule_name } => {
            // Server call first; the insight is only consumed once the
            // promotion is durable.
            api.promote_rule(&rule_name).await?;
            feed.lock().await.remove(insight_id);
            Ok(ActionEffect::Removed)
        }
        ActionKind::Dismiss => {
            feed.lock().await.remove(insight_id);
            Ok(ActionEffect::Removed)
        }
        ActionKind::Investigate { event_id } => Ok(ActionEffect::Navigate { event_id }),
        ActionKind::Unrecognized { raw } => {
            tracing::warn!(insight_id, action = %raw, "refusing unrecognized action");
            Ok(ActionEffect::None)
        }
    }
}
