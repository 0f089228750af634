use crate::domain::{ConnectionOptions, FireBudget, TriggerConfig, TriggerId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReasonKind {
    Auto,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReason {
    pub kind: ReasonKind,
    #[serde(rename = "statusCode", default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStatus {
    pub active: bool,
    /// Milliseconds since the epoch.
    #[serde(rename = "dateChanged")]
    pub date_changed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<StatusReason>,
}

impl TriggerStatus {
    pub fn active_now() -> Self {
        Self {
            active: true,
            date_changed: Utc::now().timestamp_millis(),
            reason: None,
        }
    }

    pub fn disabled_now(kind: ReasonKind, message: impl Into<String>) -> Self {
        Self {
            active: false,
            date_changed: Utc::now().timestamp_millis(),
            reason: Some(StatusReason {
                kind,
                status_code: None,
                message: message.into(),
            }),
        }
    }

    pub fn date_changed_iso(&self) -> Option<String> {
        DateTime::<Utc>::from_timestamp_millis(self.date_changed)
            .map(|date| date.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Persisted trigger record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub apikey: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_tag: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
    pub address: String,
    pub connection: ConnectionOptions,
    pub credit: u32,
    #[serde(rename = "maxTriggers", default = "unbounded_triggers")]
    pub max_triggers: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    pub status: TriggerStatus,
}

fn unbounded_triggers() -> i64 {
    -1
}

impl TriggerDocument {
    pub fn trigger_id(&self) -> TriggerId {
        TriggerId::from_raw(self.id.clone())
    }

    pub fn is_active(&self) -> bool {
        self.status.active
    }

    /// Disabled by an administrator: automated updates must leave it alone.
    pub fn is_admin_locked(&self) -> bool {
        matches!(
            self.status.reason,
            Some(StatusReason {
                kind: ReasonKind::Admin,
                ..
            })
        )
    }

    pub fn qualified_name(&self) -> String {
        format!("/{}/{}", self.namespace, self.name)
    }

    /// Live configuration for the feed's receiver.
    pub fn to_trigger_config(&self) -> TriggerConfig {
        let mut config = TriggerConfig::new(
            self.apikey.clone(),
            self.namespace.clone(),
            self.name.clone(),
            self.address.clone(),
            self.connection.clone(),
        )
        .with_credit(self.credit)
        .with_budget(FireBudget::from_max_triggers(self.max_triggers));
        config.feed_tag = self.feed_tag.clone();
        config
    }

    pub fn view(&self) -> TriggerView {
        TriggerView {
            config: json!({
                "name": self.name,
                "namespace": self.namespace,
                "payload": self.payload,
                "address": self.address,
                "credit": self.credit,
            }),
            status: json!({
                "active": self.status.active,
                "dateChanged": self.status.date_changed,
                "dateChangedISO": self.status.date_changed_iso(),
                "reason": self.status.reason,
            }),
        }
    }
}

/// Response body of a trigger read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerView {
    pub config: JsonValue,
    pub status: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> TriggerDocument {
        TriggerDocument {
            id: "alice:pw/guest/orders".to_string(),
            rev: Some("1-abc".to_string()),
            apikey: "alice:pw".to_string(),
            name: "orders".to_string(),
            namespace: "guest".to_string(),
            feed_tag: None,
            payload: json!({}),
            address: "orders-queue".to_string(),
            connection: ConnectionOptions::for_host("broker"),
            credit: 10,
            max_triggers: -1,
            worker: Some("worker0".to_string()),
            status: TriggerStatus {
                active: false,
                date_changed: 1_500_000_000_000,
                reason: Some(StatusReason {
                    kind: ReasonKind::Admin,
                    status_code: None,
                    message: "frozen".to_string(),
                }),
            },
        }
    }

    #[test]
    fn serializes_with_couch_field_names() {
        let value = serde_json::to_value(document()).unwrap();
        assert_eq!(value["_id"], "alice:pw/guest/orders");
        assert_eq!(value["_rev"], "1-abc");
        assert_eq!(value["maxTriggers"], -1);
        assert_eq!(value["status"]["reason"]["kind"], "ADMIN");
        assert_eq!(value["status"]["dateChanged"], 1_500_000_000_000i64);
        assert!(value["status"]["reason"].get("statusCode").is_none());
    }

    #[test]
    fn admin_reason_locks_the_document() {
        let mut doc = document();
        assert!(doc.is_admin_locked());
        doc.status = TriggerStatus::disabled_now(ReasonKind::Auto, "link detached");
        assert!(!doc.is_admin_locked());
    }

    #[test]
    fn view_exposes_config_and_iso_date() {
        let view = document().view();
        assert_eq!(view.config["address"], "orders-queue");
        assert_eq!(view.config["credit"], 10);
        assert_eq!(view.status["dateChangedISO"], "2017-07-14T02:40:00Z");
        assert_eq!(view.status["reason"]["message"], "frozen");
    }
}
