//! Realtime wire protocol.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//!
//! ```text
//!   client ──► subscribe-production     {maChuyenLine?, factory?, line?, team?, index?}
//!   client ──► subscribe-center-tv      {factory, line}
//!   client ──► unsubscribe-production   {maChuyenLine?, factory?, line?, team?}
//!
//!   server ──► connection-established | subscription-confirmed
//!              | center-tv-subscription-confirmed
//!   server ──► production-update | production-immediate | center-tv-update
//!              | cd-update | cd:<LINE CODE>          (UpdateMessage)
//!   server ──► cd-data-refresh | system-update       (refresh triggers)
//! ```
//!
//! Unknown events decode to `None` and are ignored by the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use linewatch_common::lenient;
use linewatch_common::{Identity, IdentityFields, SnapshotPatch};

use crate::errors::WireError;

// ── Client → server ──────────────────────────────────────────────────

/// Identity fields of a subscribe or unsubscribe request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "maChuyenLine", default, skip_serializing_if = "Option::is_none")]
    pub line_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl From<&Identity> for SubscribeRequest {
    fn from(identity: &Identity) -> Self {
        match identity {
            Identity::Line {
                code,
                factory,
                index,
            } => Self {
                line_code: Some(code.clone()),
                factory: factory.clone(),
                index: *index,
                ..Self::default()
            },
            Identity::Team {
                factory,
                line,
                team,
            } => Self {
                factory: Some(factory.clone()),
                line: Some(line.clone()),
                team: Some(team.clone()),
                ..Self::default()
            },
            Identity::Center { factory, line } => Self {
                factory: Some(factory.clone()),
                line: Some(line.clone()),
                ..Self::default()
            },
            Identity::Factory { factory } => Self {
                factory: Some(factory.clone()),
                ..Self::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    SubscribeProduction(SubscribeRequest),
    SubscribeCenterTv { factory: String, line: String },
    UnsubscribeProduction(SubscribeRequest),
}

impl ClientFrame {
    pub fn subscribe(identity: &Identity) -> Self {
        match identity {
            Identity::Center { factory, line } => Self::SubscribeCenterTv {
                factory: factory.clone(),
                line: line.clone(),
            },
            other => Self::SubscribeProduction(other.into()),
        }
    }

    pub fn unsubscribe(identity: &Identity) -> Self {
        Self::UnsubscribeProduction(identity.into())
    }

    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Decode(e.to_string()))
    }
}

// ── Server → client ──────────────────────────────────────────────────

/// Inbound update carrying a partial snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp: Value,
    #[serde(
        rename = "maChuyenLine",
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub line_code: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub factory: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub line: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient::opt_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(rename = "_testUpdate", default, skip_serializing_if = "std::ops::Not::not")]
    pub test_update: bool,
    /// Everything else at the top level; some producers send the record flat.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn carries_line_code(record: &Value) -> bool {
    ["maChuyenLine", "maChuyen"]
        .iter()
        .any(|key| record.get(key).is_some_and(Value::is_string))
}

impl UpdateMessage {
    fn nested_record(&self) -> Option<&Value> {
        ["data", "summary"]
            .iter()
            .filter_map(|key| self.data.get(key))
            .find(|v| truthy(v))
    }

    /// Reject messages that must not reach the store.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.test_update {
            return Err(WireError::TestUpdate);
        }
        if !truthy(&self.timestamp) {
            return Err(WireError::MissingTimestamp);
        }
        let has_code = self.line_code.as_deref().is_some_and(|c| !c.is_empty());
        let has_factory = self.factory.as_deref().is_some_and(|f| !f.is_empty());
        if !has_code && !has_factory {
            return Err(WireError::MissingIdentity);
        }
        if let Some(record) = self.nested_record() {
            let numeric_output = record.get("slth").is_some_and(Value::is_number);
            if !carries_line_code(record) && !numeric_output {
                return Err(WireError::InvalidRecord);
            }
        }
        Ok(())
    }

    pub fn identity_fields(&self) -> IdentityFields {
        IdentityFields {
            line_code: self.line_code.clone().filter(|s| !s.is_empty()),
            factory: self.factory.clone().filter(|s| !s.is_empty()),
            line: self.line.clone().filter(|s| !s.is_empty()),
            team: self.team.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Partial snapshot carried by this message, if any.
    ///
    /// Looked up in order: `data.data`, `data.summary`, `data` when it has a
    /// line code, then the message's own top level when it has one.
    pub fn extract_patch(&self) -> Option<SnapshotPatch> {
        let record = if let Some(nested) = self.nested_record() {
            nested.clone()
        } else if carries_line_code(&self.data) {
            self.data.clone()
        } else if let Some(code) = &self.line_code {
            let mut flat = self.extra.clone();
            flat.insert("maChuyenLine".into(), Value::String(code.clone()));
            Value::Object(flat)
        } else {
            return None;
        };
        SnapshotPatch::from_json(&flatten_metrics(&record)).ok()
    }
}

/// Lift `metrics.*` to the top level of a record. A truthy metric wins over
/// the same key at the top level; a falsy one does not.
pub fn flatten_metrics(record: &Value) -> Value {
    let Some(obj) = record.as_object() else {
        return record.clone();
    };
    let mut out: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "metrics")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(metrics) = obj.get("metrics").and_then(Value::as_object) {
        for (k, v) in metrics {
            if truthy(v) || !out.contains_key(k) {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Value::Object(out)
}

/// Broadcast asking displays to refetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUpdate {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl SystemUpdate {
    pub fn triggers_refresh(&self, identity: &Identity) -> bool {
        match self.kind.as_str() {
            "data-refresh" => self
                .data
                .get("changesCount")
                .and_then(lenient::number_from_value)
                .is_some_and(|n| n > 0.0),
            "center-tv-refresh" => matches!(identity, Identity::Center { .. }),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    ConnectionEstablished(Value),
    SubscriptionConfirmed(Value),
    CenterTvSubscriptionConfirmed(Value),
    ProductionUpdate(UpdateMessage),
    ProductionImmediate(UpdateMessage),
    CenterTvUpdate(UpdateMessage),
    CdUpdate(UpdateMessage),
    CdDataRefresh(Value),
    SystemUpdate(SystemUpdate),
}

const KNOWN_EVENTS: &[&str] = &[
    "connection-established",
    "subscription-confirmed",
    "center-tv-subscription-confirmed",
    "production-update",
    "production-immediate",
    "center-tv-update",
    "cd-update",
    "cd-data-refresh",
    "system-update",
];

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerFrame {
    /// Decode a text frame. `Ok(None)` for events this client does not handle.
    pub fn decode(text: &str) -> Result<Option<Self>, WireError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| WireError::Decode(e.to_string()))?;
        let event = if raw.event.starts_with("cd:") {
            "cd-update"
        } else if KNOWN_EVENTS.contains(&raw.event.as_str()) {
            raw.event.as_str()
        } else {
            return Ok(None);
        };
        let frame = serde_json::json!({ "event": event, "data": raw.data });
        serde_json::from_value(frame)
            .map(Some)
            .map_err(|e| WireError::Decode(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(|e| WireError::Decode(e.to_string()))
    }

    pub fn update(&self) -> Option<&UpdateMessage> {
        match self {
            Self::ProductionUpdate(m)
            | Self::ProductionImmediate(m)
            | Self::CenterTvUpdate(m)
            | Self::CdUpdate(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_confirmation(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionConfirmed(_) | Self::CenterTvSubscriptionConfirmed(_)
        )
    }
}
