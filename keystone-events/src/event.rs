//! The event wire shape published over the hub (§6 "Event wire format") and
//! the filtering tuple carried alongside it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(project_id?, organization_id?, team_id?, account_id?, required_permissions[])`
/// — the tuple the hub's fan-out consults to decide who gets an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "organizationId", skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(rename = "teamId", skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(rename = "accountId", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl EventContext {
    pub fn with_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    /// Whether this context requires a permission check at all (§4.5 step 2).
    pub fn requires_permission_check(&self) -> bool {
        !self.permissions.is_empty()
    }
}

/// One notification of a successful state change (§3 "Event").
/// `event_type` is always `"{object}.{action}"` using canonical verbs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    pub action: String,
    pub object: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub username: String,
    pub timestamp: i64,
    pub data: Value,
    pub context: EventContext,
}

impl Event {
    /// `event_type = "{object}.{verb}"`, the join used for subscription matching.
    pub fn new(
        object: impl Into<String>,
        action: impl Into<String>,
        entity_id: impl Into<String>,
        username: impl Into<String>,
        timestamp: i64,
        data: Value,
        context: EventContext,
    ) -> Self {
        let object = object.into();
        let action = action.into();
        let event_type = format!("{object}.{action}");
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            action,
            object,
            entity_id: entity_id.into(),
            username: username.into(),
            timestamp,
            data,
            context,
        }
    }
}

/// Frames sent/received over a subscribed WebSocket connection (§6 "WebSocket
/// control frames"). Tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { data: SubscriptionData },
    Unsubscribe { data: SubscriptionData },
    Ping,
    /// Reply to a server-initiated heartbeat ping (§4.5 "disconnects if no
    /// pong within a timeout").
    Pong,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionData {
    #[serde(rename = "eventTypes")]
    pub event_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Event { event: Event },
    SubscriptionConfirmed {
        #[serde(rename = "eventTypes")]
        event_types: Vec<String>,
    },
    UnsubscriptionConfirmed {
        #[serde(rename = "eventTypes")]
        event_types: Vec<String>,
    },
    Ping,
    Pong,
    Error { message: String },
}
