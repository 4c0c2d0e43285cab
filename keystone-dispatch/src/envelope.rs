//! Wire types for the unified `POST /do` endpoint (§4.4, §6).
//!
//! The body is decoded exactly once, in [`crate::pipeline::parse`], into a
//! [`DispatchRequest`]; everything downstream reads from the decoded struct
//! rather than re-touching the body.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `{action, object, data, jwt?}` — the only request shape the dispatcher
/// accepts, for every action from `authenticate` to `ticketRemove`.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub action: String,
    pub object: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub jwt: Option<String>,
}

impl DispatchRequest {
    /// `data.id`, when present and a string.
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    /// `data.projectId` (wire uses camelCase; storage uses `project_id`),
    /// when present and a string.
    pub fn project_id(&self) -> Option<&str> {
        self.data.get("projectId").and_then(Value::as_str)
    }
}

/// `{errorCode, errorMessage?, data?}` — `errorCode = -1` is success (§4.4, §7).
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    #[serde(rename = "errorCode")]
    pub error_code: i32,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DispatchResponse {
    pub const SUCCESS_CODE: i32 = -1;

    pub fn success(data: Value) -> Self {
        Self {
            error_code: Self::SUCCESS_CODE,
            error_message: None,
            data: Some(data),
        }
    }

    pub fn success_empty() -> Self {
        Self {
            error_code: Self::SUCCESS_CODE,
            error_message: None,
            data: None,
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            error_message: Some(message.into()),
            data: None,
        }
    }
}

/// Per-request context threaded through the pipeline stages (§5): the
/// decoded request, connection metadata captured before stage 1 runs, and
/// whatever each stage attaches as it succeeds (`username` after stage 3,
/// `project_id` after stage 4's resolution).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request: DispatchRequest,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub header_auth: Option<String>,
    pub username: Option<String>,
    pub resource_id: Option<String>,
    pub resolved_project_id: Option<String>,
}

impl RequestContext {
    pub fn new(request: DispatchRequest, client_ip: String, user_agent: Option<String>, header_auth: Option<String>) -> Self {
        let resource_id = request.id().map(str::to_string);
        Self {
            request,
            client_ip,
            user_agent,
            header_auth,
            username: None,
            resource_id,
            resolved_project_id: None,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}
