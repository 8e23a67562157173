//! Built-in client tools used by the demo presets.
//!
//! Each tool forwards its payload to the host as a [`ToolEvent`] and answers
//! the agent with a one-line acknowledgment.

use crate::error::ToolError;
use crate::tools::{ClientTool, ToolRegistry};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const UPDATE_ORDER: &str = "updateOrder";
pub const HIGHLIGHT_PRODUCT: &str = "highlightProduct";
pub const CAPTURE_INTERVIEW_DATA: &str = "captureInterviewData";

/// Local side effects produced by the built-in tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    OrderDetailsUpdated(Value),
    ProductHighlighted(Value),
    InterviewDataCaptured(InterviewDataCapture),
}

/// What kind of interview data is being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    CandidateInfo,
    QuestionAnswer,
    CategoryComplete,
    InterviewComplete,
}

/// Payload of the `captureInterviewData` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InterviewDataCapture {
    /// The type of data being captured.
    #[serde(rename = "type")]
    pub kind: CaptureKind,
    /// The data to capture.
    pub data: Value,
    /// ISO timestamp of when data was captured.
    pub timestamp: String,
    /// Unique session identifier for the interview.
    pub session_id: String,
}

fn emit(events: &broadcast::Sender<ToolEvent>, event: ToolEvent) {
    if events.send(event).is_err() {
        debug!("Tool event dropped: no subscribers.");
    }
}

/// Publishes drive-thru order updates.
pub struct UpdateOrderTool {
    events: broadcast::Sender<ToolEvent>,
}

#[async_trait]
impl ClientTool for UpdateOrderTool {
    async fn call(&self, parameters: Value) -> Result<String, ToolError> {
        let order = parameters
            .get("orderDetailsData")
            .cloned()
            .ok_or_else(|| ToolError::InvalidParameters("missing 'orderDetailsData'".into()))?;
        // The agent sometimes sends the order as a JSON-encoded string.
        let order = match order {
            Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
            other => other,
        };
        info!("Received order details update");
        emit(&self.events, ToolEvent::OrderDetailsUpdated(order));
        Ok("Updated the order details.".to_string())
    }
}

/// Asks the host to highlight a product on screen.
pub struct HighlightProductTool {
    events: broadcast::Sender<ToolEvent>,
}

#[async_trait]
impl ClientTool for HighlightProductTool {
    async fn call(&self, parameters: Value) -> Result<String, ToolError> {
        let product = parameters
            .get("productId")
            .cloned()
            .ok_or_else(|| ToolError::InvalidParameters("missing 'productId'".into()))?;
        emit(&self.events, ToolEvent::ProductHighlighted(product));
        Ok("Highlighted the product.".to_string())
    }
}

/// Records interview progress for the final report.
pub struct CaptureInterviewDataTool {
    events: broadcast::Sender<ToolEvent>,
}

#[async_trait]
impl ClientTool for CaptureInterviewDataTool {
    async fn call(&self, parameters: Value) -> Result<String, ToolError> {
        let payload = parameters.get("interviewData").cloned().unwrap_or(parameters);
        let capture: InterviewDataCapture = serde_json::from_value(payload)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;
        info!(kind = ?capture.kind, session_id = %capture.session_id, "Captured interview data");
        emit(&self.events, ToolEvent::InterviewDataCaptured(capture));
        Ok("Noted.".to_string())
    }
}

/// Registers the named built-in tools. Unknown names are ignored and
/// returned so the caller can report them.
pub fn register_builtin(
    registry: &ToolRegistry,
    names: &[&str],
    events: &broadcast::Sender<ToolEvent>,
) -> Vec<String> {
    let mut unknown = Vec::new();
    for name in names {
        let tool: Arc<dyn ClientTool> = match *name {
            UPDATE_ORDER => Arc::new(UpdateOrderTool {
                events: events.clone(),
            }),
            HIGHLIGHT_PRODUCT => Arc::new(HighlightProductTool {
                events: events.clone(),
            }),
            CAPTURE_INTERVIEW_DATA => Arc::new(CaptureInterviewDataTool {
                events: events.clone(),
            }),
            other => {
                unknown.push(other.to_string());
                continue;
            }
        };
        registry.register(*name, tool);
    }
    unknown
}

/// Provider-side definition of a client-implemented temporary tool whose
/// single body parameter is described by `schema`.
pub fn client_tool_definition(
    name: &str,
    description: &str,
    parameter: &str,
    schema: Value,
) -> Value {
    json!({
        "temporaryTool": {
            "modelToolName": name,
            "description": description,
            "dynamicParameters": [{
                "name": parameter,
                "location": "PARAMETER_LOCATION_BODY",
                "schema": schema,
                "required": true
            }],
            "client": {}
        }
    })
}

/// Provider-side definition for a built-in tool, or `None` for unknown names.
pub fn builtin_definition(name: &str) -> Option<Value> {
    match name {
        UPDATE_ORDER => Some(client_tool_definition(
            UPDATE_ORDER,
            "Update order details. Used any time items are added or removed or when the order is finalized.",
            "orderDetailsData",
            json!({"type": "array", "description": "An array of objects containing order items.", "items": {"type": "object"}}),
        )),
        HIGHLIGHT_PRODUCT => Some(client_tool_definition(
            HIGHLIGHT_PRODUCT,
            "Highlight a product on the menu display.",
            "productId",
            json!({"type": "string", "description": "The ID of the product to highlight."}),
        )),
        CAPTURE_INTERVIEW_DATA => Some(client_tool_definition(
            CAPTURE_INTERVIEW_DATA,
            "Capture interview data for final report generation. Use this to track questions, answers, and evaluations.",
            "interviewData",
            serde_json::to_value(schemars::schema_for!(InterviewDataCapture)).unwrap_or_default(),
        )),
        _ => None,
    }
}
