//! Protocol data types shared by the event decoder, discovery, and the
//! high-level API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// One debuggable target as listed by the `/json/list` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devtools_frontend_url: Option<String>,
    /// Absent when another client is already attached to the target.
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Page and network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub security_origin: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub unreachable_url: Option<String>,
}

/// The HTTP request carried by `Network.requestWillBeSent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: Value,
    #[serde(default)]
    pub post_data: Option<String>,
    #[serde(default)]
    pub has_post_data: bool,
    #[serde(default)]
    pub referrer_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub request_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(rename = "documentURL", default)]
    pub document_url: Option<String>,
    pub request: HttpRequest,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseInfo {
    pub url: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Value,
    #[serde(default)]
    pub mime_type: String,
    #[serde(rename = "remoteIPAddress", default)]
    pub remote_ip_address: Option<String>,
    #[serde(default)]
    pub remote_port: Option<u16>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub connection_reused: bool,
    #[serde(default)]
    pub from_disk_cache: bool,
    #[serde(default)]
    pub from_service_worker: bool,
    #[serde(default)]
    pub from_prefetch_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    pub frame_id: String,
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The `type` tag of a remote value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Object,
    Function,
    Undefined,
    String,
    Number,
    Boolean,
    Symbol,
    Bigint,
    #[serde(other)]
    Unknown,
}

/// Mirror object describing a value that lives in the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Present only for values that are retained on the server.
    #[serde(default)]
    pub object_id: Option<String>,
}

impl std::fmt::Display for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.value) {
            (ValueKind::String, Some(Value::String(s))) => write!(f, "string '{s}'"),
            (_, Some(value)) => write!(f, "{value}"),
            _ => write!(
                f,
                "remote {}",
                self.class_name
                    .as_deref()
                    .or(self.description.as_deref())
                    .unwrap_or("value")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub exception_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Best human-readable message: the thrown value's description, its
    /// class name, then the exception text.
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone().or_else(|| e.class_name.clone()))
            .unwrap_or_else(|| self.text.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub configurable: bool,
    #[serde(default)]
    pub enumerable: bool,
    #[serde(default)]
    pub writable: bool,
    #[serde(default)]
    pub was_thrown: bool,
    #[serde(default)]
    pub is_own: bool,
    #[serde(default)]
    pub value: Option<RemoteObject>,
    #[serde(default)]
    pub get: Option<RemoteObject>,
    #[serde(default)]
    pub set: Option<RemoteObject>,
    #[serde(default)]
    pub symbol: Option<RemoteObject>,
}

// ---------------------------------------------------------------------------
// DOM
// ---------------------------------------------------------------------------

/// Opaque handle to a DOM node. Zero means "no node".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub i64);

impl NodeId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub node_id: NodeId,
    #[serde(default)]
    pub backend_node_id: Option<i64>,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub node_value: String,
    #[serde(default)]
    pub child_node_count: Option<u32>,
    #[serde(default)]
    pub children: Vec<Node>,
    /// Flat `[name, value, name, value, ...]` list.
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl Node {
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    /// Case-insensitive attribute lookup.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} #{}", self.node_name, self.node_id.0)
    }
}

/// Quads are `[x1, y1, x2, y2, x3, y3, x4, y4]`, clockwise from top-left.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoxModel {
    pub content: Vec<f64>,
    #[serde(default)]
    pub padding: Vec<f64>,
    #[serde(default)]
    pub border: Vec<f64>,
    #[serde(default)]
    pub margin: Vec<f64>,
    pub width: f64,
    pub height: f64,
}

impl BoxModel {
    pub fn content_left(&self) -> f64 {
        self.content.first().copied().unwrap_or_default()
    }

    pub fn content_top(&self) -> f64 {
        self.content.get(1).copied().unwrap_or_default()
    }

    pub fn content_right(&self) -> f64 {
        self.content.get(2).copied().unwrap_or_default()
    }

    pub fn content_bottom(&self) -> f64 {
        self.content.get(5).copied().unwrap_or_default()
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.content_left() + self.content_right()) / 2.0,
            (self.content_top() + self.content_bottom()) / 2.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutViewport {
    pub page_x: f64,
    pub page_y: f64,
    pub client_width: f64,
    pub client_height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualViewport {
    pub offset_x: f64,
    pub offset_y: f64,
    pub page_x: f64,
    pub page_y: f64,
    pub client_width: f64,
    pub client_height: f64,
    pub scale: f64,
    #[serde(default)]
    pub zoom: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetrics {
    pub layout_viewport: LayoutViewport,
    pub visual_viewport: VisualViewport,
    pub content_size: Rect,
}
