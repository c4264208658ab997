//! High-level page API over a [`Connection`].
//!
//! Each method builds one or a few protocol calls and decodes the result
//! into the types in [`crate::types`]. Values that stay alive in the page
//! come back owned by an [`ObjectGroup`] or a [`RemoteHandle`], so they are
//! released when the caller is done with them.

mod tracker;

pub use tracker::{CompletedRequest, PageActivity, PageTracker};

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::connection::Connection;
use crate::error::CdpError;
use crate::events::{EventWait, ListenerId};
use crate::lifecycle::{ObjectGroup, RemoteHandle};
use crate::types::{
    BoxModel, ExceptionDetails, LayoutMetrics, NavigateResult, Node, NodeId, PropertyDescriptor,
    RemoteObject,
};

/// Error code the browser uses for "resource not available".
const SERVER_ERROR: i64 = -32000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Image encoding for [`Tab::capture_screenshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

/// Payload of `Page.loadEventFired`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PageLoad {
    #[serde(default)]
    pub timestamp: f64,
}

/// One argument to [`Tab::call_function_on`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgument {
    /// A value already living in the page.
    ObjectId(String),
    /// A JSON value serialized into the call.
    Value(Value),
}

impl CallArgument {
    fn to_json(&self) -> Value {
        match self {
            CallArgument::ObjectId(id) => json!({ "objectId": id }),
            CallArgument::Value(value) => json!({ "value": value }),
        }
    }
}

impl From<&RemoteObject> for CallArgument {
    fn from(object: &RemoteObject) -> Self {
        match &object.object_id {
            Some(id) => CallArgument::ObjectId(id.clone()),
            None => CallArgument::Value(object.value.clone().unwrap_or(Value::Null)),
        }
    }
}

impl From<Value> for CallArgument {
    fn from(value: Value) -> Self {
        CallArgument::Value(value)
    }
}

/// Result of an evaluation: the value plus the group that keeps it alive.
///
/// Dropping this releases the group, and with it every object created by
/// the evaluation.
#[derive(Debug)]
pub struct Evaluated {
    value: RemoteHandle,
    group: ObjectGroup,
}

impl Evaluated {
    pub fn object(&self) -> &RemoteObject {
        self.value.object()
    }

    /// The evaluated value itself, for follow-up calls such as
    /// [`Tab::get_properties`].
    pub fn value(&self) -> &RemoteHandle {
        &self.value
    }

    pub fn group(&self) -> &ObjectGroup {
        &self.group
    }

    /// Release the group now instead of on drop.
    pub fn dispose(&self) -> bool {
        self.group.dispose()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectOrException {
    #[serde(default)]
    result: Option<RemoteObject>,
    #[serde(default)]
    exception_details: Option<ExceptionDetails>,
}

impl ObjectOrException {
    fn into_object(self, method: &str) -> Result<RemoteObject, CdpError> {
        if let Some(details) = self.exception_details {
            return Err(CdpError::JsException {
                message: details.message(),
            });
        }
        self.result.ok_or_else(|| CdpError::Decode {
            detail: format!("{method} returned neither a result nor an exception"),
        })
    }
}

/// One property of a remote object.
///
/// The value, accessors and symbol are owned handles. They share the
/// inspected object's group when it has one and are released on their
/// own otherwise.
#[derive(Debug)]
pub struct Property {
    pub name: String,
    pub configurable: bool,
    pub enumerable: bool,
    pub writable: bool,
    pub was_thrown: bool,
    pub is_own: bool,
    pub value: Option<RemoteHandle>,
    pub get: Option<RemoteHandle>,
    pub set: Option<RemoteHandle>,
    pub symbol: Option<RemoteHandle>,
}

impl Property {
    fn adopt(desc: PropertyDescriptor, conn: &Connection, group: Option<&ObjectGroup>) -> Self {
        let adopt = |object: Option<RemoteObject>| object.map(|o| conn.adopt(o, group));
        Self {
            name: desc.name,
            configurable: desc.configurable,
            enumerable: desc.enumerable,
            writable: desc.writable,
            was_thrown: desc.was_thrown,
            is_own: desc.is_own,
            value: adopt(desc.value),
            get: adopt(desc.get),
            set: adopt(desc.set),
            symbol: adopt(desc.symbol),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertiesResult {
    #[serde(default)]
    result: Vec<PropertyDescriptor>,
    #[serde(default)]
    exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Deserialize)]
struct DocumentResult {
    root: Node,
}

#[derive(Debug, Deserialize)]
struct NodeResult {
    node: Node,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdResult {
    #[serde(default)]
    node_id: NodeId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdsResult {
    #[serde(default)]
    node_ids: Vec<NodeId>,
}

#[derive(Debug, Deserialize)]
struct BoxModelResult {
    model: BoxModel,
}

#[derive(Debug, Deserialize)]
struct ScreenshotResult {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseBodyResult {
    body: String,
    #[serde(default)]
    base64_encoded: bool,
}

#[derive(Debug, Clone)]
struct CachedDocument {
    root: Node,
    depth: i32,
}

// ---------------------------------------------------------------------------
// Tab
// ---------------------------------------------------------------------------

/// Page-level operations on one attached target.
///
/// The document root is cached after the first `DOM.getDocument` and
/// dropped again when the page reports `DOM.documentUpdated`.
#[derive(Debug)]
pub struct Tab {
    conn: Connection,
    document: Arc<Mutex<Option<CachedDocument>>>,
    document_listener: ListenerId,
}

impl Tab {
    pub fn new(conn: Connection) -> Self {
        let document: Arc<Mutex<Option<CachedDocument>>> = Arc::new(Mutex::new(None));
        let cache = Arc::clone(&document);
        let document_listener = conn.subscribe_to("DOM.documentUpdated", move |_| {
            cache.lock().take();
            Ok(())
        });
        Self {
            conn,
            document,
            document_listener,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Domains
    // -----------------------------------------------------------------------

    pub async fn enable(&self, category: &str) -> Result<u32, CdpError> {
        self.conn.enable(category).await
    }

    pub async fn disable(&self, category: &str) -> Result<u32, CdpError> {
        self.conn.disable(category).await
    }

    pub fn ensure_enabled(&self, category: &str) -> Result<(), CdpError> {
        self.conn.ensure_enabled(category)
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    /// Navigate the top frame. Requires `Page` to be enabled.
    ///
    /// Network-level failures are reported in [`NavigateResult::error_text`]
    /// rather than as an error.
    pub async fn navigate(&self, url: &str) -> Result<NavigateResult, CdpError> {
        self.ensure_enabled("Page")?;
        self.conn
            .call(
                "Page.navigate",
                Some(json!({ "url": url, "transitionType": "address_bar" })),
            )
            .await
    }

    pub async fn reload(&self) -> Result<(), CdpError> {
        self.conn.send("Page.reload", None).await
    }

    /// Register a wait for the next `Page.loadEventFired`.
    ///
    /// Call this before triggering the load, then await the result.
    pub fn wait_for_page_load(&self) -> Result<EventWait<PageLoad>, CdpError> {
        self.ensure_enabled("Page")?;
        self.conn.await_event_once("Page.loadEventFired")
    }

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------

    /// Evaluate `expression` and keep the result alive in a fresh group.
    pub async fn evaluate(&self, expression: &str) -> Result<Evaluated, CdpError> {
        let group = self.conn.object_group("evaluate");
        let result: ObjectOrException = self
            .conn
            .call(
                "Runtime.evaluate",
                Some(json!({ "expression": expression, "objectGroup": group.name() })),
            )
            .await?;
        let object = result.into_object("Runtime.evaluate")?;
        Ok(Evaluated {
            value: self.conn.adopt(object, Some(&group)),
            group,
        })
    }

    /// Evaluate `expression` and return its JSON value, awaiting promises.
    pub async fn evaluate_value(&self, expression: &str) -> Result<Value, CdpError> {
        let result: ObjectOrException = self
            .conn
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;
        let object = result.into_object("Runtime.evaluate")?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    /// Call `function_declaration` with `this` bound to `target`.
    pub async fn call_function_on(
        &self,
        target: &RemoteObject,
        function_declaration: &str,
        arguments: &[CallArgument],
    ) -> Result<Evaluated, CdpError> {
        let object_id = target.object_id.as_deref().ok_or_else(|| CdpError::Decode {
            detail: "callFunctionOn target has no object id".into(),
        })?;
        let group = self.conn.object_group("callFunctionOn");
        let args: Vec<Value> = arguments.iter().map(CallArgument::to_json).collect();
        let result: ObjectOrException = self
            .conn
            .call(
                "Runtime.callFunctionOn",
                Some(json!({
                    "functionDeclaration": function_declaration,
                    "objectId": object_id,
                    "arguments": args,
                    "userGesture": true,
                    "objectGroup": group.name(),
                })),
            )
            .await?;
        let object = result.into_object("Runtime.callFunctionOn")?;
        Ok(Evaluated {
            value: self.conn.adopt(object, Some(&group)),
            group,
        })
    }

    /// Wait for a promise to settle. The settled value is released on its
    /// own when the returned handle is dropped.
    pub async fn await_promise(&self, promise: &RemoteObject) -> Result<RemoteHandle, CdpError> {
        let promise_id = promise.object_id.as_deref().ok_or_else(|| CdpError::Decode {
            detail: "awaitPromise target has no object id".into(),
        })?;
        let result: ObjectOrException = self
            .conn
            .call(
                "Runtime.awaitPromise",
                Some(json!({ "promiseObjectId": promise_id })),
            )
            .await?;
        let object = result.into_object("Runtime.awaitPromise")?;
        Ok(self.conn.adopt(object, None))
    }

    /// List the properties of `target`.
    ///
    /// Property values live in the target's group when it has one;
    /// otherwise each returned handle releases its own object.
    pub async fn get_properties(
        &self,
        target: &RemoteHandle,
        own_properties: bool,
        accessor_properties_only: bool,
    ) -> Result<Vec<Property>, CdpError> {
        let object_id = target.object_id().ok_or_else(|| CdpError::Decode {
            detail: "getProperties target has no object id".into(),
        })?;
        let result: PropertiesResult = self
            .conn
            .call(
                "Runtime.getProperties",
                Some(json!({
                    "objectId": object_id,
                    "ownProperties": own_properties,
                    "accessorPropertiesOnly": accessor_properties_only,
                })),
            )
            .await?;
        if let Some(details) = result.exception_details {
            return Err(CdpError::JsException {
                message: details.message(),
            });
        }
        let group = target.group();
        Ok(result
            .result
            .into_iter()
            .map(|desc| Property::adopt(desc, &self.conn, group.as_ref()))
            .collect())
    }

    // -----------------------------------------------------------------------
    // DOM
    // -----------------------------------------------------------------------

    /// The document root, from cache unless a deeper tree is needed.
    pub async fn get_document(&self, depth: i32) -> Result<Node, CdpError> {
        if let Some(cached) = self.document.lock().as_ref() {
            if cached.depth >= depth {
                return Ok(cached.root.clone());
            }
        }
        self.refresh_document(depth).await
    }

    /// Fetch the document root, bypassing the cache.
    pub async fn refresh_document(&self, depth: i32) -> Result<Node, CdpError> {
        let result: DocumentResult = self
            .conn
            .call("DOM.getDocument", Some(json!({ "depth": depth })))
            .await?;
        *self.document.lock() = Some(CachedDocument {
            root: result.root.clone(),
            depth,
        });
        Ok(result.root)
    }

    async fn query_root(&self, parent: Option<NodeId>) -> Result<NodeId, CdpError> {
        match parent {
            Some(id) => Ok(id),
            None => Ok(self.get_document(1).await?.node_id),
        }
    }

    /// First element matching `selector`, or `None`.
    pub async fn query_selector(
        &self,
        selector: &str,
        parent: Option<NodeId>,
    ) -> Result<Option<NodeId>, CdpError> {
        let root = self.query_root(parent).await?;
        let result: NodeIdResult = self
            .conn
            .call(
                "DOM.querySelector",
                Some(json!({ "nodeId": root, "selector": selector })),
            )
            .await?;
        Ok(result.node_id.is_valid().then_some(result.node_id))
    }

    pub async fn query_selector_all(
        &self,
        selector: &str,
        parent: Option<NodeId>,
    ) -> Result<Vec<NodeId>, CdpError> {
        let root = self.query_root(parent).await?;
        let result: NodeIdsResult = self
            .conn
            .call(
                "DOM.querySelectorAll",
                Some(json!({ "nodeId": root, "selector": selector })),
            )
            .await?;
        Ok(result.node_ids)
    }

    /// Describe one node, to the configured depth unless `depth` is given.
    pub async fn describe_node(&self, id: NodeId, depth: Option<u32>) -> Result<Node, CdpError> {
        let depth = depth.unwrap_or(self.conn.config().description_depth);
        let result: NodeResult = self
            .conn
            .call(
                "DOM.describeNode",
                Some(json!({ "nodeId": id, "depth": depth })),
            )
            .await?;
        Ok(result.node)
    }

    /// Describe several nodes with all requests in flight at once.
    pub async fn describe_nodes(
        &self,
        ids: &[NodeId],
        depth: Option<u32>,
    ) -> Result<Vec<Node>, CdpError> {
        futures_util::future::join_all(ids.iter().map(|&id| self.describe_node(id, depth)))
            .await
            .into_iter()
            .collect()
    }

    /// The node's box model, or `None` if the browser cannot lay it out.
    pub async fn get_box_model(&self, id: NodeId) -> Result<Option<BoxModel>, CdpError> {
        let result = self
            .conn
            .call_or_failure::<BoxModelResult>("DOM.getBoxModel", Some(json!({ "nodeId": id })))
            .await?;
        match result {
            Ok(found) => Ok(Some(found.model)),
            Err(remote) => {
                tracing::debug!(node = id.0, error = %remote, "no box model for node");
                Ok(None)
            }
        }
    }

    pub async fn highlight_node(&self, id: NodeId) -> Result<(), CdpError> {
        self.conn
            .send(
                "DOM.highlightNode",
                Some(json!({
                    "nodeId": id,
                    "highlightConfig": {
                        "borderColor": { "r": 64, "g": 200, "b": 255, "a": 0.8 },
                        "contentColor": { "r": 64, "g": 200, "b": 255, "a": 0.33 },
                    },
                })),
            )
            .await
    }

    pub async fn hide_highlight(&self) -> Result<(), CdpError> {
        self.conn.send("DOM.hideHighlight", None).await
    }

    // -----------------------------------------------------------------------
    // Page content and input
    // -----------------------------------------------------------------------

    /// Capture the viewport. Returns the decoded image bytes.
    pub async fn capture_screenshot(
        &self,
        format: ScreenshotFormat,
        quality: Option<u8>,
    ) -> Result<Vec<u8>, CdpError> {
        let mut params = json!({ "format": format });
        if let Some(quality) = quality.filter(|_| format != ScreenshotFormat::Png) {
            params["quality"] = json!(quality);
        }
        let result: ScreenshotResult = self.conn.call("Page.captureScreenshot", Some(params)).await?;
        B64.decode(result.data).map_err(|e| CdpError::Decode {
            detail: format!("screenshot is not valid base64: {e}"),
        })
    }

    pub async fn get_layout_metrics(&self) -> Result<LayoutMetrics, CdpError> {
        self.conn.call("Page.getLayoutMetrics", None).await
    }

    /// Left-click at page coordinates.
    pub async fn click(&self, x: f64, y: f64) -> Result<(), CdpError> {
        for kind in ["mousePressed", "mouseReleased"] {
            self.conn
                .call_raw(
                    "Input.dispatchMouseEvent",
                    Some(json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    })),
                )
                .await?;
        }
        Ok(())
    }

    /// Click the center of a node's content box. Returns `false` when the
    /// node has no box model.
    pub async fn click_node(&self, id: NodeId) -> Result<bool, CdpError> {
        let Some(model) = self.get_box_model(id).await? else {
            return Ok(false);
        };
        let (x, y) = model.center();
        self.click(x, y).await?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Network
    // -----------------------------------------------------------------------

    /// Body of a finished response, or `None` if the browser no longer
    /// has it.
    pub async fn response_body(&self, request_id: &str) -> Result<Option<Vec<u8>>, CdpError> {
        let result = self
            .conn
            .call_or_failure::<ResponseBodyResult>(
                "Network.getResponseBody",
                Some(json!({ "requestId": request_id })),
            )
            .await?;
        let body = match result {
            Ok(body) => body,
            Err(remote) if remote.code == SERVER_ERROR => return Ok(None),
            Err(remote) => return Err(remote.into()),
        };
        if body.base64_encoded {
            B64.decode(body.body).map(Some).map_err(|e| CdpError::Decode {
                detail: format!("response body is not valid base64: {e}"),
            })
        } else {
            Ok(Some(body.body.into_bytes()))
        }
    }

    /// Like [`Tab::response_body`], decoded as UTF-8 text.
    pub async fn response_text(&self, request_id: &str) -> Result<Option<String>, CdpError> {
        match self.response_body(request_id).await? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(CdpError::decode),
            None => Ok(None),
        }
    }
}

impl Drop for Tab {
    fn drop(&mut self) {
        self.conn.unsubscribe(self.document_listener);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
