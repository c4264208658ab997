//! Page activity tracking built on a persistent listener.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::events::ListenerId;
use crate::protocol::{CdpEvent, DomainEvent};
use crate::types::{Frame, RequestInfo, ResponseInfo};

/// A request whose response has arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRequest {
    pub request_id: String,
    /// `None` if the request started before tracking began.
    pub request: Option<RequestInfo>,
    pub response: ResponseInfo,
}

/// Page-level happenings, in the order their events arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum PageActivity {
    Navigated(Frame),
    UrlChanged { url: String, frame: Option<Frame> },
    StartedLoading { frame_id: String },
    Loaded,
    RequestStarted(RequestInfo),
    /// Emitted on `Network.loadingFinished`, once the body is available.
    RequestComplete(CompletedRequest),
    /// Emitted on `Network.loadingFailed`; the request is forgotten.
    RequestFailed {
        request_id: String,
        request: Option<RequestInfo>,
        error_text: String,
    },
}

#[derive(Debug, Default)]
struct TrackerState {
    frames: HashMap<String, Frame>,
    requests: HashMap<String, RequestInfo>,
    responses: HashMap<String, CompletedRequest>,
}

impl TrackerState {
    fn apply(&mut self, event: DomainEvent) -> Option<PageActivity> {
        match event {
            DomainEvent::FrameNavigated(frame) => {
                self.frames.insert(frame.id.clone(), frame.clone());
                Some(PageActivity::Navigated(frame))
            }
            DomainEvent::NavigatedWithinDocument { frame_id, url } => {
                let frame = self.frames.get_mut(&frame_id).map(|frame| {
                    frame.url.clone_from(&url);
                    frame.clone()
                });
                Some(PageActivity::UrlChanged { url, frame })
            }
            DomainEvent::FrameStartedLoading { frame_id } => {
                Some(PageActivity::StartedLoading { frame_id })
            }
            DomainEvent::LoadEventFired { .. } => Some(PageActivity::Loaded),
            DomainEvent::RequestWillBeSent(info) => {
                self.requests.insert(info.request_id.clone(), info.clone());
                Some(PageActivity::RequestStarted(info))
            }
            DomainEvent::ResponseReceived {
                request_id,
                response,
            } => {
                let request = self.requests.remove(&request_id);
                self.responses.insert(
                    request_id.clone(),
                    CompletedRequest {
                        request_id,
                        request,
                        response,
                    },
                );
                None
            }
            DomainEvent::LoadingFinished { request_id } => self
                .responses
                .remove(&request_id)
                .map(PageActivity::RequestComplete),
            DomainEvent::LoadingFailed {
                request_id,
                error_text,
            } => {
                let started = self.requests.remove(&request_id);
                let answered = self.responses.remove(&request_id);
                let request = started.or_else(|| answered.and_then(|done| done.request));
                Some(PageActivity::RequestFailed {
                    request_id,
                    request,
                    error_text,
                })
            }
            _ => None,
        }
    }
}

/// Follows frames and network requests of one page.
///
/// Needs `Page` and `Network` enabled on the connection to see anything.
/// Stops tracking when dropped.
#[derive(Debug)]
pub struct PageTracker {
    conn: Connection,
    state: Arc<Mutex<TrackerState>>,
    listener: ListenerId,
}

impl PageTracker {
    /// Start tracking. Activity is reported on the returned channel.
    pub fn attach(conn: &Connection) -> (Self, mpsc::UnboundedReceiver<PageActivity>) {
        let state = Arc::new(Mutex::new(TrackerState::default()));
        let (tx, rx) = mpsc::unbounded_channel();

        let shared = Arc::clone(&state);
        let listener = conn.subscribe(move |event: &CdpEvent| {
            let activity = shared.lock().apply(event.kind());
            if let Some(activity) = activity {
                let _ = tx.send(activity);
            }
            Ok(())
        });

        let tracker = Self {
            conn: conn.clone(),
            state,
            listener,
        };
        (tracker, rx)
    }

    pub fn frame(&self, id: &str) -> Option<Frame> {
        self.state.lock().frames.get(id).cloned()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.state.lock().frames.values().cloned().collect()
    }

    /// A request that has started but has no response yet.
    pub fn pending_request(&self, request_id: &str) -> Option<RequestInfo> {
        self.state.lock().requests.get(request_id).cloned()
    }

    pub fn pending_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// A response that arrived but whose body is not finished loading.
    pub fn response(&self, request_id: &str) -> Option<CompletedRequest> {
        self.state.lock().responses.get(request_id).cloned()
    }
}

impl Drop for PageTracker {
    fn drop(&mut self) {
        self.conn.unsubscribe(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::memory;
    use serde_json::json;

    fn request_event(id: &str, url: &str) -> serde_json::Value {
        json!({
            "method": "Network.requestWillBeSent",
            "params": {
                "requestId": id,
                "frameId": "F1",
                "loaderId": "L1",
                "documentURL": "https://example.com/",
                "request": { "url": url, "method": "GET", "headers": {} },
                "type": "Fetch"
            }
        })
    }

    fn response_event(id: &str, url: &str) -> serde_json::Value {
        json!({
            "method": "Network.responseReceived",
            "params": {
                "requestId": id,
                "response": {
                    "url": url,
                    "status": 200,
                    "statusText": "OK",
                    "headers": {},
                    "mimeType": "application/json"
                }
            }
        })
    }

    #[tokio::test]
    async fn tracks_frames_and_request_lifecycle() {
        let (transport, peer) = memory::pair();
        let conn = Connection::from_transport(transport, ClientConfig::default()).unwrap();
        let (tracker, mut activity) = PageTracker::attach(&conn);

        peer.push_json(&json!({
            "method": "Page.frameNavigated",
            "params": { "frame": { "id": "F1", "url": "https://example.com/", "loaderId": "L1" } }
        }));
        peer.push_json(&json!({
            "method": "Page.navigatedWithinDocument",
            "params": { "frameId": "F1", "url": "https://example.com/#top" }
        }));
        peer.push_json(&request_event("R1", "https://example.com/api"));
        peer.push_json(&response_event("R1", "https://example.com/api"));
        peer.push_json(&json!({
            "method": "Network.loadingFinished",
            "params": { "requestId": "R1", "timestamp": 1.0, "encodedDataLength": 10 }
        }));
        peer.push_json(&json!({ "method": "Page.loadEventFired", "params": { "timestamp": 2.0 } }));

        match activity.recv().await.unwrap() {
            PageActivity::Navigated(frame) => assert_eq!(frame.id, "F1"),
            other => panic!("unexpected {other:?}"),
        }
        match activity.recv().await.unwrap() {
            PageActivity::UrlChanged { url, frame } => {
                assert_eq!(url, "https://example.com/#top");
                assert_eq!(frame.unwrap().url, url);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            activity.recv().await.unwrap(),
            PageActivity::RequestStarted(ref info) if info.request_id == "R1"
        ));
        match activity.recv().await.unwrap() {
            PageActivity::RequestComplete(done) => {
                assert_eq!(done.request_id, "R1");
                assert_eq!(done.request.unwrap().request.url, "https://example.com/api");
                assert_eq!(done.response.status, 200);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(activity.recv().await.unwrap(), PageActivity::Loaded);

        assert_eq!(tracker.frame("F1").unwrap().url, "https://example.com/#top");
        assert_eq!(tracker.pending_requests(), 0);
        assert!(tracker.response("R1").is_none());
    }

    #[test]
    fn loading_finished_without_response_is_ignored() {
        let mut state = TrackerState::default();
        let finished = DomainEvent::LoadingFinished {
            request_id: "R9".into(),
        };
        assert!(state.apply(finished).is_none());
    }

    #[tokio::test]
    async fn failed_requests_are_forgotten() {
        let (transport, peer) = memory::pair();
        let conn = Connection::from_transport(transport, ClientConfig::default()).unwrap();
        let (tracker, mut activity) = PageTracker::attach(&conn);

        peer.push_json(&request_event("R1", "https://example.com/blocked"));
        peer.push_json(&request_event("R2", "https://example.com/slow"));
        peer.push_json(&response_event("R2", "https://example.com/slow"));
        for id in ["R1", "R2"] {
            peer.push_json(&json!({
                "method": "Network.loadingFailed",
                "params": { "requestId": id, "errorText": "net::ERR_FAILED", "timestamp": 1.0 }
            }));
        }

        let mut failed = Vec::new();
        while failed.len() < 2 {
            if let PageActivity::RequestFailed {
                request_id,
                request,
                error_text,
            } = activity.recv().await.unwrap()
            {
                assert_eq!(error_text, "net::ERR_FAILED");
                failed.push((request_id, request.map(|r| r.request.url)));
            }
        }
        assert_eq!(
            failed,
            [
                ("R1".to_string(), Some("https://example.com/blocked".to_string())),
                ("R2".to_string(), Some("https://example.com/slow".to_string())),
            ]
        );
        assert_eq!(tracker.pending_requests(), 0);
        assert!(tracker.response("R2").is_none());
    }

    #[tokio::test]
    async fn dropping_the_tracker_unsubscribes() {
        let (transport, _peer) = memory::pair();
        let conn = Connection::from_transport(transport, ClientConfig::default()).unwrap();
        let (tracker, _activity) = PageTracker::attach(&conn);
        assert_eq!(conn.listener_count(), 1);
        drop(tracker);
        assert_eq!(conn.listener_count(), 0);
    }
}
