use anyhow::Result;

use devtap_client::{CdpEvent, Connection, DomainEvent};

use crate::commands::attach;
use crate::EndpointArgs;

const WATCHED_DOMAINS: [&str; 2] = ["Page", "Network"];

/// Run the `devtap watch` command.
///
/// Prints events until the connection closes, `count` events were shown,
/// or Ctrl-C is pressed.
pub async fn run(args: &EndpointArgs, filter: Option<&str>, count: Option<usize>) -> Result<()> {
    let conn = attach(args).await?;
    let (listener, mut events) = conn.event_stream();
    for domain in WATCHED_DOMAINS {
        conn.enable(domain).await?;
    }

    let mut shown = 0;
    while count.is_none_or(|limit| shown < limit) {
        let event = tokio::select! {
            event = events.recv() => event,
            () = conn.closed() => None,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else {
            println!("Connection closed.");
            break;
        };
        if filter.is_some_and(|prefix| !event.method.starts_with(prefix)) {
            continue;
        }
        println!("{}", describe(&event));
        shown += 1;
    }

    conn.unsubscribe(listener);
    shutdown(&conn).await
}

async fn shutdown(conn: &Connection) -> Result<()> {
    if !conn.is_connected() {
        return Ok(());
    }
    for domain in WATCHED_DOMAINS {
        conn.disable(domain).await?;
    }
    conn.close().await?;
    Ok(())
}

/// One-line summary of an event.
fn describe(event: &CdpEvent) -> String {
    match event.kind() {
        DomainEvent::FrameNavigated(frame) => format!("navigated   {} {}", frame.id, frame.url),
        DomainEvent::NavigatedWithinDocument { url, .. } => format!("url         {url}"),
        DomainEvent::FrameStartedLoading { frame_id } => format!("loading     {frame_id}"),
        DomainEvent::FrameStoppedLoading { frame_id } => format!("stopped     {frame_id}"),
        DomainEvent::DomContentEventFired { .. } => "dom ready".to_string(),
        DomainEvent::LoadEventFired { .. } => "loaded".to_string(),
        DomainEvent::RequestWillBeSent(info) => {
            format!("request     {} {} {}", info.request_id, info.request.method, info.request.url)
        }
        DomainEvent::ResponseReceived {
            request_id,
            response,
        } => format!("response    {request_id} {} {}", response.status, response.url),
        DomainEvent::LoadingFinished { request_id } => format!("finished    {request_id}"),
        DomainEvent::LoadingFailed {
            request_id,
            error_text,
        } => format!("failed      {request_id} {error_text}"),
        DomainEvent::Unknown { method, params } => format!("{method} {params}"),
    }
}
