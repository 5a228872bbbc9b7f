//! SSE (Server-Sent Events) response for relayed streams.
//!
//! Converts the relay's event channel into an SSE body. Frames look like
//! `data: <line>\n\n`, `event: function_call\ndata: <json>\n\n` and
//! `event: error\ndata: <message>\n\n`.

use std::convert::Infallible;
use std::time::Duration;

use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::relay::StreamEvent;

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Build the SSE frame for one event.
pub fn to_sse_event(event: StreamEvent) -> Event {
    // SSE field values cannot carry carriage returns.
    let payload = event.payload.replace('\r', "");
    let sse = match event.kind.sse_name() {
        Some(name) => Event::default().event(name),
        None => Event::default(),
    };
    sse.data(payload)
}

/// Convert a stream event receiver into an SSE stream.
pub fn events_to_sse_stream(
    rx: mpsc::Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|event| Ok(to_sse_event(event)))
}

/// The streaming response.
///
/// All event-stream headers are set here: `Sse` supplies `Content-Type:
/// text/event-stream` and `Cache-Control: no-cache`, the rest are added
/// alongside. Nothing may touch the headers after this.
pub fn event_stream_response(
    rx: mpsc::Receiver<StreamEvent>,
    keep_alive: Option<Duration>,
) -> Response {
    let headers = [
        (header::CONNECTION, "keep-alive"),
        (X_ACCEL_BUFFERING.clone(), "no"),
    ];
    let sse = Sse::new(events_to_sse_stream(rx));

    match keep_alive {
        Some(interval) => (headers, sse.keep_alive(KeepAlive::new().interval(interval))).into_response(),
        None => (headers, sse).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(events: Vec<StreamEvent>) -> (Response, String) {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let response = event_stream_response(rx, None);
        let (parts, body) = response.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (
            Response::from_parts(parts, axum::body::Body::empty()),
            String::from_utf8(bytes.to_vec()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_frames() {
        let (_, body) = body_of(vec![
            StreamEvent::data("line1"),
            StreamEvent::error("Failed to call llm"),
        ])
        .await;
        assert_eq!(body, "data: line1\n\nevent: error\ndata: Failed to call llm\n\n");
    }

    #[tokio::test]
    async fn test_headers() {
        let (response, _) = body_of(vec![]).await;
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[tokio::test]
    async fn test_carriage_returns_are_dropped() {
        let (_, body) = body_of(vec![StreamEvent::data("a\rb")]).await;
        assert_eq!(body, "data: ab\n\n");
    }
}
