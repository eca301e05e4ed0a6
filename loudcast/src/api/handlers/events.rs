//! Server-sent-events stream of analysis outcomes.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::AppState;
use crate::notify::AnalysisOutcome;

/// Fixed frame payload sent when a background job failed.
const ERROR_MARKER: &str = "ffmpeg error";

/// Heartbeat payload for idle connections.
const HEARTBEAT: &str = "ping";

/// Relay analysis outcomes to one client until it disconnects.
///
/// Each connection holds its own subscription, so every client observes
/// every outcome. Heartbeat frames keep idle connections (and proxies in
/// between) alive; when the client goes away the stream is dropped along
/// with its subscription.
pub async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = outcome_stream(BroadcastStream::new(state.notifier.subscribe()));

    Sse::new(frames).keep_alive(
        KeepAlive::new()
            .interval(state.config.events.heartbeat_interval)
            .event(Event::default().data(HEARTBEAT)),
    )
}

/// Map raw subscription items to SSE frames, skipping lag gaps.
fn outcome_stream(
    subscription: BroadcastStream<AnalysisOutcome>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    subscription.filter_map(|item| match item {
        Ok(outcome) => Some(Ok(Event::default().data(frame_payload(&outcome)))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Event stream subscriber lagged, messages lost");
            None
        }
    })
}

/// Render one outcome as a frame payload.
///
/// Embedded newlines are escaped to the literal two-character sequence
/// `\n` so the payload stays a single `data:` line for the browser to
/// unescape.
fn frame_payload(outcome: &AnalysisOutcome) -> String {
    match outcome {
        AnalysisOutcome::Completed { summary } => summary.replace('\n', "\\n"),
        AnalysisOutcome::Failed { .. } => ERROR_MARKER.to_string(),
    }
}
