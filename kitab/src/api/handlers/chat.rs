use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::{Stream, StreamExt};

use crate::api::dto::ChatRequest;
use crate::api::extractors::AppJson;
use crate::api::state::AppState;
use crate::chat::EventStream;
use crate::error::Result;
use crate::models::StreamEvent;

/// Terminal SSE payload after the last event.
pub const DONE_MARKER: &str = "[DONE]";

/// `POST /api/chat`
///
/// Streams the assistant's answer as server-sent events, one JSON
/// `StreamEvent` per `data:` line, terminated by `data: [DONE]`.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Server-sent event stream of chat events", content_type = "text/event-stream", body = String),
        (status = 400, description = "No user message in the request", body = crate::api::response::ApiError),
    )
)]
pub async fn chat(
    State(state): State<AppState>,
    AppJson(request): AppJson<ChatRequest>,
) -> Result<impl IntoResponse> {
    let history = request.to_history()?;

    tracing::info!(messages = history.len(), "Chat request accepted");

    let events = state.relay.stream(history);
    let max_duration = Duration::from_secs(state.config.server.max_duration_secs);

    Ok(Sse::new(sse_events(events, max_duration)).keep_alive(KeepAlive::default()))
}

/// Frame relay events as SSE, cutting the response off at `max_duration`.
fn sse_events(
    mut events: EventStream,
    max_duration: Duration,
) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    stream! {
        let deadline = tokio::time::sleep(max_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some(event) => yield Ok(to_sse(&event)),
                    None => break,
                },
                () = &mut deadline => {
                    tracing::warn!(max_duration_secs = max_duration.as_secs(), "Chat response exceeded maximum duration");
                    yield Ok(to_sse(&StreamEvent::error("The response took too long and was stopped.")));
                    break;
                }
            }
        }

        yield Ok(Event::default().data(DONE_MARKER));
    }
}

fn to_sse(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(error) => {
            tracing::error!(error = %error, "Failed to serialize stream event");
            Event::default().data(r#"{"type":"error","errorText":"An internal error occurred"}"#)
        }
    }
}
