//! Server-Sent Events stream of bus events

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// `*`, `<prefix>.*` or an exact event type
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

/// GET /events?pattern=<pattern>
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(pattern = %query.pattern, "Opening event stream");
    let subscription = state.event_bus.subscribe(&query.pattern);
    formflow_common::sse::subscription_sse_stream(state.event_bus.clone(), subscription)
}
