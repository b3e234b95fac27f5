//! Server-Sent Events (SSE) utilities
//!
//! Forwards an [`EventBus`](crate::events::EventBus) subscription to a
//! browser, one bus event per SSE message, in publish order.

use crate::events::{EventBus, Subscription};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Removes the subscription from the bus when the client goes away
struct SubscriptionGuard {
    bus: EventBus,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Create an SSE stream for a bus subscription
///
/// The SSE `event:` name is the bus event type; `data:` is the JSON event.
///
/// # Example
/// ```rust,ignore
/// pub async fn event_stream(
///     State(state): State<AppState>,
///     Query(q): Query<EventsQuery>,
/// ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
///     let subscription = state.event_bus.subscribe(&q.pattern);
///     formflow_common::sse::subscription_sse_stream(state.event_bus.clone(), subscription)
/// }
/// ```
pub fn subscription_sse_stream(
    bus: EventBus,
    mut subscription: Subscription,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    info!(
        "New SSE client connected (pattern {})",
        subscription.pattern()
    );
    let guard = SubscriptionGuard {
        bus,
        id: subscription.id(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok(SseEvent::default()
            .event("ConnectionStatus")
            .data("connected"));

        while let Some(event) = subscription.recv().await {
            let event_type = event.type_name();
            match SseEvent::default().event(event_type.as_str()).json_data(&event) {
                Ok(sse_event) => {
                    debug!("SSE: Forwarding event {}", event_type);
                    yield Ok(sse_event);
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }

        debug!("SSE: subscription closed, ending stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
