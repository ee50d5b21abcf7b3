//! Watcher lifecycle and push-stream handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use tokio_stream::wrappers::IntervalStream;
use tracing::info;

use crate::error::ApiError;
use crate::handlers::OkResponse;
use crate::routes::AppState;

/// Start the account's watcher without subscribing
///
/// POST /mailbox/accounts/:id/watch/start
pub async fn watch_start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    let (record, secret) = state.accounts.get(&id).await?;
    state.hub.start(&record.id, secret.imap);
    Ok(Json(OkResponse::ok()))
}

/// Stop the account's watcher; a no-op when none is running
///
/// POST /mailbox/accounts/:id/watch/stop
pub async fn watch_stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.hub.stop(&id);
    info!("watch stop requested for account {}", id);
    Ok(Json(OkResponse::ok()))
}

/// Attach a push stream to the account's watcher
///
/// GET /mailbox/accounts/:id/stream
///
/// The subscriber sees its ready frame first, then every event the
/// watcher publishes while the stream stays open, with ping frames in
/// between so intermediaries do not time the stream out. The stream ends
/// when the watcher is torn down; closing the stream detaches the
/// subscriber.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (record, secret) = state.accounts.get(&id).await?;
    let subscription = state.hub.attach(&record.id, secret.imap);

    let events = subscription
        .map(|payload| Some(Event::default().data(payload.as_str())))
        .chain(stream::once(async { None }));

    let interval = tokio::time::interval_at(
        tokio::time::Instant::now() + state.heartbeat,
        state.heartbeat,
    );
    let pings =
        IntervalStream::new(interval).map(|_| Some(Event::default().event("ping").data("{}")));

    // The ping stream never ends on its own; the terminator from the event
    // side closes the merged stream once the watcher is gone.
    let merged = stream::select(events, pings)
        .take_while(|item| futures::future::ready(item.is_some()))
        .filter_map(|item| futures::future::ready(item.map(Ok::<_, Infallible>)));

    Ok(Sse::new(merged))
}
