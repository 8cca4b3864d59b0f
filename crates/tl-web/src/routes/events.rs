use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tl_core::{Listener, NEW_MESSAGE_EVENT};
use tl_types::NewMessageNotification;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::auth::{require_group_member, CurrentMember};
use crate::error::ApiResult;
use crate::state::AppState;

/// Signals buffered per client before new ones are dropped.
const CLIENT_QUEUE_CAPACITY: usize = 16;

/// Listener that feeds a bounded queue. Signals only trigger a re-read, so
/// a full queue drops the new one.
fn queue_listener(capacity: usize) -> (Listener, mpsc::Receiver<NewMessageNotification>) {
    let (tx, rx) = mpsc::channel::<NewMessageNotification>(capacity);
    let listener: Listener = Arc::new(move |notification: &NewMessageNotification| {
        match tx.try_send(notification.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(group = %notification.group_id, "Event client lagging, dropping signal");
            }
            // Client is gone; dropping the stream releases the subscription.
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    });
    (listener, rx)
}

pub async fn group_events(
    State(state): State<AppState>,
    CurrentMember(member): CurrentMember,
    Path(group_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    require_group_member(&state, &member, &group_id).await?;

    let (listener, mut rx) = queue_listener(CLIENT_QUEUE_CAPACITY);
    let subscription = state.services.hub.subscribe(&group_id, listener)?;
    debug!(group = %group_id, member = %member.id, "Event stream opened");

    let stream = async_stream::stream! {
        let _subscription = subscription;
        while let Some(notification) = rx.recv().await {
            match serde_json::to_string(&notification) {
                Ok(data) => yield Ok(Event::default().event(NEW_MESSAGE_EVENT).data(data)),
                Err(e) => debug!(error = %e, "Skipping unencodable notification"),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
