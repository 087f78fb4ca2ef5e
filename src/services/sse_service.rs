use std::{convert::Infallible, future, sync::Arc, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::{
    dao::{entity_store::EntityStore, storage::StorageResult},
    dto::sse::{QueueSnapshot, ServerEvent, SnapshotError, WaitingListSnapshot},
    services::subscription,
};

/// Identifies the live view behind an SSE connection for logging.
#[derive(Clone, Copy, Debug)]
pub enum StreamKind {
    /// Waiting identities of a branch.
    WaitingList,
    /// Queued and playing sessions of a branch.
    Queue,
}

impl StreamKind {
    fn event_name(self) -> &'static str {
        match self {
            StreamKind::WaitingList => "waiting_list",
            StreamKind::Queue => "queue",
        }
    }
}

/// Turn one snapshot result into an SSE payload; read failures become `error` events.
fn snapshot_event<T, P>(
    kind: StreamKind,
    branch_id: &str,
    snapshot: StorageResult<T>,
    to_payload: impl FnOnce(T) -> P,
) -> Option<ServerEvent>
where
    P: serde::Serialize,
{
    let result = match snapshot {
        Ok(items) => ServerEvent::json(kind.event_name().to_owned(), &to_payload(items)),
        Err(err) => {
            warn!(branch_id, stream = ?kind, error = %err, "live snapshot read failed");
            ServerEvent::json(
                "error".to_owned(),
                &SnapshotError {
                    message: err.to_string(),
                },
            )
        }
    };

    match result {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(branch_id, stream = ?kind, error = %err, "failed to serialise snapshot");
            None
        }
    }
}

/// Live waiting list of a branch as SSE payloads.
pub fn waiting_list_events(
    store: Arc<dyn EntityStore>,
    branch_id: String,
) -> impl Stream<Item = ServerEvent> + Send + 'static {
    subscription::waiting_list(store, branch_id.clone()).filter_map(move |snapshot| {
        let branch_id = branch_id.clone();
        future::ready(snapshot_event(
            StreamKind::WaitingList,
            &branch_id,
            snapshot,
            |users| WaitingListSnapshot {
                branch_id: branch_id.clone(),
                users: users.into_iter().map(Into::into).collect(),
            },
        ))
    })
}

/// Live queue of a branch as SSE payloads.
pub fn queue_events(
    store: Arc<dyn EntityStore>,
    branch_id: String,
) -> impl Stream<Item = ServerEvent> + Send + 'static {
    subscription::queue(store, branch_id.clone()).filter_map(move |snapshot| {
        let branch_id = branch_id.clone();
        future::ready(snapshot_event(
            StreamKind::Queue,
            &branch_id,
            snapshot,
            |sessions| QueueSnapshot {
                branch_id: branch_id.clone(),
                sessions: sessions.into_iter().map(Into::into).collect(),
            },
        ))
    })
}

/// Convert an event stream into an SSE response, forwarding events and
/// dropping the live query once the client disconnects.
pub fn to_sse_stream<S>(
    events: S,
    kind: StreamKind,
    branch_id: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = ServerEvent> + Send + 'static,
{
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: reads from the live query and pushes into mpsc
    tokio::spawn(async move {
        let mut events = Box::pin(events);
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = events.next() => {
                    let Some(payload) = next else { break };
                    let mut event = Event::default().data(payload.data);
                    if let Some(name) = payload.event {
                        event = event.event(name);
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        break;
                    }
                }
            }
        }

        info!(stream = ?kind, branch_id = %branch_id, "SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        entity_store::{DocumentKey, memory::InMemoryEntityStore},
        models::{PlayStyle, UserIdentity, UserStatus},
        storage::StorageError,
        transaction::WriteBatch,
    };

    #[tokio::test]
    async fn waiting_list_events_carry_the_branch_snapshot() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let mut user = UserIdentity::registered("ada".into(), "sisa".into(), 0, PlayStyle::Casual);
        user.status = UserStatus::Waiting;
        let mut batch = WriteBatch::new();
        batch.put_user(user.clone());
        batch.commit(store.as_ref()).await.unwrap();

        let mut events = Box::pin(waiting_list_events(store, "sisa".into()));
        let first = events.next().await.unwrap();
        assert_eq!(first.event.as_deref(), Some("waiting_list"));
        let payload: serde_json::Value = serde_json::from_str(&first.data).unwrap();
        assert_eq!(payload["branch_id"], "sisa");
        assert_eq!(payload["users"][0]["username"], "ada");
        assert_eq!(payload["users"][0]["status"], "waiting");
    }

    #[test]
    fn read_failures_become_error_events() {
        let snapshot: StorageResult<Vec<u8>> = Err(StorageError::MissingDocument {
            key: DocumentKey::QueueGuard("sisa".into()),
        });
        let event = snapshot_event(StreamKind::Queue, "sisa", snapshot, |items| items).unwrap();
        assert_eq!(event.event.as_deref(), Some("error"));
        assert!(event.data.contains("sisa"));
    }
}
