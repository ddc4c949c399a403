use crate::core::error::{FetchError, FetchResult};
use crate::core::events::{EventSink, FetchEvent};
use crate::core::model::{
    Collection, CollectionFetchState, FetchPhase, PageDescriptor, PageEnd, DEFAULT_HOP_LIMIT,
};
use crate::core::naming::ResourceName;
use crate::core::planner::{check_response, first_request, next_request};
use crate::plugins::registry::Transport;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const TRACING_TARGET: &str = "segfetch::pages";

/// Merges a collection delivered as linked JSON pages. Each page names the
/// segment of the next one; at most `hop_limit` such links are followed.
pub struct PagedCollectionFetcher<T> {
    transport: Arc<dyn Transport>,
    base_name: ResourceName,
    start_offset: u64,
    descriptor: PageDescriptor<T>,
    state: CollectionFetchState<T>,
    phase: FetchPhase,
    events: EventSink,
}

impl<T> PagedCollectionFetcher<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new(
        transport: Arc<dyn Transport>,
        base_name: ResourceName,
        start_offset: u64,
        descriptor: PageDescriptor<T>,
    ) -> Self {
        Self {
            transport,
            base_name,
            start_offset,
            descriptor,
            state: CollectionFetchState::new(DEFAULT_HOP_LIMIT),
            phase: FetchPhase::Idle,
            events: EventSink::detached(),
        }
    }

    pub fn with_hop_limit(mut self, hop_limit: u32) -> Self {
        self.state.hop_limit = hop_limit;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn hop_count(&self) -> u32 {
        self.state.hop_count
    }

    /// Spawns the fetch; exactly one of the two callbacks runs. Items
    /// collected before a failure are dropped.
    pub fn start<P, F>(self, on_page: P, on_failure: F) -> JoinHandle<()>
    where
        P: FnOnce(Collection<T>) + Send + 'static,
        F: FnOnce(FetchError) + Send + 'static,
    {
        tokio::spawn(async move {
            match self.run().await {
                Ok(collection) => on_page(collection),
                Err(e) => on_failure(e),
            }
        })
    }

    pub async fn run(mut self) -> FetchResult<Collection<T>> {
        self.fetch().await
    }

    pub async fn fetch(&mut self) -> FetchResult<Collection<T>> {
        let result = self.drive().await;
        if result.is_err() {
            self.state.items.clear();
            if !self.phase.is_terminal() {
                self.phase = FetchPhase::Failed;
            }
        }
        result
    }

    async fn drive(&mut self) -> FetchResult<Collection<T>> {
        let mut segment = self.start_offset;
        let mut request = first_request(&self.base_name, segment);
        loop {
            self.phase.advance(FetchPhase::AwaitingResponse)?;
            tracing::trace!(target: TRACING_TARGET, name = %request, hop = self.state.hop_count, "requesting page");
            self.events.emit(|fetch_id| FetchEvent::RequestIssued { fetch_id, name: request.to_uri() });

            let response = self
                .transport
                .express(&request)
                .await
                .map_err(|e| FetchError::from_transport(&request, e))?;
            check_response(&response.name, segment)?;

            let (items, cursor) = decode_page(&response.name, &response.payload, &self.descriptor)?;
            let received = items.len();
            self.state.items.extend(items);
            self.state.cursor = cursor;

            let hop = self.state.hop_count;
            self.events.emit(|fetch_id| FetchEvent::PageReceived { fetch_id, hop, items: received, more: cursor });

            match cursor {
                Some(next) if self.state.can_hop() => {
                    self.state.hop_count += 1;
                    self.phase.advance(FetchPhase::Continuing)?;
                    segment = next;
                    request = next_request(&response.name, next);
                }
                _ => {
                    self.phase.advance(FetchPhase::Completed)?;
                    let end = match cursor {
                        None => PageEnd::Exhausted,
                        Some(next) => {
                            tracing::warn!(
                                target: TRACING_TARGET,
                                name = %self.base_name,
                                hops = self.state.hop_count,
                                next,
                                "hop limit reached, collection truncated"
                            );
                            PageEnd::HopLimitReached { next }
                        }
                    };
                    let items = std::mem::take(&mut self.state.items);
                    tracing::debug!(target: TRACING_TARGET, name = %self.base_name, items = items.len(), "collection assembled");
                    return Ok(Collection { items, end });
                }
            }
        }
    }
}

/// Splits one page into its records and the optional next-segment cursor.
/// The cursor may be a JSON integer or a decimal string; `null` counts as absent.
pub fn decode_page<T: DeserializeOwned>(
    name: &ResourceName,
    payload: &[u8],
    descriptor: &PageDescriptor<T>,
) -> FetchResult<(Vec<T>, Option<u64>)> {
    let page: Value = serde_json::from_slice(payload).map_err(|e| FetchError::decode(name, e))?;
    let Value::Object(mut fields) = page else {
        return Err(FetchError::decode(name, "page is not a JSON object"));
    };

    let items = match fields.remove(descriptor.items_field) {
        Some(Value::Array(values)) => values,
        Some(_) => {
            return Err(FetchError::decode(name, format!("field {:?} is not an array", descriptor.items_field)))
        }
        None => return Err(FetchError::decode(name, format!("field {:?} is missing", descriptor.items_field))),
    };
    let items = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| FetchError::decode(name, e))?;

    let cursor = match fields.remove(descriptor.cursor_field) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(
            n.as_u64()
                .ok_or_else(|| FetchError::decode(name, format!("cursor {n} is not a segment number")))?,
        ),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<u64>()
                .map_err(|_| FetchError::decode(name, format!("cursor {s:?} is not a segment number")))?,
        ),
        Some(other) => return Err(FetchError::decode(name, format!("cursor {other} is not a segment number"))),
    };

    Ok((items, cursor))
}
