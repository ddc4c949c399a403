use crate::core::error::{FetchError, FetchResult};
use crate::core::events::{EventSink, FetchEvent};
use crate::core::model::{FetchPhase, SegmentFetchState};
use crate::core::naming::ResourceName;
use crate::core::planner::{check_response, first_request, next_request};
use crate::plugins::registry::Transport;
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const TRACING_TARGET: &str = "segfetch::segments";

/// Retrieves an object published as `total_segments` segments under one base
/// name, one request at a time, and concatenates the payloads in order.
pub struct SegmentFetcher {
    transport: Arc<dyn Transport>,
    state: SegmentFetchState,
    phase: FetchPhase,
    events: EventSink,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<dyn Transport>, base_name: ResourceName, total_segments: u64) -> Self {
        Self {
            transport,
            state: SegmentFetchState::new(base_name, total_segments),
            phase: FetchPhase::Idle,
            events: EventSink::detached(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn phase(&self) -> FetchPhase {
        self.phase
    }

    pub fn state(&self) -> &SegmentFetchState {
        &self.state
    }

    /// Spawns the fetch; exactly one of the two callbacks runs.
    pub fn start<C, F>(self, on_complete: C, on_failure: F) -> JoinHandle<()>
    where
        C: FnOnce(Bytes) + Send + 'static,
        F: FnOnce(FetchError) + Send + 'static,
    {
        tokio::spawn(async move {
            match self.run().await {
                Ok(data) => on_complete(data),
                Err(e) => on_failure(e),
            }
        })
    }

    pub async fn run(mut self) -> FetchResult<Bytes> {
        self.fetch().await
    }

    /// Drives the fetch to a terminal phase. Once terminal, further calls
    /// fail without touching the transport.
    pub async fn fetch(&mut self) -> FetchResult<Bytes> {
        let result = self.drive().await;
        if result.is_err() && !self.phase.is_terminal() {
            self.phase = FetchPhase::Failed;
        }
        result
    }

    async fn drive(&mut self) -> FetchResult<Bytes> {
        if self.state.total_segments == 0 {
            self.phase.advance(FetchPhase::Failed)?;
            return Err(FetchError::NoSegments { name: self.state.base_name.clone() });
        }

        let mut request = first_request(&self.state.base_name, 0);
        loop {
            self.phase.advance(FetchPhase::AwaitingResponse)?;
            tracing::trace!(target: TRACING_TARGET, name = %request, "requesting segment");
            self.events.emit(|fetch_id| FetchEvent::RequestIssued { fetch_id, name: request.to_uri() });

            let response = match self.transport.express(&request).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(target: TRACING_TARGET, name = %request, error = %e, "segment request failed");
                    return Err(FetchError::from_transport(&request, e));
                }
            };

            let index = self.state.next_segment_index;
            check_response(&response.name, index)?;

            self.state.accumulated_payload.extend_from_slice(&response.payload);
            self.state.next_segment_index += 1;
            let total = self.state.total_segments;
            let bytes = response.payload.len() as u64;
            self.events.emit(|fetch_id| FetchEvent::SegmentReceived { fetch_id, index, total, bytes });

            if self.state.is_complete() {
                self.phase.advance(FetchPhase::Completed)?;
                let data = std::mem::take(&mut self.state.accumulated_payload).freeze();
                tracing::debug!(
                    target: TRACING_TARGET,
                    name = %self.state.base_name,
                    segments = total,
                    bytes = data.len(),
                    "object assembled"
                );
                return Ok(data);
            }

            self.phase.advance(FetchPhase::Continuing)?;
            request = next_request(&response.name, self.state.next_segment_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TransportError;
    use crate::plugins::memory::driver::MemoryTransport;
    use std::sync::Mutex;

    fn base() -> ResourceName {
        "/dev/chronoshare/file/abcd".parse().unwrap()
    }

    #[tokio::test]
    async fn concatenates_all_segments_in_order() {
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(base().add_segment(0), "hello ");
        transport.publish(base().add_segment(1), "segmented ");
        transport.publish(base().add_segment(2), "world");

        let mut fetcher = SegmentFetcher::new(transport.clone(), base(), 3);
        let data = fetcher.fetch().await.unwrap();

        assert_eq!(&data[..], b"hello segmented world");
        assert_eq!(fetcher.phase(), FetchPhase::Completed);
        assert_eq!(fetcher.state().next_segment_index, 3);
        assert_eq!(
            transport.requests(),
            vec![base().add_segment(0), base().add_segment(1), base().add_segment(2)]
        );
    }

    #[tokio::test]
    async fn timeout_fails_fast_without_further_requests() {
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(base().add_segment(0), "a");
        transport.fail(base().add_segment(1), TransportError::Timeout);
        transport.publish(base().add_segment(2), "c");

        let mut fetcher = SegmentFetcher::new(transport.clone(), base(), 3);
        let err = fetcher.fetch().await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.name(), Some(&base().add_segment(1)));
        assert_eq!(fetcher.phase(), FetchPhase::Failed);
        assert_eq!(transport.requests().len(), 2);

        // inert once terminal
        assert!(fetcher.fetch().await.is_err());
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn zero_segments_fails_without_a_request() {
        let transport = Arc::new(MemoryTransport::new());
        let err = SegmentFetcher::new(transport.clone(), base(), 0).run().await.unwrap_err();
        assert!(matches!(err, FetchError::NoSegments { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn follows_the_name_the_responder_used() {
        let hint: ResourceName = "/hint".parse().unwrap();
        let hinted_base = hint.join(&base());
        let transport = Arc::new(MemoryTransport::new().strip_prefix(hint));
        transport.publish(base().add_segment(0), "x");
        transport.publish(base().add_segment(1), "y");

        let data = SegmentFetcher::new(transport.clone(), hinted_base.clone(), 2).run().await.unwrap();

        assert_eq!(&data[..], b"xy");
        assert_eq!(transport.requests(), vec![hinted_base.add_segment(0), base().add_segment(1)]);
    }

    #[tokio::test]
    async fn rejects_a_response_for_the_wrong_segment() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond_as(base().add_segment(0), base().add_segment(4), "x");

        let err = SegmentFetcher::new(transport, base(), 2).run().await.unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedSegment { expected: 0, got: 4, .. }));
    }

    #[tokio::test]
    async fn rejects_a_response_named_without_a_segment() {
        let transport = Arc::new(MemoryTransport::new());
        transport.respond_as(base().add_segment(0), base(), "x");
        transport.publish(base().without_last_component().add_segment(1), "wrong object");

        let mut fetcher = SegmentFetcher::new(transport.clone(), base(), 2);
        let err = fetcher.fetch().await.unwrap_err();

        assert!(matches!(err, FetchError::Decode { ref name, .. } if *name == base()));
        assert_eq!(fetcher.phase(), FetchPhase::Failed);
        assert_eq!(transport.requests(), vec![base().add_segment(0)]);
    }

    #[tokio::test]
    async fn start_invokes_exactly_one_callback() {
        let transport = Arc::new(MemoryTransport::new());
        transport.publish(base().add_segment(0), "only");

        let calls = Arc::new(Mutex::new(Vec::new()));
        let (ok, bad) = (calls.clone(), calls.clone());
        SegmentFetcher::new(transport, base(), 1)
            .start(
                move |data| ok.lock().unwrap().push(format!("complete:{}", String::from_utf8_lossy(&data))),
                move |e| bad.lock().unwrap().push(format!("failure:{e}")),
            )
            .await
            .unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["complete:only".to_string()]);
    }
}
