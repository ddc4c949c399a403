use crate::core::error::{FetchError, FetchResult};
use crate::core::naming::ResourceName;
use bytes::{Bytes, BytesMut};
use std::marker::PhantomData;
use uuid::Uuid;

pub type FetchId = Uuid;

/// Hop ceiling observed for collection fetches.
pub const DEFAULT_HOP_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Object,
    Collection,
    Command,
}

impl FetchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchKind::Object => "object",
            FetchKind::Collection => "collection",
            FetchKind::Command => "command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "object" => Some(FetchKind::Object),
            "collection" => Some(FetchKind::Collection),
            "command" => Some(FetchKind::Command),
            _ => None,
        }
    }
}

/// Engine-level view of a fetch, as tracked per [`FetchId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-fetch state machine.
///
/// `Idle -> AwaitingResponse -> (Continuing -> AwaitingResponse)* -> Completed | Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    AwaitingResponse,
    Continuing,
    Completed,
    Failed,
}

impl FetchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, FetchPhase::Completed | FetchPhase::Failed)
    }

    pub fn can_transition(self, to: FetchPhase) -> bool {
        use FetchPhase::*;
        matches!(
            (self, to),
            (Idle, AwaitingResponse)
                | (Idle, Failed)
                | (AwaitingResponse, Continuing)
                | (AwaitingResponse, Completed)
                | (AwaitingResponse, Failed)
                | (Continuing, AwaitingResponse)
        )
    }

    /// Moves `self` to `to`, refusing anything the diagram above does not allow.
    pub fn advance(&mut self, to: FetchPhase) -> FetchResult<()> {
        if !self.can_transition(to) {
            return Err(FetchError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

/// Content delivered by a transport, under the responder's own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub name: ResourceName,
    pub payload: Bytes,
}

impl Response {
    pub fn new(name: ResourceName, payload: impl Into<Bytes>) -> Self {
        Self { name, payload: payload.into() }
    }
}

#[derive(Debug)]
pub struct SegmentFetchState {
    pub base_name: ResourceName,
    pub total_segments: u64,
    pub next_segment_index: u64,
    pub accumulated_payload: BytesMut,
}

impl SegmentFetchState {
    pub fn new(base_name: ResourceName, total_segments: u64) -> Self {
        Self {
            base_name,
            total_segments,
            next_segment_index: 0,
            accumulated_payload: BytesMut::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_segment_index == self.total_segments
    }
}

#[derive(Debug)]
pub struct CollectionFetchState<T> {
    pub items: Vec<T>,
    pub hop_count: u32,
    pub hop_limit: u32,
    pub cursor: Option<u64>,
}

impl<T> CollectionFetchState<T> {
    pub fn new(hop_limit: u32) -> Self {
        Self { items: Vec::new(), hop_count: 0, hop_limit, cursor: None }
    }

    pub fn can_hop(&self) -> bool {
        self.cursor.is_some() && self.hop_count < self.hop_limit
    }
}

/// Describes where a page keeps its records and its continuation cursor,
/// and what type the records decode into.
pub struct PageDescriptor<T> {
    pub items_field: &'static str,
    pub cursor_field: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> PageDescriptor<T> {
    pub const fn new(items_field: &'static str, cursor_field: &'static str) -> Self {
        Self { items_field, cursor_field, _record: PhantomData }
    }
}

impl<T> Clone for PageDescriptor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PageDescriptor<T> {}

impl<T> std::fmt::Debug for PageDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageDescriptor")
            .field("items_field", &self.items_field)
            .field("cursor_field", &self.cursor_field)
            .finish()
    }
}

/// How a collection fetch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEnd {
    /// The last page carried no cursor.
    Exhausted,
    /// The hop ceiling was hit while the server still advertised `next`.
    HopLimitReached { next: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    pub items: Vec<T>,
    pub end: PageEnd,
}

impl<T> Collection<T> {
    /// The cursor of the last page, unchanged: `None` means the server has
    /// nothing more.
    pub fn cursor(&self) -> Option<u64> {
        match self.end {
            PageEnd::Exhausted => None,
            PageEnd::HopLimitReached { next } => Some(next),
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.end, PageEnd::HopLimitReached { .. })
    }
}
