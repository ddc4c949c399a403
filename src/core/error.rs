use crate::core::model::FetchPhase;
use crate::core::naming::ResourceName;

/// Outcome of a single request that produced no content.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no response before the transport deadline")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

/// Why a fetch ended without a result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request {name} timed out")]
    Timeout { name: ResourceName },

    #[error("request {name} failed: {reason}")]
    Transport { name: ResourceName, reason: String },

    #[error("cannot decode response {name}: {reason}")]
    Decode { name: ResourceName, reason: String },

    /// An object fetch was asked for zero segments; there is no segment 0.
    #[error("object {name} has no segments")]
    NoSegments { name: ResourceName },

    #[error("response {name} carries segment {got}, expected {expected}")]
    UnexpectedSegment { name: ResourceName, expected: u64, got: u64 },

    /// A command answered with something other than the success sentinel.
    /// The payload is kept verbatim.
    #[error("command {name} refused: {payload}")]
    Refused { name: ResourceName, payload: String },

    #[error("invalid fetch transition {from:?} -> {to:?}")]
    InvalidTransition { from: FetchPhase, to: FetchPhase },
}

impl FetchError {
    pub fn from_transport(name: &ResourceName, err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout { name: name.clone() },
            TransportError::Failed(reason) => Self::Transport { name: name.clone(), reason },
        }
    }

    pub fn decode(name: &ResourceName, reason: impl std::fmt::Display) -> Self {
        Self::Decode { name: name.clone(), reason: reason.to_string() }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The request the failure happened on, when there was one.
    pub fn name(&self) -> Option<&ResourceName> {
        match self {
            Self::Timeout { name }
            | Self::Transport { name, .. }
            | Self::Decode { name, .. }
            | Self::NoSegments { name }
            | Self::UnexpectedSegment { name, .. }
            | Self::Refused { name, .. } => Some(name),
            Self::InvalidTransition { .. } => None,
        }
    }
}

pub type FetchResult<T> = std::result::Result<T, FetchError>;
