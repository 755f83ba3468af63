//! Error taxonomy shared by every component.
//!
//! Business-rule violations are ordinary typed results and are never retried.
//! Only `TransientStoreError` and `OutcomeUnknown` invite a caller-level retry.

use thiserror::Error;

use crate::types::{ItemId, OperationKind, WorkerId};

/// Errors surfaced by the occupation and lifecycle subsystem.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("item {item_id} not found")]
    NotFound { item_id: ItemId },

    #[error("item {item_id} is occupied by {owner_label} (worker {owner_id})")]
    AlreadyOccupied {
        item_id: ItemId,
        /// The operation that was requested, when the caller knew it.
        operation: Option<OperationKind>,
        owner_id: WorkerId,
        owner_label: String,
    },

    #[error("worker {worker_id} does not hold {operation} on item {item_id}")]
    NotAuthorized {
        item_id: ItemId,
        operation: OperationKind,
        worker_id: WorkerId,
        /// The worker currently holding the item, when known.
        holder: Option<WorkerId>,
    },

    #[error("cannot {event} {operation} on item {item_id} from state {from}")]
    InvalidTransition {
        item_id: ItemId,
        operation: OperationKind,
        from: String,
        event: String,
    },

    #[error("{operation} on item {item_id} is not available: {reason}")]
    PrerequisitesNotSatisfied {
        item_id: ItemId,
        operation: OperationKind,
        reason: String,
    },

    #[error("{operation} on item {item_id} is already {state}")]
    AlreadyCompleted {
        item_id: ItemId,
        operation: OperationKind,
        state: String,
    },

    #[error("item {item_id} is blocked after {cycle} consecutive rejections")]
    Blocked { item_id: ItemId, cycle: u8 },

    #[error("lock on item {item_id} has expired")]
    LockExpired { item_id: ItemId },

    #[error("transient store error on item {item_id}: {reason}")]
    TransientStoreError { item_id: ItemId, reason: String },

    #[error("store unavailable for item {item_id}: {reason}")]
    StoreUnavailable { item_id: ItemId, reason: String },

    #[error("{operation} on item {item_id} did not finish within {timeout_ms}ms; outcome unknown")]
    OutcomeUnknown {
        item_id: ItemId,
        operation: OperationKind,
        timeout_ms: u64,
    },
}

impl Error {
    /// Whether a caller may retry the same request.
    ///
    /// `OutcomeUnknown` is retryable because every lifecycle action is
    /// idempotent for the worker that already holds the item.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientStoreError { .. } | Self::OutcomeUnknown { .. }
        )
    }

    /// Stable machine-readable name of the variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyOccupied { .. } => "already_occupied",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::PrerequisitesNotSatisfied { .. } => "prerequisites_not_satisfied",
            Self::AlreadyCompleted { .. } => "already_completed",
            Self::Blocked { .. } => "blocked",
            Self::LockExpired { .. } => "lock_expired",
            Self::TransientStoreError { .. } => "transient_store_error",
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::OutcomeUnknown { .. } => "outcome_unknown",
        }
    }

    /// The item the error refers to.
    #[must_use]
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::NotFound { item_id }
            | Self::AlreadyOccupied { item_id, .. }
            | Self::NotAuthorized { item_id, .. }
            | Self::InvalidTransition { item_id, .. }
            | Self::PrerequisitesNotSatisfied { item_id, .. }
            | Self::AlreadyCompleted { item_id, .. }
            | Self::Blocked { item_id, .. }
            | Self::LockExpired { item_id }
            | Self::TransientStoreError { item_id, .. }
            | Self::StoreUnavailable { item_id, .. }
            | Self::OutcomeUnknown { item_id, .. } => item_id,
        }
    }

    /// Names `operation` on an occupancy error raised below the lifecycle
    /// layer. Every other variant is returned unchanged.
    #[must_use]
    pub fn with_operation(self, operation: OperationKind) -> Self {
        match self {
            Self::AlreadyOccupied {
                item_id,
                operation: None,
                owner_id,
                owner_label,
            } => Self::AlreadyOccupied {
                item_id,
                operation: Some(operation),
                owner_id,
                owner_label,
            },
            other => other,
        }
    }

    /// Lifts a port failure into the taxonomy for `item_id`.
    #[must_use]
    pub fn from_store(item_id: &ItemId, err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound {
                item_id: item_id.clone(),
            },
            StoreError::Transient(reason) => Self::TransientStoreError {
                item_id: item_id.clone(),
                reason,
            },
            StoreError::Unavailable(reason) => Self::StoreUnavailable {
                item_id: item_id.clone(),
                reason,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by an external store (lock store or item repository).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Connectivity hiccup; the same call may succeed if repeated.
    #[error("transient: {0}")]
    Transient(String),

    /// The store cannot be reached at all.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
