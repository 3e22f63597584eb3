use ulid::Ulid;

/// Failures of store-level operations on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(Ulid),
    /// A live reservation already holds the requested slot.
    Conflict(Ulid),
    DuplicateReference(String),
    InvalidInput(String),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict(id) => write!(f, "slot held by reservation: {id}"),
            EngineError::DuplicateReference(code) => {
                write!(f, "reference code already issued: {code}")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Why a commit or reschedule did not happen. Always one of three cases so
/// the caller can branch without inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingFailure {
    /// Draft or target rejected; surface as a form validation error, never retry.
    InvalidDraft(String),
    /// Lost the slot to another booking or a new block; recompute and let the user pick again.
    SlotNoLongerAvailable,
    /// Transient store failure; the caller may retry with backoff.
    StoreUnavailable(String),
}

impl BookingFailure {
    pub fn label(&self) -> &'static str {
        match self {
            BookingFailure::InvalidDraft(_) => "invalid_draft",
            BookingFailure::SlotNoLongerAvailable => "slot_no_longer_available",
            BookingFailure::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl std::fmt::Display for BookingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingFailure::InvalidDraft(msg) => write!(f, "invalid booking: {msg}"),
            BookingFailure::SlotNoLongerAvailable => {
                write!(f, "the selected slot is no longer available")
            }
            BookingFailure::StoreUnavailable(msg) => write!(f, "reservation store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for BookingFailure {}
