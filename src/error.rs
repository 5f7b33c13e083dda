use thiserror::Error;

/// Closed set of failures the core can surface. None of these ever unwind
/// out of an entry point (`tick`/`receive`/`apply_mobility_and_energy`) —
/// each is either absorbed at the call site (logged, counted, frame
/// dropped) or drives a state transition.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed header or TLV body; the frame is unusable.
    #[error("codec error: {0}")]
    Codec(String),

    /// `update_time` was called with a timestamp earlier than the current
    /// simulation time. Fatal to the call that raised it — the caller is
    /// violating the monotonic-time contract.
    #[error("time regression: current={current} attempted={attempted}")]
    TimeRegression { current: f64, attempted: f64 },

    /// A provider-announcement or beacon referenced a provider/platoon
    /// entry that has already been pruned as stale.
    #[error("stale provider: {0}")]
    StaleProvider(String),

    /// No JOIN_ACCEPT arrived before JOIN_ACCEPT_TIMEOUT elapsed.
    #[error("accept timeout for session {0}")]
    AcceptTimeout(String),

    /// No ACK arrived before the session's deadline.
    #[error("ack timeout for session {0}")]
    AckTimeout(String),

    /// No ACKACK arrived before the session's deadline.
    #[error("ackack timeout for session {0}")]
    AckAckTimeout(String),

    /// The local role changed while a session was in flight; the session
    /// is cancelled rather than left in an inconsistent state.
    #[error("role switched during session {0}")]
    RoleSwitched(String),

    /// A provider/platoon has no remaining capacity for a new participant.
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// A platoon beacon was rejected as older than the last accepted one.
    #[error("stale beacon from {0}")]
    StaleBeacon(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
