use thiserror::Error;

/// Errors raised while applying an event to the store.
///
/// Most store failures are transient (logged, observation dropped, pipeline
/// continues); `InvariantViolation` is the one hard error in the pipeline —
/// it means a group-ordering guarantee was broken upstream.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A beacon-origin SSID event reached the store before its MAC row
    /// existed. This can only happen if event-group ordering was violated.
    #[error("invariant violation: beacon SSID for {mac:012X} inserted before its MAC row")]
    InvariantViolation { mac: u64 },
}

/// Errors raised while classifying/sampling/enqueueing a captured frame.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("frame queue for class {0:?} is full, frame dropped")]
    QueueFull(crate::frame::FrameClass),
}
