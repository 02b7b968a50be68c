use fleetctl_types::ActionResult;

/// The engine's single error type. Every collaborator trait (persistence,
/// lock, dispatcher, policy gate) and every operation handler returns one
/// of these variants rather than an ad hoc string, so `execute` can derive
/// its `(result, reason)` pair mechanically via [`EngineError::result`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to acquire cluster lock for {0}")]
    LockFailed(String),

    #[error("pre-action policy check failed: {0}")]
    PolicyPreFail(String),

    #[error("post-action policy check failed: {0}")]
    PolicyPostFail(String),

    #[error("policy of this type is already attached: {0}")]
    PolicyTypeConflict(String),

    #[error("policy_id was not specified")]
    PolicyNotSpecified,

    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    #[error("a dependency action failed: {0}")]
    SubActionFailure(String),

    #[error("action was cancelled")]
    Cancelled,

    #[error("action timed out")]
    TimedOut,

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("action kind is not supported: {0}")]
    ActionNotSupported(String),

    #[error("optimistic update conflict on {0}")]
    Conflict(String),
}

impl EngineError {
    /// Maps an error kind to the coarse [`ActionResult`] the entry point
    /// hands back to callers. `Cancelled`/`TimedOut` get their own result
    /// variants; everything else surfaces as a generic `Error`.
    pub fn result(&self) -> ActionResult {
        match self {
            EngineError::Cancelled => ActionResult::Cancel,
            EngineError::TimedOut => ActionResult::Timeout,
            _ => ActionResult::Error,
        }
    }
}
