use taskloom_core::{ContextError, DispatchError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// The scheduler context could not be reached.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A pool thread failed to start or panicked.
    #[error(transparent)]
    Context(#[from] ContextError),
}
