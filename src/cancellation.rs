use crate::errors::{EnvToolError, Result};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Returns `Cancelled` if the token has already fired.
pub fn raise_if_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(EnvToolError::Cancelled);
    }
    Ok(())
}

/// Races an external call against the caller's cancellation token.
///
/// If the token fires first the call resolves to `Cancelled` and the inner
/// future is dropped without being polled again, so neither its eventual
/// value nor its error can surface. A token that is already cancelled wins
/// before the inner future is polled at all.
pub async fn with_cancellation<T, F>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(EnvToolError::Cancelled),
        res = fut => res,
    }
}
