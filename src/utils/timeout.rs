//! Async timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default deadline for outbound connects
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a session may spend waiting for the handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a fallible future with a deadline; an elapsed deadline becomes
/// [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
