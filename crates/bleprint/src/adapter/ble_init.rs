//! Start-up of the platform BLE stack.
//!
//! CoreBluetooth reports "central manager has invalid state (have=0)" for a
//! short while after process start, before the manager has powered on. Only
//! that case is retried, and only on macOS.

use std::future::Future;
use std::time::Duration;

use super::AdapterError;

const MAX_ATTEMPTS: usize = 6;
const ATTEMPT_DELAY: Duration = Duration::from_millis(500);

const INVALID_STATE: &str = "central manager has invalid state";

/// What an initialisation failure means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InitFailure {
    /// The manager has not finished powering on yet.
    NotReady,
    /// Bluetooth is off or the process lacks permission.
    Unavailable,
    Other,
}

pub(crate) fn classify(err: &AdapterError) -> InitFailure {
    let AdapterError::Init(msg) = err else {
        return InitFailure::Other;
    };
    let msg = msg.to_ascii_lowercase();
    if !msg.contains(INVALID_STATE) {
        InitFailure::Other
    } else if msg.contains("have=0") {
        InitFailure::NotReady
    } else {
        InitFailure::Unavailable
    }
}

/// Retry policy of the current platform.
pub(crate) fn retry_on_this_platform(err: &AdapterError) -> bool {
    cfg!(target_os = "macos") && classify(err) == InitFailure::NotReady
}

/// Run `init` until it succeeds, fails for good or runs out of attempts.
pub(crate) async fn init_with_retry<T, F, Fut>(
    mut init: F,
    retryable: impl Fn(&AdapterError) -> bool,
) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 1;
    loop {
        match init().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && retryable(&err) => {
                tracing::warn!(attempt, max = MAX_ATTEMPTS, error = %err, "BLE stack not ready, retrying");
                attempt += 1;
                tokio::time::sleep(ATTEMPT_DELAY).await;
            }
            Err(err) => return Err(with_hint(err)),
        }
    }
}

/// Attach a user-facing hint to errors caused by Bluetooth being off or
/// blocked on macOS.
fn with_hint(err: AdapterError) -> AdapterError {
    let blocked = cfg!(target_os = "macos")
        && matches!(classify(&err), InitFailure::NotReady | InitFailure::Unavailable);
    match err {
        AdapterError::Init(msg) if blocked => AdapterError::Init(format!(
            "{msg} (turn Bluetooth on and allow this app under System Settings > Privacy & Security > Bluetooth)"
        )),
        other => other,
    }
}
