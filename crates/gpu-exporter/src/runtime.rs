//! Tokio runtime used by the binary.

use std::future::Future;
use std::time::Duration;

/// How long exit waits for blocking scans that are still stuck in a native call.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Drives `future` to completion, then shuts the runtime down without waiting
/// longer than `grace` for blocking tasks that have not returned.
pub fn block_on<F: Future>(future: F, grace: Duration) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}
