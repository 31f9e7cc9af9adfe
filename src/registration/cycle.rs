use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

/// Runs `handler` immediately, then again `interval` after each invocation returns,
/// until `shutdown` fires (or its sender is dropped).
///
/// The timer is re-armed after the handler completes, so a slow handler stretches
/// the period instead of compressing the next one. Shutdown is only observed between
/// invocations; an in-flight handler always runs to completion.
pub async fn cycle_task<F, Fut>(interval: Duration, mut handler: F, mut shutdown: oneshot::Receiver<()>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    handler().await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => handler().await,
            _ = &mut shutdown => return,
        }
    }
}
