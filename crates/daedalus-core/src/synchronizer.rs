//! Waiting on signals from straight-line code.
//!
//! [`synchronize`] suspends the current task until a [`Signal`] is settled,
//! then resets the signal and returns the value. The waiter is woken by the
//! signal's [`Notify`](tokio::sync::Notify) rather than polling.
//!
//! There is no timeout: a producer that never settles the signal suspends the
//! waiter indefinitely.

use crate::signal::Signal;

/// Waits until `signal` is settled, resets it, and returns the settled value.
///
/// # Example
///
/// ```
/// use daedalus_core::{synchronize, Signal};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let signal = Arc::new(Signal::new());
/// let producer = signal.clone();
/// tokio::spawn(async move { producer.settle("ready").unwrap() });
///
/// assert_eq!(synchronize(&signal).await, "ready");
/// assert!(signal.is_pending());
/// # });
/// ```
pub async fn synchronize<T>(signal: &Signal<T>) -> T {
    loop {
        let notified = signal.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the slot so a settle that lands
        // between the check and the await still wakes us.
        notified.as_mut().enable();

        if let Some(value) = signal.reset() {
            return value;
        }

        tracing::trace!("waiting for signal");
        notified.await;
    }
}
