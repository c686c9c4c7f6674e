//! Shutdown signalling
//!
//! A `watch` channel carrying `true` once the process is stopping. The
//! consumer loop and the bulk persister's retry wait both listen to it.

use tokio::sync::watch;

/// Create a shutdown channel in the running state
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Whether shutdown has been requested
pub fn is_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolve once shutdown is requested.
///
/// Never resolves if the sender is dropped without requesting shutdown.
pub async fn requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_requested_resolves_after_send() {
        let (tx, mut rx) = channel();
        assert!(!is_requested(&rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), requested(&mut rx))
            .await
            .unwrap();
        assert!(is_requested(&rx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_never_resolves() {
        let (tx, mut rx) = channel();
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(5), requested(&mut rx)).await;
        assert!(result.is_err());
    }
}
