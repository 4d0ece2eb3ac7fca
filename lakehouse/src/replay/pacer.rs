use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// Suspends the replay between batches.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, duration: Duration);
}

/// Sender half of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cheap to clone; every clone observes the same cancellation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled. Pends forever if the handle is dropped
    /// without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Wall-clock pauses on the tokio timer, cut short on cancellation.
#[derive(Debug, Clone)]
pub struct TokioPacer {
    cancel: CancelToken,
}

impl TokioPacer {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }
}

impl Default for TokioPacer {
    fn default() -> Self {
        Self::new(CancelToken::never())
    }
}

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_cancel_is_observed_by_clones() {
        let (handle, token) = cancellation();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        handle.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_never_token_stays_live() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());

        let waited = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_cancel_cuts_pause_short() {
        let (handle, token) = cancellation();
        let pacer = TokioPacer::new(token);

        let started = Instant::now();
        let pause = tokio::spawn(async move { pacer.pause(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        pause.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
