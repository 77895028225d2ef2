use tokio_util::sync::CancellationToken;

/// Process-wide cooperative shutdown handle. Checked at every reader block
/// boundary, emitter post, checkpoint wait and chunk-allocation wait.
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    hard: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a graceful stop: the parser finishes the current record and
    /// flushes a final checkpoint.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Request an immediate stop: no final checkpoint is written.
    pub fn request_hard(&self) {
        self.hard.store(true, std::sync::atomic::Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_hard(&self) -> bool {
        self.hard.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Await cancellation from async tasks.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_visible_to_clones() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        assert!(!observer.is_requested());

        shutdown.request();
        assert!(observer.is_requested());
        assert!(!observer.is_hard());
    }

    #[test]
    fn test_hard_shutdown() {
        let shutdown = Shutdown::new();
        shutdown.request_hard();
        assert!(shutdown.is_requested());
        assert!(shutdown.is_hard());
    }
}
