use std::{future::Future, time::Duration};

use tokio::sync::mpsc;

/// Collapses a burst of progress callbacks into a bounded-rate sequence.
///
/// Timer-reset coalescing: every `observe` call restarts the window, and the
/// wrapped emitter only fires once the window elapses with no newer call,
/// carrying the latest observed value. Dropping the debouncer flushes the
/// pending value, so a final 100% is never lost. All emissions happen on one
/// task, so an older percentage never lands after a newer one.
pub struct ProgressDebouncer {
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressDebouncer {
    pub fn spawn<F, Fut>(window: Duration, emit: F) -> Self
    where
        F: Fn(u8) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut latest = first;
                loop {
                    match tokio::time::timeout(window, rx.recv()).await {
                        Ok(Some(next)) => latest = next,
                        Ok(None) => {
                            emit(latest).await;
                            return;
                        }
                        Err(_) => {
                            emit(latest).await;
                            break;
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn observe(&self, percent: u8) {
        let _ = self.tx.send(percent);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn burst_collapses_to_single_latest_emission() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&emitted);
        let debouncer = ProgressDebouncer::spawn(Duration::from_millis(100), move |pct| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(pct);
            }
        });

        debouncer.observe(10);
        tokio::time::sleep(Duration::from_millis(25)).await;
        debouncer.observe(40);
        tokio::time::sleep(Duration::from_millis(25)).await;
        debouncer.observe(90);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(*emitted.lock().await, vec![90]);
    }

    #[tokio::test]
    async fn quiescent_windows_emit_separately_in_order() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&emitted);
        let debouncer = ProgressDebouncer::spawn(Duration::from_millis(50), move |pct| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(pct);
            }
        });

        debouncer.observe(30);
        tokio::time::sleep(Duration::from_millis(250)).await;
        debouncer.observe(100);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(*emitted.lock().await, vec![30, 100]);
    }

    #[tokio::test]
    async fn drop_flushes_pending_value() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&emitted);
        let debouncer = ProgressDebouncer::spawn(Duration::from_secs(60), move |pct| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(pct);
            }
        });

        debouncer.observe(100);
        drop(debouncer);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*emitted.lock().await, vec![100]);
    }
}
