//! Background lease renewal for one run.

use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle};

use crate::lease::ProfileRegistry;

/// Handle to a running heartbeat task. Always [`stop`](Self::stop) it.
#[derive(Debug)]
pub struct Heartbeat {
    stop: watch::Sender<bool>,
    lost: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Renew immediately, then every `interval`, until stopped or ownership is lost.
    pub fn spawn(
        registry: ProfileRegistry,
        profile_id: i64,
        run_id: i64,
        lease_seconds: i64,
        interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (lost_tx, lost_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            loop {
                match registry.heartbeat(profile_id, run_id, lease_seconds).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(profile_id, run_id, "profile lease heartbeat lost");
                        lost_tx.send_replace(true);
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(profile_id, run_id, error = %err, "heartbeat write failed");
                    }
                }
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            return;
                        }
                    }
                    () = tokio::time::sleep(interval) => {}
                }
            }
        });

        Self {
            stop: stop_tx,
            lost: lost_rx,
            task,
        }
    }

    /// Whether a renewal found the lease owned by someone else.
    #[must_use]
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// A receiver that flips to `true` when the lease is lost.
    #[must_use]
    pub fn lost_signal(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }

    /// Signal, abort, and join the task.
    pub async fn stop(self) {
        self.stop.send_replace(true);
        self.task.abort();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                tracing::warn!(error = %err, "heartbeat task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::test_support::memory_store, Result};

    #[tokio::test]
    async fn test_loss_is_published() -> Result<()> {
        let store = memory_store().await?;
        let registry = ProfileRegistry::new(store.pool().clone());
        assert!(registry.acquire(4, 1, "profile-4", 100, 120).await?);
        registry.force_release(4).await?;
        assert!(registry.acquire(4, 2, "profile-4", 100, 120).await?);

        let heartbeat = Heartbeat::spawn(registry, 4, 1, 120, Duration::from_millis(10));
        for _ in 0..100 {
            if heartbeat.is_lost() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(heartbeat.is_lost());
        heartbeat.stop().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_owner_keeps_lease_and_stop_joins() -> Result<()> {
        let store = memory_store().await?;
        let registry = ProfileRegistry::new(store.pool().clone());
        assert!(registry.acquire(6, 9, "profile-6", 100, 120).await?);

        let heartbeat = Heartbeat::spawn(registry.clone(), 6, 9, 120, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!heartbeat.is_lost());
        heartbeat.stop().await;

        let state = registry.get_state(6).await?;
        assert_eq!(state.owner_run_id, Some(9));
        assert!(state.locked);
        Ok(())
    }
}
