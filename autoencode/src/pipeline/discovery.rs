//! Periodic discovery loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::domain::Discovery;
use crate::services::DiscoverySource;

/// Polls every source on a fixed interval and hands each discovery to a
/// submit callback.
pub struct DiscoveryLoop {
    sources: Vec<Arc<dyn DiscoverySource>>,
    interval: Duration,
}

impl DiscoveryLoop {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>, interval: Duration) -> Self {
        Self { sources, interval }
    }

    /// Poll all sources once. Returns how many items were submitted.
    ///
    /// A failing source or submission is logged and skipped.
    pub async fn poll_once<F>(&self, submit: &F) -> usize
    where
        F: Fn(Discovery) -> Result<()>,
    {
        let mut submitted = 0;
        for source in &self.sources {
            let found = match source.poll().await {
                Ok(found) => found,
                Err(e) => {
                    warn!(source = %source.name(), error = %e, "Discovery poll failed");
                    continue;
                }
            };
            for discovery in found {
                let name = discovery.display_name.clone();
                match submit(discovery) {
                    Ok(()) => submitted += 1,
                    Err(e) => warn!(source = %source.name(), item = %name, error = %e, "Submit failed"),
                }
            }
        }
        if submitted > 0 {
            info!(submitted, "Discovery round finished");
        }
        submitted
    }

    /// Sleep, poll, repeat until `cancel` fires.
    pub async fn run<F>(self, cancel: CancellationToken, submit: F)
    where
        F: Fn(Discovery) -> Result<()> + Send + Sync,
    {
        info!(
            sources = self.sources.len(),
            interval_secs = self.interval.as_secs(),
            "Discovery loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.poll_once(&submit).await;
        }
        debug!("Discovery loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSource {
        items: parking_lot::Mutex<Vec<Discovery>>,
        fail: bool,
    }

    #[async_trait]
    impl DiscoverySource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn poll(&self) -> Result<Vec<Discovery>> {
            if self.fail {
                return Err(crate::Error::other("feed unavailable"));
            }
            Ok(std::mem::take(&mut *self.items.lock()))
        }
    }

    fn source(names: &[&str], fail: bool) -> Arc<dyn DiscoverySource> {
        Arc::new(FixedSource {
            items: parking_lot::Mutex::new(
                names
                    .iter()
                    .map(|n| Discovery::new(*n, format!("file:///{n}")))
                    .collect(),
            ),
            fail,
        })
    }

    #[tokio::test]
    async fn test_poll_once_skips_failing_sources() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let discovery = DiscoveryLoop::new(
            vec![source(&["a", "b"], false), source(&[], true), source(&["c"], false)],
            Duration::from_secs(60),
        );

        let submitted = discovery
            .poll_once(&|d: Discovery| {
                seen.lock().push(d.display_name);
                Ok(())
            })
            .await;

        assert_eq!(submitted, 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_run_polls_after_interval_until_cancelled() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let discovery = DiscoveryLoop::new(vec![source(&["a"], false)], Duration::from_millis(20));
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let seen = seen.clone();
            let cancel = cancel.clone();
            async move {
                discovery
                    .run(cancel, move |d| {
                        seen.lock().push(d.display_name);
                        Ok(())
                    })
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(*seen.lock(), vec!["a"]);
    }
}
