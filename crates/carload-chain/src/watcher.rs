//! Subscription loop: backfill then poll, filter, dispatch.

use std::time::Duration;

use tokio::sync::watch;

use carload_events::AllocationSender;
use carload_telemetry::Metrics;

use crate::decode;
use crate::rpc::{LogClient, RawLog};
use crate::ChainResult;

/// Watcher tuning derived from the processor configuration.
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Storage provider whose allocations are forwarded.
    pub provider_id: u64,
    /// Historical block to backfill from; `None` skips backfill.
    pub start_block: Option<u64>,
    /// Cadence of the live poll loop.
    pub poll_interval: Duration,
    /// Maximum block span per backfill log query.
    pub backfill_chunk: u64,
}

/// Polls the chain for allocation logs and feeds matching events downstream.
pub struct AllocationWatcher<C> {
    client: C,
    settings: WatcherSettings,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
}

impl<C: LogClient> AllocationWatcher<C> {
    /// Create a watcher over `client`, stopping when `shutdown` flips to
    /// `true`.
    #[must_use]
    pub const fn new(
        client: C,
        settings: WatcherSettings,
        metrics: Metrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            settings,
            metrics,
            shutdown,
        }
    }

    /// Run the subscription until shutdown or until the consumer goes away.
    ///
    /// The initial head query doubles as the startup connectivity probe:
    /// failure here is fatal. Backfill (when configured) replays history in
    /// ascending chunks before the first live poll, so historical events
    /// always precede live ones on the feed. Poll failures after startup are
    /// logged and retried on the next tick without advancing the cursor.
    ///
    /// # Errors
    ///
    /// Returns an error when the endpoint cannot be reached at startup or a
    /// backfill query fails.
    pub async fn run(self, sender: AllocationSender) -> ChainResult<()> {
        let head = self.client.latest_block().await?;
        tracing::info!(head, "chain session established");
        let mut last_seen = head;

        if let Some(start) = self.settings.start_block
            && start <= head
            && !self.backfill(start, head, &sender).await?
        {
            return Ok(());
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            if *self.shutdown.borrow() {
                tracing::info!("watcher stopping");
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(self.settings.poll_interval) => {
                    if !self.poll(&mut last_seen, &sender).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Replay history in ascending chunks. Returns `false` when the consumer
    /// has gone away.
    async fn backfill(&self, start: u64, head: u64, sender: &AllocationSender) -> ChainResult<bool> {
        tracing::info!(start, head, "backfilling historical allocations");
        let mut from = start;
        while from <= head {
            let to = from
                .saturating_add(self.settings.backfill_chunk.saturating_sub(1))
                .min(head);
            for log in self.client.logs(from, to).await? {
                if !self.dispatch(log, true, sender).await {
                    return Ok(false);
                }
            }
            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        Ok(true)
    }

    /// One live poll tick. Returns `false` when the consumer has gone away.
    async fn poll(&self, last_seen: &mut u64, sender: &AllocationSender) -> bool {
        let head = match self.client.latest_block().await {
            Ok(head) => head,
            Err(error) => {
                tracing::warn!(%error, "head query failed, retrying next tick");
                return true;
            }
        };
        if head <= *last_seen {
            return true;
        }
        let from = *last_seen + 1;
        let logs = match self.client.logs(from, head).await {
            Ok(logs) => logs,
            Err(error) => {
                tracing::warn!(from, to = head, %error, "log query failed, retrying next tick");
                return true;
            }
        };
        for log in logs {
            if !self.dispatch(log, false, sender).await {
                return false;
            }
        }
        *last_seen = head;
        true
    }

    /// Filter and decode one log, forwarding matches. Returns `false` when
    /// the consumer has gone away.
    async fn dispatch(&self, log: RawLog, past: bool, sender: &AllocationSender) -> bool {
        if log.removed {
            tracing::debug!("reorged log dropped");
            self.metrics.inc_event("filtered");
            return true;
        }
        // Absent provider topic means the log is not addressed to anyone we
        // can compare against; treat it as non-matching, not as an error.
        let Some(provider) = decode::provider_of(&log) else {
            tracing::debug!("log without readable provider dropped");
            self.metrics.inc_event("filtered");
            return true;
        };
        if provider != self.settings.provider_id {
            tracing::debug!(provider, "allocation for another provider dropped");
            self.metrics.inc_event("filtered");
            return true;
        }
        match decode::decode_log(&log) {
            Ok(mut event) => {
                event.is_past_event = past;
                self.metrics.inc_event("matched");
                sender.send(event).await
            }
            Err(error) => {
                tracing::warn!(%error, "malformed allocation log dropped");
                self.metrics.inc_event("malformed");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use carload_events::feed;

    struct FakeClient {
        head: u64,
        by_range: HashMap<(u64, u64), Vec<RawLog>>,
        queried: Arc<Mutex<Vec<(u64, u64)>>>,
    }

    impl FakeClient {
        fn new(head: u64) -> Self {
            Self {
                head,
                by_range: HashMap::new(),
                queried: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn with_logs(mut self, from: u64, to: u64, logs: Vec<RawLog>) -> Self {
            self.by_range.insert((from, to), logs);
            self
        }
    }

    #[async_trait]
    impl LogClient for FakeClient {
        async fn latest_block(&self) -> ChainResult<u64> {
            Ok(self.head)
        }

        async fn logs(&self, from: u64, to: u64) -> ChainResult<Vec<RawLog>> {
            self.queried
                .lock()
                .expect("no poisoned lock in tests")
                .push((from, to));
            Ok(self.by_range.get(&(from, to)).cloned().unwrap_or_default())
        }
    }

    fn word_u64(value: u64) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        word
    }

    fn topic_u64(value: u64) -> String {
        format!("0x{}", hex::encode(word_u64(value)))
    }

    fn log_for(allocation_id: u64, provider: u64) -> RawLog {
        let mut data = Vec::new();
        // head: payload offset, size, term_min, term_max, expiration,
        // url offset
        data.extend_from_slice(&word_u64(6 * 32));
        data.extend_from_slice(&word_u64(2_048));
        data.extend_from_slice(&word_u64(1));
        data.extend_from_slice(&word_u64(2));
        data.extend_from_slice(&word_u64(3));
        data.extend_from_slice(&word_u64(6 * 32 + 64));
        // bytes tail: 1-byte payload
        data.extend_from_slice(&word_u64(1));
        let mut payload = [0u8; 32];
        payload[0] = 0x01;
        data.extend_from_slice(&payload);
        // string tail: 1-byte url
        data.extend_from_slice(&word_u64(1));
        let mut url = [0u8; 32];
        url[0] = b'u';
        data.extend_from_slice(&url);

        RawLog {
            topics: vec![
                decode::allocation_created_topic().to_string(),
                topic_u64(0xaa),
                topic_u64(allocation_id),
                topic_u64(provider),
            ],
            data: format!("0x{}", hex::encode(data)),
            block_number: Some("0x64".to_string()),
            transaction_hash: None,
            removed: false,
        }
    }

    fn settings(provider_id: u64, start_block: Option<u64>) -> WatcherSettings {
        WatcherSettings {
            provider_id,
            start_block,
            poll_interval: Duration::from_millis(5),
            backfill_chunk: 100,
        }
    }

    async fn run_until_shutdown(
        client: FakeClient,
        settings: WatcherSettings,
    ) -> anyhow::Result<Vec<carload_events::AllocationEvent>> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (sender, mut stream) = feed(32);
        let watcher = AllocationWatcher::new(client, settings, Metrics::new()?, shutdown_rx);
        let task = tokio::spawn(watcher.run(sender));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true)?;
        task.await??;

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        Ok(events)
    }

    #[tokio::test]
    async fn backfill_precedes_live_events_in_ascending_order() -> anyhow::Result<()> {
        let client = FakeClient::new(250)
            .with_logs(0, 99, vec![log_for(1, 7)])
            .with_logs(100, 199, vec![log_for(2, 7)])
            .with_logs(200, 250, vec![log_for(3, 7)]);

        let events = run_until_shutdown(client, settings(7, Some(0))).await?;

        let ids: Vec<u64> = events.iter().map(|event| event.allocation_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(events.iter().all(|event| event.is_past_event));
        Ok(())
    }

    #[tokio::test]
    async fn live_poll_tags_events_as_current() -> anyhow::Result<()> {
        let (sender, mut stream) = feed(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = AllocationWatcher::new(
            FakeClient::new(250),
            settings(7, None),
            Metrics::new()?,
            shutdown_rx,
        );

        assert!(watcher.dispatch(log_for(5, 7), false, &sender).await);
        drop(sender);

        let event = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("event expected"))?;
        assert_eq!(event.allocation_id, 5);
        assert!(!event.is_past_event);
        Ok(())
    }

    #[tokio::test]
    async fn other_providers_are_filtered_out() -> anyhow::Result<()> {
        let client = FakeClient::new(50).with_logs(0, 50, vec![log_for(1, 7), log_for(2, 9)]);

        let events = run_until_shutdown(client, settings(7, Some(0))).await?;

        let ids: Vec<u64> = events.iter().map(|event| event.allocation_id).collect();
        assert_eq!(ids, vec![1]);
        Ok(())
    }

    #[tokio::test]
    async fn provider_zero_matches_when_configured() -> anyhow::Result<()> {
        let client = FakeClient::new(50).with_logs(0, 50, vec![log_for(1, 0)]);

        let events = run_until_shutdown(client, settings(0, Some(0))).await?;

        assert_eq!(events.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_log_is_dropped_without_stopping_the_stream() -> anyhow::Result<()> {
        let mut broken = log_for(1, 7);
        broken.data = "0x00".to_string();
        let client = FakeClient::new(50).with_logs(0, 50, vec![broken, log_for(2, 7)]);

        let events = run_until_shutdown(client, settings(7, Some(0))).await?;

        let ids: Vec<u64> = events.iter().map(|event| event.allocation_id).collect();
        assert_eq!(ids, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_provider_topic_is_non_matching() -> anyhow::Result<()> {
        let mut short = log_for(1, 7);
        short.topics.truncate(3);
        let client = FakeClient::new(50).with_logs(0, 50, vec![short, log_for(2, 7)]);

        let events = run_until_shutdown(client, settings(7, Some(0))).await?;

        let ids: Vec<u64> = events.iter().map(|event| event.allocation_id).collect();
        assert_eq!(ids, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn reorged_logs_are_dropped() -> anyhow::Result<()> {
        let mut removed = log_for(1, 7);
        removed.removed = true;
        let client = FakeClient::new(50).with_logs(0, 50, vec![removed, log_for(2, 7)]);

        let events = run_until_shutdown(client, settings(7, Some(0))).await?;

        let ids: Vec<u64> = events.iter().map(|event| event.allocation_id).collect();
        assert_eq!(ids, vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn backfill_queries_ascending_chunks() -> anyhow::Result<()> {
        let client = FakeClient::new(250);
        let queried = Arc::clone(&client.queried);

        run_until_shutdown(client, settings(7, Some(0))).await?;

        let recorded = queried.lock().expect("no poisoned lock in tests").clone();
        assert!(recorded.starts_with(&[(0, 99), (100, 199), (200, 250)]));
        Ok(())
    }
}
