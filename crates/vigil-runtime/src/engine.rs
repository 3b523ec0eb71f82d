use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use vigil_client::{ApiClient, ClientError};
use vigil_schema::{EventRates, Insight, SentinelMessage, StreamEvent};
use vigil_stream::{AlertFeed, EventFeed, InsightFeed};

use crate::conn::SessionStatus;
use crate::poll::{PollChannel, PollHandle};
use crate::sse::{SseSession, SubscriptionHandle};

const INSIGHT_SNAPSHOT_LIMIT: usize = 50;

/// Drives the insight feed: one push session plus a REST snapshot on every
/// (re)start. The session is spawned before the snapshot fetch so that push
/// frames racing the refresh queue in the session channel and are re-applied
/// once the snapshot has landed, instead of being lost.
pub struct InsightEngine {
    api: ApiClient,
    feed: Arc<Mutex<InsightFeed>>,
    handle: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    status: Option<watch::Receiver<SessionStatus>>,
}

impl InsightEngine {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            feed: Arc::new(Mutex::new(InsightFeed::new())),
            handle: None,
            pump: None,
            status: None,
        }
    }

    pub fn feed(&self) -> Arc<Mutex<InsightFeed>> {
        Arc::clone(&self.feed)
    }

    pub fn status(&self) -> Option<watch::Receiver<SessionStatus>> {
        self.status.clone()
    }

    /// Tears down any previous session and brings up a fresh one. Returns
    /// the snapshot error, if any; the push session stays attached either
    /// way so live updates keep flowing.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        self.stop();
        let session = SseSession::connect(
            reqwest::Client::new(),
            self.api.url("/api/ai/sentinel/stream"),
        );
        let SseSession {
            mut frames,
            status,
            handle,
        } = session;
        self.status = Some(status);
        self.handle = Some(handle);

        let result = match self.api.insights(INSIGHT_SNAPSHOT_LIMIT).await {
            Ok(insights) => {
                self.feed.lock().await.apply_snapshot(insights);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "insight snapshot failed; push-only until refresh");
                Err(e)
            }
        };

        let feed = Arc::clone(&self.feed);
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match SentinelMessage::from_value(frame.data) {
                    Ok(SentinelMessage::Heartbeat) => {}
                    Ok(SentinelMessage::Insight(insight)) => {
                        feed.lock().await.admit(*insight);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable sentinel frame");
                    }
                }
            }
        }));
        result
    }

    /// Re-fetches the REST snapshot over the live session. The pump keeps
    /// admitting push insights while the fetch is in flight; any of those
    /// that the snapshot does not carry postdate its capture and are
    /// restored after the bulk replace instead of being dropped by it.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let before: HashSet<String> = {
            let feed = self.feed.lock().await;
            feed.insights().map(|i| i.id.clone()).collect()
        };

        let insights = self.api.insights(INSIGHT_SNAPSHOT_LIMIT).await?;
        let snapshot_ids: HashSet<String> =
            insights.iter().map(|i| i.id.clone()).collect();

        let mut feed = self.feed.lock().await;
        let live: Vec<Insight> = feed
            .insights()
            .filter(|i| !before.contains(&i.id) && !snapshot_ids.contains(&i.id))
            .cloned()
            .collect();
        feed.apply_snapshot(insights);
        for insight in live {
            feed.restore(insight);
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.status = None;
    }
}

impl Drop for InsightEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drives the alert feed off the shared polling channel. The first applied
/// payload primes the feed's badge baseline, so `start` fetches one snapshot
/// eagerly instead of waiting out the first interval.
pub struct AlertEngine {
    api: ApiClient,
    channel: Arc<PollChannel<Vec<vigil_schema::Alert>>>,
    feed: Arc<Mutex<AlertFeed>>,
    handle: Option<PollHandle<Vec<vigil_schema::Alert>>>,
    pump: Option<JoinHandle<()>>,
}

impl AlertEngine {
    pub fn new(api: ApiClient, interval: Duration) -> Self {
        let poll_api = api.clone();
        let channel = Arc::new(PollChannel::new(interval, move || {
            let api = poll_api.clone();
            async move { api.alerts().await }
        }));
        Self::with_channel(api, channel)
    }

    /// Attaches to an existing channel so several consumers share one timer.
    pub fn with_channel(api: ApiClient, channel: Arc<PollChannel<Vec<vigil_schema::Alert>>>) -> Self {
        Self {
            api,
            channel,
            feed: Arc::new(Mutex::new(AlertFeed::new())),
            handle: None,
            pump: None,
        }
    }

    pub fn feed(&self) -> Arc<Mutex<AlertFeed>> {
        Arc::clone(&self.feed)
    }

    pub fn channel(&self) -> Arc<PollChannel<Vec<vigil_schema::Alert>>> {
        Arc::clone(&self.channel)
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.channel.status()
    }

    pub async fn start(&mut self) -> Result<(), ClientError> {
        self.stop();
        let (handle, mut ticks) = self.channel.subscribe();
        self.handle = Some(handle);

        let result = match self.api.alerts().await {
            Ok(alerts) => {
                self.feed.lock().await.apply_snapshot(alerts);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial alert snapshot failed");
                Err(e)
            }
        };

        let feed = Arc::clone(&self.feed);
        self.pump = Some(tokio::spawn(async move {
            while let Some(alerts) = ticks.recv().await {
                feed.lock().await.apply_snapshot(alerts);
            }
        }));
        result
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        let alerts = self.api.alerts().await?;
        self.feed.lock().await.apply_snapshot(alerts);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl Drop for AlertEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Raw probe event tail plus the out-of-band rules-reload signal carried on
/// the same wire as a named frame.
pub struct EventEngine {
    api: ApiClient,
    feed: Arc<Mutex<EventFeed>>,
    rules_reload: watch::Sender<u64>,
    handle: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    status: Option<watch::Receiver<SessionStatus>>,
}

impl EventEngine {
    pub fn new(api: ApiClient) -> Self {
        let (rules_reload, _) = watch::channel(0);
        Self {
            api,
            feed: Arc::new(Mutex::new(EventFeed::new())),
            rules_reload,
            handle: None,
            pump: None,
            status: None,
        }
    }

    pub fn feed(&self) -> Arc<Mutex<EventFeed>> {
        Arc::clone(&self.feed)
    }

    /// Monotonic counter bumped whenever the server announces a rule-set
    /// change; watchers re-fetch the rules listing on each bump.
    pub fn rules_reload(&self) -> watch::Receiver<u64> {
        self.rules_reload.subscribe()
    }

    pub fn status(&self) -> Option<watch::Receiver<SessionStatus>> {
        self.status.clone()
    }

    pub fn start(&mut self) {
        self.stop();
        let session = SseSession::connect(reqwest::Client::new(), self.api.url("/api/stream"));
        let SseSession {
            mut frames,
            status,
            handle,
        } = session;
        self.status = Some(status);
        self.handle = Some(handle);

        let feed = Arc::clone(&self.feed);
        let rules_reload = self.rules_reload.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame.event.as_deref() == Some("rules:reload") {
                    rules_reload.send_modify(|n| *n += 1);
                    continue;
                }
                match serde_json::from_value::<StreamEvent>(frame.data) {
                    Ok(event) => feed.lock().await.push(event),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable probe event");
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.status = None;
    }
}

impl Drop for EventEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Latest-value throughput gauges. Only the newest sample matters, so this
/// publishes over a watch channel rather than buffering.
pub struct RateEngine {
    api: ApiClient,
    rates: watch::Sender<EventRates>,
    handle: Option<SubscriptionHandle>,
    pump: Option<JoinHandle<()>>,
    status: Option<watch::Receiver<SessionStatus>>,
}

impl RateEngine {
    pub fn new(api: ApiClient) -> Self {
        let (rates, _) = watch::channel(EventRates::default());
        Self {
            api,
            rates,
            handle: None,
            pump: None,
            status: None,
        }
    }

    pub fn rates(&self) -> watch::Receiver<EventRates> {
        self.rates.subscribe()
    }

    pub fn status(&self) -> Option<watch::Receiver<SessionStatus>> {
        self.status.clone()
    }

    pub fn start(&mut self) {
        self.stop();
        let session = SseSession::connect(reqwest::Client::new(), self.api.url("/api/events"));
        let SseSession {
            mut frames,
            status,
            handle,
        } = session;
        self.status = Some(status);
        self.handle = Some(handle);

        let rates = self.rates.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match serde_json::from_value::<EventRates>(frame.data) {
                    Ok(sample) => {
                        rates.send_replace(sample);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable rate sample");
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.release();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.status = None;
    }
}

impl Drop for RateEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
