use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::fetchers::{fetch_classified, FetchResult, PageFetcher};
use crate::monitors::fingerprint::fingerprint;
use crate::monitors::state::{MonitorState, Observation};
use crate::notifiers::{NotificationDispatcher, NotificationEvent, Publisher};
use crate::utils::{local_timestamp, preview};

/// Lifecycle of a monitoring run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    Terminating,
    Stopped,
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The configured number of changes was observed
    MaxChangesReached,
    /// An unexpected error, with its diagnostic
    Fatal(String),
    /// Stopped from outside, e.g. Ctrl-C
    Cancelled,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub reason: StopReason,
    /// Changes observed
    pub changes: u32,
    /// Cycles executed after the initial fetch
    pub cycles: u64,
}

/// Watches one region of one page and reports its changes
///
/// Each cycle fetches the region, compares its fingerprint with the last one,
/// sends the due notifications and pauses for the poll interval. The run ends
/// after `max_changes` changes, on the first unexpected error, or when the
/// cancellation token fires.
pub struct RegionMonitor<F, P> {
    config: MonitorConfig,
    fetcher: F,
    dispatcher: NotificationDispatcher<P>,
    cancel: CancellationToken,
    phase: Phase,
    cycles: u64,
}

impl<F: PageFetcher, P: Publisher> RegionMonitor<F, P> {
    pub fn new(config: MonitorConfig, fetcher: F, publisher: P, cancel: CancellationToken) -> Self {
        let dispatcher =
            NotificationDispatcher::new(publisher, &config.change_channel, &config.health_channel);
        Self {
            config,
            fetcher,
            dispatcher,
            cancel,
            phase: Phase::Initializing,
            cycles: 0,
        }
    }

    /// Run until a terminal condition
    ///
    /// Fails only when the initial fetch fails, in which case no notification
    /// is sent at all.
    pub async fn run(mut self) -> Result<RunReport> {
        let mut state = match self.initialize().await {
            Ok(state) => state,
            Err(e) => {
                self.release().await;
                return Err(e);
            }
        };

        self.enter(Phase::Running);
        let started = NotificationEvent::Started(self.config.url.clone());
        let reason = match self.notify(started).await {
            Some(reason) => reason,
            None => self.run_cycles(&mut state).await,
        };

        self.enter(Phase::Terminating);
        self.release().await;
        let stopped = NotificationEvent::Stopped(self.config.url.clone());
        if let Err(e) = self.dispatcher.dispatch(&stopped).await {
            warn!("Failed to send notification {:?}: {}", stopped, e);
        }
        self.enter(Phase::Stopped);

        info!(
            "End of monitoring {}: {:?} after {} cycles and {} changes",
            self.config.url,
            reason,
            self.cycles,
            state.change_count()
        );

        Ok(RunReport {
            reason,
            changes: state.change_count(),
            cycles: self.cycles,
        })
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Monitor phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// First fetch, establishes the fingerprint later checks compare against
    async fn initialize(&mut self) -> Result<MonitorState> {
        info!("Fetching initial content of {}", self.config.url);

        let result = fetch_classified(
            &mut self.fetcher,
            &self.config.url,
            &self.config.selector,
            self.config.fetch_timeout(),
        )
        .await;

        match result {
            FetchResult::Success(text) => {
                let initial = fingerprint(&text);
                info!("Initial fingerprint of {}: {}", self.config.selector, initial);
                debug!("Initial region text: {}", preview(&text, 80));
                Ok(MonitorState::new(initial))
            }
            FetchResult::NotFound => Err(anyhow!(
                "Cannot find `{}` on {}",
                self.config.selector,
                self.config.url
            )),
            FetchResult::Timeout => Err(anyhow!(
                "Timed out after {}s while fetching {}",
                self.config.fetch_timeout_secs,
                self.config.url
            )),
            FetchResult::UnexpectedError(detail) => Err(anyhow!(
                "Initial fetch of {} failed: {}",
                self.config.url,
                detail
            )),
        }
    }

    async fn run_cycles(&mut self, state: &mut MonitorState) -> StopReason {
        loop {
            if self.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }

            self.cycles += 1;
            let stop = self.run_cycle(state).await;

            // Every cycle pauses, the fatal one included, so fetches stay spaced out
            let interrupted = !self.pause().await;

            if let Some(reason) = stop {
                return reason;
            }
            if state.change_count() >= self.config.max_changes {
                return StopReason::MaxChangesReached;
            }
            if interrupted {
                return StopReason::Cancelled;
            }
        }
    }

    /// One fetch-classify-decide-notify step, `Some` when the run must end
    async fn run_cycle(&mut self, state: &mut MonitorState) -> Option<StopReason> {
        let result = fetch_classified(
            &mut self.fetcher,
            &self.config.url,
            &self.config.selector,
            self.config.fetch_timeout(),
        )
        .await;

        match result {
            FetchResult::Success(text) => {
                let current = fingerprint(&text);
                match state.observe(current, self.config.health_report_every) {
                    Observation::Changed => {
                        info!(
                            "The page has changed ({}/{}), new fingerprint {:?}",
                            state.change_count(),
                            self.config.max_changes,
                            state.last_fingerprint()
                        );
                        debug!("Region text: {}", preview(&text, 80));
                        let message = format!(
                            "The page has been changed at {}. Go check: {}",
                            local_timestamp(),
                            self.config.url
                        );
                        self.notify(NotificationEvent::Changed(message)).await
                    }
                    Observation::Unchanged => {
                        info!("No change, continue monitoring");
                        debug!(
                            "{} checks without change since the last status report",
                            state.cycles_since_health_report()
                        );
                        None
                    }
                    Observation::HealthReportDue => {
                        info!("No change, reporting status");
                        let message = format!(
                            "Status: no change in the last {} checks of {}. Keep monitoring",
                            self.config.health_report_every, self.config.url
                        );
                        self.notify(NotificationEvent::HealthOk(message)).await
                    }
                }
            }
            FetchResult::NotFound => {
                warn!("Cannot find {}, keep monitoring", self.config.selector);
                None
            }
            FetchResult::Timeout => {
                warn!("Timed out while waiting on {}, keep monitoring", self.config.selector);
                None
            }
            FetchResult::UnexpectedError(detail) => {
                self.notify(NotificationEvent::FatalError(detail)).await
            }
        }
    }

    /// Sleep for the poll interval, false when cancelled meanwhile
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.poll_interval()) => true,
        }
    }

    /// Publish an event, `Some` when the run must end
    ///
    /// A `FatalError` always ends the run. A delivery failure is logged, and
    /// when `fail_on_publish_error` is set it is reported as a fatal error.
    async fn notify(&self, mut event: NotificationEvent) -> Option<StopReason> {
        let mut stop = None;
        loop {
            if let NotificationEvent::FatalError(detail) = &event {
                error!("Unexpected error occurred: {}", detail);
                stop = Some(StopReason::Fatal(detail.clone()));
            }

            let Err(e) = self.dispatcher.dispatch(&event).await else {
                return stop;
            };
            warn!("Failed to send notification {:?}: {}", event, e);
            if stop.is_some() || !self.config.fail_on_publish_error {
                return stop;
            }
            event = NotificationEvent::FatalError(format!("Failed to send notification: {}", e));
        }
    }

    async fn release(&mut self) {
        if let Err(e) = self.fetcher.close().await {
            warn!("Failed to release page fetcher: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchers::FetchError;
    use crate::notifiers::testing::RecordingPublisher;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const URL: &str = "https://example.com/news";

    /// Fetcher replaying a fixed sequence of outcomes
    struct ScriptedFetcher {
        script: VecDeque<Result<String, FetchError>>,
        calls: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Result<String, FetchError>>) -> Self {
            Self {
                script: script.into(),
                calls: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for ScriptedFetcher {
        async fn fetch_region_text(
            &mut self,
            _url: &str,
            _selector: &str,
            _timeout: Duration,
        ) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("script exhausted").into()))
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn text(s: &str) -> Result<String, FetchError> {
        Ok(s.to_string())
    }

    fn config(health_report_every: u32, max_changes: u32) -> MonitorConfig {
        MonitorConfig {
            url: URL.to_string(),
            selector: ".portlet".to_string(),
            change_channel: "changes".to_string(),
            health_channel: "health".to_string(),
            health_report_every,
            max_changes,
            ..MonitorConfig::default()
        }
    }

    fn monitor(
        config: MonitorConfig,
        fetcher: ScriptedFetcher,
        publisher: RecordingPublisher,
    ) -> RegionMonitor<ScriptedFetcher, RecordingPublisher> {
        RegionMonitor::new(config, fetcher, publisher, CancellationToken::new())
    }

    fn channels(sent: &[(String, String)]) -> Vec<&str> {
        sent.iter().map(|(channel, _)| channel.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn change_after_unchanged_cycle() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("A"), text("B")]);
        let closed = fetcher.closed.clone();

        let report = monitor(config(5, 1), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(
            report,
            RunReport {
                reason: StopReason::MaxChangesReached,
                changes: 1,
                cycles: 2,
            }
        );
        let sent = publisher.sent();
        assert_eq!(channels(&sent), vec!["health", "changes", "health", "health"]);
        assert_eq!(sent[0].1, format!("Start monitoring {}", URL));
        assert!(sent[1].1.contains(&format!("Go check: {}", URL)));
        assert_eq!(sent[1].1, sent[2].1);
        assert_eq!(sent[3].1, format!("Monitor for {} has stopped", URL));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn health_report_after_threshold() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("A"), text("A"), text("B")]);

        let report = monitor(config(2, 1), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.cycles, 3);
        let sent = publisher.sent();
        assert_eq!(
            channels(&sent),
            vec!["health", "health", "changes", "health", "health"]
        );
        assert!(sent[1].1.starts_with("Status: no change in the last 2 checks"));
    }

    #[tokio::test(start_paused = true)]
    async fn change_does_not_advance_health_counter() {
        let publisher = RecordingPublisher::default();
        // unchanged (1), change, unchanged (2 -> report), change
        let fetcher = ScriptedFetcher::new(vec![
            text("A"),
            text("A"),
            text("B"),
            text("B"),
            text("C"),
        ]);

        let report = monitor(config(2, 2), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.changes, 2);
        assert_eq!(report.cycles, 4);
        let sent = publisher.sent();
        assert_eq!(
            channels(&sent),
            vec!["health", "changes", "health", "health", "changes", "health", "health"]
        );
        assert!(sent[3].1.starts_with("Status:"));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_failures_keep_monitoring() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![
            text("A"),
            Err(FetchError::RegionNotFound(".portlet".to_string())),
            Err(FetchError::Timeout(Duration::from_secs(10))),
            text("A"),
            text("B"),
        ]);
        let calls = fetcher.calls.clone();

        let report = monitor(config(5, 1), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::MaxChangesReached);
        assert_eq!(report.changes, 1);
        assert_eq!(report.cycles, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(publisher.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_error_stops_after_pause() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![
            text("A"),
            Err(anyhow!("connection reset").into()),
            text("B"),
        ]);
        let calls = fetcher.calls.clone();
        let closed = fetcher.closed.clone();
        let start = tokio::time::Instant::now();

        let report = monitor(config(5, 3), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::Fatal("connection reset".to_string()));
        assert_eq!(report.changes, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(closed.load(Ordering::SeqCst));

        let sent = publisher.sent();
        assert_eq!(channels(&sent), vec!["health", "health", "health"]);
        assert_eq!(sent[1].1, "connection reset");
        assert_eq!(sent[2].1, format!("Monitor for {} has stopped", URL));
    }

    #[tokio::test(start_paused = true)]
    async fn cycles_are_spaced_by_poll_interval() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("A"), text("A"), text("B")]);
        let start = tokio::time::Instant::now();

        monitor(config(5, 1), fetcher, publisher).run().await.unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(3 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn initial_fetch_failure_fails_startup() {
        let publisher = RecordingPublisher::default();
        let fetcher =
            ScriptedFetcher::new(vec![Err(FetchError::RegionNotFound(".portlet".to_string()))]);
        let closed = fetcher.closed.clone();

        let err = monitor(config(5, 1), fetcher, publisher.clone())
            .run()
            .await
            .unwrap_err();

        assert!(err.to_string().contains(".portlet"));
        assert!(publisher.sent().is_empty());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_is_recoverable_by_default() {
        let publisher = RecordingPublisher::failing_on("changes");
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("B"), text("C")]);

        let report = monitor(config(5, 2), fetcher, publisher.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::MaxChangesReached);
        assert_eq!(report.changes, 2);
        // The health echo still goes out
        assert_eq!(
            channels(&publisher.sent()),
            vec!["health", "changes", "health", "changes", "health", "health"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_can_be_fatal() {
        let publisher = RecordingPublisher::failing_on("changes");
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("A"), text("B"), text("C")]);
        let mut config = config(5, 3);
        config.fail_on_publish_error = true;

        let report = monitor(config, fetcher, publisher.clone()).run().await.unwrap();

        assert!(matches!(
            &report.reason,
            StopReason::Fatal(detail) if detail.contains("Failed to send notification")
        ));
        assert_eq!(report.changes, 1);
        assert_eq!(report.cycles, 2);
        let sent = publisher.sent();
        assert_eq!(
            channels(&sent),
            vec!["health", "changes", "health", "health", "health"]
        );
        assert!(sent[3].1.starts_with("Failed to send notification"));
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_fatal_notice_is_sent_once() {
        let publisher = RecordingPublisher::failing_on("health");
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("B")]);
        let mut config = config(5, 1);
        config.fail_on_publish_error = true;

        let report = monitor(config, fetcher, publisher.clone()).run().await.unwrap();

        assert!(matches!(
            &report.reason,
            StopReason::Fatal(detail) if detail.starts_with("Failed to send notification")
        ));
        assert_eq!(report.cycles, 0);
        // Started, the fatal notice about it, Stopped
        let sent = publisher.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[1].1.starts_with("Failed to send notification"));
        assert_eq!(sent[2].1, format!("Monitor for {} has stopped", URL));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_cycle() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![text("A")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = RegionMonitor::new(config(5, 1), fetcher, publisher.clone(), cancel)
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::Cancelled);
        assert_eq!(report.cycles, 0);
        assert_eq!(channels(&publisher.sent()), vec!["health", "health"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_pause() {
        let publisher = RecordingPublisher::default();
        let fetcher = ScriptedFetcher::new(vec![text("A"), text("A"), text("A"), text("A")]);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            trigger.cancel();
        });

        let report = RegionMonitor::new(config(5, 1), fetcher, publisher.clone(), cancel)
            .run()
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::Cancelled);
        assert_eq!(report.cycles, 2);
        assert_eq!(
            publisher.sent().last().map(|(_, m)| m.clone()),
            Some(format!("Monitor for {} has stopped", URL))
        );
    }
}
