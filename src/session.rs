//! Monitoring session: the explicit context that ties ingest, history,
//! detectors, the issue log and alert delivery together.
//!
//! A session is created stopped. [`MonitorSession::start`] activates it and
//! spawns two background threads: the communication-gap watchdog and the
//! alert dispatcher. [`MonitorSession::stop`] cancels and joins both; once it
//! returns no further issue is raised.

use crate::alert::{AlertDispatcher, AlertQueue, ReportSink};
use crate::audit::{create_shared_audit, AuditStats, SharedAuditLog};
use crate::config::Config;
use crate::core::aggregator::{Disposition, IssueAggregator};
use crate::core::detectors::{check_retention, DetectionWindow, Detector, Trigger};
use crate::core::history::{saturating_sub, RollingHistory};
use crate::core::issue::{CriticalIssue, IssueCandidate, TimeWindow};
use crate::core::report::{ReportGenerator, WellBeingReport};
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::{Modality, Observation, RawObservation};
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{bounded, select, tick, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Last-activity bookkeeping, kept apart from history so eviction cannot
/// make a quiet crew look silent for longer than they were.
///
/// Two clocks are tracked. Observation timestamps come from the producers;
/// arrival times are the local wall clock when an observation was ingested.
/// Producer clocks may lag or lead the local one.
#[derive(Debug, Default)]
struct Activity {
    /// Session start on the observation clock
    started_at: Option<DateTime<Utc>>,
    /// Session start on the wall clock
    started_wall: Option<DateTime<Utc>>,
    /// Newest observation timestamp of any modality
    last_seen: Option<DateTime<Utc>>,
    /// Wall-clock arrival of the newest ingested observation
    last_arrival: Option<DateTime<Utc>>,
    /// Per modality: arrival minus observation timestamp at the latest ingest
    lag: [Option<Duration>; 3],
}

/// The clock a gap check runs on.
#[derive(Debug, Clone, Copy)]
enum TickClock {
    /// Same clock as the observation timestamps (replays, explicit polls)
    Observed(DateTime<Utc>),
    /// Local wall clock (the watchdog)
    Wall(DateTime<Utc>),
}

/// State shared with the watchdog and alert threads.
struct SessionCore {
    id: Uuid,
    config: Config,
    detectors: Vec<Detector>,
    max_lookback: Duration,
    history: RwLock<RollingHistory>,
    aggregator: Mutex<IssueAggregator>,
    activity: Mutex<Activity>,
    active: AtomicBool,
    alerts: AlertQueue,
    audit: SharedAuditLog,
    reports: ReportGenerator,
}

struct Lifecycle {
    watchdog: Option<GapWatchdog>,
    dispatcher: AlertDispatcher,
}

/// One monitoring session for one crew member.
pub struct MonitorSession {
    core: Arc<SessionCore>,
    sink: Arc<dyn ReportSink>,
    lifecycle: Mutex<Lifecycle>,
}

impl MonitorSession {
    /// Validate `config` and build a stopped session that delivers alerts to
    /// `sink`.
    pub fn new(config: Config, sink: Arc<dyn ReportSink>) -> MonitorResult<Self> {
        Self::with_audit(config, sink, create_shared_audit())
    }

    /// Like [`MonitorSession::new`], recording into an existing audit log.
    pub fn with_audit(config: Config, sink: Arc<dyn ReportSink>, audit: SharedAuditLog) -> MonitorResult<Self> {
        config.validate()?;
        let detectors = Detector::from_config(&config.detectors);
        check_retention(&detectors, config.retention_horizon())?;

        let max_lookback = detectors
            .iter()
            .map(Detector::lookback)
            .max()
            .unwrap_or_else(Duration::zero);
        let id = Uuid::new_v4();
        let dispatcher = AlertDispatcher::new(config.alert_queue_capacity, audit.clone());

        let core = SessionCore {
            id,
            history: RwLock::new(RollingHistory::new(
                config.retention_horizon(),
                config.retention_max_entries,
            )),
            aggregator: Mutex::new(IssueAggregator::new(config.cool_down())),
            activity: Mutex::new(Activity::default()),
            active: AtomicBool::new(false),
            alerts: dispatcher.queue(),
            audit,
            reports: ReportGenerator::new(config.trend_threshold).with_session_id(id.to_string()),
            max_lookback,
            detectors,
            config,
        };

        Ok(Self {
            core: Arc::new(core),
            sink,
            lifecycle: Mutex::new(Lifecycle {
                watchdog: None,
                dispatcher,
            }),
        })
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    pub fn is_active(&self) -> bool {
        self.core.active.load(Ordering::SeqCst)
    }

    /// When the session was last started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.core.activity).started_at
    }

    /// Start monitoring now.
    pub fn start(&self) -> MonitorResult<()> {
        self.start_at(Utc::now())
    }

    /// Start monitoring with the gap clock running from `started_at`.
    ///
    /// Starting an active session is a no-op.
    pub fn start_at(&self, started_at: DateTime<Utc>) -> MonitorResult<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if self.is_active() {
            return Ok(());
        }

        {
            let mut activity = lock(&self.core.activity);
            activity.started_at = Some(started_at);
            activity.started_wall = Some(Utc::now());
        }
        self.core.active.store(true, Ordering::SeqCst);

        let core = self.core.clone();
        let started = lifecycle
            .dispatcher
            .start(
                self.sink.clone(),
                Box::new(move |issue: &CriticalIssue, delivered: bool| core.record_delivery(issue, delivered)),
            )
            .map_err(|e| spawn_error("alert dispatcher", e))
            .and_then(|()| {
                GapWatchdog::spawn(self.core.clone(), self.core.config.gap_poll_interval())
                    .map_err(|e| spawn_error("gap watchdog", e))
            });

        match started {
            Ok(watchdog) => {
                lifecycle.watchdog = Some(watchdog);
                tracing::info!(session_id = %self.core.id, %started_at, "monitoring session started");
                Ok(())
            }
            Err(e) => {
                self.core.active.store(false, Ordering::SeqCst);
                lifecycle.dispatcher.stop();
                Err(e)
            }
        }
    }

    /// Stop monitoring. Cancels and joins the gap watchdog and the alert
    /// worker; no issue is raised after this returns.
    pub fn stop(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        let was_active = {
            // Folding checks `active` under this lock
            let _aggregator = lock(&self.core.aggregator);
            self.core.active.swap(false, Ordering::SeqCst)
        };

        if let Some(watchdog) = lifecycle.watchdog.take() {
            watchdog.cancel();
        }
        lifecycle.dispatcher.stop();

        if was_active {
            tracing::info!(session_id = %self.core.id, "monitoring session stopped");
        }
    }

    /// Validate and record one classifier output, then run the event-driven
    /// detectors over its modality.
    ///
    /// `timestamp` defaults to now.
    pub fn ingest(
        &self,
        raw_label: &str,
        confidence: f64,
        modality: Modality,
        timestamp: Option<DateTime<Utc>>,
    ) -> MonitorResult<Observation> {
        let arrived_at = Utc::now();
        self.core
            .ingest(raw_label, confidence, modality, timestamp.unwrap_or(arrived_at), arrived_at)
    }

    pub fn ingest_raw(&self, raw: &RawObservation) -> MonitorResult<Observation> {
        self.ingest(&raw.label, raw.confidence, raw.modality, raw.timestamp)
    }

    /// Run the time-driven detectors as of `now` and evict expired history.
    ///
    /// `now` is read on the clock of the observation timestamps, which suits
    /// replays of recorded feeds. The watchdog instead measures silence by
    /// arrival time on the local clock. Returns the issues raised or
    /// escalated.
    pub fn poll_communication_gap(&self, now: DateTime<Utc>) -> MonitorResult<Vec<CriticalIssue>> {
        self.core.tick(TickClock::Observed(now))
    }

    /// Well-being report for `range`.
    ///
    /// A range without any observation yields an explicit no-data report.
    pub fn generate_report(&self, range: TimeWindow) -> MonitorResult<WellBeingReport> {
        let issues = lock(&self.core.aggregator).issues().to_vec();
        let history = read(&self.core.history);
        let generated_at = Utc::now();

        match self.core.reports.generate(&history, &issues, range, generated_at) {
            Err(MonitorError::EmptyHistory) => Ok(self.core.reports.no_data(&issues, range, generated_at)),
            other => other,
        }
    }

    /// Issues not yet acknowledged.
    pub fn get_open_issues(&self) -> Vec<CriticalIssue> {
        lock(&self.core.aggregator).open_issues()
    }

    /// Issues last detected at or after `since`.
    pub fn issue_history(&self, since: DateTime<Utc>) -> Vec<CriticalIssue> {
        lock(&self.core.aggregator).history_since(since)
    }

    /// Every issue the session has raised.
    pub fn issues(&self) -> Vec<CriticalIssue> {
        lock(&self.core.aggregator).issues().to_vec()
    }

    pub fn issue(&self, id: Uuid) -> Option<CriticalIssue> {
        lock(&self.core.aggregator).get(id).cloned()
    }

    pub fn ack_issue(&self, id: Uuid) -> MonitorResult<()> {
        lock(&self.core.aggregator).acknowledge(id)?;
        tracing::info!(issue_id = %id, "issue acknowledged");
        Ok(())
    }

    /// Issues the sink has not confirmed, for resurfacing to the operator.
    pub fn unreported_issues(&self) -> Vec<CriticalIssue> {
        lock(&self.core.aggregator).unreported()
    }

    /// Retained observations of `modality` within `range`, oldest first.
    pub fn observations(&self, modality: Modality, range: TimeWindow) -> Vec<Observation> {
        read(&self.core.history)
            .window(modality, range.start, range.end)
            .cloned()
            .collect()
    }

    /// Observations currently retained for `modality`.
    pub fn retained(&self, modality: Modality) -> usize {
        read(&self.core.history).len(modality)
    }

    pub fn audit(&self) -> &SharedAuditLog {
        &self.core.audit
    }

    pub fn audit_stats(&self) -> AuditStats {
        self.core.audit.stats()
    }

    /// Deliver queued alerts on the calling thread. Used when the session
    /// ran without its worker, e.g. a batch replay.
    pub fn flush_alerts(&self) -> usize {
        let core = self.core.clone();
        let lifecycle = lock(&self.lifecycle);
        lifecycle
            .dispatcher
            .flush(self.sink.as_ref(), &move |issue: &CriticalIssue, delivered: bool| {
                core.record_delivery(issue, delivered)
            })
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionCore {
    fn ensure_active(&self) -> MonitorResult<()> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MonitorError::SessionInactive)
        }
    }

    fn ingest(
        &self,
        raw_label: &str,
        confidence: f64,
        modality: Modality,
        timestamp: DateTime<Utc>,
        arrived_at: DateTime<Utc>,
    ) -> MonitorResult<Observation> {
        self.ensure_active()?;

        let observation = Observation::from_raw(raw_label, confidence, modality, timestamp)
            .map_err(|e| self.reject(e))?;

        // Copy the detector lookback out so evaluation runs without the lock
        let recent: Vec<Observation> = {
            let mut history = write(&self.history);
            history.append(observation.clone()).map_err(|e| self.reject(e))?;
            history
                .window(modality, saturating_sub(timestamp, self.max_lookback), timestamp)
                .cloned()
                .collect()
        };

        {
            let mut activity = lock(&self.activity);
            if activity.last_seen.map_or(true, |seen| timestamp > seen) {
                activity.last_seen = Some(timestamp);
            }
            if activity.last_arrival.map_or(true, |seen| arrived_at > seen) {
                activity.last_arrival = Some(arrived_at);
            }
            activity.lag[modality.index()] = Some(arrived_at - timestamp);
        }
        self.audit.record_accepted(modality);

        let window = DetectionWindow {
            modality: Some(modality),
            now: timestamp,
            observations: &recent,
            last_activity: Some(timestamp),
        };
        let candidates = self.evaluate(Trigger::Observation, &window);
        self.fold(candidates);

        Ok(observation)
    }

    fn tick(&self, clock: TickClock) -> MonitorResult<Vec<CriticalIssue>> {
        self.ensure_active()?;

        let (now, last_activity, lag) = {
            let activity = lock(&self.activity);
            match clock {
                TickClock::Observed(now) => (now, activity.last_seen.or(activity.started_at), None),
                TickClock::Wall(now) => (
                    now,
                    activity.last_arrival.or(activity.started_wall),
                    Some(activity.lag),
                ),
            }
        };

        let latest: Vec<Observation> = {
            let mut history = write(&self.history);
            let horizon = history.horizon();
            let mut evicted = 0;
            for modality in Modality::ALL {
                // Wall-clock ticks are shifted onto each producer's own clock
                let producer_now = match lag.and_then(|lag| lag[modality.index()]) {
                    Some(lag) => now.checked_sub_signed(lag).unwrap_or(now),
                    None => now,
                };
                let cutoff = saturating_sub(producer_now, horizon);
                evicted += history.evict_modality_before(modality, cutoff);
            }
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired observations");
            }
            let mut latest: Vec<Observation> = Modality::ALL
                .into_iter()
                .filter_map(|m| history.latest(m, 1).next().cloned())
                .collect();
            latest.sort_by_key(Observation::timestamp);
            latest
        };

        let window = DetectionWindow {
            modality: None,
            now,
            observations: &latest,
            last_activity,
        };
        let candidates = self.evaluate(Trigger::Tick, &window);
        Ok(self.fold(candidates))
    }

    /// Evaluate every detector with the given trigger. A detector that
    /// panics is logged and skipped; the others still run.
    fn evaluate(&self, trigger: Trigger, window: &DetectionWindow<'_>) -> Vec<IssueCandidate> {
        self.detectors
            .iter()
            .filter(|d| d.trigger() == trigger)
            .filter_map(|detector| {
                match panic::catch_unwind(AssertUnwindSafe(|| detector.evaluate(window))) {
                    Ok(candidate) => candidate,
                    Err(_) => {
                        self.audit.record_detector_fault();
                        tracing::error!(detector = detector.name(), "detector panicked, skipping");
                        None
                    }
                }
            })
            .collect()
    }

    /// Serialize candidates into the issue log and queue the results for
    /// delivery.
    fn fold(&self, candidates: Vec<IssueCandidate>) -> Vec<CriticalIssue> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut emitted = Vec::new();
        {
            let mut aggregator = lock(&self.aggregator);
            if !self.active.load(Ordering::SeqCst) {
                return Vec::new();
            }
            for candidate in candidates {
                let (idx, disposition) = aggregator.fold(candidate);
                match disposition {
                    Disposition::Created => self.audit.record_issue_raised(),
                    Disposition::Escalated => self.audit.record_issue_escalated(),
                    Disposition::Merged => continue,
                }
                emitted.push(aggregator.issues()[idx].clone());
            }
        }

        for issue in &emitted {
            self.alerts.enqueue(issue.clone());
        }
        emitted
    }

    /// Mark an issue reported once the sink accepted it. A delivery of a
    /// since-escalated issue does not count for the escalation.
    fn record_delivery(&self, issue: &CriticalIssue, delivered: bool) {
        if !delivered {
            return;
        }
        let mut aggregator = lock(&self.aggregator);
        let current = aggregator.get(issue.id).map(|i| i.severity);
        if current == Some(issue.severity) {
            let _ = aggregator.mark_reported(issue.id, true);
        }
    }

    fn reject(&self, error: MonitorError) -> MonitorError {
        self.audit.record_rejected();
        tracing::debug!(error = %error, "observation rejected");
        error
    }
}

/// Periodic communication-gap check on its own thread.
struct GapWatchdog {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl GapWatchdog {
    fn spawn(core: Arc<SessionCore>, interval: std::time::Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let handle = std::thread::Builder::new()
            .name("maitri-gap-watchdog".to_string())
            .spawn(move || {
                tracing::debug!(interval_secs = interval.as_secs(), "gap watchdog started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if core.tick(TickClock::Wall(Utc::now())).is_err() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!("gap watchdog stopped");
            })?;

        Ok(Self { stop_tx, handle })
    }

    fn cancel(self) {
        let _ = self.stop_tx.try_send(());
        if self.handle.join().is_err() {
            tracing::error!("gap watchdog panicked");
        }
    }
}

fn spawn_error(thread: &'static str, error: std::io::Error) -> MonitorError {
    MonitorError::WorkerSpawn {
        thread,
        message: error.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
