//! Outbound alert delivery.
//!
//! Newly raised and escalated issues are handed to a [`ReportSink`] through a
//! bounded queue drained by a worker thread. Enqueueing never blocks: when the
//! queue is full the oldest pending alert is dropped. Delivery retries belong
//! to the sink; a failed delivery leaves the issue `reported = false`.

use crate::audit::SharedAuditLog;
use crate::core::issue::CriticalIssue;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;

/// Errors a sink reports back for a single delivery.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Receiver of critical issues, e.g. a ground-control link.
pub trait ReportSink: Send + Sync {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError>;
}

impl<T: ReportSink + ?Sized> ReportSink for Arc<T> {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
        (**self).report(issue)
    }
}

/// Sink that writes alerts to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
        tracing::warn!(
            issue_id = %issue.id,
            issue_type = %issue.issue_type,
            severity = %issue.severity,
            occurrences = issue.occurrences,
            "CRITICAL ISSUE: {}",
            issue.summary
        );
        Ok(())
    }
}

/// Called by the worker after each delivery attempt.
pub type DeliveryCallback = Box<dyn Fn(&CriticalIssue, bool) + Send>;

/// Producer side of the alert queue. Cheap to clone.
#[derive(Clone)]
pub struct AlertQueue {
    sender: Sender<CriticalIssue>,
    // Held so the producer can discard the oldest entry on overflow
    receiver: Receiver<CriticalIssue>,
    audit: SharedAuditLog,
}

impl AlertQueue {
    /// Queue an issue for delivery without blocking.
    pub fn enqueue(&self, issue: CriticalIssue) {
        let mut pending = issue;
        // A concurrent producer can refill the slot we free; bound the retries
        for _ in 0..4 {
            match self.sender.try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    pending = rejected;
                    if let Ok(oldest) = self.receiver.try_recv() {
                        self.audit.record_alert_dropped();
                        tracing::warn!(
                            issue_id = %oldest.id,
                            issue_type = %oldest.issue_type,
                            "alert queue full, dropped oldest alert"
                        );
                    }
                }
            }
        }
        self.audit.record_alert_dropped();
        tracing::warn!(issue_id = %pending.id, "alert queue saturated, dropped alert");
    }

    /// Alerts waiting for the worker.
    pub fn pending(&self) -> usize {
        self.sender.len()
    }
}

/// Owns the alert queue and its delivery worker.
pub struct AlertDispatcher {
    queue: AlertQueue,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AlertDispatcher {
    pub fn new(capacity: usize, audit: SharedAuditLog) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            queue: AlertQueue {
                sender,
                receiver,
                audit,
            },
            stop_tx: None,
            worker: None,
        }
    }

    pub fn queue(&self) -> AlertQueue {
        self.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the delivery worker. Does nothing if it is already running.
    pub fn start(&mut self, sink: Arc<dyn ReportSink>, on_delivery: DeliveryCallback) -> std::io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let receiver = self.queue.receiver.clone();
        let audit = self.queue.audit.clone();

        let worker = std::thread::Builder::new()
            .name("maitri-alerts".to_string())
            .spawn(move || {
                tracing::debug!("alert dispatcher started");
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(receiver) -> msg => match msg {
                            Ok(issue) => deliver(sink.as_ref(), &issue, &audit, &*on_delivery),
                            Err(_) => break,
                        },
                    }
                }
                tracing::debug!("alert dispatcher stopped");
            })?;

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop the worker and wait for it. Undelivered alerts stay queued.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("alert dispatcher panicked");
            }
        }
    }

    /// Deliver everything still queued on the calling thread.
    pub fn flush(&self, sink: &dyn ReportSink, on_delivery: &dyn Fn(&CriticalIssue, bool)) -> usize {
        let mut delivered = 0;
        loop {
            match self.queue.receiver.try_recv() {
                Ok(issue) => {
                    deliver(sink, &issue, &self.queue.audit, on_delivery);
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        delivered
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver(
    sink: &dyn ReportSink,
    issue: &CriticalIssue,
    audit: &SharedAuditLog,
    on_delivery: &dyn Fn(&CriticalIssue, bool),
) {
    match sink.report(issue) {
        Ok(()) => {
            audit.record_alert_delivered();
            on_delivery(issue, true);
        }
        Err(e) => {
            audit.record_alert_failed();
            tracing::warn!(issue_id = %issue.id, error = %e, "alert delivery failed");
            on_delivery(issue, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::create_shared_audit;
    use crate::core::issue::{IssueType, Severity, TimeWindow};
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl ReportSink for RecordingSink {
        fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Unavailable("link down".to_string()));
            }
            self.seen.lock().unwrap().push(issue.id);
            Ok(())
        }
    }

    fn issue() -> CriticalIssue {
        let now = Utc::now();
        CriticalIssue {
            id: Uuid::new_v4(),
            issue_type: IssueType::ExtremeEmotion,
            severity: Severity::High,
            modality: None,
            window: TimeWindow::instant(now),
            evidence: Vec::new(),
            detected_at: now,
            last_detected_at: now,
            occurrences: 1,
            summary: "fear detected with confidence 0.92".to_string(),
            recommendation: IssueType::ExtremeEmotion.recommendation().to_string(),
            reported: false,
            acknowledged: false,
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let audit = create_shared_audit();
        let dispatcher = AlertDispatcher::new(2, audit.clone());
        let queue = dispatcher.queue();

        let first = issue();
        let second = issue();
        let third = issue();
        queue.enqueue(first.clone());
        queue.enqueue(second.clone());
        queue.enqueue(third.clone());

        assert_eq!(queue.pending(), 2);
        assert_eq!(audit.stats().alerts_dropped, 1);

        let sink = RecordingSink::default();
        let delivered = dispatcher.flush(&sink, &|_: &CriticalIssue, _: bool| {});
        assert_eq!(delivered, 2);
        assert_eq!(*sink.seen.lock().unwrap(), vec![second.id, third.id]);
    }

    #[test]
    fn test_worker_delivers_and_reports_outcome() {
        let audit = create_shared_audit();
        let mut dispatcher = AlertDispatcher::new(8, audit.clone());
        let sink = Arc::new(RecordingSink::default());
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        let recorded = outcomes.clone();
        dispatcher
            .start(
                sink.clone(),
                Box::new(move |issue: &CriticalIssue, ok: bool| recorded.lock().unwrap().push((issue.id, ok))),
            )
            .unwrap();

        let alert = issue();
        dispatcher.queue().enqueue(alert.clone());

        assert!(wait_for(|| !outcomes.lock().unwrap().is_empty()));
        dispatcher.stop();

        assert_eq!(*outcomes.lock().unwrap(), vec![(alert.id, true)]);
        assert_eq!(*sink.seen.lock().unwrap(), vec![alert.id]);
        assert_eq!(audit.stats().alerts_delivered, 1);
        assert!(!dispatcher.is_running());
    }

    #[test]
    fn test_failed_delivery_is_counted() {
        let audit = create_shared_audit();
        let dispatcher = AlertDispatcher::new(4, audit.clone());
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        dispatcher.queue().enqueue(issue());

        let outcomes = Mutex::new(Vec::new());
        dispatcher.flush(&sink, &|_: &CriticalIssue, ok: bool| outcomes.lock().unwrap().push(ok));

        assert_eq!(*outcomes.lock().unwrap(), vec![false]);
        assert_eq!(audit.stats().alerts_failed, 1);
    }

    #[test]
    fn test_log_sink_accepts_everything() {
        assert!(LogSink.report(&issue()).is_ok());
    }
}
