//! End-to-end detection scenarios driven through a monitoring session.

use chrono::{DateTime, Duration, TimeZone, Utc};
use maitri_monitor::core::{
    DetectionWindow, Detector, IssueAggregator, ModalitySummary, ReportStatus, RollingHistory,
};
use maitri_monitor::{
    Config, CriticalIssue, IssueType, Modality, MonitorError, MonitorSession, Observation,
    RawObservation, ReportSink, Severity, SinkError, TimeWindow,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<CriticalIssue>>,
}

impl RecordingSink {
    fn ids(&self) -> Vec<Uuid> {
        self.alerts.lock().unwrap().iter().map(|i| i.id).collect()
    }
}

impl ReportSink for RecordingSink {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
        self.alerts.lock().unwrap().push(issue.clone());
        Ok(())
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

fn at(minutes: i64, seconds: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(minutes) + Duration::seconds(seconds)
}

/// Config whose watchdog never fires during a test; gap checks are driven
/// explicitly with recorded timestamps.
fn quiet_config() -> Config {
    Config {
        gap_poll_interval_secs: 3_600,
        ..Config::default()
    }
}

fn started(config: Config) -> (MonitorSession, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let session = MonitorSession::new(config, sink.clone()).unwrap();
    session.start_at(t0()).unwrap();
    (session, sink)
}

fn of_type(issues: &[CriticalIssue], issue_type: IssueType) -> Vec<CriticalIssue> {
    issues
        .iter()
        .filter(|i| i.issue_type == issue_type)
        .cloned()
        .collect()
}

fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    false
}

#[test]
fn scenario_a_sustained_negative() {
    let (session, _) = started(quiet_config());
    for minute in 0..20 {
        session
            .ingest("sad", 0.8, Modality::Facial, Some(at(minute, 0)))
            .unwrap();
    }

    let issues = session.issues();
    let sustained = of_type(&issues, IssueType::SustainedNegative);
    assert_eq!(sustained.len(), 1);
    assert!(sustained[0].severity >= Severity::Medium);
    assert_eq!(sustained[0].modality, Some(Modality::Facial));
    assert!(sustained[0].occurrences > 1);
    assert!(sustained[0]
        .evidence
        .iter()
        .all(|o| o.label().is_negative()));
    assert!(of_type(&issues, IssueType::ExtremeEmotion).is_empty());
}

#[test]
fn sustained_negative_needs_min_samples() {
    let (session, _) = started(quiet_config());
    for minute in 0..9 {
        session
            .ingest("sad", 0.8, Modality::Audio, Some(at(minute, 0)))
            .unwrap();
    }
    assert!(of_type(&session.issues(), IssueType::SustainedNegative).is_empty());
}

#[test]
fn scenario_b_rapid_swing() {
    let (session, _) = started(quiet_config());
    for (i, label) in ["happy", "sad", "happy", "sad"].iter().enumerate() {
        session
            .ingest(label, 0.7, Modality::Facial, Some(at(i as i64, 0)))
            .unwrap();
    }

    let swings = of_type(&session.issues(), IssueType::RapidSwing);
    assert_eq!(swings.len(), 1);
    assert_eq!(swings[0].evidence.len(), 4);
    assert_eq!(swings[0].window.start, at(0, 0));
}

#[test]
fn surprise_and_repeats_do_not_count_as_swings() {
    let (session, _) = started(quiet_config());
    let labels = ["happy", "surprise", "happy", "happy", "sad", "sad", "surprise"];
    for (i, label) in labels.iter().enumerate() {
        session
            .ingest(label, 0.6, Modality::Facial, Some(at(0, 30 * i as i64)))
            .unwrap();
    }
    assert!(of_type(&session.issues(), IssueType::RapidSwing).is_empty());
}

#[test]
fn rapid_swing_escalates_in_place() {
    let (session, sink) = started(quiet_config());
    let labels = ["happy", "sad", "happy", "sad", "happy", "sad"];
    for (i, label) in labels.iter().enumerate() {
        session
            .ingest(label, 0.6, Modality::Text, Some(at(0, 30 * i as i64)))
            .unwrap();
    }

    let swings = of_type(&session.issues(), IssueType::RapidSwing);
    assert_eq!(swings.len(), 1);
    assert_eq!(swings[0].severity, Severity::High);
    assert_eq!(session.audit_stats().issues_escalated, 1);

    // Created and escalated: both reach the sink
    assert!(wait_for(|| sink.ids().len() == 2));
    assert!(sink.ids().iter().all(|id| *id == swings[0].id));
}

#[test]
fn scenario_c_extreme_emotion() {
    let (session, sink) = started(quiet_config());
    session
        .ingest("fear", 0.92, Modality::Audio, Some(at(0, 0)))
        .unwrap();

    let issues = session.get_open_issues();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_type, IssueType::ExtremeEmotion);
    assert!(issues[0].severity >= Severity::High);
    assert_eq!(issues[0].evidence.len(), 1);

    let id = issues[0].id;
    assert!(wait_for(|| sink.ids() == vec![id]));
    assert!(wait_for(|| session.issue(id).map_or(false, |i| i.reported)));
}

#[test]
fn extreme_repeats_merge_within_cool_down() {
    let (session, _) = started(quiet_config());
    session
        .ingest("angry", 0.9, Modality::Facial, Some(at(0, 0)))
        .unwrap();
    session
        .ingest("angry", 0.95, Modality::Facial, Some(at(2, 0)))
        .unwrap();

    let extreme = of_type(&session.issues(), IssueType::ExtremeEmotion);
    assert_eq!(extreme.len(), 1);
    assert_eq!(extreme[0].occurrences, 2);
    assert_eq!(extreme[0].window.end, at(2, 0));
    assert_eq!(extreme[0].last_detected_at, at(2, 0));

    session
        .ingest("angry", 0.9, Modality::Facial, Some(at(10, 0)))
        .unwrap();
    assert_eq!(of_type(&session.issues(), IssueType::ExtremeEmotion).len(), 2);
}

#[test]
fn scenario_d_no_gap_false_positive() {
    let (session, _) = started(quiet_config());
    for step in 0..=12 {
        let ts = at(step * 10, 0);
        assert!(session.poll_communication_gap(ts).unwrap().is_empty());
        session
            .ingest("neutral", 0.7, Modality::Facial, Some(ts))
            .unwrap();
        assert!(session
            .poll_communication_gap(ts + Duration::minutes(9))
            .unwrap()
            .is_empty());
    }
    assert!(of_type(&session.issues(), IssueType::CommunicationGap).is_empty());
}

#[test]
fn communication_gap_raised_and_merged() {
    let (session, _) = started(quiet_config());
    session
        .ingest("happy", 0.8, Modality::Facial, Some(at(0, 0)))
        .unwrap();

    let raised = session.poll_communication_gap(at(30, 0)).unwrap();
    assert_eq!(raised.len(), 1);
    assert_eq!(raised[0].issue_type, IssueType::CommunicationGap);
    assert!(raised[0].severity >= Severity::High);
    assert_eq!(raised[0].modality, None);
    assert_eq!(raised[0].window, TimeWindow::new(at(0, 0), at(30, 0)));

    // Still silent: same issue, no new alert unless it escalates
    session.poll_communication_gap(at(31, 0)).unwrap();
    let gaps = of_type(&session.issues(), IssueType::CommunicationGap);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].occurrences, 2);
    assert_eq!(gaps[0].window.end, at(31, 0));
}

#[test]
fn scenario_e_report_with_no_data() {
    let (session, _) = started(quiet_config());
    session
        .ingest("happy", 0.8, Modality::Facial, Some(at(0, 0)))
        .unwrap();

    let report = session
        .generate_report(TimeWindow::new(at(60, 0), at(120, 0)))
        .unwrap();
    assert_eq!(report.status, ReportStatus::NoData);
    assert!(!report.has_data());
    assert_eq!(report.modalities.len(), 3);
    assert!(report
        .modalities
        .values()
        .all(|summary| *summary == ModalitySummary::NoData));
}

#[test]
fn report_lists_distribution_and_issues_in_range() {
    let (session, _) = started(quiet_config());
    session
        .ingest("fear", 0.95, Modality::Facial, Some(at(1, 0)))
        .unwrap();
    session
        .ingest("neutral", 0.6, Modality::Facial, Some(at(2, 0)))
        .unwrap();
    session
        .ingest("calm", 0.5, Modality::Audio, Some(at(3, 0)))
        .unwrap();

    let report = session
        .generate_report(TimeWindow::new(at(0, 0), at(10, 0)))
        .unwrap();
    assert_eq!(report.status, ReportStatus::Partial);
    assert_eq!(report.modalities[&Modality::Text], ModalitySummary::NoData);
    match &report.modalities[&Modality::Facial] {
        ModalitySummary::Observed(d) => {
            assert_eq!(d.observations, 2);
            assert!((d.negative_fraction - 0.5).abs() < 1e-9);
        }
        other => panic!("expected facial distribution, got {other:?}"),
    }
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].issue_type, IssueType::ExtremeEmotion);
}

#[test]
fn history_window_is_exact_and_ordered() {
    let mut history = RollingHistory::new(Duration::hours(2), 1_000);
    for second in (0..600).step_by(7) {
        history
            .append(Observation::from_raw("neutral", 0.5, Modality::Text, at(0, second)).unwrap())
            .unwrap();
    }

    let (since, until) = (at(1, 3), at(4, 12));
    let window: Vec<_> = history.window(Modality::Text, since, until).collect();
    let expected = (0..600)
        .step_by(7)
        .filter(|s| at(0, *s) >= since && at(0, *s) <= until)
        .count();
    assert_eq!(window.len(), expected);
    assert!(window
        .iter()
        .all(|o| o.timestamp() >= since && o.timestamp() <= until));
    assert!(window
        .windows(2)
        .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));

    history.evict_before(at(5, 0));
    assert!(history
        .window(Modality::Text, at(-60, 0), at(60, 0))
        .all(|o| o.timestamp() >= at(5, 0)));
}

#[test]
fn detectors_are_deterministic() {
    let observations: Vec<Observation> = ["happy", "sad", "happy", "sad", "fear"]
        .iter()
        .enumerate()
        .map(|(i, label)| {
            Observation::from_raw(label, 0.9, Modality::Facial, at(i as i64, 0)).unwrap()
        })
        .collect();
    let window = DetectionWindow {
        modality: Some(Modality::Facial),
        now: at(4, 0),
        observations: &observations,
        last_activity: Some(at(4, 0)),
    };

    for detector in Detector::from_config(&Config::default().detectors) {
        assert_eq!(detector.evaluate(&window), detector.evaluate(&window));
    }
}

#[test]
fn aggregating_the_same_candidate_twice_yields_one_issue() {
    let observation = Observation::from_raw("disgust", 0.99, Modality::Facial, at(0, 0)).unwrap();
    let observations = vec![observation];
    let window = DetectionWindow {
        modality: Some(Modality::Facial),
        now: at(0, 0),
        observations: &observations,
        last_activity: Some(at(0, 0)),
    };
    let candidate = Detector::from_config(&Config::default().detectors)
        .iter()
        .find_map(|d| d.evaluate(&window))
        .unwrap();

    let mut aggregator = IssueAggregator::new(Duration::minutes(5));
    let first = aggregator.aggregate(vec![candidate.clone()]);
    let second = aggregator.aggregate(vec![candidate]);
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(aggregator.issues().len(), 1);
}

#[test]
fn invalid_observations_are_rejected() {
    let (session, _) = started(quiet_config());
    assert!(matches!(
        session.ingest("joyful", 0.5, Modality::Facial, Some(at(0, 0))),
        Err(MonitorError::InvalidLabel { .. })
    ));
    assert!(matches!(
        session.ingest("calm", 0.5, Modality::Facial, Some(at(0, 0))),
        Err(MonitorError::InvalidLabel { .. })
    ));
    assert_eq!(
        session.ingest("fear", -0.1, Modality::Facial, Some(at(0, 0))),
        Err(MonitorError::InvalidConfidence(-0.1))
    );
    assert!(session.issues().is_empty());
    assert_eq!(session.retained(Modality::Facial), 0);
}

#[test]
fn out_of_order_rejected_per_modality() {
    let (session, _) = started(quiet_config());
    session
        .ingest("happy", 0.5, Modality::Facial, Some(at(5, 0)))
        .unwrap();
    assert!(matches!(
        session.ingest("happy", 0.5, Modality::Facial, Some(at(4, 0))),
        Err(MonitorError::OutOfOrderObservation { .. })
    ));
    session
        .ingest("happy", 0.5, Modality::Audio, Some(at(1, 0)))
        .unwrap();
    assert_eq!(session.retained(Modality::Facial), 1);
    assert_eq!(session.retained(Modality::Audio), 1);
}

#[test]
fn raw_observations_use_the_same_path() {
    let (session, _) = started(quiet_config());
    let raw = RawObservation::new("Fearful", 0.9, Modality::Audio).at(at(0, 0));
    let observation = session.ingest_raw(&raw).unwrap();
    assert_eq!(observation.label().as_str(), "fear");
    assert_eq!(session.audit_stats().audio_observations, 1);
}

#[test]
fn retention_shorter_than_lookback_is_rejected() {
    let config = Config {
        retention_horizon_secs: 600,
        ..quiet_config()
    };
    assert!(matches!(
        MonitorSession::new(config, Arc::new(RecordingSink::default())),
        Err(MonitorError::RetentionTooShort { .. })
    ));
}

#[test]
fn invalid_config_fails_fast() {
    let mut config = quiet_config();
    config.detectors.swing_window_secs = -5;
    assert!(matches!(
        MonitorSession::new(config, Arc::new(RecordingSink::default())),
        Err(MonitorError::InvalidConfig(_))
    ));

    let mut config = quiet_config();
    config.detectors.extreme_confidence = 1.2;
    assert!(matches!(
        MonitorSession::new(config, Arc::new(RecordingSink::default())),
        Err(MonitorError::InvalidConfig(_))
    ));
}

#[test]
fn acknowledged_issue_is_closed_and_not_merged_into() {
    let (session, _) = started(quiet_config());
    session
        .ingest("fear", 0.9, Modality::Facial, Some(at(0, 0)))
        .unwrap();
    let id = session.get_open_issues()[0].id;

    session.ack_issue(id).unwrap();
    assert!(session.get_open_issues().is_empty());
    assert!(session.issue(id).unwrap().acknowledged);

    session
        .ingest("fear", 0.9, Modality::Facial, Some(at(1, 0)))
        .unwrap();
    let open = session.get_open_issues();
    assert_eq!(open.len(), 1);
    assert_ne!(open[0].id, id);
    assert_eq!(session.issues().len(), 2);
}

#[test]
fn issue_history_by_look_back() {
    let (session, _) = started(quiet_config());
    session
        .ingest("fear", 0.9, Modality::Facial, Some(at(0, 0)))
        .unwrap();
    session
        .ingest("sad", 0.95, Modality::Audio, Some(at(90, 0)))
        .unwrap();

    assert_eq!(session.issue_history(at(60, 0)).len(), 1);
    assert_eq!(session.issue_history(at(-60, 0)).len(), 2);
}

#[test]
fn evidence_survives_eviction() {
    let (session, _) = started(quiet_config());
    session
        .ingest("fear", 0.9, Modality::Facial, Some(at(0, 0)))
        .unwrap();
    session.poll_communication_gap(at(180, 0)).unwrap();

    assert_eq!(session.retained(Modality::Facial), 0);
    let extreme = of_type(&session.issues(), IssueType::ExtremeEmotion);
    assert_eq!(extreme[0].evidence.len(), 1);
    assert_eq!(extreme[0].evidence[0].timestamp(), at(0, 0));
}

#[test]
fn no_gap_issue_after_stop() {
    let config = Config {
        gap_poll_interval_secs: 1,
        detectors: maitri_monitor::DetectorConfig {
            gap_threshold_secs: 1,
            ..Default::default()
        },
        ..Config::default()
    };
    let session = MonitorSession::new(config, Arc::new(RecordingSink::default())).unwrap();
    session.start().unwrap();

    // The real watchdog raises the gap
    assert!(wait_for(|| !session.issues().is_empty()));
    session.stop();
    let raised = session.issues().len();

    std::thread::sleep(std::time::Duration::from_millis(2_500));
    assert_eq!(session.issues().len(), raised);
    assert_eq!(
        session.poll_communication_gap(Utc::now()),
        Err(MonitorError::SessionInactive)
    );
    assert_eq!(
        session.ingest("happy", 0.5, Modality::Facial, None),
        Err(MonitorError::SessionInactive)
    );
}

#[test]
fn lagging_producer_clock_is_not_silence() {
    let config = Config {
        gap_poll_interval_secs: 1,
        ..Config::default()
    };
    let session = MonitorSession::new(config, Arc::new(RecordingSink::default())).unwrap();
    session.start().unwrap();

    // The facial pipeline stamps its output two hours behind local time
    let behind = Utc::now() - Duration::hours(2);
    for minute in 0..10 {
        session
            .ingest("happy", 0.7, Modality::Facial, Some(behind + Duration::minutes(minute)))
            .unwrap();
    }
    std::thread::sleep(std::time::Duration::from_millis(1_500));

    assert_eq!(session.retained(Modality::Facial), 10);
    assert!(of_type(&session.issues(), IssueType::CommunicationGap).is_empty());
    let report = session
        .generate_report(TimeWindow::new(behind, behind + Duration::minutes(10)))
        .unwrap();
    assert_ne!(report.status, ReportStatus::NoData);
    session.stop();
}

#[test]
fn oversized_durations_fail_at_construction() {
    let config = Config {
        retention_horizon_secs: 10_000_000_000_000,
        ..quiet_config()
    };
    assert!(matches!(
        MonitorSession::new(config, Arc::new(RecordingSink::default())),
        Err(MonitorError::InvalidConfig(_))
    ));

    let mut config = quiet_config();
    config.detectors.gap_threshold_secs = i64::MAX;
    assert!(matches!(
        MonitorSession::new(config, Arc::new(RecordingSink::default())),
        Err(MonitorError::InvalidConfig(_))
    ));
}

#[test]
fn concurrent_producers_keep_per_modality_order() {
    const PER_MODALITY: i64 = 2_000;
    let (session, _) = started(quiet_config());
    let session = Arc::new(session);

    let producers: Vec<_> = [Modality::Facial, Modality::Audio, Modality::Text]
        .into_iter()
        .map(|modality| {
            let session = session.clone();
            std::thread::spawn(move || {
                (0..PER_MODALITY)
                    .filter(|s| {
                        session
                            .ingest("neutral", 0.6, modality, Some(at(0, *s)))
                            .is_ok()
                    })
                    .count()
            })
        })
        .collect();
    for producer in producers {
        assert_eq!(producer.join().unwrap(), PER_MODALITY as usize);
    }

    let everything = TimeWindow::new(at(-1, 0), at(60, 0));
    for modality in [Modality::Facial, Modality::Audio, Modality::Text] {
        let retained = session.observations(modality, everything);
        assert_eq!(retained.len(), PER_MODALITY as usize);
        assert!(retained
            .windows(2)
            .all(|pair| pair[0].timestamp() < pair[1].timestamp()));
    }
    assert_eq!(session.audit_stats().total_observations(), 3 * PER_MODALITY as u64);
}

#[test]
fn racing_producers_on_one_modality_never_corrupt_history() {
    const PER_THREAD: i64 = 1_000;
    let (session, _) = started(quiet_config());
    let session = Arc::new(session);

    // Interleaved timestamps: one thread stamps even seconds, the other odd
    let producers: Vec<_> = (0..2)
        .map(|offset| {
            let session = session.clone();
            std::thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|i| {
                        session.ingest("happy", 0.6, Modality::Text, Some(at(0, 2 * i + offset)))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut accepted = 0;
    let mut out_of_order = 0;
    for producer in producers {
        for result in producer.join().unwrap() {
            match result {
                Ok(_) => accepted += 1,
                Err(MonitorError::OutOfOrderObservation { .. }) => out_of_order += 1,
                Err(other) => panic!("unexpected ingest error: {other}"),
            }
        }
    }
    assert_eq!(accepted + out_of_order, 2 * PER_THREAD as usize);

    let retained = session.observations(Modality::Text, TimeWindow::new(at(-1, 0), at(60, 0)));
    assert_eq!(retained.len(), accepted);
    assert!(retained
        .windows(2)
        .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
    assert_eq!(session.audit_stats().rejected_observations, out_of_order as u64);
}
