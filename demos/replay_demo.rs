//! Demonstration of the MAITRI monitor on a scripted crew shift.
//!
//! This example shows how to:
//! 1. Create a monitoring session with a custom alert sink
//! 2. Replay timestamped classifier output through it
//! 3. Poll for communication gaps on the recorded clock
//! 4. Print the critical issue report and the well-being report
//!
//! Run with: cargo run --example replay_demo

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use maitri_monitor::{
    core::render_issue_report, Config, CriticalIssue, Modality, MonitorSession, ReportSink,
    SinkError, TimeWindow, MONITORING_NOTICE,
};

/// Prints alerts as they would go to ground control.
#[derive(Default)]
struct ConsoleSink {
    delivered: Mutex<usize>,
}

impl ReportSink for ConsoleSink {
    fn report(&self, issue: &CriticalIssue) -> Result<(), SinkError> {
        println!(
            "  >> ALERT {} [{}] {}",
            issue.issue_type, issue.severity, issue.summary
        );
        if let Ok(mut delivered) = self.delivered.lock() {
            *delivered += 1;
        }
        Ok(())
    }
}

/// A shift: calm morning, a tense stretch, one spike of fear, then silence.
fn script(start: DateTime<Utc>) -> Vec<(DateTime<Utc>, &'static str, f64, Modality)> {
    let mut events = Vec::new();
    for minute in 0..30 {
        let label = if minute % 3 == 0 { "happy" } else { "neutral" };
        events.push((start + Duration::minutes(minute), label, 0.7, Modality::Facial));
    }
    for minute in 30..50 {
        events.push((start + Duration::minutes(minute), "sad", 0.78, Modality::Facial));
        events.push((
            start + Duration::minutes(minute) + Duration::seconds(20),
            if minute % 2 == 0 { "calm" } else { "angry" },
            0.6,
            Modality::Audio,
        ));
    }
    events.push((start + Duration::minutes(51), "fearful", 0.94, Modality::Audio));
    events
}

fn main() {
    println!("MAITRI Monitor - Replay Demo");
    println!("============================");
    println!("{MONITORING_NOTICE}");

    let start = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
    let config = Config {
        // Gaps are polled on the recorded clock below
        gap_poll_interval_secs: 24 * 3600,
        ..Config::default()
    };
    let tz = config.tz();

    let sink = Arc::new(ConsoleSink::default());
    let session = match MonitorSession::new(config, sink.clone()) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error creating session: {e}");
            return;
        }
    };
    if let Err(e) = session.start_at(start) {
        eprintln!("Error starting session: {e}");
        return;
    }

    println!("Session ID: {}", session.id());
    println!("Replaying shift...");
    println!();

    let events = script(start);
    for (timestamp, label, confidence, modality) in &events {
        if let Err(e) = session.poll_communication_gap(*timestamp) {
            eprintln!("Gap check failed: {e}");
        }
        if let Err(e) = session.ingest(label, *confidence, *modality, Some(*timestamp)) {
            println!("  rejected {label} ({modality}): {e}");
        }
    }

    // An hour of silence after the last observation
    let end = start + Duration::minutes(95);
    if let Err(e) = session.poll_communication_gap(end) {
        eprintln!("Gap check failed: {e}");
    }

    let report = session.generate_report(TimeWindow::new(start, start + Duration::minutes(60)));
    session.stop();
    session.flush_alerts();

    println!();
    println!("{}", render_issue_report(&session.issues(), end, tz));
    match report {
        Ok(report) => println!("{}", report.render_text(tz)),
        Err(e) => eprintln!("Error generating report: {e}"),
    }

    let delivered = sink.delivered.lock().map(|d| *d).unwrap_or(0);
    println!("Alerts delivered: {delivered}");
    println!("{}", session.audit().summary());
}
