//! File-mode analysis runs against counting fakes

mod common;

use classwatch_eye::{FailureReason, FrameAnalysis, PipelineConfig, PipelineError, PipelineState, Progress, SamplingRate};
use common::{CountingSource, ScriptedDetector};
use std::sync::Arc;
use std::time::Duration;

fn config(rate: f64) -> PipelineConfig {
    PipelineConfig::new("42", SamplingRate::new(rate).unwrap())
}

#[tokio::test]
async fn test_completed_run_has_one_result_per_sample() {
    let source = CountingSource::file(10.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(2.0), source, detector.clone()).unwrap();

    let report = analysis.run().await.unwrap();

    assert_eq!(report.state, PipelineState::Completed);
    assert_eq!(report.total_frames, 20);
    assert_eq!(report.results.len(), 20);
    assert_eq!(detector.calls(), 20);
    assert_eq!(detector.max_in_flight(), 1);

    for (i, pair) in report.results.windows(2).enumerate() {
        assert!(pair[1].timestamp_secs > pair[0].timestamp_secs, "not increasing at {}", i);
        assert!((pair[1].timestamp_secs - pair[0].timestamp_secs - 0.5).abs() < 1e-9);
    }
    assert_eq!(report.results[0].timestamp_secs, 0.0);

    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(analysis.progress(), Progress::new(20, 20));
    assert_eq!(analysis.progress().percent, 100);
}

#[tokio::test]
async fn test_fractional_tail_is_dropped() {
    let source = CountingSource::file(9.9);
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    analysis.prepare().await.unwrap();
    assert_eq!(analysis.estimated_frames(), Some(9));

    let report = analysis.run().await.unwrap();
    assert_eq!(report.results.len(), 9);
    assert_eq!(detector.timestamps().last().copied(), Some(8.0));
}

#[tokio::test]
async fn test_cancel_after_five_keeps_exactly_five() {
    let source = CountingSource::file(20.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new().cancelling_on_call(5));
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let report = analysis.run().await.unwrap();

    assert!(report.is_cancelled());
    assert_eq!(analysis.state(), PipelineState::Failed(FailureReason::Cancelled));
    assert_eq!(report.results.len(), 5);
    assert_eq!(analysis.results().len(), 5);
    assert_eq!(detector.calls(), 5);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_handle_aborts_in_flight_request() {
    let source = CountingSource::file(20.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new().with_delay(Duration::from_secs(1)));
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let handle = analysis.handle();
    let mut progress = handle.watch_progress();
    let stopper = tokio::spawn(async move {
        progress.wait_for(|p| p.current_frame == 5).await.unwrap();
        handle.cancel();
    });

    let report = analysis.run().await.unwrap();
    stopper.await.unwrap();

    assert!(report.is_cancelled());
    assert_eq!(report.results.len(), 5);
    // the sixth request was started and then abandoned
    assert_eq!(detector.calls(), 6);
    assert_eq!(counters.closes(), 1);
    assert_eq!(analysis.progress().current_frame, 5);
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_is_visible_while_request_settles() {
    let source = CountingSource::file(10.0);
    let counters = source.counters();
    let detector = Arc::new(
        ScriptedDetector::new()
            .with_delay(Duration::from_secs(1))
            .ignoring_cancel(),
    );
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let handle = analysis.handle();
    let mut states = handle.watch_state();
    let observer = async {
        states.wait_for(|s| *s == PipelineState::Running).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        handle.cancel();
        states.wait_for(|s| *s == PipelineState::Cancelling).await.unwrap();
        // second request has not come back yet
        (detector.in_flight(), handle.progress().current_frame)
    };

    let (report, (in_flight, frames_done)) = tokio::join!(analysis.run(), observer);
    let report = report.unwrap();

    assert_eq!(in_flight, 1);
    assert_eq!(frames_done, 1);
    assert!(report.is_cancelled());
    // the settled response is kept, nothing new is started
    assert_eq!(report.results.len(), 2);
    assert_eq!(detector.calls(), 2);
    assert_eq!(counters.closes(), 1);
}

#[tokio::test]
async fn test_cancel_between_prepare_and_run_is_honored() {
    let source = CountingSource::file(5.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    analysis.prepare().await.unwrap();
    analysis.handle().cancel();
    let report = analysis.run().await.unwrap();

    assert!(report.is_cancelled());
    assert!(report.results.is_empty());
    assert_eq!(detector.calls(), 0);
    assert_eq!((counters.opens(), counters.closes()), (1, 1));

    // the next run gets a fresh token
    let report = analysis.run().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.results.len(), 5);
}

#[tokio::test]
async fn test_detection_failure_is_recorded_as_empty_result() {
    let source = CountingSource::file(20.0);
    let detector = Arc::new(ScriptedDetector::new().failing_call(7));
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector).unwrap();

    let report = analysis.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.results.len(), 20);
    assert!(report.results[6].detections.is_empty());
    assert!(report.results[6].is_failed());
    assert!(report.results[6].frame.is_some());
    assert!(report
        .results
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 6)
        .all(|(_, r)| r.detections.len() == 1));
    assert_eq!(report.failed_frames(), 1);
    assert_eq!(report.summary.count("attentive"), 19);
}

#[tokio::test]
async fn test_capture_failure_is_recorded_and_skipped() {
    let source = CountingSource::file(5.0).failing_capture(3);
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let report = analysis.run().await.unwrap();

    assert_eq!(report.results.len(), 5);
    assert!(report.results[2].is_failed());
    assert!(report.results[2].frame.is_none());
    assert_eq!(detector.calls(), 4);
}

#[tokio::test]
async fn test_source_unavailable_is_fatal_and_released() {
    let source = CountingSource::file(10.0).failing_open();
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let err = analysis.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::SourceUnavailable(_)));
    assert!(err.is_fatal());
    assert!(matches!(
        analysis.state(),
        PipelineState::Failed(FailureReason::SourceUnavailable(_))
    ));
    assert_eq!(counters.opens(), 1);
    assert_eq!(counters.closes(), 1);
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn test_duration_exceeded_never_touches_network() {
    let source = CountingSource::file(75.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector.clone()).unwrap();

    let err = analysis.run().await.unwrap_err();

    assert!(matches!(err, PipelineError::DurationExceeded { duration, limit } if duration == 75.0 && limit == 60.0));
    assert_eq!(detector.calls(), 0);
    assert_eq!(counters.closes(), 1);
    assert!(analysis.results().is_empty());
}

#[tokio::test]
async fn test_duration_limit_can_be_lifted() {
    let source = CountingSource::file(75.0);
    let detector = Arc::new(ScriptedDetector::new());
    let config = PipelineConfig::new("42", SamplingRate::new(0.2).unwrap()).with_max_duration(None);
    let mut analysis = FrameAnalysis::new(config, source, detector).unwrap();

    let report = analysis.run().await.unwrap();
    assert_eq!(report.results.len(), 15);
}

#[tokio::test]
async fn test_every_run_releases_once() {
    let source = CountingSource::file(3.0);
    let counters = source.counters();
    let detector = Arc::new(ScriptedDetector::new().cancelling_on_call(2));
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector).unwrap();

    assert!(analysis.run().await.unwrap().is_cancelled());
    assert_eq!((counters.opens(), counters.closes()), (1, 1));

    let report = analysis.run().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.results.len(), 3);
    assert_eq!((counters.opens(), counters.closes()), (2, 2));

    drop(analysis);
    assert_eq!(counters.closes(), 2);
}

#[tokio::test]
async fn test_visualization_resolved_against_api_base() {
    let source = CountingSource::file(1.0);
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector).unwrap();

    let report = analysis.run().await.unwrap();
    assert_eq!(
        report.results[0].visualization_url.as_deref(),
        Some("http://127.0.0.1:7000/vis/1.jpg")
    );
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let source = CountingSource::file(2.0);
    let detector = Arc::new(ScriptedDetector::new());
    let mut analysis = FrameAnalysis::new(config(1.0), source, detector).unwrap();
    let handle = analysis.handle();

    assert_eq!(handle.state(), PipelineState::Idle);
    analysis.prepare().await.unwrap();
    assert_eq!(handle.state(), PipelineState::SourceReady);
    analysis.run().await.unwrap();
    assert_eq!(handle.state(), PipelineState::Completed);
    assert_eq!(handle.progress().percent, 100);
}

#[test]
fn test_invalid_config_rejected() {
    let detector = Arc::new(ScriptedDetector::new());
    let config = PipelineConfig::new("", SamplingRate::default());
    assert!(FrameAnalysis::new(config, CountingSource::file(1.0), detector).is_err());
}
