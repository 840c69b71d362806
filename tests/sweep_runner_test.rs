//! Sweep orchestration against the mock transport.

mod common;

use common::{expected_wire, runner, script_dir, session};
use tsp_daq::adapters::MockTransport;
use tsp_daq::error::{BufferError, BufferParseError, SweepError};
use tsp_daq::instrument::{BufferChannel, ScriptDescriptor, SessionState};
use tsp_daq::measurement::{CancelToken, MeasurementKind, SweepRequest, SweepStage};

#[tokio::test]
async fn test_iv_sweep_wire_sequence() {
    let dir = script_dir();
    let runner = runner(&dir);
    let mock = MockTransport::ofet_demo(11);
    let mut session = session(&mock);

    let result = runner
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::IvSweep, "S1"),
            &CancelToken::new(),
            |_| {},
        )
        .await
        .unwrap();

    // loadscript + 3 lines + endscript, run, two buffer dumps
    let log = mock.call_log();
    assert_eq!(log.len(), 3 + 2 + 1 + 2);
    assert_eq!(log, expected_wire(&runner, MeasurementKind::IvSweep));

    let table = result.step("iv-sweep").unwrap();
    assert_eq!(table.row_count(), 11);
    assert_eq!(table.names(), vec!["Channel Voltage [V]", "Channel Current [A]"]);
    assert_eq!(result.sample_id, "S1");
    assert!(result.finished_at >= result.started_at);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_column_names_follow_declared_channels() {
    let dir = script_dir();
    let runner = runner(&dir);

    for kind in MeasurementKind::ALL {
        let mock = MockTransport::ofet_demo(5);
        let mut session = session(&mock);
        let result = runner
            .run(&mut session, &SweepRequest::new(kind, "S2"), &CancelToken::new(), |_| {})
            .await
            .unwrap();

        for (step, expected) in result.steps.iter().zip(runner.catalog().steps(kind)) {
            let declared: Vec<String> = expected
                .descriptor
                .channels
                .iter()
                .map(|c| c.name.to_string())
                .collect();
            assert_eq!(step.table.names(), declared);
            assert_eq!(step.table.row_count(), 5);
        }
    }
}

#[tokio::test]
async fn test_transfer_runs_forward_then_reverse() {
    let dir = script_dir();
    let runner = runner(&dir);
    let mock = MockTransport::ofet_demo(7);
    let mut session = session(&mock);
    let mut progress = Vec::new();

    let result = runner
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::Transfer, "S3"),
            &CancelToken::new(),
            |p| progress.push((p.step_label.clone(), p.stage)),
        )
        .await
        .unwrap();

    let labels: Vec<&str> = result.steps.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["neg-pos-transfer", "pos-neg-transfer"]);
    assert_eq!(mock.call_log(), expected_wire(&runner, MeasurementKind::Transfer));

    // Every stage of every step is announced once, in order
    let stages = [
        SweepStage::Loading,
        SweepStage::Running,
        SweepStage::Reading,
        SweepStage::Assembling,
    ];
    let expected: Vec<(String, SweepStage)> = ["neg-pos-transfer", "pos-neg-transfer"]
        .iter()
        .flat_map(|label| stages.iter().map(move |s| (label.to_string(), *s)))
        .collect();
    assert_eq!(progress, expected);
}

#[tokio::test]
async fn test_errored_session_is_rejected_before_loading() {
    let dir = script_dir();
    let mock = MockTransport::ofet_demo(5);
    let mut session = session(&mock);

    mock.inject_next_failure();
    assert!(session.write("smua.reset()").await.is_err());
    assert_eq!(session.state(), SessionState::Error);
    mock.clear_log();

    let err = runner(&dir)
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::Output, "S4"),
            &CancelToken::new(),
            |_| panic!("no stage should start"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SweepError::Connection(_)));
    assert!(mock.call_log().is_empty());
}

#[tokio::test]
async fn test_run_failure_is_tagged_running() {
    let dir = script_dir();
    let mock = MockTransport::ofet_demo(5);
    mock.fail_on("script.anonymous.run");
    let mut session = session(&mock);

    let err = runner(&dir)
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::Output, "S5"),
            &CancelToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(SweepStage::Running));
    match &err {
        SweepError::Running { step, .. } => assert_eq!(step, "output"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Error);
    // Nothing after the failed command
    assert_eq!(mock.call_log().last().map(String::as_str), Some("script.anonymous.run()"));
}

#[tokio::test]
async fn test_mismatched_buffers_are_tagged_reading() {
    let dir = script_dir();
    let mock = MockTransport::new()
        .with_response(
            "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.sourcevalues)",
            "2.0,1.5,1.0",
        )
        .with_response(
            "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)",
            "0.0001,0.0002",
        );
    let mut session = session(&mock);

    let err = runner(&dir)
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::IvSweep, "S6"),
            &CancelToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SweepError::Reading {
            source: BufferError::Parse(BufferParseError::LengthMismatch {
                expected: 3,
                found: 2,
                ..
            }),
            ..
        }
    ));
    // A parse failure is not a link failure
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_empty_buffers_need_permission() {
    let dir = script_dir();
    let empty = || {
        MockTransport::new()
            .with_response("printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.sourcevalues)", "")
            .with_response("printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)", "")
    };
    let runner = runner(&dir);

    let mut strict = session(&empty());
    let err = runner
        .run(
            &mut strict,
            &SweepRequest::new(MeasurementKind::IvSweep, "S7"),
            &CancelToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SweepError::Reading {
            source: BufferError::Parse(BufferParseError::Empty),
            ..
        }
    ));

    let mut lenient = session(&empty());
    let result = runner
        .run(
            &mut lenient,
            &SweepRequest::new(MeasurementKind::IvSweep, "S7").allow_empty(true),
            &CancelToken::new(),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(result.total_rows(), 0);
}

#[tokio::test]
async fn test_cancel_between_stages_stops_before_readback() {
    let dir = script_dir();
    let mock = MockTransport::ofet_demo(5);
    let mut session = session(&mock);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();

    let err = runner(&dir)
        .run(
            &mut session,
            &SweepRequest::new(MeasurementKind::IvSweep, "S8"),
            &cancel,
            |p| {
                if p.stage == SweepStage::Running {
                    trigger.cancel();
                }
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(err.stage(), Some(SweepStage::Reading));
    assert!(!mock.call_log().iter().any(|l| l.starts_with("printbuffer")));
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_ad_hoc_script_from_file() {
    let dir = script_dir();
    let path = dir.path().join("custom.tsp");
    std::fs::write(&path, "smua.reset()\nsmua.source.levelv = 1\n").unwrap();

    let channels: Vec<BufferChannel> = ["smua:readings", "Drain Voltage [V]=smua:sourcevalues"]
        .iter()
        .map(|c| c.parse().unwrap())
        .collect();
    let descriptor = ScriptDescriptor::from_file(&path, channels);

    let mock = MockTransport::ofet_demo(4);
    let mut session = session(&mock);
    let mut stages = Vec::new();

    let step = runner(&dir)
        .run_descriptor(&mut session, &descriptor, false, &CancelToken::new(), |p| {
            stages.push(p.stage)
        })
        .await
        .unwrap();

    assert_eq!(step.label, "custom.tsp");
    assert_eq!(step.table.names(), vec!["smua readings", "Drain Voltage [V]"]);
    assert_eq!(step.table.row_count(), 4);
    assert_eq!(
        mock.call_log(),
        vec![
            "loadscript",
            "smua.reset()",
            "smua.source.levelv = 1",
            "endscript",
            "script.anonymous.run()",
            "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.readings)",
            "printbuffer(1, smua.nvbuffer1.n, smua.nvbuffer1.sourcevalues)",
        ]
    );
    assert_eq!(stages.len(), 4);
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_ad_hoc_missing_script_sends_nothing() {
    let dir = script_dir();
    let descriptor = ScriptDescriptor::from_file(
        dir.path().join("absent.tsp"),
        vec!["smua:readings".parse().unwrap()],
    );
    let mock = MockTransport::ofet_demo(4);
    let mut session = session(&mock);

    let err = runner(&dir)
        .run_descriptor(&mut session, &descriptor, false, &CancelToken::new(), |_| {})
        .await
        .unwrap_err();

    match &err {
        SweepError::Loading { step, source } => {
            assert_eq!(step, "absent.tsp");
            assert!(source.is_source_missing());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(mock.call_log().is_empty());
}
