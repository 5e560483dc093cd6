//! Full lifecycle tests for the ASCII backend against the emulated
//! controller, plus reply classification against recorded lines.

use linstage_core::config::AsciiConfig;
use linstage_core::error::StageError;
use linstage_core::mock::MockAsciiDevice;
use linstage_core::protocol::{AsciiReply, ReplyStatus};
use linstage_core::stage::{AsciiStage, Stage};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(endpoint: String) -> AsciiConfig {
    init_logging();
    AsciiConfig {
        port: endpoint,
        steps_per_mm: 1000.0,
        reply_timeout: 5.0,
        poll_frequency: 20.0,
        move_timeout: 5.0,
        ..AsciiConfig::default()
    }
}

async fn connected_stage(device: &MockAsciiDevice) -> AsciiStage {
    let mut stage = AsciiStage::new(config(device.endpoint()));
    stage.connect().await.unwrap();
    stage
}

#[tokio::test]
async fn home_then_move_reaches_the_demanded_position() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;

    stage.home().await.unwrap();
    stage.move_absolute(10.0).await.unwrap();

    let position = stage.query_position().await.unwrap();
    assert!((position - 10.0).abs() < 0.01, "position was {position}");
    assert_eq!(device.position().await, 10_000);
    device.stop();
}

#[tokio::test]
async fn relative_moves_accumulate() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;

    stage.home().await.unwrap();
    stage.move_absolute(10.0).await.unwrap();
    stage.move_relative(2.5).await.unwrap();

    let position = stage.query_position().await.unwrap();
    assert!((position - 12.5).abs() < 0.01, "position was {position}");
    device.stop();
}

#[tokio::test]
async fn rejected_moves_surface_the_device_reason() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;
    stage.home().await.unwrap();

    let err = stage.move_absolute(-5.0).await.unwrap_err();
    match err {
        StageError::Rejected(reason) => {
            assert!(reason.contains("data provided"), "reason was {reason:?}")
        }
        other => panic!("expected a rejection, got {other}"),
    }
    // The rejected move must not have touched the axis.
    assert_eq!(device.position().await, 0);
    device.stop();
}

#[tokio::test]
async fn update_reports_position_and_idle_status() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;

    stage.move_absolute(3.0).await.unwrap();
    let report = stage.update().await.unwrap();
    assert!((report.position - 3.0).abs() < 0.01);
    assert_eq!(report.status, "IDLE");
    device.stop();
}

#[tokio::test]
async fn stop_settles_the_axis() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;
    stage.home().await.unwrap();
    stage.stop().await.unwrap();
    assert!(stage.is_connected().await);
    device.stop();
}

#[tokio::test]
async fn connect_twice_is_already_connected() {
    let device = MockAsciiDevice::start(1).await.unwrap();
    let mut stage = connected_stage(&device).await;
    let err = stage.connect().await.unwrap_err();
    assert!(matches!(err, StageError::AlreadyConnected));
    stage.disconnect().await.unwrap();
    assert!(!stage.is_connected().await);
    device.stop();
}

#[test]
fn recorded_reply_lines_classify_four_ways() {
    let cases: [(&str, fn(&ReplyStatus) -> bool); 4] = [
        ("@01 0 OK IDLE -- 0", |s| *s == ReplyStatus::Accepted),
        ("@01 0 OK IDLE WR 0", |s| {
            matches!(s, ReplyStatus::AcceptedWithWarning { reason } if reason.contains("reference position"))
        }),
        ("@01 0 RJ IDLE -- AGAIN", |s| {
            matches!(s, ReplyStatus::Rejected { reason } if reason.contains("send the command again"))
        }),
        ("@01 0 RJ IDLE FS --", |s| {
            matches!(s, ReplyStatus::Rejected { reason } if reason.contains("Stalling"))
        }),
    ];
    for (line, check) in cases {
        let status = AsciiReply::parse(line).unwrap().classify();
        assert!(check(&status), "line {line:?} classified as {status:?}");
    }
}

#[test]
fn bad_axis_rejections_name_the_axis_problem() {
    let reply = AsciiReply::parse("@01 0 RJ IDLE -- BADAXIS").unwrap();
    match reply.classify() {
        ReplyStatus::Rejected { reason } => {
            assert!(reason.contains("axis number greater than the number of axes"))
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}
